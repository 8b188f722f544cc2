// Copyright 2024 The GitVault Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pack delta application.
//!
//! A delta starts with two varints, the expected base length and the result
//! length, followed by copy and insert opcodes replayed against the base
//! buffer.

use crate::object::StoreError;
use crate::object::StoreResult;

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidDelta(message.into())
}

/// Reads a little-endian base-128 varint.
fn read_varint(delta: &[u8], pos: &mut usize) -> StoreResult<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let &byte = delta
            .get(*pos)
            .ok_or_else(|| invalid("truncated length varint"))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(invalid("length varint does not terminate"));
        }
    }
}

/// Applies `delta` to `base` and returns the reconstructed object content.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> StoreResult<Vec<u8>> {
    let mut pos = 0;
    let declared_base_len = read_varint(delta, &mut pos)?;
    if declared_base_len != base.len() as u64 {
        return Err(invalid(format!(
            "base size mismatch: declared {declared_base_len}, base object has {}",
            base.len()
        )));
    }
    let result_len = read_varint(delta, &mut pos)?;
    let mut out = Vec::with_capacity(usize::try_from(result_len).unwrap_or(0));

    while pos < delta.len() {
        let opcode = delta[pos];
        pos += 1;
        if opcode & 0x80 != 0 {
            // Copy from the base buffer. Bits 0..3 select which offset bytes
            // follow, bits 4..6 which size bytes; both are little-endian with
            // absent bytes reading as zero.
            let mut copy_offset: u64 = 0;
            for i in 0..4 {
                if opcode & (1 << i) != 0 {
                    let &byte = delta
                        .get(pos)
                        .ok_or_else(|| invalid("truncated copy offset"))?;
                    pos += 1;
                    copy_offset |= u64::from(byte) << (i * 8);
                }
            }
            let mut copy_size: u64 = 0;
            for i in 0..3 {
                if opcode & (1 << (i + 4)) != 0 {
                    let &byte = delta
                        .get(pos)
                        .ok_or_else(|| invalid("truncated copy size"))?;
                    pos += 1;
                    copy_size |= u64::from(byte) << (i * 8);
                }
            }
            if copy_size == 0 {
                copy_size = 0x10000;
            }
            let start = usize::try_from(copy_offset)
                .map_err(|_| invalid("copy offset out of range"))?;
            let end = start
                .checked_add(usize::try_from(copy_size).unwrap_or(usize::MAX))
                .ok_or_else(|| invalid("copy range overflows"))?;
            let source = base
                .get(start..end)
                .ok_or_else(|| invalid("copy range outside the base object"))?;
            out.extend_from_slice(source);
        } else if opcode == 0 {
            return Err(invalid("opcode 0 is reserved"));
        } else {
            // Insert the next `opcode` bytes of the delta itself.
            let len = usize::from(opcode);
            let source = delta
                .get(pos..pos + len)
                .ok_or_else(|| invalid("insert runs past the end of the delta"))?;
            pos += len;
            out.extend_from_slice(source);
        }
    }

    if out.len() as u64 != result_len {
        return Err(invalid(format!(
            "result length mismatch: declared {result_len}, produced {}",
            out.len()
        )));
    }
    Ok(out)
}
