// Copyright 2024-2026 The GitVault Authors
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

//! Construction of well-formed (and deliberately malformed) pack streams for
//! tests.

use std::io::Write as _;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use gitvault_lib::object::ObjectType;
use gitvault_lib::object_id::HashAlgorithm;
use gitvault_lib::object_id::ObjectId;

fn type_code(object_type: ObjectType) -> u8 {
    match object_type {
        ObjectType::Commit => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
        ObjectType::Tag => 4,
    }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(vec![], Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn object_header(type_code: u8, len: usize) -> Vec<u8> {
    let mut out = vec![];
    let mut byte = (type_code << 4) | (len & 0x0f) as u8;
    let mut len = len >> 4;
    while len > 0 {
        out.push(byte | 0x80);
        byte = (len & 0x7f) as u8;
        len >>= 7;
    }
    out.push(byte);
    out
}

fn negative_offset(distance: u64) -> Vec<u8> {
    let mut bytes = vec![(distance & 0x7f) as u8];
    let mut distance = distance >> 7;
    while distance > 0 {
        distance -= 1;
        bytes.push(0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Encodes a delta-header varint (little-endian 7-bit groups).
pub fn delta_varint(mut value: u64) -> Vec<u8> {
    let mut out = vec![];
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            return out;
        }
    }
}

/// A minimal delta that copies or inserts whole payloads, enough for pack
/// tests.
pub fn copy_delta(base_len: u64, offset: u64, size: u64) -> Vec<u8> {
    assert!(offset < 0x100 && size < 0x100 && size > 0);
    let mut delta = delta_varint(base_len);
    delta.extend(delta_varint(size));
    delta.extend([0x91, offset as u8, size as u8]);
    delta
}

/// Builds pack v2 byte streams entry by entry.
pub struct PackBuilder {
    algorithm: HashAlgorithm,
    body: Vec<u8>,
    count: u32,
}

impl PackBuilder {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            body: vec![],
            count: 0,
        }
    }

    fn current_offset(&self) -> u64 {
        12 + self.body.len() as u64
    }

    /// Appends a non-delta object; returns its offset for later ofs-deltas.
    pub fn add_object(&mut self, object_type: ObjectType, data: &[u8]) -> u64 {
        let offset = self.current_offset();
        self.body
            .extend(object_header(type_code(object_type), data.len()));
        self.body.extend(deflate(data));
        self.count += 1;
        offset
    }

    /// Appends a ref-delta entry against `base_id`.
    pub fn add_ref_delta(&mut self, base_id: &ObjectId, delta: &[u8]) -> u64 {
        let offset = self.current_offset();
        self.body.extend(object_header(7, delta.len()));
        self.body.extend(base_id.as_bytes());
        self.body.extend(deflate(delta));
        self.count += 1;
        offset
    }

    /// Appends an ofs-delta entry against the object at `base_offset`.
    pub fn add_ofs_delta(&mut self, base_offset: u64, delta: &[u8]) -> u64 {
        let offset = self.current_offset();
        self.body.extend(object_header(6, delta.len()));
        self.body.extend(negative_offset(offset - base_offset));
        self.body.extend(deflate(delta));
        self.count += 1;
        offset
    }

    /// Finishes the pack: header, entries, and the trailer digest.
    pub fn finish(self) -> Vec<u8> {
        let mut pack = vec![];
        pack.extend(b"PACK");
        pack.extend(2u32.to_be_bytes());
        pack.extend(self.count.to_be_bytes());
        pack.extend(&self.body);
        let mut hasher = self.algorithm.hasher();
        hasher.update(&pack);
        pack.extend(hasher.finish().as_bytes());
        pack
    }

    /// Like [`PackBuilder::finish`], but with a corrupted trailer.
    pub fn finish_with_bad_trailer(self) -> Vec<u8> {
        let algorithm = self.algorithm;
        let mut pack = self.finish();
        let len = pack.len();
        let trailer = &mut pack[len - algorithm.id_length()..];
        trailer[0] ^= 0xff;
        pack
    }
}

/// Writes `pack` plus a matching v2 index into `objects/pack/` of a
/// repository, so indexed lookup finds the given `(id, offset)` entries.
pub fn install_pack(
    objects_dir: &std::path::Path,
    algorithm: HashAlgorithm,
    pack: &[u8],
    entries: &[(ObjectId, u64)],
) {
    let pack_dir = objects_dir.join("pack");
    std::fs::create_dir_all(&pack_dir).unwrap();
    std::fs::write(pack_dir.join("pack-test.pack"), pack).unwrap();

    let mut entries: Vec<_> = entries.to_vec();
    entries.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

    let mut index = vec![];
    index.extend([0xff, b't', b'O', b'c']);
    index.extend(2u32.to_be_bytes());
    let mut fanout = [0u32; 256];
    for (id, _) in &entries {
        let first = usize::from(id.as_bytes()[0]);
        for slot in &mut fanout[first..] {
            *slot += 1;
        }
    }
    for slot in fanout {
        index.extend(slot.to_be_bytes());
    }
    for (id, _) in &entries {
        index.extend(id.as_bytes());
    }
    for _ in &entries {
        index.extend(0u32.to_be_bytes());
    }
    for (_, offset) in &entries {
        assert!(*offset < 0x8000_0000);
        index.extend((*offset as u32).to_be_bytes());
    }
    // Trailing pack digest and index digest.
    index.extend(&pack[pack.len() - algorithm.id_length()..]);
    let mut hasher = algorithm.hasher();
    hasher.update(&index);
    let digest = hasher.finish();
    index.extend(digest.as_bytes());
    std::fs::write(pack_dir.join("pack-test.idx"), index).unwrap();
}
