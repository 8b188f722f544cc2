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

#![expect(missing_docs)]

//! Pack file reading: bulk ingest, indexed single-object lookup, and the v2
//! index format.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use flate2::read::ZlibDecoder;
use tracing::instrument;

use crate::delta::apply_delta;
use crate::file_util::IoResultExt as _;
use crate::object::GitObject;
use crate::object::ObjectType;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object_id::HashAlgorithm;
use crate::object_id::HexPrefix;
use crate::object_id::ObjectId;
use crate::object_id::PrefixResolution;
use crate::object_store::ObjectStore;
use crate::stream_util::HashingReader;
use crate::stream_util::SingleByteReader;
use crate::stream_util::SlicedReader;

/// Upper bound on delta nesting. Chains in real packs are shallow; anything
/// deeper is treated as a malformed (or adversarial) pack.
pub const MAX_DELTA_CHAIN: usize = 50;

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;
const INDEX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const INDEX_VERSION: u32 = 2;

const TYPE_OFS_DELTA: u8 = 6;
const TYPE_REF_DELTA: u8 = 7;

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidPack(message.into())
}

fn map_read_err(err: io::Error, context: &str) -> StoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        invalid(format!("truncated {context}"))
    } else {
        StoreError::Io(err)
    }
}

fn read_u8(reader: &mut impl Read, context: &str) -> StoreResult<u8> {
    let mut buf = [0; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|err| map_read_err(err, context))?;
    Ok(buf[0])
}

fn read_u32_be(reader: &mut impl Read, context: &str) -> StoreResult<u32> {
    let mut buf = [0; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|err| map_read_err(err, context))?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads the per-object `type + size` header: bits 6..4 of the first byte are
/// the type, the low 4 bits start the size, and continuation bytes add 7 bits
/// each.
fn read_object_header(reader: &mut impl Read) -> StoreResult<(u8, u64)> {
    let mut byte = read_u8(reader, "object header")?;
    let type_code = (byte >> 4) & 0x7;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = read_u8(reader, "object header")?;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if shift > 64 {
            return Err(invalid("object size varint does not terminate"));
        }
    }
    Ok((type_code, size))
}

/// Reads the ofs-delta negative offset, which uses Git's alternate varint
/// where each continuation adds one to the accumulated value first.
fn read_negative_offset(reader: &mut impl Read) -> StoreResult<u64> {
    let mut byte = read_u8(reader, "delta offset")?;
    let mut offset = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = read_u8(reader, "delta offset")?;
        offset = offset
            .checked_add(1)
            .and_then(|offset| offset.checked_mul(128))
            .ok_or_else(|| invalid("delta offset overflows"))?
            | u64::from(byte & 0x7f);
    }
    Ok(offset)
}

/// Inflates one zlib stream, checking the result against the declared size.
///
/// The source is wrapped one byte at a time so the inflater cannot consume
/// past the stream's terminator; the next pack entry begins at the very next
/// byte of `reader`.
fn inflate_exact(reader: &mut impl Read, declared_len: u64) -> StoreResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(SingleByteReader::new(reader));
    let mut out = Vec::with_capacity(usize::try_from(declared_len).unwrap_or(0));
    decoder.read_to_end(&mut out).map_err(|err| {
        if err.kind() == io::ErrorKind::InvalidInput || err.kind() == io::ErrorKind::InvalidData {
            invalid("corrupt zlib stream")
        } else {
            map_read_err(err, "compressed object body")
        }
    })?;
    if out.len() as u64 != declared_len {
        return Err(invalid(format!(
            "object size mismatch: header declares {declared_len}, inflated {}",
            out.len()
        )));
    }
    Ok(out)
}

fn object_type_from_code(type_code: u8) -> Option<ObjectType> {
    match type_code {
        1 => Some(ObjectType::Commit),
        2 => Some(ObjectType::Tree),
        3 => Some(ObjectType::Blob),
        4 => Some(ObjectType::Tag),
        _ => None,
    }
}

/// Reads a single object out of a pack file at a known offset, resolving
/// deltas as needed.
///
/// Ref-delta bases go through `resolve_base` (the object store), ofs-delta
/// bases recurse within the same pack. `depth` bounds the delta chain.
pub(crate) fn read_object_at<F>(
    pack_path: &Path,
    algorithm: HashAlgorithm,
    offset: u64,
    depth: usize,
    resolve_base: &F,
) -> StoreResult<(ObjectType, Vec<u8>)>
where
    F: Fn(&ObjectId, usize) -> StoreResult<GitObject>,
{
    if depth > MAX_DELTA_CHAIN {
        return Err(StoreError::InvalidDelta(format!(
            "delta chain is deeper than {MAX_DELTA_CHAIN}"
        )));
    }

    let mut file = File::open(pack_path).context(pack_path)?;
    file.seek(SeekFrom::Start(offset)).context(pack_path)?;
    let (type_code, size) = read_object_header(&mut file)?;
    if let Some(object_type) = object_type_from_code(type_code) {
        let data = inflate_exact(&mut file, size)?;
        return Ok((object_type, data));
    }
    match type_code {
        TYPE_OFS_DELTA => {
            let negative_offset = read_negative_offset(&mut file)?;
            let base_offset = offset
                .checked_sub(negative_offset)
                .ok_or_else(|| invalid("ofs-delta points before the start of the pack"))?;
            let delta = inflate_exact(&mut file, size)?;
            let (object_type, base) =
                read_object_at(pack_path, algorithm, base_offset, depth + 1, resolve_base)?;
            Ok((object_type, apply_delta(&base, &delta)?))
        }
        TYPE_REF_DELTA => {
            let mut base_id = vec![0; algorithm.id_length()];
            file.read_exact(&mut base_id)
                .map_err(|err| map_read_err(err, "ref-delta base id"))?;
            let delta = inflate_exact(&mut file, size)?;
            let base = resolve_base(&ObjectId::new(base_id), depth + 1)?;
            Ok((base.object_type, apply_delta(&base.data, &delta)?))
        }
        _ => Err(invalid(format!("unsupported object type {type_code}"))),
    }
}

/// Streaming bulk ingest of a pack received from a transport.
///
/// The source is spooled to an unlinked temp file (packs must be walked
/// twice: once to validate the trailer, once to decode). Every decoded object
/// is written to the loose store, so delta chains disappear at rest. Returns
/// the ids in pack order.
#[instrument(skip_all)]
pub(crate) fn ingest_pack(store: &ObjectStore, source: &mut dyn Read) -> StoreResult<Vec<ObjectId>> {
    let mut file = tempfile::tempfile_in(store.objects_dir())
        .context(store.objects_dir())?;
    io::copy(source, &mut file).map_err(|err| map_read_err(err, "pack stream"))?;
    ingest_pack_file(store, &mut file)
}

fn ingest_pack_file(store: &ObjectStore, file: &mut File) -> StoreResult<Vec<ObjectId>> {
    let algorithm = store.algorithm();
    let id_length = algorithm.id_length() as u64;
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < 12 + id_length {
        return Err(invalid("shorter than header and trailer"));
    }
    let payload_len = file_len - id_length;

    // First pass: validate the header and the trailer digest, which covers
    // everything except the trailer itself.
    file.seek(SeekFrom::Start(0))?;
    let object_count = {
        let mut hashing = HashingReader::new(algorithm, &mut *file);
        let mut magic = [0; 4];
        hashing
            .read_exact(&mut magic)
            .map_err(|err| map_read_err(err, "pack header"))?;
        if &magic != PACK_MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = read_u32_be(&mut hashing, "pack header")?;
        if version != PACK_VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }
        let object_count = read_u32_be(&mut hashing, "pack header")?;
        let mut remaining = payload_len - hashing.bytes_read();
        let mut buf = [0; 1 << 14];
        while remaining > 0 {
            let chunk = buf.len().min(usize::try_from(remaining).unwrap_or(buf.len()));
            let n = hashing
                .read(&mut buf[..chunk])
                .map_err(|err| map_read_err(err, "pack payload"))?;
            if n == 0 {
                return Err(invalid("truncated pack payload"));
            }
            remaining -= n as u64;
        }
        let computed = hashing.finalize_hash();
        let mut trailer = vec![0; algorithm.id_length()];
        hashing
            .read_exact(&mut trailer)
            .map_err(|err| map_read_err(err, "pack trailer"))?;
        if computed.as_bytes() != trailer {
            return Err(invalid(format!(
                "trailer hash mismatch: computed {computed}, stored {}",
                ObjectId::new(trailer)
            )));
        }
        object_count
    };

    // Second pass: decode objects sequentially. The slice keeps the decoder
    // away from the trailer.
    let mut slice = SlicedReader::new(&mut *file, 12, payload_len - 12)?;
    let mut by_offset: HashMap<u64, GitObject> = HashMap::new();
    let mut by_id: HashMap<ObjectId, GitObject> = HashMap::new();
    let mut ids = Vec::with_capacity(object_count as usize);
    for _ in 0..object_count {
        let offset = 12 + slice.position();
        let (type_code, size) = read_object_header(&mut slice)?;
        let object = if let Some(object_type) = object_type_from_code(type_code) {
            let data = inflate_exact(&mut slice, size)?;
            GitObject::new(object_type, data)
        } else if type_code == TYPE_OFS_DELTA {
            let negative_offset = read_negative_offset(&mut slice)?;
            let base_offset = offset
                .checked_sub(negative_offset)
                .ok_or_else(|| invalid("ofs-delta points before the start of the pack"))?;
            let delta = inflate_exact(&mut slice, size)?;
            let base = by_offset
                .get(&base_offset)
                .ok_or_else(|| invalid(format!("ofs-delta base at unknown offset {base_offset}")))?;
            GitObject::new(base.object_type, apply_delta(&base.data, &delta)?)
        } else if type_code == TYPE_REF_DELTA {
            let mut base_id = vec![0; algorithm.id_length()];
            slice
                .read_exact(&mut base_id)
                .map_err(|err| map_read_err(err, "ref-delta base id"))?;
            let base_id = ObjectId::new(base_id);
            let delta = inflate_exact(&mut slice, size)?;
            let base = match by_id.get(&base_id) {
                Some(base) => base.clone(),
                // Thin packs may reference bases that predate the pack.
                None => store.read_object_impl(&base_id, 0)?,
            };
            GitObject::new(base.object_type, apply_delta(&base.data, &delta)?)
        } else {
            return Err(invalid(format!("unsupported object type {type_code}")));
        };

        let id = store.write_object_impl(object.object_type, &object.data)?;
        by_offset.insert(offset, object.clone());
        by_id.insert(id.clone(), object);
        ids.push(id);
    }
    if slice.position() != slice.len() {
        return Err(invalid("trailing bytes after the last object"));
    }
    tracing::debug!(objects = ids.len(), "ingested pack");
    Ok(ids)
}

/// Parsed form of a Git v2 pack index.
#[derive(Debug)]
pub struct PackIndex {
    id_length: usize,
    // Object names, flattened and sorted; offsets are parallel to it.
    names: Vec<u8>,
    offsets: Vec<u64>,
}

impl PackIndex {
    pub fn load(path: &Path, algorithm: HashAlgorithm) -> StoreResult<Self> {
        let data = std::fs::read(path).context(path)?;
        Self::parse(&data, algorithm)
    }

    fn parse(data: &[u8], algorithm: HashAlgorithm) -> StoreResult<Self> {
        let id_length = algorithm.id_length();
        let mut reader = data;
        let mut magic = [0; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|err| map_read_err(err, "index header"))?;
        if magic != INDEX_MAGIC {
            return Err(invalid("bad index magic"));
        }
        let version = read_u32_be(&mut reader, "index header")?;
        if version != INDEX_VERSION {
            return Err(invalid(format!("unsupported index version {version}")));
        }

        let mut fanout = [0u32; 256];
        for slot in &mut fanout {
            *slot = read_u32_be(&mut reader, "index fanout")?;
        }
        if !fanout.is_sorted() {
            return Err(invalid("index fanout is not monotonic"));
        }
        let count = fanout[255] as usize;

        let mut names = vec![0; count * id_length];
        reader
            .read_exact(&mut names)
            .map_err(|err| map_read_err(err, "index names"))?;
        // CRC32 table, unused here.
        let mut crcs = vec![0; count * 4];
        reader
            .read_exact(&mut crcs)
            .map_err(|err| map_read_err(err, "index checksums"))?;

        let mut small_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            small_offsets.push(read_u32_be(&mut reader, "index offsets")?);
        }
        // What remains before the two trailing digests is the large-offset
        // table.
        let trailer_len = 2 * id_length;
        if reader.len() < trailer_len {
            return Err(invalid("truncated index trailer"));
        }
        let large_table = &reader[..reader.len() - trailer_len];

        let mut offsets = Vec::with_capacity(count);
        for small in small_offsets {
            if small & 0x8000_0000 == 0 {
                offsets.push(u64::from(small));
            } else {
                let index = (small & 0x7fff_ffff) as usize;
                let bytes = large_table
                    .get(index * 8..index * 8 + 8)
                    .ok_or_else(|| invalid("large offset outside the table"))?;
                offsets.push(u64::from_be_bytes(bytes.try_into().unwrap()));
            }
        }

        Ok(Self {
            id_length,
            names,
            offsets,
        })
    }

    pub fn object_count(&self) -> usize {
        self.offsets.len()
    }

    fn name_at(&self, index: usize) -> &[u8] {
        &self.names[index * self.id_length..(index + 1) * self.id_length]
    }

    /// Returns the pack offset of `id`, if the pack contains it.
    pub fn lookup(&self, id: &ObjectId) -> Option<u64> {
        if id.as_bytes().len() != self.id_length {
            return None;
        }
        let index = self.position_of(id.as_bytes())?;
        Some(self.offsets[index])
    }

    fn position_of(&self, id: &[u8]) -> Option<usize> {
        let count = self.object_count();
        let mut low = 0;
        let mut high = count;
        while low < high {
            let mid = (low + high) / 2;
            match self.name_at(mid).cmp(id) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Resolves an abbreviated id against the sorted name table.
    pub fn resolve_prefix(&self, prefix: &HexPrefix) -> PrefixResolution<ObjectId> {
        let count = self.object_count();
        let min = prefix.min_prefix_bytes();
        // Lower bound for the prefix.
        let mut low = 0;
        let mut high = count;
        while low < high {
            let mid = (low + high) / 2;
            if self.name_at(mid) < min {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        let mut index = low;

        let mut result = PrefixResolution::NoMatch;
        while index < count {
            let id = ObjectId::from_bytes(self.name_at(index));
            if !prefix.matches(&id) {
                break;
            }
            result = result.plus(&PrefixResolution::SingleMatch(id));
            if result == PrefixResolution::AmbiguousMatch {
                break;
            }
            index += 1;
        }
        result
    }
}
