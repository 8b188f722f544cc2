// Copyright 2023-2026 The GitVault Authors
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

//! The content-addressed object store: loose files, pack lookup, and the
//! identity cache.

use std::fmt::Debug;
use std::fmt::Formatter;
use std::fs::File;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Poll;

use clru::CLruCache;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;
use tokio::io::ReadBuf;

use crate::file_util::BlockingAsyncReader;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::file_util::create_or_reuse_dir;
use crate::file_util::persist_content_addressed_temp_file;
use crate::object::GitObject;
use crate::object::ObjectType;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object_id::HashAlgorithm;
use crate::object_id::HexPrefix;
use crate::object_id::ObjectId;
use crate::object_id::PrefixResolution;
use crate::pack;
use crate::pack::PackIndex;
use crate::stream_util::DelimitedReader;

// Objects are immutable and content-addressed, so the cache never goes stale;
// the bound only caps memory.
const OBJECT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug)]
struct PackEntry {
    pack_path: PathBuf,
    index: PackIndex,
}

/// Streamed blob contents plus the framing metadata.
pub struct BlobReader {
    object_type: ObjectType,
    length: u64,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl BlobReader {
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

/// Reads and writes the `objects/` half of a repository.
///
/// Lookup order is identity cache, then loose file, then pack indexes. All
/// writes are loose, via a temp file and an atomic rename.
pub struct ObjectStore {
    objects_dir: PathBuf,
    algorithm: HashAlgorithm,
    cache: Mutex<CLruCache<ObjectId, GitObject>>,
    // Lazily scanned `pack-*.idx` files; replaced wholesale on invalidation.
    pack_entries: Mutex<Option<Arc<Vec<PackEntry>>>>,
}

impl Debug for ObjectStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("ObjectStore")
            .field("objects_dir", &self.objects_dir)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ObjectStore {
    pub fn new(objects_dir: PathBuf, algorithm: HashAlgorithm) -> Self {
        Self {
            objects_dir,
            algorithm,
            cache: Mutex::new(CLruCache::new(OBJECT_CACHE_CAPACITY.try_into().unwrap())),
            pack_entries: Mutex::new(None),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub(crate) fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    fn loose_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    fn validate_id(&self, id: &ObjectId) -> StoreResult<()> {
        if id.as_bytes().len() != self.algorithm.id_length() {
            return Err(StoreError::InvalidArgument(format!(
                "object id {} has {} bytes, this repository uses {}-byte ids",
                id,
                id.as_bytes().len(),
                self.algorithm.id_length()
            )));
        }
        Ok(())
    }

    /// Reads an object, consulting the identity cache first.
    pub async fn read_object(&self, id: &ObjectId) -> StoreResult<GitObject> {
        self.read_object_impl(id, 0)
    }

    /// Reads an object without touching the identity cache. Useful for large
    /// blobs that would otherwise pin memory.
    pub async fn read_object_uncached(&self, id: &ObjectId) -> StoreResult<GitObject> {
        self.validate_id(id)?;
        if let Some(object) = self.read_loose_object(id)? {
            return Ok(object);
        }
        self.read_packed_object(id, 0)
    }

    /// Returns whether the store can resolve `id`, without decoding it.
    pub async fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        self.validate_id(id)?;
        if self.cache.lock().unwrap().get(id).is_some() {
            return Ok(true);
        }
        if self.loose_path(id).is_file() {
            return Ok(true);
        }
        let entries = self.pack_entry_list()?;
        Ok(entries.iter().any(|entry| entry.index.lookup(id).is_some()))
    }

    pub(crate) fn read_object_impl(&self, id: &ObjectId, depth: usize) -> StoreResult<GitObject> {
        self.validate_id(id)?;
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(object) = cache.get(id).cloned() {
                return Ok(object);
            }
        }
        let object = if let Some(object) = self.read_loose_object(id)? {
            object
        } else {
            self.read_packed_object(id, depth)?
        };
        let mut cache = self.cache.lock().unwrap();
        let _ = cache.put(id.clone(), object.clone());
        Ok(object)
    }

    fn read_packed_object(&self, id: &ObjectId, depth: usize) -> StoreResult<GitObject> {
        let entries = self.pack_entry_list()?;
        for entry in entries.iter() {
            if let Some(offset) = entry.index.lookup(id) {
                let (object_type, data) = pack::read_object_at(
                    &entry.pack_path,
                    self.algorithm,
                    offset,
                    depth,
                    &|base_id, depth| self.read_object_impl(base_id, depth),
                )?;
                return Ok(GitObject::new(object_type, data));
            }
        }
        Err(StoreError::ObjectNotFound(id.clone()))
    }

    fn read_loose_object(&self, id: &ObjectId) -> StoreResult<Option<GitObject>> {
        let path = self.loose_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Path(PathError {
                    path,
                    source: err,
                }));
            }
        };
        let mut reader = DelimitedReader::new(ZlibDecoder::new(file));
        let (object_type, length) = parse_loose_header(&mut reader)?;
        let mut data = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        reader.read_to_end(&mut data).map_err(map_loose_err)?;
        if data.len() as u64 != length {
            return Err(StoreError::InvalidObject {
                object_type: object_type.name().to_owned(),
                message: format!(
                    "header declares {length} bytes, content has {}",
                    data.len()
                ),
            });
        }
        Ok(Some(GitObject::new(object_type, data)))
    }

    /// Writes an object as a loose file and returns its id.
    ///
    /// Idempotent: writing the same `(type, content)` twice produces the same
    /// id, and an already-present object is not rewritten.
    pub async fn write_object(&self, object_type: ObjectType, data: &[u8]) -> StoreResult<ObjectId> {
        self.write_object_impl(object_type, data)
    }

    pub(crate) fn write_object_impl(
        &self,
        object_type: ObjectType,
        data: &[u8],
    ) -> StoreResult<ObjectId> {
        let header = loose_header(object_type, data.len() as u64);
        let mut hasher = self.algorithm.hasher();
        hasher.update(&header);
        hasher.update(data);
        let id = hasher.finish();

        let path = self.loose_path(&id);
        if path.is_file() {
            return Ok(id);
        }
        let dir = path.parent().unwrap();
        create_or_reuse_dir(dir).context(dir)?;

        let temp_file = NamedTempFile::new_in(dir).context(dir)?;
        let mut encoder = ZlibEncoder::new(temp_file.as_file(), Compression::default());
        encoder.write_all(&header).context(&path)?;
        encoder.write_all(data).context(&path)?;
        encoder.finish().context(&path)?;
        persist_content_addressed_temp_file(temp_file, &path).context(&path)?;

        let object = GitObject::new(object_type, data.to_vec());
        let _ = self.cache.lock().unwrap().put(id.clone(), object);
        tracing::trace!(%id, ?object_type, "wrote loose object");
        Ok(id)
    }

    /// Opens a blob (or any object) as a stream without caching its contents.
    ///
    /// Loose objects decompress lazily from the file; packed objects are
    /// materialized first because delta resolution needs random access.
    pub async fn read_object_streamed(&self, id: &ObjectId) -> StoreResult<BlobReader> {
        self.validate_id(id)?;
        let path = self.loose_path(id);
        match File::open(&path) {
            Ok(file) => {
                let mut reader = DelimitedReader::new(ZlibDecoder::new(file));
                let (object_type, length) = parse_loose_header(&mut reader)?;
                Ok(BlobReader {
                    object_type,
                    length,
                    reader: Box::pin(BlockingAsyncReader::new(reader.take(length))),
                })
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let object = self.read_packed_object(id, 0)?;
                Ok(BlobReader {
                    object_type: object.object_type,
                    length: object.data.len() as u64,
                    reader: Box::pin(BlockingAsyncReader::new(Cursor::new(object.data))),
                })
            }
            Err(err) => Err(StoreError::Path(PathError {
                path,
                source: err,
            })),
        }
    }

    /// Ingests a pack stream, writing every contained object as loose.
    pub async fn ingest_pack(&self, source: &mut dyn Read) -> StoreResult<Vec<ObjectId>> {
        let ids = pack::ingest_pack(self, source)?;
        // The transport may also have dropped an indexed pack next to the
        // stream it sent us.
        *self.pack_entries.lock().unwrap() = None;
        Ok(ids)
    }

    /// Resolves an abbreviated object id against loose directories and pack
    /// indexes.
    pub fn resolve_prefix(&self, prefix: &HexPrefix) -> StoreResult<PrefixResolution<ObjectId>> {
        let mut result = self.resolve_loose_prefix(prefix)?;
        for entry in self.pack_entry_list()?.iter() {
            result = result.plus(&entry.index.resolve_prefix(prefix));
            if result == PrefixResolution::AmbiguousMatch {
                break;
            }
        }
        Ok(result)
    }

    fn resolve_loose_prefix(
        &self,
        prefix: &HexPrefix,
    ) -> StoreResult<PrefixResolution<ObjectId>> {
        let hex = prefix.hex();
        let mut result = PrefixResolution::NoMatch;
        let dir_names: Vec<String> = if hex.len() >= 2 {
            vec![hex[..2].to_owned()]
        } else {
            let entries = match self.objects_dir.read_dir() {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(result),
                Err(err) => return Err(err.into()),
            };
            entries
                .filter_map(|entry| Some(entry.ok()?.file_name().to_str()?.to_owned()))
                .filter(|name| name.len() == 2 && name.starts_with(&hex))
                .collect()
        };
        for dir_name in dir_names {
            let dir = self.objects_dir.join(&dir_name);
            let entries = match dir.read_dir() {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                let entry = entry.context(&dir)?;
                let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let Some(id) = ObjectId::try_from_hex(format!("{dir_name}{file_name}")) else {
                    continue;
                };
                if id.as_bytes().len() == self.algorithm.id_length() && prefix.matches(&id) {
                    result = result.plus(&PrefixResolution::SingleMatch(id));
                    if result == PrefixResolution::AmbiguousMatch {
                        return Ok(result);
                    }
                }
            }
        }
        Ok(result)
    }

    fn pack_entry_list(&self) -> StoreResult<Arc<Vec<PackEntry>>> {
        let mut locked = self.pack_entries.lock().unwrap();
        if let Some(entries) = locked.as_ref() {
            return Ok(entries.clone());
        }
        let mut entries = vec![];
        let pack_dir = self.objects_dir.join("pack");
        match pack_dir.read_dir() {
            Ok(dir_entries) => {
                for dir_entry in dir_entries {
                    let dir_entry = dir_entry.context(&pack_dir)?;
                    let path = dir_entry.path();
                    if path.extension().is_none_or(|ext| ext != "idx") {
                        continue;
                    }
                    let index = PackIndex::load(&path, self.algorithm)?;
                    let pack_path = path.with_extension("pack");
                    entries.push(PackEntry { pack_path, index });
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tracing::debug!(packs = entries.len(), "scanned pack indexes");
        let entries = Arc::new(entries);
        *locked = Some(entries.clone());
        Ok(entries)
    }

    /// Discards the identity cache and the pack index memo.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
        *self.pack_entries.lock().unwrap() = None;
    }
}

/// Builds the `"<type> <decimal-length>\0"` framing prefix.
pub(crate) fn loose_header(object_type: ObjectType, length: u64) -> Vec<u8> {
    format!("{} {length}\0", object_type.name()).into_bytes()
}

fn map_loose_err(err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::UnexpectedEof("reading a loose object".to_string())
    } else {
        StoreError::Io(err)
    }
}

fn parse_loose_header(
    reader: &mut DelimitedReader<impl Read>,
) -> StoreResult<(ObjectType, u64)> {
    let header = reader.read_until(b'\0').map_err(map_loose_err)?;
    let header = str::from_utf8(&header).map_err(|_| StoreError::InvalidObject {
        object_type: "unknown".to_owned(),
        message: "non-UTF-8 loose object header".to_owned(),
    })?;
    let (type_name, length) = header.split_once(' ').ok_or_else(|| {
        StoreError::InvalidObject {
            object_type: "unknown".to_owned(),
            message: "loose object header has no length".to_owned(),
        }
    })?;
    let object_type = ObjectType::from_name(type_name).ok_or_else(|| {
        StoreError::InvalidObject {
            object_type: type_name.to_owned(),
            message: "unknown object type".to_owned(),
        }
    })?;
    let length: u64 = length.parse().map_err(|_| StoreError::InvalidObject {
        object_type: type_name.to_owned(),
        message: format!("malformed length {length:?}"),
    })?;
    Ok((object_type, length))
}

#[cfg(test)]
mod tests {
    use pollster::FutureExt as _;
    use tokio::io::AsyncReadExt as _;

    use super::*;
    use crate::tests::new_temp_dir;

    fn new_store(dir: &Path) -> ObjectStore {
        let objects_dir = dir.join("objects");
        std::fs::create_dir_all(objects_dir.join("pack")).unwrap();
        ObjectStore::new(objects_dir, HashAlgorithm::Sha1)
    }

    #[test]
    fn test_blob_roundtrip() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());

        let id = store
            .write_object(ObjectType::Blob, b"Hello World")
            .block_on()
            .unwrap();
        let object = store.read_object(&id).block_on().unwrap();
        assert_eq!(object.object_type, ObjectType::Blob);
        assert_eq!(&object.data[..], b"Hello World");

        // The id is the digest of the framed content.
        assert_eq!(
            id,
            HashAlgorithm::Sha1.hash_bytes(b"blob 11\0Hello World")
        );
    }

    #[test]
    fn test_empty_blob_has_well_known_id() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let id = store.write_object(ObjectType::Blob, b"").block_on().unwrap();
        assert_eq!(id.hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        let object = store.read_object(&id).block_on().unwrap();
        assert_eq!(object.data.len(), 0);
    }

    #[test]
    fn test_write_is_idempotent() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let first = store
            .write_object(ObjectType::Blob, b"same content")
            .block_on()
            .unwrap();
        let second = store
            .write_object(ObjectType::Blob, b"same content")
            .block_on()
            .unwrap();
        assert_eq!(first, second);
        let hex = first.hex();
        assert!(
            temp_dir
                .path()
                .join("objects")
                .join(&hex[..2])
                .join(&hex[2..])
                .is_file()
        );
    }

    #[test]
    fn test_read_missing_object() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let id = ObjectId::new(vec![0xab; 20]);
        assert!(matches!(
            store.read_object(&id).block_on(),
            Err(StoreError::ObjectNotFound(_))
        ));
        assert!(!store.has_object(&id).block_on().unwrap());
    }

    #[test]
    fn test_id_length_validated() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let id = ObjectId::new(vec![0xab; 32]);
        assert!(matches!(
            store.read_object(&id).block_on(),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_streamed_read() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let content: Vec<u8> = (0..200u8).cycle().take(100_000).collect();
        let id = store
            .write_object(ObjectType::Blob, &content)
            .block_on()
            .unwrap();

        let mut blob = store.read_object_streamed(&id).block_on().unwrap();
        assert_eq!(blob.object_type(), ObjectType::Blob);
        assert_eq!(blob.length(), content.len() as u64);
        let mut out = vec![];
        async { blob.read_to_end(&mut out).await }.block_on().unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn test_cache_is_identity_keyed() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let id = store
            .write_object(ObjectType::Blob, b"cached")
            .block_on()
            .unwrap();

        // Remove the loose file; the cache still serves the object, and
        // invalidation brings back the not-found behavior.
        let hex = id.hex();
        let path = temp_dir
            .path()
            .join("objects")
            .join(&hex[..2])
            .join(&hex[2..]);
        std::fs::remove_file(path).unwrap();
        assert!(store.read_object(&id).block_on().is_ok());
        store.invalidate();
        assert!(matches!(
            store.read_object(&id).block_on(),
            Err(StoreError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_prefix_loose() {
        let temp_dir = new_temp_dir();
        let store = new_store(temp_dir.path());
        let id = store
            .write_object(ObjectType::Blob, b"prefix me")
            .block_on()
            .unwrap();

        let prefix = HexPrefix::try_from_hex(&id.hex()[..6]).unwrap();
        assert_eq!(
            store.resolve_prefix(&prefix).unwrap(),
            PrefixResolution::SingleMatch(id)
        );

        let missing = HexPrefix::try_from_hex("ffffffffff").unwrap();
        assert_eq!(
            store.resolve_prefix(&missing).unwrap(),
            PrefixResolution::NoMatch
        );
    }
}
