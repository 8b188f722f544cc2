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

//! The reference store: loose refs, `packed-refs`, `HEAD`, and validated
//! compare-and-swap updates.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::instrument;

use crate::file_util::IoResultExt as _;
use crate::file_util::persist_temp_file;
use crate::lock::RefLockGuard;
use crate::lock::RefLocks;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object_id::HashAlgorithm;
use crate::object_id::ObjectId;
use crate::ref_name::RefName;
use crate::ref_name::RefNameBuf;

/// What `HEAD` points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadTarget {
    /// `HEAD` names another reference (`ref: refs/heads/...`). The reference
    /// may not exist yet, e.g. on an unborn branch.
    Symbolic(RefNameBuf),
    /// Detached `HEAD` pointing directly at an object.
    Direct(ObjectId),
}

/// Point-in-time, immutable view of all references.
pub type RefsSnapshot = BTreeMap<RefNameBuf, ObjectId>;

/// Reads and writes the reference half of a repository.
///
/// Reads are served from a lazily loaded snapshot that is swapped wholesale
/// on [`RefStore::invalidate`]. Every mutation happens under the per-ref lock
/// and re-reads the current value from disk, so a successful write is
/// immediately visible to subsequent reads in this process.
#[derive(Debug)]
pub struct RefStore {
    git_dir: PathBuf,
    algorithm: HashAlgorithm,
    locks: RefLocks,
    snapshot: Mutex<Option<Arc<RefsSnapshot>>>,
}

impl RefStore {
    pub fn new(git_dir: PathBuf, algorithm: HashAlgorithm) -> Self {
        Self {
            git_dir,
            algorithm,
            locks: RefLocks::new(),
            snapshot: Mutex::new(None),
        }
    }

    fn refs_dir(&self) -> PathBuf {
        self.git_dir.join("refs")
    }

    fn packed_refs_path(&self) -> PathBuf {
        self.git_dir.join("packed-refs")
    }

    fn head_path(&self) -> PathBuf {
        self.git_dir.join("HEAD")
    }

    fn loose_ref_path(&self, name: &RefName) -> PathBuf {
        let mut path = self.git_dir.clone();
        path.extend(name.as_str().split('/'));
        path
    }

    fn parse_ref_value(&self, value: &str) -> Option<ObjectId> {
        let id = ObjectId::try_from_hex(value.trim())?;
        (id.as_bytes().len() == self.algorithm.id_length()).then_some(id)
    }

    /// Returns the merged view of loose refs and `packed-refs`, with loose
    /// values winning.
    pub async fn get_references(&self) -> StoreResult<Arc<RefsSnapshot>> {
        self.snapshot()
    }

    fn snapshot(&self) -> StoreResult<Arc<RefsSnapshot>> {
        let mut locked = self.snapshot.lock().unwrap();
        if let Some(snapshot) = locked.as_ref() {
            return Ok(snapshot.clone());
        }
        let snapshot = Arc::new(self.read_refs_from_disk()?);
        *locked = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn read_refs_from_disk(&self) -> StoreResult<RefsSnapshot> {
        let mut refs = RefsSnapshot::new();
        self.read_packed_refs_into(&mut refs)?;
        // Loose values win over packed ones.
        self.read_loose_refs_into(&self.refs_dir(), "refs", &mut refs)?;
        tracing::trace!(count = refs.len(), "loaded reference snapshot");
        Ok(refs)
    }

    fn read_packed_refs_into(&self, refs: &mut RefsSnapshot) -> StoreResult<()> {
        let path = self.packed_refs_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StoreError::Path(io_context(err, &path))),
        };
        for line in content.lines() {
            // Comments and peel lines carry no mapping.
            if line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let Some((value, name)) = line.split_once(' ') else {
                continue;
            };
            let Some(id) = self.parse_ref_value(value) else {
                continue;
            };
            let Ok(name) = RefNameBuf::normalize(name) else {
                continue;
            };
            refs.insert(name, id);
        }
        Ok(())
    }

    fn read_loose_refs_into(
        &self,
        dir: &Path,
        prefix: &str,
        refs: &mut RefsSnapshot,
    ) -> StoreResult<()> {
        let entries = match dir.read_dir() {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StoreError::Path(io_context(err, dir))),
        };
        for entry in entries {
            let entry = entry.context(dir)?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let entry_path = entry.path();
            let entry_prefix = format!("{prefix}/{file_name}");
            let file_type = entry.file_type().context(&entry_path)?;
            if file_type.is_dir() {
                self.read_loose_refs_into(&entry_path, &entry_prefix, refs)?;
            } else if file_type.is_file() {
                let content = fs::read_to_string(&entry_path).context(&entry_path)?;
                // Lock files and other non-ref content are skipped.
                let Some(id) = self.parse_ref_value(&content) else {
                    continue;
                };
                let Ok(name) = RefNameBuf::normalize(&entry_prefix) else {
                    continue;
                };
                refs.insert(name, id);
            }
        }
        Ok(())
    }

    /// Resolves a single reference: snapshot first, then the loose file on
    /// disk. The fallback catches refs written by another process after our
    /// snapshot was taken.
    pub async fn try_resolve(&self, name: &RefName) -> StoreResult<Option<ObjectId>> {
        if let Some(id) = self.snapshot()?.get(name) {
            return Ok(Some(id.clone()));
        }
        self.read_loose_ref(name)
    }

    fn read_loose_ref(&self, name: &RefName) -> StoreResult<Option<ObjectId>> {
        let path = self.loose_ref_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Path(io_context(err, &path))),
        };
        match self.parse_ref_value(&content) {
            Some(id) => Ok(Some(id)),
            None => Err(StoreError::InvalidArgument(format!(
                "reference file {name} does not contain an object id"
            ))),
        }
    }

    /// The current on-disk value of `name`, bypassing the snapshot.
    fn current_value_from_disk(&self, name: &RefName) -> StoreResult<Option<ObjectId>> {
        if let Some(id) = self.read_loose_ref(name)? {
            return Ok(Some(id));
        }
        let mut packed = RefsSnapshot::new();
        self.read_packed_refs_into(&mut packed)?;
        Ok(packed.get(name).cloned())
    }

    /// Reads `HEAD` without resolving a symbolic target.
    pub async fn resolve_head(&self) -> StoreResult<HeadTarget> {
        let path = self.head_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::RefNotFound("HEAD".to_string()));
            }
            Err(err) => return Err(StoreError::Path(io_context(err, &path))),
        };
        if let Some(target) = content.strip_prefix("ref: ") {
            let name = RefNameBuf::normalize(target).map_err(|err| {
                StoreError::InvalidArgument(format!("unparseable HEAD: {err}"))
            })?;
            return Ok(HeadTarget::Symbolic(name));
        }
        match self.parse_ref_value(&content) {
            Some(id) => Ok(HeadTarget::Direct(id)),
            None => Err(StoreError::InvalidArgument(
                "unparseable HEAD: neither a ref nor an object id".to_string(),
            )),
        }
    }

    /// Resolves `HEAD` through a symbolic target to an object id, if the
    /// target exists.
    pub async fn resolve_head_id(&self) -> StoreResult<Option<ObjectId>> {
        match self.resolve_head().await? {
            HeadTarget::Symbolic(name) => self.try_resolve(&name).await,
            HeadTarget::Direct(id) => Ok(Some(id)),
        }
    }

    /// Validated compare-and-swap write.
    ///
    /// `expected_old` is what the caller believes the reference currently is
    /// (`None` meaning it must not exist); `new_value` of `None` deletes the
    /// loose file. A mismatch with the re-read on-disk value fails with a
    /// conflict and changes nothing.
    ///
    /// Deletion does not rewrite `packed-refs`; a reference that exists only
    /// there survives a delete. See the crate documentation.
    pub async fn write(
        &self,
        name: &RefName,
        expected_old: Option<&ObjectId>,
        new_value: Option<&ObjectId>,
    ) -> StoreResult<()> {
        let _guard = self.locks.acquire(name).await;
        self.write_locked(name, expected_old, new_value)
    }

    #[instrument(skip(self))]
    fn write_locked(
        &self,
        name: &RefName,
        expected_old: Option<&ObjectId>,
        new_value: Option<&ObjectId>,
    ) -> StoreResult<()> {
        let current = self.current_value_from_disk(name)?;
        if current.as_ref() != expected_old {
            return Err(StoreError::RefConflict {
                name: name.as_str().to_owned(),
                expected: expected_old.cloned(),
                actual: current,
            });
        }
        match new_value {
            Some(id) => {
                let path = self.loose_ref_path(name);
                let dir = path.parent().unwrap();
                fs::create_dir_all(dir).context(dir)?;
                let mut temp_file = NamedTempFile::new_in(dir).context(dir)?;
                temp_file
                    .write_all(format!("{}\n", id.hex()).as_bytes())
                    .context(&path)?;
                persist_temp_file(temp_file, &path).context(&path)?;
            }
            None => {
                let path = self.loose_ref_path(name);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(StoreError::Path(io_context(err, &path))),
                }
            }
        }
        // Make the write visible to snapshot readers before returning.
        self.invalidate();
        tracing::debug!(%name, "updated reference");
        Ok(())
    }

    /// Locks all `names` (sorted, deduplicated) and returns a handle that can
    /// write any of them. Dropping the handle releases the locks.
    pub async fn lock_many(
        &self,
        names: impl IntoIterator<Item = RefNameBuf>,
    ) -> MultiRefLock<'_> {
        let guards = self.locks.acquire_many(names).await.into_iter().collect();
        MultiRefLock {
            store: self,
            guards,
        }
    }

    /// Discards the snapshot; the next read reloads from disk.
    pub fn invalidate(&self) {
        *self.snapshot.lock().unwrap() = None;
    }
}

fn io_context(err: io::Error, path: &Path) -> crate::file_util::PathError {
    crate::file_util::PathError {
        path: path.to_path_buf(),
        source: err,
    }
}

/// Exclusive locks over a set of references, for atomic batch updates.
#[derive(Debug)]
pub struct MultiRefLock<'a> {
    store: &'a RefStore,
    guards: HashMap<RefNameBuf, RefLockGuard>,
}

impl MultiRefLock<'_> {
    /// The references covered by this handle.
    pub fn locked_names(&self) -> impl Iterator<Item = &RefName> {
        self.guards.keys().map(AsRef::as_ref)
    }

    /// Validated CAS write of one locked reference. Writing a reference
    /// outside the locked set is an error.
    pub fn write(
        &self,
        name: &RefName,
        expected_old: Option<&ObjectId>,
        new_value: Option<&ObjectId>,
    ) -> StoreResult<()> {
        if !self.guards.contains_key(name) {
            return Err(StoreError::InvalidArgument(format!(
                "reference {name} is not part of this lock set"
            )));
        }
        self.store.write_locked(name, expected_old, new_value)
    }
}
