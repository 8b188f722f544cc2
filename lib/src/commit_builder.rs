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

//! Building commits from high-level file operations.
//!
//! The builder pre-reads the branch tip, materializes the requested
//! operations into new tree objects, writes the commit, and then
//! compare-and-swaps the branch under its lock. A concurrent commit to the
//! same branch makes the swap fail with a conflict; there is no merge logic.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt as _;
use tracing::instrument;

use crate::object::Commit;
use crate::object::MODE_BLOB;
use crate::object::ObjectType;
use crate::object::Signature;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object::Tree;
use crate::object::TreeEntryKind;
use crate::object::serialize_commit;
use crate::object_id::ObjectId;
use crate::object_store::loose_header;
use crate::ref_name::RefNameBuf;
use crate::repo::Repository;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::tree_builder::TreeBuilder;
use crate::tree_builder::read_tree_object;

/// One file-level change to apply on top of the parent commit's tree.
pub enum CommitOperation {
    /// Adds a new file. Fails if the path already exists.
    AddFile {
        path: RepoPathBuf,
        content: Vec<u8>,
    },
    /// Like [`CommitOperation::AddFile`], with lazily consumed content.
    AddFileStream {
        path: RepoPathBuf,
        content: Pin<Box<dyn AsyncRead + Send>>,
    },
    /// Replaces an existing file's content. Fails if the path is absent, if
    /// nothing changes, or if `expected_previous` doesn't match the current
    /// blob.
    UpdateFile {
        path: RepoPathBuf,
        content: Vec<u8>,
        expected_previous: Option<ObjectId>,
    },
    /// Like [`CommitOperation::UpdateFile`], with lazily consumed content.
    UpdateFileStream {
        path: RepoPathBuf,
        content: Pin<Box<dyn AsyncRead + Send>>,
        expected_previous: Option<ObjectId>,
    },
    /// Removes an existing file. Fails if the path is absent.
    RemoveFile { path: RepoPathBuf },
    /// Moves a file, preserving its blob identity.
    MoveFile {
        old_path: RepoPathBuf,
        new_path: RepoPathBuf,
    },
}

impl Debug for CommitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddFile { path, .. } => f.debug_tuple("AddFile").field(path).finish(),
            Self::AddFileStream { path, .. } => {
                f.debug_tuple("AddFileStream").field(path).finish()
            }
            Self::UpdateFile { path, .. } => f.debug_tuple("UpdateFile").field(path).finish(),
            Self::UpdateFileStream { path, .. } => {
                f.debug_tuple("UpdateFileStream").field(path).finish()
            }
            Self::RemoveFile { path } => f.debug_tuple("RemoveFile").field(path).finish(),
            Self::MoveFile { old_path, new_path } => f
                .debug_tuple("MoveFile")
                .field(old_path)
                .field(new_path)
                .finish(),
        }
    }
}

/// Accumulates operations and metadata for one new commit on a branch.
pub struct CommitBuilder<'repo> {
    repo: &'repo Repository,
    branch: RefNameBuf,
    author: Signature,
    committer: Signature,
    message: String,
    operations: Vec<CommitOperation>,
}

impl<'repo> CommitBuilder<'repo> {
    pub(crate) fn new(
        repo: &'repo Repository,
        branch: RefNameBuf,
        author: Signature,
        message: impl Into<String>,
    ) -> Self {
        let committer = author.clone();
        Self {
            repo,
            branch,
            author,
            committer,
            message: message.into(),
            operations: vec![],
        }
    }

    pub fn set_committer(mut self, committer: Signature) -> Self {
        self.committer = committer;
        self
    }

    pub fn operation(mut self, operation: CommitOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn add_file(self, path: RepoPathBuf, content: impl Into<Vec<u8>>) -> Self {
        self.operation(CommitOperation::AddFile {
            path,
            content: content.into(),
        })
    }

    pub fn update_file(
        self,
        path: RepoPathBuf,
        content: impl Into<Vec<u8>>,
        expected_previous: Option<ObjectId>,
    ) -> Self {
        self.operation(CommitOperation::UpdateFile {
            path,
            content: content.into(),
            expected_previous,
        })
    }

    pub fn remove_file(self, path: RepoPathBuf) -> Self {
        self.operation(CommitOperation::RemoveFile { path })
    }

    pub fn move_file(self, old_path: RepoPathBuf, new_path: RepoPathBuf) -> Self {
        self.operation(CommitOperation::MoveFile { old_path, new_path })
    }

    /// Materializes the operations, writes the new trees and the commit, and
    /// compare-and-swaps the branch from its pre-read tip.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub async fn write(self) -> StoreResult<ObjectId> {
        let Self {
            repo,
            branch,
            author,
            committer,
            message,
            operations,
        } = self;
        if operations.is_empty() {
            return Err(StoreError::InvalidArgument(
                "a commit needs at least one operation".to_string(),
            ));
        }

        let store = repo.store();
        // The tip is read before taking the lock; a concurrent commit that
        // wins the race surfaces as a conflict below, for the caller to
        // retry.
        let old_tip = repo.refs().try_resolve(&branch).await?;
        let base_tree_id = match &old_tip {
            Some(tip) => Some(repo.read_commit_async(tip).await?.tree),
            None => None,
        };

        let mut state = TreeState::new(repo, base_tree_id.clone());
        for operation in operations {
            state.apply(operation).await?;
        }
        let new_tree_id = state.into_tree_builder().write_tree().await?;

        let base_tree_id =
            base_tree_id.unwrap_or_else(|| store.algorithm().empty_tree_id());
        if new_tree_id == base_tree_id && old_tip.is_some() {
            return Err(StoreError::NoEffectiveChanges);
        }

        let commit = Commit {
            tree: new_tree_id,
            parents: old_tip.iter().cloned().collect(),
            author,
            committer,
            message,
            extra_headers: vec![],
        };
        let data = serialize_commit(&commit)?;
        let commit_id = store.write_object(ObjectType::Commit, &data).await?;

        let lock = repo.refs().lock_many([branch.clone()]).await;
        lock.write(&branch, old_tip.as_ref(), Some(&commit_id))?;
        Ok(commit_id)
    }
}

/// Overlay of staged changes on top of the base tree, with the structural
/// validation done before anything is written.
struct TreeState<'repo> {
    repo: &'repo Repository,
    base_tree_id: Option<ObjectId>,
    staged: BTreeMap<RepoPathBuf, Option<(u32, ObjectId)>>,
}

enum PathLookup {
    Missing,
    /// An ancestor of the path is a file, so the path cannot exist.
    BlockedBy(RepoPathBuf),
    Entry { mode: u32, id: ObjectId },
}

impl<'repo> TreeState<'repo> {
    fn new(repo: &'repo Repository, base_tree_id: Option<ObjectId>) -> Self {
        Self {
            repo,
            base_tree_id,
            staged: BTreeMap::new(),
        }
    }

    fn into_tree_builder(self) -> TreeBuilder<'repo> {
        let mut builder = TreeBuilder::new(self.repo.store(), self.base_tree_id);
        for (path, staged) in self.staged {
            match staged {
                Some((mode, id)) => builder.set(path, mode, id),
                None => builder.remove(path),
            }
        }
        builder
    }

    async fn apply(&mut self, operation: CommitOperation) -> StoreResult<()> {
        match operation {
            CommitOperation::AddFile { path, content } => self.add_file(path, content).await,
            CommitOperation::AddFileStream { path, mut content } => {
                let mut buf = vec![];
                content.read_to_end(&mut buf).await?;
                self.add_file(path, buf).await
            }
            CommitOperation::UpdateFile {
                path,
                content,
                expected_previous,
            } => self.update_file(path, content, expected_previous).await,
            CommitOperation::UpdateFileStream {
                path,
                mut content,
                expected_previous,
            } => {
                let mut buf = vec![];
                content.read_to_end(&mut buf).await?;
                self.update_file(path, buf, expected_previous).await
            }
            CommitOperation::RemoveFile { path } => self.remove_file(&path),
            CommitOperation::MoveFile { old_path, new_path } => {
                let (mode, id) = self.require_file(&old_path)?;
                self.require_addable(&new_path)?;
                self.staged.insert(old_path, None);
                self.staged.insert(new_path, Some((mode, id)));
                Ok(())
            }
        }
    }

    async fn add_file(&mut self, path: RepoPathBuf, content: Vec<u8>) -> StoreResult<()> {
        if path.is_root() {
            return Err(StoreError::InvalidArgument(
                "cannot add a file at the tree root".to_string(),
            ));
        }
        self.require_addable(&path)?;
        let id = self
            .repo
            .store()
            .write_object(ObjectType::Blob, &content)
            .await?;
        self.staged.insert(path, Some((MODE_BLOB, id)));
        Ok(())
    }

    async fn update_file(
        &mut self,
        path: RepoPathBuf,
        content: Vec<u8>,
        expected_previous: Option<ObjectId>,
    ) -> StoreResult<()> {
        let (mode, current_id) = self.require_file(&path)?;
        if let Some(expected) = expected_previous {
            if expected != current_id {
                return Err(StoreError::BlobConflict {
                    path,
                    expected,
                    actual: current_id,
                });
            }
        }
        // Compare by content hash rather than writing first, so a no-op
        // leaves no new object behind.
        let algorithm = self.repo.store().algorithm();
        let mut hasher = algorithm.hasher();
        hasher.update(&loose_header(ObjectType::Blob, content.len() as u64));
        hasher.update(&content);
        if hasher.finish() == current_id {
            return Err(StoreError::NoEffectiveChanges);
        }
        let id = self
            .repo
            .store()
            .write_object(ObjectType::Blob, &content)
            .await?;
        self.staged.insert(path, Some((mode, id)));
        Ok(())
    }

    fn remove_file(&mut self, path: &RepoPath) -> StoreResult<()> {
        self.require_file(path)?;
        self.staged.insert(path.to_owned(), None);
        Ok(())
    }

    /// The path must currently resolve to a file; returns its mode and blob
    /// id.
    fn require_file(&self, path: &RepoPath) -> StoreResult<(u32, ObjectId)> {
        match self.lookup(path)? {
            PathLookup::Entry { mode, id }
                if TreeEntryKind::from_mode(mode) != TreeEntryKind::Tree =>
            {
                Ok((mode, id))
            }
            PathLookup::Entry { .. } => Err(StoreError::PathConflict {
                path: path.to_owned(),
                existing: self.first_descendant(path)?,
            }),
            PathLookup::BlockedBy(existing) => Err(StoreError::PathConflict {
                path: path.to_owned(),
                existing,
            }),
            PathLookup::Missing => Err(StoreError::InvalidArgument(format!(
                "no file at {path:?}"
            ))),
        }
    }

    /// The path must not exist, and no ancestor may be a file.
    fn require_addable(&self, path: &RepoPath) -> StoreResult<()> {
        match self.lookup(path)? {
            PathLookup::Missing => {
                // An earlier operation may have staged a file below `path`,
                // making it a directory.
                let staged_below = self.staged.iter().find(|(staged_path, staged)| {
                    staged.is_some()
                        && staged_path.starts_with(path)
                        && staged_path.as_internal_str() != path.as_internal_str()
                });
                if let Some((staged_path, _)) = staged_below {
                    return Err(StoreError::PathConflict {
                        path: path.to_owned(),
                        existing: staged_path.clone(),
                    });
                }
                Ok(())
            }
            PathLookup::BlockedBy(existing) => Err(StoreError::PathConflict {
                path: path.to_owned(),
                existing,
            }),
            PathLookup::Entry { mode, .. }
                if TreeEntryKind::from_mode(mode) == TreeEntryKind::Tree =>
            {
                // A file cannot replace a directory that still has contents.
                Err(StoreError::PathConflict {
                    path: path.to_owned(),
                    existing: self.first_descendant(path)?,
                })
            }
            PathLookup::Entry { .. } => Err(StoreError::InvalidArgument(format!(
                "path {path:?} already exists"
            ))),
        }
    }

    /// Resolves `path` against the base tree with the staged overlay applied.
    fn lookup(&self, path: &RepoPath) -> StoreResult<PathLookup> {
        // Staged changes win over the base tree. Walking prefixes outward-in
        // makes an earlier RemoveFile free the name for a directory, and an
        // earlier AddFile block descendants.
        let prefixes: Vec<&RepoPath> = path.ancestors().collect();
        for prefix in prefixes.iter().rev().skip(1) {
            let Some(staged) = self.staged.get(*prefix) else {
                continue;
            };
            return Ok(match staged {
                Some((mode, id)) if prefix.as_internal_str() == path.as_internal_str() => {
                    PathLookup::Entry {
                        mode: *mode,
                        id: id.clone(),
                    }
                }
                Some(_) => PathLookup::BlockedBy((*prefix).to_owned()),
                None => PathLookup::Missing,
            });
        }
        self.lookup_in_base(path)
    }

    fn lookup_in_base(&self, path: &RepoPath) -> StoreResult<PathLookup> {
        let store = self.repo.store();
        let Some(base_tree_id) = &self.base_tree_id else {
            return Ok(PathLookup::Missing);
        };
        let mut tree = read_tree_object(store, base_tree_id)?;
        let mut walked = RepoPathBuf::root();
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            let Some(entry) = tree.entry(component) else {
                return Ok(PathLookup::Missing);
            };
            walked = walked.join(component);
            if components.peek().is_none() {
                return Ok(PathLookup::Entry {
                    mode: entry.mode(),
                    id: entry.id().clone(),
                });
            }
            if entry.kind() != TreeEntryKind::Tree {
                return Ok(PathLookup::BlockedBy(walked));
            }
            tree = read_tree_object(store, entry.id())?;
        }
        // Empty path is the root tree itself.
        Err(StoreError::InvalidArgument(
            "operations need a non-empty path".to_string(),
        ))
    }

    /// Names one entry blocking the removal or replacement of directory
    /// `path`, for error messages.
    fn first_descendant(&self, path: &RepoPath) -> StoreResult<RepoPathBuf> {
        // A staged file below the directory blocks it just as well.
        let staged_below = self
            .staged
            .iter()
            .find(|(staged_path, staged)| staged_path.starts_with(path) && staged.is_some());
        if let Some((staged_path, _)) = staged_below {
            return Ok(staged_path.clone());
        }
        if let PathLookup::Entry { mode, id } = self.lookup_in_base(path)? {
            if TreeEntryKind::from_mode(mode) == TreeEntryKind::Tree {
                let tree: Tree = read_tree_object(self.repo.store(), &id)?;
                if let Some(entry) = tree.entries().next() {
                    return Ok(path.join(entry.name()));
                }
            }
        }
        Ok(path.to_owned())
    }
}
