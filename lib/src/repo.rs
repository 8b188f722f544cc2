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

//! The repository facade: opening and initializing repositories, graph and
//! tree enumeration, and path-level reads.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use futures::StreamExt as _;
use futures::stream;
use futures::stream::BoxStream;
use pollster::FutureExt as _;
use tracing::instrument;

use crate::commit_builder::CommitBuilder;
use crate::file_util::IoResultExt as _;
use crate::object::Commit;
use crate::object::ObjectType;
use crate::object::Signature;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object::Tag;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object::TreeEntryKind;
use crate::object::parse_commit;
use crate::object::parse_tag;
use crate::object_id::HashAlgorithm;
use crate::object_id::ObjectId;
use crate::object_store::BlobReader;
use crate::object_store::ObjectStore;
use crate::ref_name::RefName;
use crate::ref_name::RefNameBuf;
use crate::ref_store::HeadTarget;
use crate::ref_store::RefStore;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::tree_builder::read_tree_object;

/// Knobs for [`Repository::init`].
#[derive(Clone, Debug)]
pub struct InitOptions {
    pub initial_branch: String,
    pub bare: bool,
    pub algorithm: HashAlgorithm,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            initial_branch: "main".to_string(),
            bare: false,
            algorithm: HashAlgorithm::Sha1,
        }
    }
}

/// How [`Repository::enumerate_tree`] walks subtrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeSearchOption {
    /// Emit the entries of the start directory only; subtrees appear as
    /// single `Tree` items.
    TopOnly,
    /// Descend depth-first in name order.
    Recursive,
}

/// An opened repository: the object store, the reference store, and the
/// operations composed from both.
///
/// A `Repository` is safe to share across tasks; all mutability lives behind
/// the reference locks, atomic cache swaps, and content-addressed object
/// writes.
#[derive(Debug)]
pub struct Repository {
    git_dir: PathBuf,
    store: ObjectStore,
    refs: RefStore,
}

impl Repository {
    fn load(git_dir: PathBuf, algorithm: HashAlgorithm) -> Self {
        let store = ObjectStore::new(git_dir.join("objects"), algorithm);
        let refs = RefStore::new(git_dir.clone(), algorithm);
        Self {
            git_dir,
            store,
            refs,
        }
    }

    /// Opens an existing repository at `path`, which may be a working tree
    /// root, a `.git` directory, or a bare repository. The hash algorithm is
    /// detected from `extensions.objectFormat`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let git_dir = find_git_dir(path)?;
        let algorithm = read_object_format(&git_dir)?;
        Ok(Self::load(git_dir, algorithm))
    }

    /// Creates a new repository. Fails if `path` already contains one.
    #[instrument]
    pub fn init(path: &Path, options: &InitOptions) -> StoreResult<Self> {
        let git_dir = if options.bare {
            path.to_path_buf()
        } else {
            path.join(".git")
        };
        if git_dir.join("HEAD").exists() || git_dir.join("objects").exists() {
            return Err(StoreError::InvalidArgument(format!(
                "{} already contains a repository",
                git_dir.display()
            )));
        }
        let head_target = RefNameBuf::normalize(format!("refs/heads/{}", options.initial_branch))
            .map_err(|err| StoreError::InvalidArgument(err.to_string()))?;

        for dir in [
            "objects/info",
            "objects/pack",
            "refs/heads",
            "refs/tags",
            "hooks",
            "info",
        ] {
            let dir = git_dir.join(dir);
            fs::create_dir_all(&dir).context(&dir)?;
        }

        let head_path = git_dir.join("HEAD");
        fs::write(&head_path, format!("ref: {head_target}\n")).context(&head_path)?;

        let mut config = String::new();
        config.push_str("[core]\n");
        let format_version = match options.algorithm {
            HashAlgorithm::Sha1 => 0,
            HashAlgorithm::Sha256 => 1,
        };
        config.push_str(&format!("\trepositoryformatversion = {format_version}\n"));
        config.push_str(&format!("\tfilemode = {}\n", cfg!(unix)));
        config.push_str(&format!("\tbare = {}\n", options.bare));
        if options.algorithm == HashAlgorithm::Sha256 {
            config.push_str("[extensions]\n");
            config.push_str(&format!("\tobjectFormat = {}\n", options.algorithm.name()));
        }
        let config_path = git_dir.join("config");
        fs::write(&config_path, config).context(&config_path)?;

        let description_path = git_dir.join("description");
        fs::write(
            &description_path,
            "Unnamed repository; edit this file 'description' to name the repository.\n",
        )
        .context(&description_path)?;
        let exclude_path = git_dir.join("info").join("exclude");
        fs::write(&exclude_path, "# Per-repository exclude patterns.\n").context(&exclude_path)?;

        Ok(Self::load(git_dir, options.algorithm))
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.store.algorithm()
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Discards the reference snapshot, and with `clear_all` also the object
    /// identity cache and pack memo. Call after another process may have
    /// modified the repository.
    pub fn invalidate(&self, clear_all: bool) {
        self.refs.invalidate();
        if clear_all {
            self.store.invalidate();
        }
    }

    pub fn read_commit(&self, id: &ObjectId) -> StoreResult<Commit> {
        self.read_commit_async(id).block_on()
    }

    pub async fn read_commit_async(&self, id: &ObjectId) -> StoreResult<Commit> {
        let object = self.store.read_object(id).await?;
        expect_type(id, &object.object_type, ObjectType::Commit)?;
        parse_commit(&object.data)
    }

    pub fn read_tree(&self, id: &ObjectId) -> StoreResult<Tree> {
        self.read_tree_async(id).block_on()
    }

    pub async fn read_tree_async(&self, id: &ObjectId) -> StoreResult<Tree> {
        read_tree_object(&self.store, id)
    }

    pub async fn read_tag_async(&self, id: &ObjectId) -> StoreResult<Tag> {
        let object = self.store.read_object(id).await?;
        expect_type(id, &object.object_type, ObjectType::Tag)?;
        parse_tag(&object.data)
    }

    /// Reads `HEAD` without resolving its symbolic target.
    pub async fn head(&self) -> StoreResult<HeadTarget> {
        self.refs.resolve_head().await
    }

    /// The commit `HEAD` resolves to, or `None` on an unborn branch.
    pub async fn head_commit(&self) -> StoreResult<Option<(ObjectId, Commit)>> {
        match self.refs.resolve_head_id().await? {
            Some(id) => {
                let commit = self.read_commit_async(&id).await?;
                Ok(Some((id, commit)))
            }
            None => Ok(None),
        }
    }

    /// All `refs/heads/` references from the current snapshot.
    pub async fn branches(&self) -> StoreResult<Vec<(String, ObjectId)>> {
        let snapshot = self.refs.get_references().await?;
        Ok(snapshot
            .iter()
            .filter_map(|(name, id)| {
                Some((name.as_branch_name()?.to_owned(), id.clone()))
            })
            .collect())
    }

    /// Starts a commit on `branch`; the committer defaults to the author.
    pub fn commit_builder(
        &self,
        branch: RefNameBuf,
        author: Signature,
        message: impl Into<String>,
    ) -> CommitBuilder<'_> {
        CommitBuilder::new(self, branch, author, message)
    }

    /// Validated reference update; the new target must be resolvable by the
    /// object store so that references never dangle.
    pub async fn update_reference(
        &self,
        name: &RefName,
        expected_old: Option<&ObjectId>,
        new_value: Option<&ObjectId>,
    ) -> StoreResult<()> {
        if let Some(id) = new_value {
            if !self.store.has_object(id).await? {
                return Err(StoreError::ObjectNotFound(id.clone()));
            }
        }
        self.refs.write(name, expected_old, new_value).await
    }

    /// Whether `target` is an ancestor of (or equal to) `from`.
    pub async fn is_commit_reachable(
        &self,
        from: &ObjectId,
        target: &ObjectId,
    ) -> StoreResult<bool> {
        let mut queue = VecDeque::from([from.clone()]);
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if id == *target {
                return Ok(true);
            }
            let commit = self.read_commit_async(&id).await?;
            queue.extend(commit.parents);
        }
        Ok(false)
    }

    /// Walks the commit graph from `start` (default `HEAD`), breadth-first
    /// over parents, emitting each commit at most once.
    pub fn enumerate_commits(
        &self,
        start: Option<ObjectId>,
    ) -> BoxStream<'_, StoreResult<(ObjectId, Commit)>> {
        let state = CommitWalk {
            start,
            initialized: false,
            queue: VecDeque::new(),
            visited: HashSet::new(),
        };
        stream::try_unfold(state, move |mut state| async move {
            if !state.initialized {
                state.initialized = true;
                let start = match state.start.take() {
                    Some(id) => Some(id),
                    None => self.refs.resolve_head_id().await?,
                };
                state.queue.extend(start);
            }
            while let Some(id) = state.queue.pop_front() {
                if !state.visited.insert(id.clone()) {
                    continue;
                }
                let commit = self.read_commit_async(&id).await?;
                state.queue.extend(commit.parents.iter().cloned());
                return Ok(Some(((id, commit), state)));
            }
            Ok(None)
        })
        .boxed()
    }

    /// Commits where the blob at `path` differs from what every parent has
    /// at `path`. The commit introducing the path qualifies, as does one
    /// deleting it.
    pub fn enumerate_file_history(
        &self,
        path: RepoPathBuf,
        start: Option<ObjectId>,
    ) -> BoxStream<'_, StoreResult<(ObjectId, Commit)>> {
        let commits = self.enumerate_commits(start);
        commits
            .filter_map(move |item| {
                let path = path.clone();
                async move {
                    match item {
                        Ok((id, commit)) => self
                            .file_history_entry(id, commit, &path)
                            .await
                            .transpose(),
                        Err(err) => Some(Err(err)),
                    }
                }
            })
            .boxed()
    }

    async fn file_history_entry(
        &self,
        id: ObjectId,
        commit: Commit,
        path: &RepoPath,
    ) -> StoreResult<Option<(ObjectId, Commit)>> {
        let blob = self.entry_id_at(&commit.tree, path)?;
        let mut all_parents_missing = true;
        for parent in &commit.parents {
            let parent_commit = self.read_commit_async(parent).await?;
            let parent_blob = self.entry_id_at(&parent_commit.tree, path)?;
            if parent_blob.is_some() {
                all_parents_missing = false;
            }
            if parent_blob == blob {
                return Ok(None);
            }
        }
        // A commit where the path exists nowhere is not part of its history.
        if blob.is_none() && all_parents_missing {
            return Ok(None);
        }
        Ok(Some((id, commit)))
    }

    fn entry_id_at(&self, tree_id: &ObjectId, path: &RepoPath) -> StoreResult<Option<ObjectId>> {
        match self.lookup_entry(tree_id, path)? {
            Some(entry) => Ok(Some(entry.id().clone())),
            None => Ok(None),
        }
    }

    fn lookup_entry(&self, tree_id: &ObjectId, path: &RepoPath) -> StoreResult<Option<TreeEntry>> {
        let mut tree = read_tree_object(&self.store, tree_id)?;
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            let Some(entry) = tree.entry(component) else {
                return Ok(None);
            };
            if components.peek().is_none() {
                return Ok(Some(entry.clone()));
            }
            if entry.kind() != TreeEntryKind::Tree {
                return Ok(None);
            }
            let subtree_id = entry.id().clone();
            tree = read_tree_object(&self.store, &subtree_id)?;
        }
        Ok(None)
    }

    /// Walks tree entries under `path` (default: the root tree) of the
    /// commit `at` resolves to (default `HEAD`), emitting `(path, entry)`
    /// pairs on demand.
    pub async fn enumerate_tree(
        &self,
        at: Option<&RefName>,
        path: Option<&RepoPath>,
        option: TreeSearchOption,
    ) -> StoreResult<BoxStream<'_, StoreResult<(RepoPathBuf, TreeEntry)>>> {
        let mut stack: Vec<(RepoPathBuf, std::vec::IntoIter<TreeEntry>)> = vec![];
        if let Some(commit_id) = self.resolve_start(at).await? {
            let commit = self.read_commit_async(&commit_id).await?;
            let start_path = path.unwrap_or(RepoPath::root());
            let tree_id = if start_path.is_root() {
                Some(commit.tree.clone())
            } else {
                match self.lookup_entry(&commit.tree, start_path)? {
                    Some(entry) if entry.kind() == TreeEntryKind::Tree => {
                        Some(entry.id().clone())
                    }
                    Some(_) => {
                        return Err(StoreError::InvalidArgument(format!(
                            "{start_path:?} is not a directory"
                        )));
                    }
                    None => {
                        return Err(StoreError::InvalidArgument(format!(
                            "no tree at {start_path:?}"
                        )));
                    }
                }
            };
            if let Some(tree_id) = tree_id {
                let tree = read_tree_object(&self.store, &tree_id)?;
                stack.push((
                    start_path.to_owned(),
                    tree.into_entries().into_iter(),
                ));
            }
        }

        let state = TreeWalk { stack, option };
        Ok(stream::try_unfold(state, move |mut state| async move {
            loop {
                let Some((dir, entries)) = state.stack.last_mut() else {
                    return Ok(None);
                };
                let Some(entry) = entries.next() else {
                    state.stack.pop();
                    continue;
                };
                let entry_path = dir.join(entry.name());
                if state.option == TreeSearchOption::Recursive
                    && entry.kind() == TreeEntryKind::Tree
                {
                    let subtree = read_tree_object(&self.store, entry.id())?;
                    state
                        .stack
                        .push((entry_path.clone(), subtree.into_entries().into_iter()));
                }
                return Ok(Some(((entry_path, entry), state)));
            }
        })
        .boxed())
    }

    async fn resolve_start(&self, at: Option<&RefName>) -> StoreResult<Option<ObjectId>> {
        match at {
            Some(name) => self.refs.try_resolve(name).await,
            None => self.refs.resolve_head_id().await,
        }
    }

    /// The kind of entry at `path` in the commit `at` resolves to, or `None`
    /// if the path (or the commit) doesn't exist. The empty path is the root
    /// tree.
    pub async fn get_path_type(
        &self,
        path: &RepoPath,
        at: Option<&RefName>,
    ) -> StoreResult<Option<TreeEntryKind>> {
        let Some(commit_id) = self.resolve_start(at).await? else {
            return Ok(None);
        };
        let commit = self.read_commit_async(&commit_id).await?;
        if path.is_root() {
            return Ok(Some(TreeEntryKind::Tree));
        }
        Ok(self.lookup_entry(&commit.tree, path)?.map(|entry| entry.kind()))
    }

    pub async fn file_exists(&self, path: &RepoPath, at: Option<&RefName>) -> StoreResult<bool> {
        Ok(matches!(
            self.get_path_type(path, at).await?,
            Some(kind) if kind != TreeEntryKind::Tree
        ))
    }

    pub async fn directory_exists(
        &self,
        path: &RepoPath,
        at: Option<&RefName>,
    ) -> StoreResult<bool> {
        Ok(self.get_path_type(path, at).await? == Some(TreeEntryKind::Tree))
    }

    pub async fn path_exists(&self, path: &RepoPath, at: Option<&RefName>) -> StoreResult<bool> {
        Ok(self.get_path_type(path, at).await?.is_some())
    }

    pub fn read_file(&self, path: &RepoPath, at: Option<&RefName>) -> StoreResult<Vec<u8>> {
        self.read_file_async(path, at).block_on()
    }

    /// The blob contents at `path` in the commit `at` resolves to.
    pub async fn read_file_async(
        &self,
        path: &RepoPath,
        at: Option<&RefName>,
    ) -> StoreResult<Vec<u8>> {
        let id = self.require_blob_id(path, at).await?;
        let object = self.store.read_object(&id).await?;
        Ok(object.data.to_vec())
    }

    /// Like [`Repository::read_file_async`], but streaming and uncached.
    pub async fn read_file_streamed(
        &self,
        path: &RepoPath,
        at: Option<&RefName>,
    ) -> StoreResult<BlobReader> {
        let id = self.require_blob_id(path, at).await?;
        self.store.read_object_streamed(&id).await
    }

    async fn require_blob_id(
        &self,
        path: &RepoPath,
        at: Option<&RefName>,
    ) -> StoreResult<ObjectId> {
        let commit_id = match at {
            Some(name) => self
                .refs
                .try_resolve(name)
                .await?
                .ok_or_else(|| StoreError::RefNotFound(name.as_str().to_owned()))?,
            None => self
                .refs
                .resolve_head_id()
                .await?
                .ok_or_else(|| StoreError::RefNotFound("HEAD".to_string()))?,
        };
        let commit = self.read_commit_async(&commit_id).await?;
        let entry = self
            .lookup_entry(&commit.tree, path)?
            .ok_or_else(|| StoreError::InvalidArgument(format!("no file at {path:?}")))?;
        match entry.kind() {
            TreeEntryKind::Tree | TreeEntryKind::Submodule => Err(StoreError::InvalidArgument(
                format!("{path:?} is not a file"),
            )),
            _ => Ok(entry.id().clone()),
        }
    }
}

struct CommitWalk {
    start: Option<ObjectId>,
    initialized: bool,
    queue: VecDeque<ObjectId>,
    visited: HashSet<ObjectId>,
}

struct TreeWalk {
    stack: Vec<(RepoPathBuf, std::vec::IntoIter<TreeEntry>)>,
    option: TreeSearchOption,
}

fn expect_type(id: &ObjectId, actual: &ObjectType, expected: ObjectType) -> StoreResult<()> {
    if *actual != expected {
        return Err(StoreError::InvalidObject {
            object_type: actual.name().to_owned(),
            message: format!("{id} is not a {expected}"),
        });
    }
    Ok(())
}

fn is_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}

fn find_git_dir(path: &Path) -> StoreResult<PathBuf> {
    let dot_git = path.join(".git");
    if is_git_dir(&dot_git) {
        return Ok(dot_git);
    }
    if is_git_dir(path) {
        return Ok(path.to_path_buf());
    }
    for ancestor in path.ancestors().skip(1) {
        let candidate = ancestor.join(".git");
        if is_git_dir(&candidate) {
            return Ok(candidate);
        }
    }
    Err(StoreError::InvalidArgument(format!(
        "no git repository at {}",
        path.display()
    )))
}

/// Reads `extensions.objectFormat` from the repository config; the default is
/// SHA-1.
fn read_object_format(git_dir: &Path) -> StoreResult<HashAlgorithm> {
    let path = git_dir.join("config");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashAlgorithm::Sha1),
        Err(err) => return Err(err.into()),
    };
    match ini_lookup(&content, "extensions", "objectformat") {
        Some(value) => HashAlgorithm::from_name(&value.to_ascii_lowercase()).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unsupported object format {value:?}"))
        }),
        None => Ok(HashAlgorithm::Sha1),
    }
}

/// Minimal gitconfig reader: sections, `key = value` lines, `#`/`;`
/// comments. Section and key lookup is case-insensitive.
fn ini_lookup(content: &str, section: &str, key: &str) -> Option<String> {
    let mut current_section = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[') {
            let Some(name) = rest.strip_suffix(']') else {
                continue;
            };
            current_section = name.trim().to_ascii_lowercase();
            continue;
        }
        let Some((line_key, value)) = line.split_once('=') else {
            continue;
        };
        if current_section == section && line_key.trim().eq_ignore_ascii_case(key) {
            let value = value.trim();
            let value = value
                .split_once(['#', ';'])
                .map_or(value, |(value, _)| value.trim());
            return Some(value.to_owned());
        }
    }
    None
}
