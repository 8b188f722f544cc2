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

use std::collections::BTreeMap;

use crate::object::MODE_TREE;
use crate::object::ObjectType;
use crate::object::StoreError;
use crate::object::StoreResult;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object::TreeEntryKind;
use crate::object::parse_tree;
use crate::object::serialize_tree;
use crate::object_id::ObjectId;
use crate::object_store::ObjectStore;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;

#[derive(Debug)]
enum Override {
    Tombstone,
    Replace { mode: u32, id: ObjectId },
}

/// Materializes a set of per-path overrides on top of a base tree into new
/// tree objects, bottom-up.
///
/// Directories left empty by tombstones are pruned; missing intermediate
/// directories are created.
#[derive(Debug)]
pub struct TreeBuilder<'a> {
    store: &'a ObjectStore,
    base_tree_id: Option<ObjectId>,
    overrides: BTreeMap<RepoPathBuf, Override>,
}

impl<'a> TreeBuilder<'a> {
    /// A `base_tree_id` of `None` starts from an empty root tree.
    pub fn new(store: &'a ObjectStore, base_tree_id: Option<ObjectId>) -> Self {
        let overrides = BTreeMap::new();
        Self {
            store,
            base_tree_id,
            overrides,
        }
    }

    pub fn set(&mut self, path: RepoPathBuf, mode: u32, id: ObjectId) {
        assert!(!path.is_root());
        self.overrides.insert(path, Override::Replace { mode, id });
    }

    pub fn remove(&mut self, path: RepoPathBuf) {
        assert!(!path.is_root());
        self.overrides.insert(path, Override::Tombstone);
    }

    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    /// Writes the new trees and returns the root tree id.
    pub async fn write_tree(self) -> StoreResult<ObjectId> {
        self.write_tree_impl()
    }

    pub(crate) fn write_tree_impl(self) -> StoreResult<ObjectId> {
        let mut trees_to_write = self.get_base_trees()?;

        // Update entries in parent trees for the overrides.
        for (path, file_override) in &self.overrides {
            let (dir, basename) = path.split().unwrap();
            let tree_entries = trees_to_write.get_mut(dir).unwrap();
            match file_override {
                Override::Replace { mode, id } => {
                    tree_entries.insert(basename.to_owned(), (*mode, id.clone()));
                }
                Override::Tombstone => {
                    tree_entries.remove(basename);
                }
            }
        }

        // Write trees in reverse lexicographical order, starting with trees
        // without children.
        let store = self.store;
        while let Some((dir, cur_entries)) = trees_to_write.pop_last() {
            if let Some((parent, basename)) = dir.split() {
                let parent_entries = trees_to_write.get_mut(parent).unwrap();
                if cur_entries.is_empty() {
                    if let Some((MODE_TREE, _)) = parent_entries.get(basename) {
                        parent_entries.remove(basename);
                    } else {
                        // Entry would have been replaced with a file already.
                    }
                } else {
                    let id = write_tree_object(store, cur_entries)?;
                    parent_entries.insert(basename.to_owned(), (MODE_TREE, id));
                }
            } else {
                // We're writing the root tree. Write it even if empty, and
                // return its id.
                assert!(trees_to_write.is_empty());
                return write_tree_object(store, cur_entries);
            }
        }

        unreachable!("trees_to_write must contain the root tree");
    }

    fn get_base_trees(
        &self,
    ) -> StoreResult<BTreeMap<RepoPathBuf, BTreeMap<RepoPathComponentBuf, (u32, ObjectId)>>> {
        let store = self.store;
        let mut tree_cache = {
            let dir = RepoPathBuf::root();
            let tree = match &self.base_tree_id {
                Some(id) => read_tree_object(store, id)?,
                None => Tree::default(),
            };
            BTreeMap::from([(dir, tree)])
        };

        fn populate_trees<'b>(
            tree_cache: &'b mut BTreeMap<RepoPathBuf, Tree>,
            store: &ObjectStore,
            dir: &RepoPath,
        ) -> StoreResult<&'b Tree> {
            if tree_cache.contains_key(dir) {
                return Ok(tree_cache.get(dir).unwrap());
            }
            let (parent, basename) = dir.split().expect("root must be populated");
            let parent_tree = populate_trees(tree_cache, store, parent)?;
            let tree = match parent_tree.entry(basename) {
                Some(entry) if entry.kind() == TreeEntryKind::Tree => {
                    read_tree_object(store, entry.id())?
                }
                Some(entry) => {
                    return Err(StoreError::PathConflict {
                        path: dir.to_owned(),
                        existing: parent.join(entry.name()),
                    });
                }
                None => Tree::default(),
            };
            Ok(tree_cache.entry(dir.to_owned()).or_insert(tree))
        }

        for path in self.overrides.keys() {
            let parent = path.parent().unwrap();
            populate_trees(&mut tree_cache, store, parent)?;
        }

        Ok(tree_cache
            .into_iter()
            .map(|(dir, tree)| {
                let entries = tree
                    .entries()
                    .map(|entry| (entry.name().to_owned(), (entry.mode(), entry.id().clone())))
                    .collect();
                (dir, entries)
            })
            .collect())
    }
}

pub(crate) fn read_tree_object(store: &ObjectStore, id: &ObjectId) -> StoreResult<Tree> {
    let object = store.read_object_impl(id, 0)?;
    if object.object_type != ObjectType::Tree {
        return Err(StoreError::InvalidObject {
            object_type: object.object_type.name().to_owned(),
            message: format!("{id} is not a tree"),
        });
    }
    parse_tree(&object.data, store.algorithm().id_length())
}

fn write_tree_object(
    store: &ObjectStore,
    entries: BTreeMap<RepoPathComponentBuf, (u32, ObjectId)>,
) -> StoreResult<ObjectId> {
    let entries = entries
        .into_iter()
        .map(|(name, (mode, id))| TreeEntry::new(name, mode, id))
        .collect();
    let data = serialize_tree(&Tree::from_entries(entries))?;
    store.write_object_impl(ObjectType::Tree, &data)
}
