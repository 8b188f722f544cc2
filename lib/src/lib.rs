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

//! Reading and writing Git repositories on local disk, without shelling out
//! to `git`.
//!
//! The crate covers the object store (loose and packed, SHA-1 or SHA-256),
//! the reference store with validated compare-and-swap updates, a pack
//! reader with delta resolution, and a commit builder that turns file-level
//! operations into trees and commits. Start at [`repo::Repository`].
//!
//! Known limitation: deleting a reference removes its loose file only;
//! `packed-refs` is never rewritten, so a reference that exists only there
//! survives deletion.

#![warn(missing_docs)]

pub mod commit_builder;
pub mod delta;
pub mod file_util;
pub mod hex_util;
pub mod lock;
pub mod object;
pub mod object_id;
pub mod object_store;
pub mod pack;
pub mod ref_name;
pub mod ref_store;
pub mod repo;
pub mod repo_path;
pub mod stream_util;
pub mod tree_builder;

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    pub fn new_temp_dir() -> TempDir {
        tempfile::Builder::new()
            .prefix("gitvault-test-")
            .tempdir()
            .unwrap()
    }
}
