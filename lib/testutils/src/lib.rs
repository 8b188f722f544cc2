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

//! Shared fixtures for gitvault-lib tests.

use std::path::Path;

use gitvault_lib::object::Signature;
use gitvault_lib::object::Timestamp;
use gitvault_lib::object_id::HashAlgorithm;
use gitvault_lib::object_id::ObjectId;
use gitvault_lib::ref_name::RefName;
use gitvault_lib::repo::InitOptions;
use gitvault_lib::repo::Repository;
use gitvault_lib::repo_path::RepoPath;
use gitvault_lib::repo_path::RepoPathBuf;
use pollster::FutureExt as _;
use tempfile::TempDir;

pub mod pack;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("gitvault-test-")
        .tempdir()
        .unwrap()
}

/// A deterministic author/committer identity.
pub fn create_signature() -> Signature {
    Signature {
        name: "Test User".to_string(),
        email: "test.user@example.com".to_string(),
        timestamp: Timestamp {
            seconds: 1700000000,
            tz_offset: 0,
        },
    }
}

pub fn repo_path(value: &str) -> RepoPathBuf {
    RepoPathBuf::from_internal_string(value).unwrap()
}

pub fn main_branch() -> &'static RefName {
    RefName::new("refs/heads/main")
}

/// A repository in a temp directory that lives as long as this value.
pub struct TestRepo {
    // Kept alive for the lifetime of the repo.
    _temp_dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn init() -> Self {
        Self::init_with_options(&InitOptions::default())
    }

    pub fn init_with_options(options: &InitOptions) -> Self {
        let temp_dir = new_temp_dir();
        let repo = Repository::init(temp_dir.path(), options).unwrap();
        Self {
            _temp_dir: temp_dir,
            repo,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        self.repo.git_dir().parent().unwrap()
    }

    /// Commits one file on `refs/heads/main` and returns the commit id.
    pub fn commit_file(&self, path: &RepoPath, content: &[u8], message: &str) -> ObjectId {
        self.repo
            .commit_builder(main_branch().to_owned(), create_signature(), message)
            .add_file(path.to_owned(), content)
            .write()
            .block_on()
            .unwrap()
    }
}

/// The well-known id of the empty blob, for the default SHA-1 repositories.
pub fn empty_blob_id() -> ObjectId {
    HashAlgorithm::Sha1.hash_bytes(b"blob 0\0")
}
