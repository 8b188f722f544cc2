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

use std::fs;

use assert_matches::assert_matches;
use futures::future::join;
use gitvault_lib::object::ObjectType;
use gitvault_lib::object::StoreError;
use gitvault_lib::object::TreeEntryKind;
use gitvault_lib::object_id::HashAlgorithm;
use gitvault_lib::repo_path::RepoPathComponent;
use pollster::FutureExt as _;
use testutils::TestRepo;
use testutils::create_signature;
use testutils::main_branch;
use testutils::repo_path;

fn blob_id(data: &[u8]) -> gitvault_lib::object_id::ObjectId {
    let mut framed = format!("blob {}\0", data.len()).into_bytes();
    framed.extend_from_slice(data);
    HashAlgorithm::Sha1.hash_bytes(&framed)
}

#[test]
fn test_initial_commit() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;

    let commit_id = repo
        .commit_builder(main_branch().to_owned(), create_signature(), "initial")
        .add_file(repo_path("README.md"), b"# R".as_slice())
        .write()
        .block_on()
        .unwrap();

    // HEAD stays symbolic and the branch file holds the new tip.
    let head = fs::read_to_string(repo.git_dir().join("HEAD")).unwrap();
    assert_eq!(head, "ref: refs/heads/main\n");
    let branch = fs::read_to_string(
        repo.git_dir().join("refs").join("heads").join("main"),
    )
    .unwrap();
    assert_eq!(branch, format!("{}\n", commit_id.hex()));

    let commit = repo.read_commit(&commit_id).unwrap();
    assert_eq!(commit.parents, vec![]);
    assert_eq!(
        repo.read_file(&repo_path("README.md"), Some(main_branch()))
            .unwrap(),
        b"# R"
    );
}

#[test]
fn test_empty_operations_rejected() {
    let test_repo = TestRepo::init();
    assert_matches!(
        test_repo
            .repo
            .commit_builder(main_branch().to_owned(), create_signature(), "nothing")
            .write()
            .block_on(),
        Err(StoreError::InvalidArgument(_))
    );
}

#[test]
fn test_add_update_remove_roundtrip() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("config.txt"), b"v1", "add");

    let second = repo
        .commit_builder(main_branch().to_owned(), create_signature(), "update")
        .update_file(repo_path("config.txt"), b"v2".as_slice(), None)
        .write()
        .block_on()
        .unwrap();
    assert_eq!(
        repo.read_file(&repo_path("config.txt"), None).unwrap(),
        b"v2"
    );
    let commit = repo.read_commit(&second).unwrap();
    assert_eq!(commit.parents.len(), 1);

    repo.commit_builder(main_branch().to_owned(), create_signature(), "remove")
        .remove_file(repo_path("config.txt"))
        .write()
        .block_on()
        .unwrap();
    assert!(
        !repo
            .file_exists(&repo_path("config.txt"), None)
            .block_on()
            .unwrap()
    );
}

#[test]
fn test_add_existing_path_fails() {
    let test_repo = TestRepo::init();
    test_repo.commit_file(&repo_path("file"), b"x", "add");
    assert_matches!(
        test_repo
            .repo
            .commit_builder(main_branch().to_owned(), create_signature(), "again")
            .add_file(repo_path("file"), b"y".as_slice())
            .write()
            .block_on(),
        Err(StoreError::InvalidArgument(_))
    );
}

#[test]
fn test_update_missing_path_fails() {
    let test_repo = TestRepo::init();
    test_repo.commit_file(&repo_path("present"), b"x", "add");
    assert_matches!(
        test_repo
            .repo
            .commit_builder(main_branch().to_owned(), create_signature(), "oops")
            .update_file(repo_path("absent"), b"y".as_slice(), None)
            .write()
            .block_on(),
        Err(StoreError::InvalidArgument(_))
    );
}

#[test]
fn test_noop_update_fails() {
    let test_repo = TestRepo::init();
    test_repo.commit_file(&repo_path("file"), b"same", "add");
    assert_matches!(
        test_repo
            .repo
            .commit_builder(main_branch().to_owned(), create_signature(), "noop")
            .update_file(repo_path("file"), b"same".as_slice(), None)
            .write()
            .block_on(),
        Err(StoreError::NoEffectiveChanges)
    );
}

#[test]
fn test_expected_hash_conflict() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("config.txt"), b"v1", "seed");
    let stale_hash = blob_id(b"v1");

    // The file moves on concurrently.
    repo.commit_builder(main_branch().to_owned(), create_signature(), "external")
        .update_file(repo_path("config.txt"), b"v2".as_slice(), None)
        .write()
        .block_on()
        .unwrap();

    let err = repo
        .commit_builder(main_branch().to_owned(), create_signature(), "mine")
        .update_file(
            repo_path("config.txt"),
            b"v3".as_slice(),
            Some(stale_hash.clone()),
        )
        .write()
        .block_on()
        .unwrap_err();
    assert_matches!(
        &err,
        StoreError::BlobConflict { path, expected, actual }
            if path.as_internal_str() == "config.txt"
                && *expected == stale_hash
                && *actual == blob_id(b"v2")
    );
    let message = err.to_string();
    assert!(message.contains(&stale_hash.hex()));
    assert!(message.contains(&blob_id(b"v2").hex()));

    // Nothing changed.
    assert_eq!(
        repo.read_file(&repo_path("config.txt"), None).unwrap(),
        b"v2"
    );
}

#[test]
fn test_expected_hash_match_succeeds() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("config.txt"), b"v1", "seed");

    repo.commit_builder(main_branch().to_owned(), create_signature(), "careful")
        .update_file(
            repo_path("config.txt"),
            b"v2".as_slice(),
            Some(blob_id(b"v1")),
        )
        .write()
        .block_on()
        .unwrap();
    assert_eq!(
        repo.read_file(&repo_path("config.txt"), None).unwrap(),
        b"v2"
    );
}

#[test]
fn test_move_file_preserves_blob() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("old/name.txt"), b"payload", "seed");

    repo.commit_builder(main_branch().to_owned(), create_signature(), "move")
        .move_file(repo_path("old/name.txt"), repo_path("new/dir/name.txt"))
        .write()
        .block_on()
        .unwrap();

    assert!(
        !repo
            .path_exists(&repo_path("old"), None)
            .block_on()
            .unwrap(),
        "emptied directory must be pruned"
    );
    assert_eq!(
        repo.read_file(&repo_path("new/dir/name.txt"), None).unwrap(),
        b"payload"
    );
}

#[test]
fn test_file_over_directory_conflict() {
    let test_repo = TestRepo::init();
    test_repo.commit_file(&repo_path("dir/inner.txt"), b"x", "seed");

    let err = test_repo
        .repo
        .commit_builder(main_branch().to_owned(), create_signature(), "clash")
        .add_file(repo_path("dir"), b"y".as_slice())
        .write()
        .block_on()
        .unwrap_err();
    assert_matches!(
        err,
        StoreError::PathConflict { path, existing }
            if path.as_internal_str() == "dir"
                && existing.as_internal_str() == "dir/inner.txt"
    );
}

#[test]
fn test_directory_under_file_conflict() {
    let test_repo = TestRepo::init();
    test_repo.commit_file(&repo_path("file"), b"x", "seed");

    let err = test_repo
        .repo
        .commit_builder(main_branch().to_owned(), create_signature(), "clash")
        .add_file(repo_path("file/under.txt"), b"y".as_slice())
        .write()
        .block_on()
        .unwrap_err();
    assert_matches!(
        err,
        StoreError::PathConflict { path, existing }
            if path.as_internal_str() == "file/under.txt"
                && existing.as_internal_str() == "file"
    );
}

#[test]
fn test_conflict_with_earlier_operation_in_same_commit() {
    let test_repo = TestRepo::init();
    let err = test_repo
        .repo
        .commit_builder(main_branch().to_owned(), create_signature(), "clash")
        .add_file(repo_path("a"), b"file".as_slice())
        .add_file(repo_path("a/b"), b"nested".as_slice())
        .write()
        .block_on()
        .unwrap_err();
    assert_matches!(err, StoreError::PathConflict { .. });
}

#[test]
fn test_identical_tree_fails_with_no_effective_changes() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("a"), b"1", "seed");

    // Remove and re-add the same content: the tree is bit-identical.
    assert_matches!(
        repo.commit_builder(main_branch().to_owned(), create_signature(), "shuffle")
            .remove_file(repo_path("a"))
            .add_file(repo_path("a"), b"1".as_slice())
            .write()
            .block_on(),
        Err(StoreError::NoEffectiveChanges)
    );
}

#[test]
fn test_add_file_stream() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let content: Vec<u8> = (0..100u8).cycle().take(30_000).collect();

    repo.commit_builder(main_branch().to_owned(), create_signature(), "streamed")
        .operation(gitvault_lib::commit_builder::CommitOperation::AddFileStream {
            path: repo_path("big.bin"),
            content: Box::pin(std::io::Cursor::new(content.clone())),
        })
        .write()
        .block_on()
        .unwrap();
    assert_eq!(
        repo.read_file(&repo_path("big.bin"), None).unwrap(),
        content
    );
}

/// Delivers its payload only on the second poll, forcing the surrounding
/// future to suspend once mid-build.
struct YieldOnceReader {
    data: Option<Vec<u8>>,
    yielded: bool,
}

impl tokio::io::AsyncRead for YieldOnceReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if !self.yielded {
            self.yielded = true;
            cx.waker().wake_by_ref();
            return std::task::Poll::Pending;
        }
        if let Some(data) = self.data.take() {
            buf.put_slice(&data);
        }
        std::task::Poll::Ready(Ok(()))
    }
}

#[test]
fn test_concurrent_commits_one_wins() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("seed"), b"s", "seed");

    // Both builders pre-read the same tip: the left one suspends after its
    // pre-read (on the yielding stream) while the right one runs to
    // completion, so the left CAS must lose and surface a conflict.
    let left = repo
        .commit_builder(main_branch().to_owned(), create_signature(), "left")
        .operation(gitvault_lib::commit_builder::CommitOperation::AddFileStream {
            path: repo_path("left.txt"),
            content: Box::pin(YieldOnceReader {
                data: Some(b"l".to_vec()),
                yielded: false,
            }),
        })
        .write();
    let right = repo
        .commit_builder(main_branch().to_owned(), create_signature(), "right")
        .add_file(repo_path("right.txt"), b"r".as_slice())
        .write();
    let (left, right) = join(left, right).block_on();

    let (winner, loser) = match (left, right) {
        (Ok(id), Err(err)) => (id, err),
        (Err(err), Ok(id)) => (id, err),
        other => panic!("expected exactly one success, got {other:?}"),
    };
    assert_matches!(loser, StoreError::RefConflict { .. });
    let tip = repo
        .refs()
        .try_resolve(main_branch())
        .block_on()
        .unwrap()
        .unwrap();
    assert_eq!(tip, winner);
}

#[test]
fn test_reachability_predicate() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let first = test_repo.commit_file(&repo_path("a"), b"1", "first");
    let second = test_repo.commit_file(&repo_path("b"), b"2", "second");

    assert!(repo.is_commit_reachable(&second, &first).block_on().unwrap());
    assert!(repo.is_commit_reachable(&second, &second).block_on().unwrap());
    assert!(!repo.is_commit_reachable(&first, &second).block_on().unwrap());
}

#[test]
fn test_trees_are_written_sorted() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_file(&repo_path("zeta"), b"z", "seed");

    repo.commit_builder(main_branch().to_owned(), create_signature(), "more")
        .add_file(repo_path("sub/alpha"), b"a".as_slice())
        .add_file(repo_path("sub.txt"), b"s".as_slice())
        .write()
        .block_on()
        .unwrap();

    let (_, commit) = repo.head_commit().block_on().unwrap().unwrap();
    let tree = repo.read_tree(&commit.tree).unwrap();
    let names: Vec<_> = tree
        .entries()
        .map(|entry| entry.name().as_str().to_owned())
        .collect();
    // Git sort order: "sub" (a tree) compares as "sub/" and lands after
    // "sub.txt".
    assert_eq!(names, vec!["sub.txt", "sub", "zeta"]);
    let sub = tree.entry(RepoPathComponent::new("sub").unwrap()).unwrap();
    assert_eq!(sub.kind(), TreeEntryKind::Tree);
}

#[test]
fn test_commit_object_type() {
    let test_repo = TestRepo::init();
    let id = test_repo.commit_file(&repo_path("f"), b"x", "typed");
    let object = test_repo.repo.store().read_object(&id).block_on().unwrap();
    assert_eq!(object.object_type, ObjectType::Commit);
}
