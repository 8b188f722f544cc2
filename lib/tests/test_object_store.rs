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

use assert_matches::assert_matches;
use gitvault_lib::object::ObjectType;
use gitvault_lib::object::StoreError;
use gitvault_lib::object::parse_commit;
use gitvault_lib::object::serialize_commit;
use gitvault_lib::object_id::HashAlgorithm;
use gitvault_lib::object_id::HexPrefix;
use gitvault_lib::object_id::ObjectId;
use gitvault_lib::object_id::PrefixResolution;
use gitvault_lib::repo::InitOptions;
use pollster::FutureExt as _;
use testutils::TestRepo;
use testutils::create_signature;
use testutils::repo_path;

#[test]
fn test_blob_write_read_roundtrip() {
    let test_repo = TestRepo::init();
    let store = test_repo.repo.store();

    let content = b"arbitrary bytes \x00\xff\x80 with no structure";
    let id = store
        .write_object(ObjectType::Blob, content)
        .block_on()
        .unwrap();
    let object = store.read_object(&id).block_on().unwrap();
    assert_eq!(object.object_type, ObjectType::Blob);
    assert_eq!(&object.data[..], content);

    // The id matches the framing definition.
    let mut framed = format!("blob {}\0", content.len()).into_bytes();
    framed.extend_from_slice(content);
    assert_eq!(id, HashAlgorithm::Sha1.hash_bytes(&framed));
}

#[test]
fn test_empty_blob() {
    let test_repo = TestRepo::init();
    let store = test_repo.repo.store();
    let id = store.write_object(ObjectType::Blob, b"").block_on().unwrap();
    assert_eq!(id.hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    assert_eq!(id.hex().len(), 40);
    let object = store.read_object(&id).block_on().unwrap();
    assert!(object.data.is_empty());
}

#[test]
fn test_idempotent_writes() {
    let test_repo = TestRepo::init();
    let store = test_repo.repo.store();
    let first = store
        .write_object(ObjectType::Blob, b"stable")
        .block_on()
        .unwrap();
    let second = store
        .write_object(ObjectType::Blob, b"stable")
        .block_on()
        .unwrap();
    assert_eq!(first, second);
    assert!(store.has_object(&first).block_on().unwrap());
}

#[test]
fn test_sha256_repository() {
    let test_repo = TestRepo::init_with_options(&InitOptions {
        algorithm: HashAlgorithm::Sha256,
        ..InitOptions::default()
    });
    let store = test_repo.repo.store();

    let id = store
        .write_object(ObjectType::Blob, b"wide hashes")
        .block_on()
        .unwrap();
    assert_eq!(id.hex().len(), 64);
    let object = store.read_object(&id).block_on().unwrap();
    assert_eq!(&object.data[..], b"wide hashes");

    // SHA-1-sized ids are rejected up front.
    let short = ObjectId::new(vec![1; 20]);
    assert_matches!(
        store.read_object(&short).block_on(),
        Err(StoreError::InvalidArgument(_))
    );
}

#[test]
fn test_commit_reread_is_byte_stable() {
    let test_repo = TestRepo::init();
    let commit_id = test_repo.commit_file(&repo_path("file"), b"content", "message");

    let store = test_repo.repo.store();
    let object = store.read_object(&commit_id).block_on().unwrap();
    let commit = parse_commit(&object.data).unwrap();
    assert_eq!(serialize_commit(&commit).unwrap(), object.data.to_vec());

    // Rewriting yields the same id.
    let rewritten = store
        .write_object(ObjectType::Commit, &object.data)
        .block_on()
        .unwrap();
    assert_eq!(rewritten, commit_id);
}

#[test]
fn test_uncached_read_matches_cached() {
    let test_repo = TestRepo::init();
    let store = test_repo.repo.store();
    let id = store
        .write_object(ObjectType::Blob, b"big blob stand-in")
        .block_on()
        .unwrap();
    let cached = store.read_object(&id).block_on().unwrap();
    let uncached = store.read_object_uncached(&id).block_on().unwrap();
    assert_eq!(cached, uncached);
}

#[test]
fn test_resolve_prefix() {
    let test_repo = TestRepo::init();
    let store = test_repo.repo.store();
    let id = store
        .write_object(ObjectType::Blob, b"unique-ish")
        .block_on()
        .unwrap();

    let prefix = HexPrefix::try_from_hex(&id.hex()[..7]).unwrap();
    assert_eq!(
        store.resolve_prefix(&prefix).unwrap(),
        PrefixResolution::SingleMatch(id.clone())
    );

    // The full id resolves to itself.
    let full = HexPrefix::from_id(&id);
    assert_eq!(
        store.resolve_prefix(&full).unwrap(),
        PrefixResolution::SingleMatch(id)
    );
}

#[test]
fn test_signature_survives_commit_roundtrip() {
    let test_repo = TestRepo::init();
    let commit_id = test_repo.commit_file(&repo_path("file"), b"content", "message");
    let commit = test_repo.repo.read_commit(&commit_id).unwrap();
    assert_eq!(commit.author, create_signature());
    assert_eq!(commit.committer, create_signature());
    assert_eq!(commit.message, "message");
    assert_eq!(commit.parents, vec![]);
}
