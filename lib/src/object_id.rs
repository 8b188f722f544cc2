// Copyright 2023-2025 The GitVault Authors
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

//! Content-addressed object identifiers.

use std::fmt;
use std::fmt::Debug;

use digest::Digest as _;
use sha1::Sha1;
use sha2::Sha256;

use crate::hex_util;

/// Identifier of a Git object, the digest of its framed content.
///
/// The identifier width is a property of the repository (20 bytes for SHA-1,
/// 32 for SHA-256), not of the individual id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Parses the given hex string into an `ObjectId`.
    ///
    /// The given string must be valid. A static str is required to prevent
    /// API misuse.
    pub fn from_hex(hex: &'static str) -> Self {
        Self::try_from_hex(hex).unwrap()
    }

    /// Parses the given hex string into an `ObjectId`.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        hex_util::decode_hex(hex).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("ObjectId").field(&self.hex()).finish()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.pad(&self.hex())
    }
}

/// Digest algorithm used for object ids in a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Length of an object id in bytes.
    pub fn id_length(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of an object id in hex digits.
    pub fn hex_length(self) -> usize {
        self.id_length() * 2
    }

    /// Name used by `extensions.objectFormat` in the repository config.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Starts an incremental digest.
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Digests `data` in one step.
    pub fn hash_bytes(self, data: &[u8]) -> ObjectId {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }

    /// Id of the empty tree object, which Git never stores on disk.
    pub fn empty_tree_id(self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904"),
            Self::Sha256 => ObjectId::from_hex(
                "6ef19b41225c5369f1c104d45d8d85efa9b057b53b14b4b9b939dd74decc5321",
            ),
        }
    }
}

/// Incremental digest state for either repository hash algorithm.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(hasher) => hasher.update(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finish(self) -> ObjectId {
        match self {
            Self::Sha1(hasher) => ObjectId::new(hasher.finalize().to_vec()),
            Self::Sha256(hasher) => ObjectId::new(hasher.finalize().to_vec()),
        }
    }
}

impl Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let name = match self {
            Self::Sha1(_) => "Sha1",
            Self::Sha256(_) => "Sha256",
        };
        f.debug_tuple("Hasher").field(&name).finish()
    }
}

/// An object id prefix with facilities for converting between bytes and a hex
/// string.
#[derive(Clone, PartialEq, Eq)]
pub struct HexPrefix {
    // For odd-length prefixes, the lower 4 bits of the last byte are
    // zero-filled (e.g. the prefix "abc" is stored in two bytes as "abc0").
    min_prefix_bytes: Vec<u8>,
    has_odd_byte: bool,
}

impl HexPrefix {
    /// Returns a new `HexPrefix` or `None` if `prefix` cannot be decoded from
    /// hex to bytes.
    pub fn try_from_hex(prefix: impl AsRef<[u8]>) -> Option<Self> {
        let (min_prefix_bytes, has_odd_byte) = hex_util::decode_hex_prefix(prefix)?;
        Some(Self {
            min_prefix_bytes,
            has_odd_byte,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            min_prefix_bytes: bytes.to_owned(),
            has_odd_byte: false,
        }
    }

    /// Returns a new `HexPrefix` representing the given `id`.
    pub fn from_id(id: &ObjectId) -> Self {
        Self::from_bytes(id.as_bytes())
    }

    /// Returns string representation of this prefix using hex digits.
    pub fn hex(&self) -> String {
        let mut hex_string = hex_util::encode_hex(&self.min_prefix_bytes);
        if self.has_odd_byte {
            hex_string.pop().unwrap();
        }
        hex_string
    }

    /// Minimum bytes that would match this prefix. (e.g. "abc0" for "abc")
    ///
    /// Use this to partition a sorted slice, and test `matches(id)` from
    /// there.
    pub fn min_prefix_bytes(&self) -> &[u8] {
        &self.min_prefix_bytes
    }

    /// Returns the bytes representation if this prefix can be a full id.
    pub fn as_full_bytes(&self) -> Option<&[u8]> {
        (!self.has_odd_byte).then_some(&self.min_prefix_bytes)
    }

    fn split_odd_byte(&self) -> (Option<u8>, &[u8]) {
        if self.has_odd_byte {
            let (&odd, prefix) = self.min_prefix_bytes.split_last().unwrap();
            (Some(odd), prefix)
        } else {
            (None, &self.min_prefix_bytes)
        }
    }

    /// Returns whether the stored prefix matches the prefix of `id`.
    pub fn matches(&self, id: &ObjectId) -> bool {
        let id_bytes = id.as_bytes();
        let (maybe_odd, prefix) = self.split_odd_byte();
        if id_bytes.starts_with(prefix) {
            if let Some(odd) = maybe_odd {
                matches!(id_bytes.get(prefix.len()), Some(v) if v & 0xf0 == odd)
            } else {
                true
            }
        } else {
            false
        }
    }
}

impl Debug for HexPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("HexPrefix").field(&self.hex()).finish()
    }
}

/// The result of a prefix search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixResolution<T> {
    NoMatch,
    SingleMatch(T),
    AmbiguousMatch,
}

impl<T> PrefixResolution<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PrefixResolution<U> {
        match self {
            Self::NoMatch => PrefixResolution::NoMatch,
            Self::SingleMatch(x) => PrefixResolution::SingleMatch(f(x)),
            Self::AmbiguousMatch => PrefixResolution::AmbiguousMatch,
        }
    }
}

impl<T: Clone> PrefixResolution<T> {
    pub fn plus(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::NoMatch, other) => other.clone(),
            (local, Self::NoMatch) => local.clone(),
            (Self::AmbiguousMatch, _) => Self::AmbiguousMatch,
            (_, Self::AmbiguousMatch) => Self::AmbiguousMatch,
            (Self::SingleMatch(_), Self::SingleMatch(_)) => Self::AmbiguousMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_object_id() {
        let id = ObjectId::from_hex("deadbeef0123");
        assert_eq!(format!("{id}"), "deadbeef0123");
        assert_eq!(format!("{id:.6}"), "deadbe");
    }

    #[test]
    fn test_hash_lengths() {
        let empty = HashAlgorithm::Sha1.hash_bytes(b"");
        assert_eq!(empty.hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(empty.as_bytes().len(), HashAlgorithm::Sha1.id_length());

        let empty = HashAlgorithm::Sha256.hash_bytes(b"");
        assert_eq!(
            empty.hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(empty.as_bytes().len(), HashAlgorithm::Sha256.id_length());
    }

    #[test]
    fn test_incremental_hasher_matches_one_shot() {
        let mut hasher = HashAlgorithm::Sha1.hasher();
        hasher.update(b"blob 11\0");
        hasher.update(b"Hello World");
        assert_eq!(
            hasher.finish(),
            HashAlgorithm::Sha1.hash_bytes(b"blob 11\0Hello World")
        );
    }

    #[test]
    fn test_hex_prefix_prefixes() {
        let prefix = HexPrefix::try_from_hex("").unwrap();
        assert_eq!(prefix.min_prefix_bytes(), b"");

        let prefix = HexPrefix::try_from_hex("1").unwrap();
        assert_eq!(prefix.min_prefix_bytes(), b"\x10");

        let prefix = HexPrefix::try_from_hex("12").unwrap();
        assert_eq!(prefix.min_prefix_bytes(), b"\x12");

        let prefix = HexPrefix::try_from_hex("123").unwrap();
        assert_eq!(prefix.min_prefix_bytes(), b"\x12\x30");

        let bad_prefix = HexPrefix::try_from_hex("0x123");
        assert_eq!(bad_prefix, None);

        let bad_prefix = HexPrefix::try_from_hex("foobar");
        assert_eq!(bad_prefix, None);
    }

    #[test]
    fn test_hex_prefix_matches() {
        let id = ObjectId::from_hex("1234");

        assert!(HexPrefix::try_from_hex("").unwrap().matches(&id));
        assert!(HexPrefix::try_from_hex("1").unwrap().matches(&id));
        assert!(HexPrefix::try_from_hex("12").unwrap().matches(&id));
        assert!(HexPrefix::try_from_hex("123").unwrap().matches(&id));
        assert!(HexPrefix::try_from_hex("1234").unwrap().matches(&id));
        assert!(!HexPrefix::try_from_hex("12345").unwrap().matches(&id));

        assert!(!HexPrefix::try_from_hex("a").unwrap().matches(&id));
        assert!(!HexPrefix::try_from_hex("1a").unwrap().matches(&id));
        assert!(!HexPrefix::try_from_hex("12a").unwrap().matches(&id));
        assert!(!HexPrefix::try_from_hex("123a").unwrap().matches(&id));
    }
}
