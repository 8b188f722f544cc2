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

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

use bstr::BString;
use bstr::ByteSlice as _;
use chrono::TimeZone as _;
use thiserror::Error;

use crate::file_util::PathError;
use crate::object_id::ObjectId;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponent;
use crate::repo_path::RepoPathComponentBuf;

/// The four storable Git object types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(Self::Commit),
            "tree" => Some(Self::Tree),
            "blob" => Some(Self::Blob),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A decoded object: its type plus the raw content without framing.
///
/// The payload is shared between the identity cache and all readers and must
/// be treated as immutable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitObject {
    pub object_type: ObjectType,
    pub data: Arc<[u8]>,
}

impl GitObject {
    pub fn new(object_type: ObjectType, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            object_type,
            data: data.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("Out-of-range date")]
pub struct TimestampOutOfRange;

/// Point in time with the minute-precision timezone offset Git records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Time zone offset in minutes.
    pub tz_offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(chrono::offset::Local::now())
    }

    pub fn from_datetime<Tz: chrono::TimeZone<Offset = chrono::offset::FixedOffset>>(
        datetime: chrono::DateTime<Tz>,
    ) -> Self {
        Self {
            seconds: datetime.timestamp(),
            tz_offset: datetime.offset().local_minus_utc() / 60,
        }
    }

    pub fn to_datetime(
        &self,
    ) -> Result<chrono::DateTime<chrono::FixedOffset>, TimestampOutOfRange> {
        let utc = match chrono::Utc.timestamp_opt(self.seconds, 0) {
            chrono::LocalResult::None => {
                return Err(TimestampOutOfRange);
            }
            chrono::LocalResult::Single(x) => x,
            chrono::LocalResult::Ambiguous(y, _z) => y,
        };

        Ok(utc.with_timezone(
            &chrono::FixedOffset::east_opt(self.tz_offset * 60)
                .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).unwrap()),
        ))
    }
}

/// Author or committer identity embedded in commit and tag headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

/// Entry kind derived from the stored file mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeEntryKind {
    Blob,
    ExecutableBlob,
    Symlink,
    Tree,
    Submodule,
}

pub const MODE_BLOB: u32 = 0o100644;
pub const MODE_EXECUTABLE_BLOB: u32 = 0o100755;
pub const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_TREE: u32 = 0o40000;
pub const MODE_SUBMODULE: u32 = 0o160000;

impl TreeEntryKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode {
            MODE_TREE => Self::Tree,
            MODE_SUBMODULE => Self::Submodule,
            MODE_SYMLINK => Self::Symlink,
            MODE_EXECUTABLE_BLOB => Self::ExecutableBlob,
            _ => Self::Blob,
        }
    }

    pub fn default_mode(self) -> u32 {
        match self {
            Self::Blob => MODE_BLOB,
            Self::ExecutableBlob => MODE_EXECUTABLE_BLOB,
            Self::Symlink => MODE_SYMLINK,
            Self::Tree => MODE_TREE,
            Self::Submodule => MODE_SUBMODULE,
        }
    }
}

/// One `name → object` row of a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    name: RepoPathComponentBuf,
    mode: u32,
    id: ObjectId,
}

impl TreeEntry {
    pub fn new(name: RepoPathComponentBuf, mode: u32, id: ObjectId) -> Self {
        Self { name, mode, id }
    }

    pub fn name(&self) -> &RepoPathComponent {
        &self.name
    }

    /// The mode exactly as stored on the wire (octal when rendered).
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn kind(&self) -> TreeEntryKind {
        TreeEntryKind::from_mode(self.mode)
    }
}

/// A parsed tree object. Entry order is preserved from the wire form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn from_entries(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &TreeEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// Looks up an entry by name.
    ///
    /// Git's sort order interleaves subtrees with similarly-named files, so
    /// this is a linear scan rather than a binary search.
    pub fn entry(&self, name: &RepoPathComponent) -> Option<&TreeEntry> {
        self.entries.iter().find(|entry| entry.name() == name)
    }
}

/// A parsed commit object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// Headers this library doesn't interpret (`gpgsig`, `mergetag`, ...),
    /// preserved in order with continuation lines folded into the value.
    pub extra_headers: Vec<(String, BString)>,
}

/// A parsed annotated tag object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub object: ObjectId,
    pub target_type: ObjectType,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
    pub extra_headers: Vec<(String, BString)>,
}

/// Error for all exported repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object {0} not found")]
    ObjectNotFound(ObjectId),
    #[error("Reference {0} not found")]
    RefNotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Invalid {object_type} object: {message}")]
    InvalidObject {
        object_type: String,
        message: String,
    },
    #[error("Invalid pack: {0}")]
    InvalidPack(String),
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),
    #[error(
        "Reference {name} update conflict: expected {}, found {}",
        opt_hex(.expected),
        opt_hex(.actual)
    )]
    RefConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
    #[error(
        "File {path:?} changed concurrently: expected blob {expected}, found {actual}"
    )]
    BlobConflict {
        path: RepoPathBuf,
        expected: ObjectId,
        actual: ObjectId,
    },
    #[error("Path {path:?} conflicts with existing entry {existing:?}")]
    PathConflict {
        path: RepoPathBuf,
        existing: RepoPathBuf,
    },
    #[error("The requested operations produce no effective changes")]
    NoEffectiveChanges,
    #[error("Unexpected end of stream while {0}")]
    UnexpectedEof(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

fn opt_hex(id: &Option<ObjectId>) -> String {
    match id {
        Some(id) => id.hex(),
        None => "(absent)".to_string(),
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

fn invalid(object_type: ObjectType, message: impl Into<String>) -> StoreError {
    StoreError::InvalidObject {
        object_type: object_type.name().to_owned(),
        message: message.into(),
    }
}

/// Splits an object payload into the header block and the message, which are
/// separated by the first blank line.
fn split_message(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data.find(b"\n\n") {
        Some(pos) => (&data[..pos], Some(&data[pos + 2..])),
        None => (data, None),
    }
}

/// Parses a `key SP value` header block. Lines starting with a space continue
/// the previous header's value.
fn parse_headers(
    object_type: ObjectType,
    block: &[u8],
) -> StoreResult<Vec<(String, BString)>> {
    let mut headers: Vec<(String, BString)> = vec![];
    if block.is_empty() {
        return Ok(headers);
    }
    for line in block.split(|&b| b == b'\n') {
        if let Some(continuation) = line.strip_prefix(b" ") {
            let Some((_, value)) = headers.last_mut() else {
                return Err(invalid(object_type, "continuation line before any header"));
            };
            value.push(b'\n');
            value.extend_from_slice(continuation);
        } else {
            let Some(space) = line.find_byte(b' ') else {
                return Err(invalid(object_type, "header line without a value"));
            };
            let key = str::from_utf8(&line[..space])
                .map_err(|_| invalid(object_type, "non-UTF-8 header key"))?;
            headers.push((key.to_owned(), BString::from(&line[space + 1..])));
        }
    }
    Ok(headers)
}

fn parse_object_id(object_type: ObjectType, value: &[u8]) -> StoreResult<ObjectId> {
    ObjectId::try_from_hex(value.trim())
        .ok_or_else(|| invalid(object_type, format!("malformed object id {:?}", value.as_bstr())))
}

/// Parses a `Name <email> unix-seconds ±HHMM` signature.
///
/// Tolerant per Git practice: a missing timestamp means the epoch and a
/// missing or malformed timezone means UTC. An empty name or email is
/// rejected.
pub fn parse_signature(object_type: ObjectType, value: &[u8]) -> StoreResult<Signature> {
    let open = value
        .find_byte(b'<')
        .ok_or_else(|| invalid(object_type, "signature without email"))?;
    let close = value[open..]
        .find_byte(b'>')
        .map(|pos| open + pos)
        .ok_or_else(|| invalid(object_type, "signature with unterminated email"))?;
    let name = value[..open].trim();
    let email = value[open + 1..close].trim();
    if name.is_empty() || email.is_empty() {
        return Err(invalid(object_type, "signature with empty name or email"));
    }

    let mut rest = value[close + 1..].fields();
    let seconds = rest
        .next()
        .and_then(|field| str::from_utf8(field).ok())
        .and_then(|field| field.parse::<i64>().ok())
        .unwrap_or(0);
    let tz_offset = rest.next().and_then(parse_tz_offset).unwrap_or(0);

    Ok(Signature {
        name: String::from_utf8_lossy(name).into_owned(),
        email: String::from_utf8_lossy(email).into_owned(),
        timestamp: Timestamp { seconds, tz_offset },
    })
}

fn parse_tz_offset(field: &[u8]) -> Option<i32> {
    let (sign, digits) = match field.split_first()? {
        (b'+', digits) => (1, digits),
        (b'-', digits) => (-1, digits),
        _ => return None,
    };
    if digits.len() != 4 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let digits = str::from_utf8(digits).ok()?;
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

fn format_timestamp(timestamp: &Timestamp) -> String {
    let (sign, offset) = if timestamp.tz_offset < 0 {
        ('-', -timestamp.tz_offset)
    } else {
        ('+', timestamp.tz_offset)
    };
    format!(
        "{} {}{:02}{:02}",
        timestamp.seconds,
        sign,
        offset / 60,
        offset % 60
    )
}

fn validate_signature(object_type: ObjectType, signature: &Signature) -> StoreResult<()> {
    for field in [&signature.name, &signature.email] {
        if field.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "empty signature field in {object_type} object"
            )));
        }
        if field.contains(['<', '>', '\n', '\r', '\0']) {
            return Err(StoreError::InvalidArgument(format!(
                "signature field {field:?} contains reserved characters"
            )));
        }
    }
    Ok(())
}

fn format_signature(signature: &Signature) -> String {
    format!(
        "{} <{}> {}",
        signature.name,
        signature.email,
        format_timestamp(&signature.timestamp)
    )
}

/// Parses a commit object payload.
pub fn parse_commit(data: &[u8]) -> StoreResult<Commit> {
    let object_type = ObjectType::Commit;
    let (header_block, message) = split_message(data);

    let mut tree = None;
    let mut parents = vec![];
    let mut author = None;
    let mut committer = None;
    let mut extra_headers = vec![];
    for (key, value) in parse_headers(object_type, header_block)? {
        match key.as_str() {
            "tree" => {
                if tree.is_some() {
                    return Err(invalid(object_type, "more than one tree header"));
                }
                tree = Some(parse_object_id(object_type, &value)?);
            }
            "parent" => parents.push(parse_object_id(object_type, &value)?),
            "author" => author = Some(parse_signature(object_type, &value)?),
            "committer" => committer = Some(parse_signature(object_type, &value)?),
            _ => extra_headers.push((key, value)),
        }
    }

    Ok(Commit {
        tree: tree.ok_or_else(|| invalid(object_type, "missing tree header"))?,
        parents,
        author: author.ok_or_else(|| invalid(object_type, "missing author header"))?,
        committer: committer.ok_or_else(|| invalid(object_type, "missing committer header"))?,
        message: message_string(message),
        extra_headers,
    })
}

/// The message is the rest of the payload, trimmed of one trailing newline if
/// present.
fn message_string(message: Option<&[u8]>) -> String {
    let message = message.unwrap_or_default();
    let message = message.strip_suffix(b"\n").unwrap_or(message);
    String::from_utf8_lossy(message).into_owned()
}

fn push_header(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    out.extend_from_slice(key.as_bytes());
    out.push(b' ');
    let mut lines = value.split(|&b| b == b'\n');
    out.extend_from_slice(lines.next().unwrap_or_default());
    for line in lines {
        out.extend_from_slice(b"\n ");
        out.extend_from_slice(line);
    }
    out.push(b'\n');
}

/// Serializes a commit object payload.
pub fn serialize_commit(commit: &Commit) -> StoreResult<Vec<u8>> {
    let object_type = ObjectType::Commit;
    validate_signature(object_type, &commit.author)?;
    validate_signature(object_type, &commit.committer)?;

    let mut out = Vec::new();
    push_header(&mut out, "tree", commit.tree.hex().as_bytes());
    for parent in &commit.parents {
        push_header(&mut out, "parent", parent.hex().as_bytes());
    }
    push_header(&mut out, "author", format_signature(&commit.author).as_bytes());
    push_header(
        &mut out,
        "committer",
        format_signature(&commit.committer).as_bytes(),
    );
    for (key, value) in &commit.extra_headers {
        push_header(&mut out, key, value);
    }
    out.push(b'\n');
    out.extend_from_slice(commit.message.as_bytes());
    Ok(out)
}

/// Parses an annotated tag object payload.
pub fn parse_tag(data: &[u8]) -> StoreResult<Tag> {
    let object_type = ObjectType::Tag;
    let (header_block, message) = split_message(data);

    let mut object = None;
    let mut target_type = None;
    let mut name = None;
    let mut tagger = None;
    let mut extra_headers = vec![];
    for (key, value) in parse_headers(object_type, header_block)? {
        match key.as_str() {
            "object" => object = Some(parse_object_id(object_type, &value)?),
            "type" => {
                let value = str::from_utf8(&value)
                    .ok()
                    .and_then(ObjectType::from_name)
                    .ok_or_else(|| invalid(object_type, "unknown target type"))?;
                target_type = Some(value);
            }
            "tag" => name = Some(String::from_utf8_lossy(&value).into_owned()),
            "tagger" => tagger = Some(parse_signature(object_type, &value)?),
            _ => extra_headers.push((key, value)),
        }
    }

    Ok(Tag {
        object: object.ok_or_else(|| invalid(object_type, "missing object header"))?,
        target_type: target_type.ok_or_else(|| invalid(object_type, "missing type header"))?,
        name: name.ok_or_else(|| invalid(object_type, "missing tag header"))?,
        tagger,
        message: message_string(message),
        extra_headers,
    })
}

/// Serializes an annotated tag object payload.
pub fn serialize_tag(tag: &Tag) -> StoreResult<Vec<u8>> {
    let object_type = ObjectType::Tag;
    if let Some(tagger) = &tag.tagger {
        validate_signature(object_type, tagger)?;
    }

    let mut out = Vec::new();
    push_header(&mut out, "object", tag.object.hex().as_bytes());
    push_header(&mut out, "type", tag.target_type.name().as_bytes());
    push_header(&mut out, "tag", tag.name.as_bytes());
    if let Some(tagger) = &tag.tagger {
        push_header(&mut out, "tagger", format_signature(tagger).as_bytes());
    }
    for (key, value) in &tag.extra_headers {
        push_header(&mut out, key, value);
    }
    out.push(b'\n');
    out.extend_from_slice(tag.message.as_bytes());
    Ok(out)
}

/// Parses a tree object payload. Entry order is preserved, not re-sorted.
pub fn parse_tree(data: &[u8], id_length: usize) -> StoreResult<Tree> {
    let object_type = ObjectType::Tree;
    let mut entries = vec![];
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .find_byte(b' ')
            .ok_or_else(|| invalid(object_type, "truncated entry mode"))?;
        let mut mode: u32 = 0;
        if space == 0 {
            return Err(invalid(object_type, "empty entry mode"));
        }
        for &b in &rest[..space] {
            if !(b'0'..=b'7').contains(&b) {
                return Err(invalid(object_type, "non-octal digit in entry mode"));
            }
            mode = mode * 8 + u32::from(b - b'0');
        }
        rest = &rest[space + 1..];

        let nul = rest
            .find_byte(b'\0')
            .ok_or_else(|| invalid(object_type, "truncated entry name"))?;
        let name = str::from_utf8(&rest[..nul])
            .map_err(|_| invalid(object_type, "non-UTF-8 entry name"))?;
        let name = RepoPathComponentBuf::new(name)
            .map_err(|err| invalid(object_type, err.to_string()))?;
        rest = &rest[nul + 1..];

        if rest.len() < id_length {
            return Err(invalid(object_type, "truncated entry id"));
        }
        let id = ObjectId::from_bytes(&rest[..id_length]);
        rest = &rest[id_length..];

        entries.push(TreeEntry::new(name, mode, id));
    }
    Ok(Tree::from_entries(entries))
}

/// Compares tree entries in Git's sort order: by name bytes, with subtree
/// names treated as if they had a trailing `/`.
pub fn tree_entry_cmp(a: &TreeEntry, b: &TreeEntry) -> std::cmp::Ordering {
    fn key(entry: &TreeEntry) -> impl Iterator<Item = u8> + '_ {
        let subtree = entry.kind() == TreeEntryKind::Tree;
        entry
            .name()
            .as_str()
            .bytes()
            .chain(subtree.then_some(b'/'))
    }
    key(a).cmp(key(b))
}

/// Serializes a tree object payload, sorting entries into Git's order.
///
/// Duplicate entry names are rejected.
pub fn serialize_tree(tree: &Tree) -> StoreResult<Vec<u8>> {
    let mut seen = HashSet::new();
    for entry in tree.entries() {
        if !seen.insert(entry.name()) {
            return Err(StoreError::InvalidArgument(format!(
                "duplicate tree entry name {:?}",
                entry.name().as_str()
            )));
        }
    }

    let mut entries: Vec<&TreeEntry> = tree.entries().collect();
    entries.sort_by(|a, b| tree_entry_cmp(a, b));

    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(format!("{:o}", entry.mode()).as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name().as_str().as_bytes());
        out.push(b'\0');
        out.extend_from_slice(entry.id().as_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn component(name: &str) -> RepoPathComponentBuf {
        RepoPathComponentBuf::new(name).unwrap()
    }

    fn blob_id(byte: u8) -> ObjectId {
        ObjectId::new(vec![byte; 20])
    }

    #[test]
    fn test_parse_signature_full() {
        let sig =
            parse_signature(ObjectType::Commit, b"Ada Lovelace <ada@example.com> 852076800 +0130")
                .unwrap();
        assert_eq!(sig.name, "Ada Lovelace");
        assert_eq!(sig.email, "ada@example.com");
        assert_eq!(sig.timestamp.seconds, 852076800);
        assert_eq!(sig.timestamp.tz_offset, 90);
    }

    #[test]
    fn test_parse_signature_tolerance() {
        // Missing timezone means UTC.
        let sig = parse_signature(ObjectType::Commit, b"A B <a@b> 12345").unwrap();
        assert_eq!(sig.timestamp.seconds, 12345);
        assert_eq!(sig.timestamp.tz_offset, 0);

        // Missing timestamp means the epoch.
        let sig = parse_signature(ObjectType::Commit, b"A B <a@b>").unwrap();
        assert_eq!(sig.timestamp.seconds, 0);

        // Negative offsets.
        let sig = parse_signature(ObjectType::Commit, b"A B <a@b> 1 -0500").unwrap();
        assert_eq!(sig.timestamp.tz_offset, -300);

        // Empty name or email is rejected.
        assert_matches!(
            parse_signature(ObjectType::Commit, b"<a@b> 1 +0000"),
            Err(StoreError::InvalidObject { .. })
        );
        assert_matches!(
            parse_signature(ObjectType::Commit, b"A B <> 1 +0000"),
            Err(StoreError::InvalidObject { .. })
        );
        assert_matches!(
            parse_signature(ObjectType::Commit, b"no email at all"),
            Err(StoreError::InvalidObject { .. })
        );
    }

    #[test]
    fn test_signature_roundtrip() {
        let sig = Signature {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            timestamp: Timestamp {
                seconds: 852076800,
                tz_offset: -150,
            },
        };
        let formatted = format_signature(&sig);
        assert_eq!(formatted, "Ada Lovelace <ada@example.com> 852076800 -0230");
        let reparsed = parse_signature(ObjectType::Commit, formatted.as_bytes()).unwrap();
        assert_eq!(reparsed, sig);
    }

    #[test]
    fn test_parse_commit() {
        let data = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                     parent 0123456789012345678901234567890123456789\n\
                     parent abcdefabcdefabcdefabcdefabcdefabcdefabcd\n\
                     author A B <a@b> 1 +0000\n\
                     committer C D <c@d> 2 +0000\n\
                     \n\
                     Subject line\n\
                     \n\
                     Body.\n";
        let commit = parse_commit(data).unwrap();
        assert_eq!(
            commit.tree,
            ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904")
        );
        assert_eq!(commit.parents.len(), 2);
        assert_eq!(commit.author.name, "A B");
        assert_eq!(commit.committer.email, "c@d");
        // A single trailing newline is trimmed from the message.
        assert_eq!(commit.message, "Subject line\n\nBody.");
        assert!(commit.extra_headers.is_empty());
    }

    #[test]
    fn test_parse_commit_requires_tree() {
        let data = b"author A B <a@b> 1 +0000\ncommitter A B <a@b> 1 +0000\n\nhi";
        assert_matches!(
            parse_commit(data),
            Err(StoreError::InvalidObject { message, .. }) if message.contains("tree")
        );
    }

    #[test]
    fn test_commit_extra_headers_preserved() {
        let data = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                     author A B <a@b> 1 +0000\n\
                     committer A B <a@b> 1 +0000\n\
                     gpgsig -----BEGIN PGP SIGNATURE-----\n \n line2\n -----END PGP SIGNATURE-----\n\
                     \n\
                     msg";
        let commit = parse_commit(data).unwrap();
        assert_eq!(commit.extra_headers.len(), 1);
        let (key, value) = &commit.extra_headers[0];
        assert_eq!(key, "gpgsig");
        assert_eq!(
            value.to_string(),
            "-----BEGIN PGP SIGNATURE-----\n\nline2\n-----END PGP SIGNATURE-----"
        );

        // Continuation lines are re-encoded on write.
        let serialized = serialize_commit(&commit).unwrap();
        assert_eq!(serialized, data.to_vec());
    }

    #[test]
    fn test_commit_roundtrip() {
        let commit = Commit {
            tree: ObjectId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904"),
            parents: vec![blob_id(1)],
            author: Signature {
                name: "A B".to_string(),
                email: "a@b".to_string(),
                timestamp: Timestamp {
                    seconds: 1,
                    tz_offset: 0,
                },
            },
            committer: Signature {
                name: "C D".to_string(),
                email: "c@d".to_string(),
                timestamp: Timestamp {
                    seconds: 2,
                    tz_offset: 60,
                },
            },
            message: "message".to_string(),
            extra_headers: vec![],
        };
        let data = serialize_commit(&commit).unwrap();
        assert_eq!(parse_commit(&data).unwrap(), commit);
        // Parsing and re-serializing is byte-stable.
        assert_eq!(serialize_commit(&parse_commit(&data).unwrap()).unwrap(), data);
    }

    #[test]
    fn test_serialize_commit_validates_signature() {
        let mut commit = parse_commit(
            b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
              author A B <a@b> 1 +0000\n\
              committer A B <a@b> 1 +0000\n\n",
        )
        .unwrap();
        commit.author.name = "Bad <Name>".to_string();
        assert_matches!(
            serialize_commit(&commit),
            Err(StoreError::InvalidArgument(_))
        );
    }

    #[test]
    fn test_parse_tree() {
        let mut data = vec![];
        data.extend_from_slice(b"100644 file.txt\0");
        data.extend_from_slice(&[1; 20]);
        data.extend_from_slice(b"40000 subdir\0");
        data.extend_from_slice(&[2; 20]);
        data.extend_from_slice(b"160000 vendored\0");
        data.extend_from_slice(&[3; 20]);
        let tree = parse_tree(&data, 20).unwrap();
        let entries: Vec<_> = tree.entries().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name().as_str(), "file.txt");
        assert_eq!(entries[0].kind(), TreeEntryKind::Blob);
        assert_eq!(entries[1].kind(), TreeEntryKind::Tree);
        assert_eq!(entries[2].kind(), TreeEntryKind::Submodule);
        assert_eq!(entries[2].mode(), 0o160000);
    }

    #[test]
    fn test_parse_tree_rejects_malformed() {
        assert_matches!(
            parse_tree(b"100err file\0", 20),
            Err(StoreError::InvalidObject { .. })
        );
        // Truncated id.
        let mut data = vec![];
        data.extend_from_slice(b"100644 file\0");
        data.extend_from_slice(&[1; 10]);
        assert_matches!(parse_tree(&data, 20), Err(StoreError::InvalidObject { .. }));
    }

    #[test]
    fn test_tree_sort_order() {
        // A subtree named "sub" sorts as "sub/", after "sub.txt".
        let tree = Tree::from_entries(vec![
            TreeEntry::new(component("sub"), MODE_TREE, blob_id(1)),
            TreeEntry::new(component("sub.txt"), MODE_BLOB, blob_id(2)),
            TreeEntry::new(component("a"), MODE_BLOB, blob_id(3)),
        ]);
        let data = serialize_tree(&tree).unwrap();
        let reparsed = parse_tree(&data, 20).unwrap();
        let names: Vec<_> = reparsed
            .entries()
            .map(|entry| entry.name().as_str().to_owned())
            .collect();
        assert_eq!(names, vec!["a", "sub.txt", "sub"]);
    }

    #[test]
    fn test_tree_serialization_bijection() {
        let tree = Tree::from_entries(vec![
            TreeEntry::new(component("a"), MODE_BLOB, blob_id(3)),
            TreeEntry::new(component("sub.txt"), MODE_BLOB, blob_id(2)),
            TreeEntry::new(component("sub"), MODE_TREE, blob_id(1)),
        ]);
        let data = serialize_tree(&tree).unwrap();
        // A parsed-then-sorted tree reserializes to the original bytes.
        let reparsed = parse_tree(&data, 20).unwrap();
        assert_eq!(serialize_tree(&reparsed).unwrap(), data);
    }

    #[test]
    fn test_serialize_tree_rejects_duplicates() {
        let tree = Tree::from_entries(vec![
            TreeEntry::new(component("x"), MODE_BLOB, blob_id(1)),
            TreeEntry::new(component("x"), MODE_TREE, blob_id(2)),
        ]);
        assert_matches!(serialize_tree(&tree), Err(StoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_tag_roundtrip() {
        let data = b"object 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\
                     type commit\n\
                     tag v1.0.0\n\
                     tagger A B <a@b> 1 +0000\n\
                     \n\
                     release";
        let tag = parse_tag(data).unwrap();
        assert_eq!(tag.name, "v1.0.0");
        assert_eq!(tag.target_type, ObjectType::Commit);
        assert_eq!(tag.message, "release");
        assert_eq!(serialize_tag(&tag).unwrap(), data.to_vec());
    }
}
