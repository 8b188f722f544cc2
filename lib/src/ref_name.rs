// Copyright 2025 The GitVault Authors
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

//! Name types for repository references.
//!
//! A reference name is always fully qualified (e.g. `refs/heads/main`).
//! Caller-supplied strings go through [`RefNameBuf::normalize`], which fixes
//! separators and rejects names outside the `refs/` namespace.

use std::borrow::Borrow;
use std::fmt;
use std::fmt::Display;
use std::ops::Deref;

use ref_cast::RefCastCustom;
use ref_cast::ref_cast_custom;
use thiserror::Error;

/// The input cannot be used as a reference name.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error(r#"Invalid reference name "{value}""#)]
pub struct InvalidRefNameError {
    pub value: String,
}

/// Owned reference name in fully-qualified form (e.g. `refs/heads/main`.)
///
/// Use `.as_str()` for displaying. Other than that, this can be considered an
/// immutable `String`.
// Eq, Hash, and Ord must be compatible with RefName.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RefNameBuf(String);

/// Borrowed reference name in fully-qualified form (e.g. `refs/heads/main`.)
#[derive(Debug, Eq, Hash, Ord, PartialEq, PartialOrd, RefCastCustom)]
#[repr(transparent)]
pub struct RefName(str);

impl RefNameBuf {
    /// Normalizes a caller-supplied name: backslashes become forward slashes,
    /// surrounding whitespace is trimmed, and the result must be a
    /// well-formed path under `refs/`.
    pub fn normalize(value: impl AsRef<str>) -> Result<Self, InvalidRefNameError> {
        let normalized = value.as_ref().replace('\\', "/").trim().to_owned();
        let well_formed = normalized.strip_prefix("refs/").is_some_and(|rest| {
            !rest.is_empty()
                && rest
                    .split('/')
                    .all(|component| {
                        !component.is_empty()
                            && component != "."
                            && component != ".."
                            && !component.contains(['\0', '\n', ' '])
                    })
        });
        if well_formed {
            Ok(Self(normalized))
        } else {
            Err(InvalidRefNameError {
                value: value.as_ref().to_owned(),
            })
        }
    }

    /// Consumes this and returns the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl RefName {
    /// Wraps a string name. The caller is responsible for the name being
    /// well-formed; use [`RefNameBuf::normalize`] for untrusted input.
    #[ref_cast_custom]
    pub const fn new(name: &str) -> &Self;

    /// Returns the underlying string.
    pub const fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name without the leading `refs/heads/`, if this is a
    /// branch.
    pub fn as_branch_name(&self) -> Option<&str> {
        self.0.strip_prefix("refs/heads/")
    }
}

impl AsRef<Self> for RefName {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl AsRef<RefName> for RefNameBuf {
    fn as_ref(&self) -> &RefName {
        self
    }
}

impl Borrow<RefName> for RefNameBuf {
    fn borrow(&self) -> &RefName {
        self
    }
}

impl Deref for RefNameBuf {
    type Target = RefName;

    fn deref(&self) -> &Self::Target {
        RefName::new(&self.0)
    }
}

impl ToOwned for RefName {
    type Owned = RefNameBuf;

    fn to_owned(&self) -> Self::Owned {
        RefNameBuf(self.0.to_owned())
    }
}

impl Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Display for RefNameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <RefName as Display>::fmt(self, f)
    }
}

impl PartialEq<str> for RefName {
    fn eq(&self, other: &str) -> bool {
        &self.0 == other
    }
}

impl PartialEq<str> for RefNameBuf {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}
