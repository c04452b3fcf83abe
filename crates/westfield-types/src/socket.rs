//! Listening socket names.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a listening endpoint inside the runtime directory.
///
/// The name must be a single path component: non-empty, no `/`, no NUL
/// and short enough that `<runtime_dir>/<name>.lock` still fits a
/// `sockaddr_un` path on Linux.
///
/// # Examples
///
/// ```
/// use westfield_types::SocketName;
///
/// let name = SocketName::new("wayland-0").unwrap();
/// assert_eq!(name.as_str(), "wayland-0");
/// assert_eq!(name.lock_name(), "wayland-0.lock");
/// assert!(SocketName::new("../escape").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SocketName(String);

impl SocketName {
    /// Longest accepted name. `sun_path` holds 108 bytes including the
    /// terminator and the directory prefix needs room as well.
    pub const MAX_LEN: usize = 64;

    /// Creates a validated socket name.
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        let name = name.into();
        if name.is_empty()
            || name.len() > Self::MAX_LEN
            || name.contains('/')
            || name.contains('\0')
            || name == "."
            || name == ".."
        {
            return Err(ParseError::InvalidSocketName(name));
        }
        Ok(SocketName(name))
    }

    /// Builds the `index`-th automatically numbered name, e.g. `wayland-3`.
    pub fn numbered(prefix: &str, index: u32) -> Result<Self, ParseError> {
        Self::new(format!("{}{}", prefix, index))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the lock file guarding this socket.
    pub fn lock_name(&self) -> String {
        format!("{}.lock", self.0)
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SocketName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocketName::new(s)
    }
}

impl TryFrom<String> for SocketName {
    type Error = ParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        SocketName::new(name)
    }
}

impl From<SocketName> for String {
    fn from(name: SocketName) -> String {
        name.0
    }
}
