use crate::error::{Error, Result};

use std::fmt::{self, Display};
use std::str::FromStr;

/// A validated object path: `/`, or `/`-separated non-empty elements of
/// `[A-Za-z0-9_]` with no trailing slash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

fn is_valid(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|element| {
            !element.is_empty()
                && element
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }),
        None => false,
    }
}

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if is_valid(&path) {
            Ok(Self(path))
        } else {
            Err(Error::InvalidObjectPath(path))
        }
    }

    /// Accepts the looser spelling callers use when registering nodes:
    /// repeated slashes collapse and a trailing slash is dropped.
    pub fn normalize(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::InvalidObjectPath(path.to_owned()));
        }
        let mut normalized = String::with_capacity(path.len());
        for element in path.split('/').filter(|e| !e.is_empty()) {
            normalized.push('/');
            normalized.push_str(element);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        Self::new(normalized).map_err(|_| Error::InvalidObjectPath(path.to_owned()))
    }

    pub fn root() -> Self {
        Self("/".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(ix) => Some(Self(self.0[..ix].to_owned())),
            None => None,
        }
    }

    /// Strict descendant test: a path is not its own descendant.
    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        if self == ancestor {
            return false;
        }
        if ancestor.is_root() {
            return true;
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .map_or(false, |rest| rest.starts_with('/'))
    }

    /// The first element of `self` below `ancestor`, if `self` descends from it.
    pub fn child_element_under(&self, ancestor: &ObjectPath) -> Option<&str> {
        if !self.is_descendant_of(ancestor) {
            return None;
        }
        let rest = if ancestor.is_root() {
            &self.0[1..]
        } else {
            &self.0[ancestor.0.len() + 1..]
        };
        rest.split('/').next()
    }

    pub fn join(&self, element: &str) -> Result<ObjectPath> {
        if self.is_root() {
            Self::new(format!("/{}", element))
        } else {
            Self::new(format!("{}/{}", self.0, element))
        }
    }
}

impl Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ObjectPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
