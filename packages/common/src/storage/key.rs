use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Opaque, stable location of a blob: a normalized relative path such as
/// `submissions/0190c3a1-.../archive.zip`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".into()));
        }
        if key.contains('\\') {
            return Err(StorageError::InvalidKey(format!("backslash in '{key}'")));
        }
        let safe = Path::new(&key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(format!(
                "'{key}' must be a relative path without '.' or '..'"
            )));
        }
        Ok(Self(key))
    }

    /// A fresh, unique key under `prefix`, ending in `file_name`.
    pub fn generate(prefix: &str, file_name: &str) -> Result<Self, StorageError> {
        Self::new(format!("{prefix}/{}/{file_name}", uuid::Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobKey {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}
