use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lfs_store::{ContentStore, StoreError};
use lfs_types::Oid;

use crate::error::Result;

/// One object the caller wants moved.
///
/// Identity is the [`Oid`]: two transferables with the same oid are the
/// same transfer, whatever their names. The name is for progress and
/// diagnostics only.
pub trait Transferable: Send + Sync + fmt::Debug {
    fn oid(&self) -> Oid;
    fn size(&self) -> u64;
    fn name(&self) -> &str;
    /// Local file the bytes are read from or written to.
    fn path(&self) -> &Path;
}

/// An object read from the local store and sent to the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uploadable {
    oid: Oid,
    size: u64,
    name: String,
    path: PathBuf,
}

impl Uploadable {
    /// Look `oid` up in `store`. Fails with `NotFound` if the object is not
    /// there.
    pub fn new(store: &ContentStore, oid: Oid, name: impl Into<String>) -> Result<Self> {
        let path = store.object_path_readonly(&oid);
        let meta = fs::metadata(&path).map_err(|_| StoreError::NotFound(oid))?;
        Ok(Self::with_path(oid, meta.len(), name, path))
    }

    pub fn with_path(oid: Oid, size: u64, name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            oid,
            size,
            name: name.into(),
            path,
        }
    }
}

impl Transferable for Uploadable {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// An object fetched from the remote into the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Downloadable {
    oid: Oid,
    size: u64,
    name: String,
    path: PathBuf,
}

impl Downloadable {
    pub fn new(store: &ContentStore, oid: Oid, size: u64, name: impl Into<String>) -> Self {
        Self {
            oid,
            size,
            name: name.into(),
            path: store.object_path_readonly(&oid),
        }
    }
}

impl Transferable for Downloadable {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
