use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lfs_types::Oid;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::hasher::ContentHasher;

/// Streaming writer for one object.
///
/// Bytes go to a temporary file in the store's scratch directory and are
/// hashed as they are written. [`ObjectWriter::commit`] checks the size and
/// digest and only then renames the file to its canonical path. Dropping a
/// writer without committing deletes the temporary file, so the canonical
/// path never holds partial content.
pub struct ObjectWriter {
    oid: Oid,
    expected_size: u64,
    dest: PathBuf,
    file: NamedTempFile,
    hasher: ContentHasher,
    written: u64,
}

impl ObjectWriter {
    pub(crate) fn create(
        oid: Oid,
        expected_size: u64,
        dest: PathBuf,
        tmp_dir: &Path,
    ) -> StoreResult<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", oid.to_hex()))
            .tempfile_in(tmp_dir)?;
        Ok(Self {
            oid,
            expected_size,
            dest,
            file,
            hasher: ContentHasher::new(),
            written: 0,
        })
    }

    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Verify and move the object into place. Returns the byte count.
    pub fn commit(mut self) -> StoreResult<u64> {
        self.file.as_file_mut().flush()?;

        if self.written != self.expected_size {
            return Err(StoreError::SizeMismatch {
                oid: self.oid,
                expected: self.expected_size,
                actual: self.written,
            });
        }

        let computed = self.hasher.finish();
        if computed != self.oid {
            return Err(StoreError::HashMismatch {
                oid: self.oid,
                computed,
            });
        }

        // Keep the mode of whatever file is being replaced.
        match fs::metadata(&self.dest) {
            Ok(meta) => fs::set_permissions(self.file.path(), meta.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.file
            .persist(&self.dest)
            .map_err(|e| StoreError::Io(e.error))?;
        debug!(oid = %self.oid, size = self.written, "object committed");
        Ok(self.written)
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.as_file_mut().write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_file_mut().flush()
    }
}
