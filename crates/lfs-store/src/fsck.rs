use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use lfs_types::Oid;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::hasher::HashingReader;
use crate::store::{create_dir, ContentStore};

/// Result of an integrity check over a set of objects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsckReport {
    /// Objects that were re-hashed.
    pub checked: usize,
    /// Objects that should be present but are not.
    pub missing: Vec<Oid>,
    /// Objects whose content no longer matches their id.
    pub corrupt: Vec<Oid>,
    /// Where corrupt objects were moved to (empty on a dry run).
    pub quarantined: Vec<PathBuf>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.corrupt.is_empty()
    }
}

impl ContentStore {
    /// Re-hash a stored object and compare against its id.
    pub fn verify(&self, oid: &Oid) -> StoreResult<bool> {
        let file = self.open_object(oid)?;
        let mut reader = HashingReader::new(file);
        io::copy(&mut reader, &mut io::sink())?;
        let (computed, _) = reader.finish();
        Ok(computed == *oid)
    }

    /// Move a stored object out of the object tree into the `bad` directory.
    pub fn quarantine(&self, oid: &Oid) -> StoreResult<PathBuf> {
        let src = self.object_path_readonly(oid);
        if !src.exists() {
            return Err(StoreError::NotFound(*oid));
        }
        create_dir(self.bad_dir())?;
        let dest = self.bad_dir().join(oid.to_hex());
        fs::rename(&src, &dest)?;
        info!(%oid, dest = %dest.display(), "object quarantined");
        Ok(dest)
    }

    /// Check every object in `oids`. Corrupt objects are quarantined unless
    /// `dry_run` is set.
    pub fn fsck<'a, I>(&self, oids: I, dry_run: bool) -> StoreResult<FsckReport>
    where
        I: IntoIterator<Item = &'a Oid>,
    {
        let mut report = FsckReport::default();
        for oid in oids {
            match self.verify(oid) {
                Ok(true) => report.checked += 1,
                Ok(false) => {
                    report.checked += 1;
                    warn!(%oid, "object is corrupt");
                    report.corrupt.push(*oid);
                    if !dry_run {
                        report.quarantined.push(self.quarantine(oid)?);
                    }
                }
                Err(StoreError::NotFound(_)) => report.missing.push(*oid),
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Read a whole stored object into memory.
    pub fn read_to_vec(&self, oid: &Oid) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_object(oid)?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn fsck_clean_store_is_ok() {
        let (_dir, store) = temp_store();
        let (a, _) = store.insert(&b"alpha"[..], None).unwrap();
        let (b, _) = store.insert(&b"beta"[..], None).unwrap();
        let report = store.fsck([&a, &b], false).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.checked, 2);
    }

    #[test]
    fn fsck_quarantines_corrupt_objects() {
        let (_dir, store) = temp_store();
        let (oid, _) = store.insert(&b"will rot"[..], None).unwrap();
        fs::write(store.object_path_readonly(&oid), b"has rot!").unwrap();

        let report = store.fsck([&oid], false).unwrap();
        assert_eq!(report.corrupt, vec![oid]);
        assert_eq!(report.quarantined, vec![store.bad_dir().join(oid.to_hex())]);
        assert!(!store.object_path_readonly(&oid).exists());
        assert!(store.bad_dir().join(oid.to_hex()).exists());
    }

    #[test]
    fn fsck_dry_run_leaves_objects_in_place() {
        let (_dir, store) = temp_store();
        let (oid, _) = store.insert(&b"will rot"[..], None).unwrap();
        fs::write(store.object_path_readonly(&oid), b"has rot!").unwrap();

        let report = store.fsck([&oid], true).unwrap();
        assert_eq!(report.corrupt, vec![oid]);
        assert!(report.quarantined.is_empty());
        assert!(store.object_path_readonly(&oid).exists());
    }

    #[test]
    fn fsck_reports_missing_objects() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"never stored");
        let report = store.fsck([&oid], false).unwrap();
        assert_eq!(report.missing, vec![oid]);
        assert!(!report.is_ok());
    }

    #[test]
    fn quarantine_missing_object_fails() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"nothing here");
        assert!(matches!(store.quarantine(&oid), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn read_to_vec_returns_content() {
        let (_dir, store) = temp_store();
        let (oid, _) = store.insert(&b"payload"[..], None).unwrap();
        assert_eq!(store.read_to_vec(&oid).unwrap(), b"payload");
    }
}
