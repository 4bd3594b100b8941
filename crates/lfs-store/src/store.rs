use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use lfs_types::Oid;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::hasher::HashingReader;
use crate::writer::ObjectWriter;

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
const BAD_DIR: &str = "bad";
const COPY_BUF_SIZE: usize = 32 * 1024;

/// Progress callback for byte copies: `(total, read_so_far, chunk)`.
pub type CopyCallback<'a> = &'a mut dyn FnMut(u64, u64, usize);

/// An object found by walking the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalObject {
    pub oid: Oid,
    pub size: u64,
}

/// Filesystem-backed content-addressed object store.
///
/// Objects live at `<objects>/<hex[0..2]>/<hex[2..4]>/<hex>`. Writes go
/// through a scratch directory on the same volume and become visible only
/// by atomic rename after their size and digest have been checked.
#[derive(Clone, Debug)]
pub struct ContentStore {
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
    bad_dir: PathBuf,
}

impl ContentStore {
    /// Open (or create) a store rooted at `root`, using `root/objects`,
    /// `root/tmp` and `root/bad`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let store = Self {
            objects_dir: root.join(OBJECTS_DIR),
            tmp_dir: root.join(TMP_DIR),
            bad_dir: root.join(BAD_DIR),
        };
        create_dir(&store.objects_dir)?;
        create_dir(&store.tmp_dir)?;
        Ok(store)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn bad_dir(&self) -> &Path {
        &self.bad_dir
    }

    /// Canonical path for `oid`, creating the shard directories if needed.
    pub fn object_path(&self, oid: &Oid) -> StoreResult<PathBuf> {
        let path = self.object_path_readonly(oid);
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        Ok(path)
    }

    /// Canonical path for `oid` without touching the filesystem.
    pub fn object_path_readonly(&self, oid: &Oid) -> PathBuf {
        let (a, b) = oid.shard();
        self.objects_dir.join(a).join(b).join(oid.to_hex())
    }

    /// `true` if the object is present with exactly `expected_size` bytes.
    ///
    /// A file of the wrong size is removed before returning `false`.
    pub fn exists(&self, oid: &Oid, expected_size: u64) -> bool {
        let path = self.object_path_readonly(oid);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        if meta.len() == expected_size {
            return true;
        }

        warn!(%oid, expected_size, actual = meta.len(), "removing object with invalid size");
        if let Err(e) = fs::remove_file(&path) {
            warn!(%oid, error = %e, "could not remove invalid object");
        }
        false
    }

    /// Start a streaming write of `oid`. See [`ObjectWriter`].
    pub fn writer(&self, oid: &Oid, expected_size: u64) -> StoreResult<ObjectWriter> {
        let dest = self.object_path(oid)?;
        create_dir(&self.tmp_dir)?;
        ObjectWriter::create(*oid, expected_size, dest, &self.tmp_dir)
    }

    /// Stream `reader` into the store as `oid`, verifying size and digest
    /// before the object becomes visible. Returns the byte count.
    pub fn write_verified<R: Read>(
        &self,
        oid: &Oid,
        mut reader: R,
        expected_size: u64,
        mut cb: Option<CopyCallback<'_>>,
    ) -> StoreResult<u64> {
        let mut writer = self.writer(oid, expected_size)?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write_all(&buf[..n])?;
            if let Some(cb) = cb.as_mut() {
                cb(expected_size, writer.written(), n);
            }
        }
        writer.commit()
    }

    /// Hash `reader` into the store under whatever id its content produces.
    ///
    /// This is the upload-side entry point: the caller does not know the
    /// id in advance. If the object is already present with the same size
    /// the new copy is discarded.
    pub fn insert<R: Read>(
        &self,
        reader: R,
        mut cb: Option<CopyCallback<'_>>,
    ) -> StoreResult<(Oid, u64)> {
        create_dir(&self.tmp_dir)?;
        let mut tmp = tempfile::Builder::new()
            .prefix("clean-")
            .tempfile_in(&self.tmp_dir)?;

        let mut reader = HashingReader::new(reader);
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            tmp.as_file_mut().write_all(&buf[..n])?;
            if let Some(cb) = cb.as_mut() {
                cb(0, reader.bytes_read(), n);
            }
        }
        tmp.as_file_mut().flush()?;

        let (oid, size) = reader.finish();
        if self.exists(&oid, size) {
            debug!(%oid, "object already stored");
            return Ok((oid, size));
        }

        let dest = self.object_path(&oid)?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        debug!(%oid, size, "object inserted");
        Ok((oid, size))
    }

    /// Open a stored object for reading.
    pub fn open_object(&self, oid: &Oid) -> StoreResult<File> {
        let path = self.object_path_readonly(oid);
        File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(*oid),
            _ => StoreError::Io(e),
        })
    }

    /// Delete a stored object. Returns `false` if it was not present.
    pub fn remove(&self, oid: &Oid) -> StoreResult<bool> {
        match fs::remove_file(self.object_path_readonly(oid)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the shard directories and list every object file.
    ///
    /// Files whose name is not a valid id are ignored.
    pub fn local_objects(&self) -> StoreResult<Vec<LocalObject>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.objects_dir).min_depth(3).max_depth(3) {
            let entry = entry.map_err(walk_error)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(oid) = entry.file_name().to_str().and_then(|n| n.parse::<Oid>().ok()) else {
                continue;
            };
            let meta = entry.metadata().map_err(walk_error)?;
            objects.push(LocalObject {
                oid,
                size: meta.len(),
            });
        }
        objects.sort_by(|a, b| a.oid.cmp(&b.oid));
        Ok(objects)
    }

    /// Delete leftover temporary files. Only safe while no writer is open.
    pub fn sweep_temp(&self) -> StoreResult<usize> {
        let mut removed = 0;
        let entries = match fs::read_dir(&self.tmp_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        debug!(removed, "swept temp files");
        Ok(removed)
    }
}

fn walk_error(e: walkdir::Error) -> StoreError {
    let msg = e.to_string();
    StoreError::Io(e.into_io_error().unwrap_or_else(|| io::Error::other(msg)))
}

pub(crate) fn create_dir(path: &Path) -> StoreResult<()> {
    fs::create_dir_all(path).map_err(|source| StoreError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn temp_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn object_path_is_sharded() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"hello");
        let path = store.object_path(&oid).unwrap();
        let expected = store.objects_dir().join("2c").join("f2").join(oid.to_hex());
        assert_eq!(path, expected);
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn object_path_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let oid = Oid::digest(b"hello");
        // A regular file where the first shard directory should go.
        fs::write(store.objects_dir().join("2c"), b"in the way").unwrap();
        let err = store.object_path(&oid).unwrap_err();
        assert!(matches!(err, StoreError::CreateDir { .. }));
    }

    #[test]
    fn write_verified_roundtrip() {
        let (_dir, store) = temp_store();
        let data = b"large object contents".to_vec();
        let oid = Oid::digest(&data);

        let written = store
            .write_verified(&oid, &data[..], data.len() as u64, None)
            .unwrap();
        assert_eq!(written, data.len() as u64);
        assert!(store.exists(&oid, data.len() as u64));

        let mut back = Vec::new();
        store.open_object(&oid).unwrap().read_to_end(&mut back).unwrap();
        assert_eq!(Oid::digest(&back), oid);
    }

    #[test]
    fn write_verified_reports_progress() {
        let (_dir, store) = temp_store();
        let data = vec![7u8; 100_000];
        let oid = Oid::digest(&data);

        let mut calls = Vec::new();
        let mut cb = |total: u64, read: u64, chunk: usize| calls.push((total, read, chunk));
        store
            .write_verified(&oid, &data[..], data.len() as u64, Some(&mut cb))
            .unwrap();

        assert!(!calls.is_empty());
        let (total, read, _) = *calls.last().unwrap();
        assert_eq!(total, 100_000);
        assert_eq!(read, 100_000);
        assert_eq!(calls.iter().map(|c| c.2).sum::<usize>(), 100_000);
    }

    #[test]
    fn size_mismatch_leaves_canonical_path_untouched() {
        let (_dir, store) = temp_store();
        let data = b"twelve bytes";
        let oid = Oid::digest(data);

        let err = store.write_verified(&oid, &data[..], 99, None).unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 99, actual: 12, .. }));
        assert!(!store.object_path_readonly(&oid).exists());
    }

    #[test]
    fn hash_mismatch_discards_temp_file() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"expected content");
        let wrong = b"tampered content";

        let err = store
            .write_verified(&oid, &wrong[..], wrong.len() as u64, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(err.is_integrity_failure());
        assert!(!store.object_path_readonly(&oid).exists());
        assert_eq!(fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn exists_removes_wrong_sized_file() {
        let (_dir, store) = temp_store();
        let data = b"some content";
        let oid = Oid::digest(data);
        let path = store.object_path(&oid).unwrap();
        fs::write(&path, b"some").unwrap();

        assert!(!store.exists(&oid, data.len() as u64));
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_object_is_repaired_by_rewrite() {
        let (_dir, store) = temp_store();
        let data = b"precious data".to_vec();
        let oid = Oid::digest(&data);
        let size = data.len() as u64;
        store.write_verified(&oid, &data[..], size, None).unwrap();

        // Truncate.
        let path = store.object_path_readonly(&oid);
        fs::write(&path, &data[..4]).unwrap();
        assert!(!store.exists(&oid, size));

        store.write_verified(&oid, &data[..], size, None).unwrap();
        assert!(store.exists(&oid, size));
        assert!(store.verify(&oid).unwrap());
    }

    #[test]
    fn rewrite_over_flipped_byte_succeeds() {
        let (_dir, store) = temp_store();
        let data = b"precious data".to_vec();
        let oid = Oid::digest(&data);
        let size = data.len() as u64;
        store.write_verified(&oid, &data[..], size, None).unwrap();

        let path = store.object_path_readonly(&oid);
        let mut flipped = data.clone();
        flipped[0] ^= 0xff;
        fs::write(&path, &flipped).unwrap();
        assert!(!store.verify(&oid).unwrap());

        store.write_verified(&oid, &data[..], size, None).unwrap();
        assert!(store.verify(&oid).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn replacement_keeps_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        let data = b"mode bits".to_vec();
        let oid = Oid::digest(&data);
        let path = store.object_path(&oid).unwrap();
        fs::write(&path, b"junk").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        store
            .write_verified(&oid, &data[..], data.len() as u64, None)
            .unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn insert_computes_oid() {
        let (_dir, store) = temp_store();
        let (oid, size) = store.insert(&b"cleaned file"[..], None).unwrap();
        assert_eq!(oid, Oid::digest(b"cleaned file"));
        assert_eq!(size, 12);
        assert!(store.exists(&oid, size));

        // Second insert of the same content is a no-op.
        let again = store.insert(&b"cleaned file"[..], None).unwrap();
        assert_eq!(again, (oid, size));
        assert_eq!(fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn open_missing_object_is_not_found() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"absent");
        assert!(matches!(store.open_object(&oid), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn local_objects_lists_store_contents() {
        let (_dir, store) = temp_store();
        let a = store.insert(&b"first"[..], None).unwrap();
        let b = store.insert(&b"second object"[..], None).unwrap();
        // Junk in a shard directory is ignored.
        fs::write(store.object_path(&a.0).unwrap().with_file_name("README"), b"x").unwrap();

        let mut expected = vec![
            LocalObject { oid: a.0, size: a.1 },
            LocalObject { oid: b.0, size: b.1 },
        ];
        expected.sort_by(|x, y| x.oid.cmp(&y.oid));
        assert_eq!(store.local_objects().unwrap(), expected);
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, store) = temp_store();
        let (oid, _) = store.insert(&b"doomed"[..], None).unwrap();
        assert!(store.remove(&oid).unwrap());
        assert!(!store.remove(&oid).unwrap());
    }

    #[test]
    fn sweep_temp_removes_abandoned_files() {
        let (_dir, store) = temp_store();
        fs::write(store.tmp_dir().join("abandoned-1"), b"x").unwrap();
        fs::write(store.tmp_dir().join("abandoned-2"), b"y").unwrap();
        assert_eq!(store.sweep_temp().unwrap(), 2);
        assert_eq!(store.sweep_temp().unwrap(), 0);
    }

    #[test]
    fn dropped_writer_leaves_nothing_behind() {
        let (_dir, store) = temp_store();
        let oid = Oid::digest(b"never finished");
        {
            let mut w = store.writer(&oid, 14).unwrap();
            w.write_all(b"never").unwrap();
        }
        assert!(!store.object_path_readonly(&oid).exists());
        assert_eq!(fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    proptest! {
        #[test]
        fn path_ends_with_shards_and_hex(bytes in any::<[u8; 32]>()) {
            let store = ContentStore {
                objects_dir: PathBuf::from("/lfs/objects"),
                tmp_dir: PathBuf::from("/lfs/tmp"),
                bad_dir: PathBuf::from("/lfs/bad"),
            };
            let oid = Oid::from_hash(bytes);
            let hex = oid.to_hex();
            let expected = PathBuf::from("/lfs/objects").join(&hex[0..2]).join(&hex[2..4]).join(&hex);
            prop_assert_eq!(store.object_path_readonly(&oid), expected);
        }
    }
}
