use std::io::{self, Read};

use lfs_types::Oid;
use sha2::{Digest, Sha256};

/// Incremental SHA-256 hasher producing an [`Oid`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and return the digest as an [`Oid`].
    pub fn finish(self) -> Oid {
        let mut out = [0u8; lfs_types::OID_LEN];
        out.copy_from_slice(&self.inner.finalize());
        Oid::from_hash(out)
    }

    /// Verify that data produces the expected object id.
    pub fn verify(data: &[u8], expected: &Oid) -> bool {
        Oid::digest(data) == *expected
    }
}

/// A reader that hashes everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
    read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
            read: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn finish(self) -> (Oid, u64) {
        (self.hasher.finish(), self.read)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = ContentHasher::new();
        h.update(b"hel");
        h.update(b"lo");
        assert_eq!(h.finish(), Oid::digest(b"hello"));
    }

    #[test]
    fn verify_detects_tampering() {
        let id = Oid::digest(b"original");
        assert!(ContentHasher::verify(b"original", &id));
        assert!(!ContentHasher::verify(b"tampered", &id));
    }

    #[test]
    fn hashing_reader_counts_and_hashes() {
        let mut reader = HashingReader::new(&b"some bytes"[..]);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(reader.bytes_read(), 10);
        let (oid, n) = reader.finish();
        assert_eq!(n, 10);
        assert_eq!(oid, Oid::digest(b"some bytes"));
    }
}
