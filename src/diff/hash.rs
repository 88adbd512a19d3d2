use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;

/// Lowercase hex of a finished SHA-256 digest.
pub fn hex_digest(hasher: Sha256) -> String {
    let result = hasher.finalize();
    let mut out = String::with_capacity(result.len() * 2);
    for byte in result.iter() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

pub struct DigestWriter<'a, D: Digest>(pub &'a mut D);

impl<'a, D: Digest> io::Write for DigestWriter<'a, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest sink that refuses to accept more than `limit` bytes.
///
/// Serializing through this never materializes the payload, so an oversized
/// value fails with a clean error instead of a giant allocation.
pub struct BoundedDigestWriter {
    hasher: Sha256,
    written: usize,
    limit: Option<usize>,
}

impl BoundedDigestWriter {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            hasher: Sha256::new(),
            written: 0,
            limit,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn exceeded(&self) -> bool {
        self.limit.is_some_and(|limit| self.written > limit)
    }

    pub fn finish(self) -> (String, usize) {
        (hex_digest(self.hasher), self.written)
    }
}

impl io::Write for BoundedDigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        if self.exceeded() {
            return Err(io::Error::other("serialization byte limit exceeded"));
        }
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Count serialized bytes without keeping them.
#[derive(Default)]
pub struct CountingWriter {
    pub count: usize,
}

impl io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn serialized_len<T: serde::Serialize>(value: &T) -> usize {
    let mut counter = CountingWriter::default();
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.count,
        Err(_) => usize::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bounded_writer_stops_at_limit() {
        let mut w = BoundedDigestWriter::new(Some(4));
        assert!(w.write_all(b"abcd").is_ok());
        assert!(w.write_all(b"e").is_err());
        assert!(w.exceeded());
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
