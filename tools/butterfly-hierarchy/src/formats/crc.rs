//! CRC-64 checksums for the spatial index files

use std::io::{self, Write};

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Writer adapter that checksums everything passing through it
pub struct DigestWriter<W> {
    inner: W,
    digest: crc::Digest<'static, u64>,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
            written: 0,
        }
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.written
    }

    /// Append the checksum of everything written so far (not itself checksummed)
    pub fn finish(mut self) -> io::Result<W> {
        let crc = self.digest.finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
