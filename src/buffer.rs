use std::io::{self, Read};

use crate::result::{Diagnostic, Error, Result};

/// A byte source layered on an external `Read`, back-pressuring it with a
/// declared read limit, the way `reader.by_ref().take(n)` bounds a
/// sub-stream for header-delimited regions, but additionally tracking
/// served-byte accounting across limit changes and forbidding seeking.
///
/// The wrapped stream is never advanced past the limit, even if the caller
/// under-reads what the limit allows: once a limit is set, `read` reports
/// end-of-stream (`Ok(0)`) the moment `served` would exceed it.
pub struct LimitedBuffer<R> {
    inner: R,
    served: u64,
    limit: Option<u64>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

const CHUNK: usize = 8192;

impl<R: Read> LimitedBuffer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            served: 0,
            limit: None,
            buf: vec![0; CHUNK],
            pos: 0,
            filled: 0,
        }
    }

    /// Total bytes returned to callers so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Bytes allowed past the current served count, or `None` for
    /// unlimited. Setting a new limit narrows or widens the window from
    /// `served()` onward.
    pub fn set_read_limit(&mut self, n: Option<u64>) {
        #[cfg(feature = "log")]
        log::trace!(
            "read limit {:?} -> {:?} (served={})",
            self.limit,
            n,
            self.served
        );
        self.limit = n;
    }

    pub fn at_limit(&self) -> bool {
        matches!(self.limit, Some(0))
    }

    fn remaining_allowed(&self) -> Option<u64> {
        self.limit
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_checked(&mut b, "byte")?;
        Ok(b[0])
    }

    pub fn read_exact_checked(&mut self, out: &mut [u8], band: &'static str) -> Result<()> {
        let n = self.read(out)?;
        if n != out.len() {
            return Err(Error::TruncatedStream {
                band,
                diag: self.diagnostic(),
            });
        }
        Ok(())
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            served: self.served,
            buffered: self.filled - self.pos,
            limit: self.limit,
        }
    }

    fn fill_buf_bounded(&mut self) -> io::Result<()> {
        if self.pos < self.filled {
            return Ok(());
        }
        self.pos = 0;
        self.filled = 0;
        let max = self
            .remaining_allowed()
            .map(|n| n.min(CHUNK as u64) as usize)
            .unwrap_or(CHUNK);
        if max == 0 {
            return Ok(());
        }
        let read = self.inner.read(&mut self.buf[..max])?;
        self.filled = read;
        Ok(())
    }
}

impl<R: Read> Read for LimitedBuffer<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Ok(0);
            }
        }
        if self.pos == self.filled {
            self.fill_buf_bounded()?;
        }
        let avail = self.filled - self.pos;
        if avail == 0 {
            return Ok(0);
        }
        let want = out.len().min(avail);
        out[..want].copy_from_slice(&self.buf[self.pos..self.pos + want]);
        self.pos += want;
        self.served += want as u64;
        if let Some(limit) = self.limit.as_mut() {
            *limit -= want as u64;
        }
        Ok(want)
    }
}

impl<R> LimitedBuffer<R> {
    /// Skipping is unsupported and fails loudly, per the format's
    /// contract: every byte must be accounted for by a band.
    pub fn skip(&mut self, _n: u64) -> Result<()> {
        Err(Error::IllegalSkip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn serves_within_limit_then_stops() {
        let mut buf = LimitedBuffer::new(Cursor::new(vec![1, 2, 3, 4, 5]));
        buf.set_read_limit(Some(3));
        let mut out = [0u8; 5];
        let n = buf.read(&mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        let n2 = buf.read(&mut out).unwrap();
        assert_eq!(n2, 0);
        assert!(buf.at_limit());
    }

    #[test]
    fn unlimited_reads_everything() {
        let mut buf = LimitedBuffer::new(Cursor::new(vec![9u8; 20000]));
        let mut out = vec![0u8; 20000];
        buf.read_exact_checked(&mut out, "test").unwrap();
        assert_eq!(buf.served(), 20000);
    }

    #[test]
    fn widening_limit_after_narrow_read() {
        let mut buf = LimitedBuffer::new(Cursor::new(vec![1, 2, 3, 4]));
        buf.set_read_limit(Some(2));
        let mut out = [0u8; 2];
        buf.read_exact_checked(&mut out, "first").unwrap();
        buf.set_read_limit(Some(2));
        let mut out2 = [0u8; 2];
        buf.read_exact_checked(&mut out2, "second").unwrap();
        assert_eq!(out2, [3, 4]);
    }

    #[test]
    fn truncated_stream_reports_diagnostic() {
        let mut buf = LimitedBuffer::new(Cursor::new(vec![1u8]));
        let mut out = [0u8; 4];
        let err = buf.read_exact_checked(&mut out, "short").unwrap_err();
        match err {
            Error::TruncatedStream { band, .. } => assert_eq!(band, "short"),
            _ => panic!("wrong error: {err:?}"),
        }
    }

    #[test]
    fn skip_is_unsupported() {
        let mut buf = LimitedBuffer::new(Cursor::new(vec![1, 2, 3]));
        assert!(matches!(buf.skip(1), Err(Error::IllegalSkip)));
    }
}
