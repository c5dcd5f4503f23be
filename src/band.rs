//! Component C: the band framework. A band is a named, typed column whose
//! length is announced before it is filled from the byte stream, then
//! disbursed to callers one value at a time: a thin cursor over
//! pre-materialized content, the same materialize-then-replay shape used
//! by this crate's other stream readers, except a band's length depends
//! on previously-read bands rather than a directory entry, and values are
//! decoded through a [`Coding`] rather than read as fixed-width integers.

use std::io::Read;
use std::rc::Rc;

use crate::coding::Coding;
use crate::pool::{Entry, Tag};
use crate::result::{Error, Result};

/// Lifecycle of a band: announced length, drained content, then handed out
/// to callers. `reset_for_second_pass` rewinds the cursor only — the
/// decoded values are immutable once filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sized,
    Filled,
    Consumed,
}

/// A column of decoded integers (counts, flags, raw byte values, or
/// not-yet-resolved reference indices).
#[derive(Debug)]
pub struct IntBand {
    name: &'static str,
    coding: Coding,
    expected: usize,
    values: Vec<i64>,
    cursor: usize,
    state: State,
}

impl IntBand {
    pub fn new(name: &'static str, coding: Coding) -> Self {
        Self {
            name,
            coding,
            expected: 0,
            values: Vec::new(),
            cursor: 0,
            state: State::Sized,
        }
    }

    /// Announces how many values this band will hold. May be called
    /// before `fill`; bands whose length grows incrementally (as in the
    /// attribute engine's sizing pass) call this repeatedly with the
    /// additional count.
    pub fn expect_more_length(&mut self, n: usize) {
        self.expected += n;
    }

    pub fn expected_len(&self) -> usize {
        self.expected
    }

    /// Pulls exactly `expected` coded values out of `reader`.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        self.values = self
            .coding
            .decode_band(reader, self.expected)
            .map_err(|e| annotate(e, self.name))?;
        self.cursor = 0;
        self.state = State::Filled;
        Ok(())
    }

    pub fn get(&mut self) -> Result<i64> {
        let v = self.values.get(self.cursor).copied().ok_or(Error::BandNotDone {
            band: self.name,
            served: self.cursor as u32,
            expected: self.expected as u32,
        })?;
        self.cursor += 1;
        Ok(v)
    }

    pub fn peek_remaining(&self) -> &[i64] {
        &self.values[self.cursor..]
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn reset_for_second_pass(&mut self) {
        self.cursor = 0;
    }

    pub fn done_disbursing(&self) -> Result<()> {
        if self.cursor != self.values.len() {
            return Err(Error::BandNotDone {
                band: self.name,
                served: self.cursor as u32,
                expected: self.values.len() as u32,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A column of raw octets (no coding applied beyond BYTE1).
#[derive(Debug)]
pub struct ByteBand {
    name: &'static str,
    expected: usize,
    values: Vec<u8>,
    cursor: usize,
}

impl ByteBand {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            expected: 0,
            values: Vec::new(),
            cursor: 0,
        }
    }

    pub fn expect_more_length(&mut self, n: usize) {
        self.expected += n;
    }

    pub fn fill<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut buf = vec![0u8; self.expected];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::TruncatedStream {
                    band: self.name,
                    diag: Default::default(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        self.values = buf;
        self.cursor = 0;
        Ok(())
    }

    pub fn get(&mut self) -> Result<u8> {
        let v = *self.values.get(self.cursor).ok_or(Error::BandNotDone {
            band: self.name,
            served: self.cursor as u32,
            expected: self.expected as u32,
        })?;
        self.cursor += 1;
        Ok(v)
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn reset_for_second_pass(&mut self) {
        self.cursor = 0;
    }

    pub fn done_disbursing(&self) -> Result<()> {
        if self.cursor != self.values.len() {
            return Err(Error::BandNotDone {
                band: self.name,
                served: self.cursor as u32,
                expected: self.values.len() as u32,
            });
        }
        Ok(())
    }
}

/// An [`IntBand`] whose decoded integers index into a constant-pool tag
/// family. `0` conventionally means "null" for bands that permit it; a
/// positive value is biased by one before the lookup (index `n` refers to
/// the `n - 1`th entry of that tag), matching spec.md §4.2's stated
/// convention.
pub struct RefBand {
    ints: IntBand,
    tag: Tag,
    nullable: bool,
}

impl RefBand {
    pub fn new(name: &'static str, coding: Coding, tag: Tag, nullable: bool) -> Self {
        Self {
            ints: IntBand::new(name, coding),
            tag,
            nullable,
        }
    }

    pub fn expect_more_length(&mut self, n: usize) {
        self.ints.expect_more_length(n);
    }

    pub fn fill<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        self.ints.fill(reader)
    }

    /// Resolves the next raw integer into a pool entry by consulting
    /// `resolve`, the pool's per-tag lookup.
    pub fn get_ref(&mut self, resolve: impl FnOnce(Tag, u32) -> Option<Rc<Entry>>) -> Result<Option<Rc<Entry>>> {
        let raw = self.ints.get()?;
        if self.nullable && raw == 0 {
            return Ok(None);
        }
        let idx = if self.nullable { raw - 1 } else { raw };
        if idx < 0 {
            return Err(Error::DanglingReference {
                band: self.ints.name,
                index: raw as u32,
            });
        }
        let entry = resolve(self.tag, idx as u32).ok_or(Error::DanglingReference {
            band: self.ints.name,
            index: idx as u32,
        })?;
        Ok(Some(entry))
    }

    pub fn reset_for_second_pass(&mut self) {
        self.ints.reset_for_second_pass();
    }

    pub fn done_disbursing(&self) -> Result<()> {
        self.ints.done_disbursing()
    }

    pub fn name(&self) -> &'static str {
        self.ints.name
    }
}

fn annotate(err: Error, band: &'static str) -> Error {
    match err {
        Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Error::TruncatedStream {
            band,
            diag: Default::default(),
        },
        other => other,
    }
}
