//! Component A: variable-length integer codings over a byte stream.
//!
//! A [`Coding`] is the 4-tuple `(B, H, S, D)` from spec.md §3: a radix `B`,
//! a continuation cutoff `H`, a sign mode `S`, and a delta flag `D`. Bytes
//! below `256 - H` terminate a value; bytes at or above that threshold
//! continue it. Each coding is a small, self-contained decode/encode pair
//! parameterized by a tiny context, in the same spirit as other
//! fixed-width codecs in this crate, except the alphabet here is
//! variable-width rather than a single fixed-size integer.

use std::io::Read;

use crate::result::{Error, Result};

/// How a raw unsigned value folds into a signed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Raw value is already the answer.
    Unsigned,
    /// Zig-zag folding: even raw values are `raw/2`, odd ones are
    /// `-(raw+1)/2`.
    ZigZag,
    /// Two's-complement fallback: values at or past the midpoint of the
    /// coding's value space wrap to negative.
    TwosComplement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coding {
    pub b: u32,
    pub h: u32,
    pub s: Sign,
    pub d: bool,
}

impl Coding {
    pub const fn new(b: u32, h: u32, s: Sign, d: bool) -> Self {
        Self { b, h, s, d }
    }

    /// Always exactly one byte; used for raw flag/tag bands.
    pub const BYTE1: Coding = Coding::new(1, 0, Sign::Unsigned, false);

    /// The workhorse coding used for the majority of count and index bands.
    pub const UNSIGNED5: Coding = Coding::new(5, 251, Sign::Unsigned, false);

    /// Signed variant of [`Coding::UNSIGNED5`] via zig-zag folding, used for
    /// bands whose values may be negative (e.g. branch offsets).
    pub const SIGNED5: Coding = Coding::new(5, 251, Sign::ZigZag, false);

    /// Delta-coded unsigned band: each disbursed value is a running sum.
    pub const UDELTA5: Coding = Coding::new(5, 251, Sign::Unsigned, true);

    /// Delta-coded signed band.
    pub const DELTA5: Coding = Coding::new(5, 251, Sign::ZigZag, true);

    /// Number of byte values in the terminal range, `256 - H`.
    fn terminal_limit(self) -> u64 {
        256 - self.h as u64
    }

    /// Decodes one raw (pre-sign) unsigned value from `reader`.
    pub fn decode_raw<R: Read>(self, reader: &mut R) -> Result<u64> {
        let l = self.terminal_limit();
        let mut acc: u64 = 0;
        loop {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte).map_err(Error::Io)?;
            let byte = byte[0] as u64;
            if byte < l {
                acc = acc
                    .checked_mul(self.b as u64)
                    .and_then(|v| v.checked_add(byte))
                    .ok_or(Error::CodingOverflow)?;
                return Ok(acc);
            }
            let digit = byte - l;
            acc = acc
                .checked_mul(self.b as u64)
                .and_then(|v| v.checked_add(digit))
                .ok_or(Error::CodingOverflow)?;
        }
    }

    /// Applies this coding's sign mode to a raw unsigned value.
    pub fn apply_sign(self, raw: u64) -> i64 {
        match self.s {
            Sign::Unsigned => raw as i64,
            Sign::ZigZag => {
                if raw % 2 == 0 {
                    (raw / 2) as i64
                } else {
                    -(((raw + 1) / 2) as i64)
                }
            }
            Sign::TwosComplement => {
                let mid = 1u64 << 32;
                if raw < mid {
                    raw as i64
                } else {
                    raw as i64 - (1i64 << 33)
                }
            }
        }
    }

    /// Inverse of [`Coding::apply_sign`], used by the encoder in tests.
    fn unapply_sign(self, value: i64) -> u64 {
        match self.s {
            Sign::Unsigned => value as u64,
            Sign::ZigZag => {
                if value >= 0 {
                    (value as u64) * 2
                } else {
                    (-value as u64) * 2 - 1
                }
            }
            Sign::TwosComplement => value as u64,
        }
    }

    /// Decodes a single signed value, applying this coding's sign mode.
    pub fn decode_value<R: Read>(self, reader: &mut R) -> Result<i64> {
        let raw = self.decode_raw(reader)?;
        Ok(self.apply_sign(raw))
    }

    /// Decodes `count` values, running a cumulative sum if `d` is set.
    pub fn decode_band<R: Read>(self, reader: &mut R, count: usize) -> Result<Vec<i64>> {
        let mut out = Vec::with_capacity(count);
        let mut running: i64 = 0;
        for _ in 0..count {
            let v = self.decode_value(reader)?;
            if self.d {
                running = running.wrapping_add(v);
                out.push(running);
            } else {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Encodes one raw unsigned value; used by tests and by
    /// [`Coding::encode_value`].
    fn encode_raw(self, raw: u64) -> Vec<u8> {
        let l = self.terminal_limit();
        let b = self.b as u64;
        if b == 1 {
            // Radix-1 codings (BYTE1) never continue: decode_raw treats
            // every byte below `l` as terminal, so a single raw byte
            // round-trips without any digit expansion.
            return vec![raw as u8];
        }
        let mut digits = vec![(raw % b) as u64];
        let mut v = raw / b;
        while v > 0 {
            digits.push(v % b);
            v /= b;
        }
        digits.reverse();
        let last = digits.len() - 1;
        digits
            .into_iter()
            .enumerate()
            .map(|(i, d)| if i == last { d as u8 } else { (l + d) as u8 })
            .collect()
    }

    /// Encodes a single signed value; inverse of [`Coding::decode_value`].
    pub fn encode_value(self, value: i64) -> Vec<u8> {
        self.encode_raw(self.unapply_sign(value))
    }
}
