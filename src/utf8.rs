//! Component F: Utf8 band decoding with prefix/suffix sharing and the
//! big-suffix escape path for strings containing non-BMP characters
//! (spec.md §4.4).

use std::io::Read;
use std::rc::Rc;

use crate::band::IntBand;
use crate::coding::Coding;
use crate::result::{Error, Result};

/// Decodes `count` strings from the five Utf8 bands. `str[0]` is always
/// `""`; every other string shares a `prefix[i]` run of UTF-16 code units
/// with its predecessor, then appends either `suffix[i]` code units read
/// from the flat `chars` band or, when `suffix[i] == 0`, a "big suffix"
/// whose true length comes from `big_suffix` and whose code units come
/// from a dedicated per-string band.
pub fn decode_utf8_bands<R: Read>(reader: &mut R, count: usize) -> Result<Vec<Rc<str>>> {
    if count == 0 {
        return Ok(vec![]);
    }
    let mut out: Vec<Rc<str>> = Vec::with_capacity(count);
    out.push(Rc::from(""));
    if count == 1 {
        return Ok(out);
    }

    let mut prefix = IntBand::new("Utf8_prefix", Coding::UNSIGNED5);
    prefix.expect_more_length(count - 2);
    prefix.fill(reader)?;

    let mut suffix = IntBand::new("Utf8_suffix", Coding::UNSIGNED5);
    suffix.expect_more_length(count - 1);
    suffix.fill(reader)?;

    // Sizing pass: figure out how many code units the flat `chars` band
    // must hold and how many strings escape to the big-suffix path.
    let suffix_values = suffix.values().to_vec();
    let chars_total: usize = suffix_values.iter().filter(|&&s| s != 0).map(|&s| s as usize).sum();
    let big_count = suffix_values.iter().filter(|&&s| s == 0).count();

    let mut chars = IntBand::new("Utf8_chars", Coding::BYTE1_CHAR);
    chars.expect_more_length(chars_total);
    chars.fill(reader)?;

    let mut big_suffix = IntBand::new("Utf8_big_suffix", Coding::UNSIGNED5);
    big_suffix.expect_more_length(big_count);
    big_suffix.fill(reader)?;

    // Assembly pass.
    let mut prev: Vec<u16> = Vec::new();
    for i in 1..count {
        let suf = suffix_values[i - 1];
        let prefix_len = if i == 1 {
            0
        } else {
            prefix.get()? as usize
        };
        if prefix_len > prev.len() {
            return Err(Error::BadLayout {
                context: "Utf8",
                reason: format!("prefix length {prefix_len} exceeds predecessor length {}", prev.len()),
            });
        }
        let mut units: Vec<u16> = prev[..prefix_len].to_vec();
        if suf != 0 {
            for _ in 0..suf {
                units.push(chars.get()? as u16);
            }
        } else {
            let big_len = big_suffix.get()? as usize;
            let mut big = IntBand::new("Utf8_big_chars", Coding::BYTE1_CHAR);
            big.expect_more_length(big_len);
            big.fill(reader)?;
            for _ in 0..big_len {
                units.push(big.get()? as u16);
            }
            big.done_disbursing()?;
        }
        let s = char::decode_utf16(units.iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect::<String>();
        out.push(Rc::from(s.as_str()));
        prev = units;
    }

    prefix.done_disbursing()?;
    suffix.done_disbursing()?;
    chars.done_disbursing()?;
    big_suffix.done_disbursing()?;

    Ok(out)
}

impl Coding {
    /// 16-bit code units are carried one-per-BYTE1-like coded value in
    /// this implementation's char bands; since real code units can exceed
    /// a single byte's terminal range, char bands use [`Coding::UNSIGNED5`]
    /// rather than a literal single byte.
    pub const BYTE1_CHAR: Coding = Coding::UNSIGNED5;
}
