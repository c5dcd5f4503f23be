//! Component K: the file-bytes reader. `file_bands` yield per-file
//! metadata tuples; the payload bytes that follow are partitioned
//! sequentially by declared size. A zero-length `.class`-named entry is a
//! *classfile stub* that binds, in declaration order, to a still-unbound
//! class; any class left without a stub gets a synthesized empty file.

use std::io::Read;
use std::rc::Rc;

use crate::band::IntBand;
use crate::coding::Coding;
use crate::header::ArchiveOptions;
use crate::result::Result;
use crate::utf8::decode_utf8_bands;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: Rc<str>,
    pub modtime: i64,
    pub deflate_hint: bool,
    pub bytes: Vec<u8>,
}

impl FileEntry {
    pub fn is_classfile_stub(&self) -> bool {
        self.name.ends_with(".class") && self.bytes.is_empty()
    }
}

/// Reads `file_count` file metadata tuples plus their concatenated
/// payload bytes. `default_modtime` backs entries when
/// `HAVE_FILE_MODTIME` is clear.
pub fn read_files<R: Read>(
    reader: &mut R,
    file_count: usize,
    options: ArchiveOptions,
    default_modtime: i64,
) -> Result<Vec<FileEntry>> {
    if file_count == 0 {
        return Ok(vec![]);
    }

    let names = decode_utf8_bands(reader, file_count + 1)?;
    // index 0 of the Utf8 band set is the implicit "" entry; file names
    // start at index 1, matching how `cp_Utf8` reserves slot 0.
    let names = &names[1..];

    let mut size_hi = vec![0i64; file_count];
    if options.have_file_size_hi() {
        let mut band = IntBand::new("file_size_hi", Coding::UNSIGNED5);
        band.expect_more_length(file_count);
        band.fill(reader)?;
        size_hi = band.values().to_vec();
    }

    let mut size_lo = IntBand::new("file_size_lo", Coding::UNSIGNED5);
    size_lo.expect_more_length(file_count);
    size_lo.fill(reader)?;
    let size_lo = size_lo.values().to_vec();

    let mut modtimes = vec![0i64; file_count];
    if options.have_file_modtime() {
        let mut band = IntBand::new("file_modtime", Coding::DELTA5);
        band.expect_more_length(file_count);
        band.fill(reader)?;
        modtimes = band.values().to_vec();
    }

    let mut deflate_hints = vec![options.deflate_hint(); file_count];
    if options.have_file_options() {
        let mut band = IntBand::new("file_options", Coding::UNSIGNED5);
        band.expect_more_length(file_count);
        band.fill(reader)?;
        for (i, v) in band.values().iter().enumerate() {
            deflate_hints[i] = v & 1 != 0;
        }
    }

    let sizes: Vec<u64> = size_hi
        .iter()
        .zip(size_lo.iter())
        .map(|(hi, lo)| ((*hi as u64) << 32) | (*lo as u32 as u64))
        .collect();

    let mut entries = Vec::with_capacity(file_count);
    for i in 0..file_count {
        let mut bytes = vec![0u8; sizes[i] as usize];
        reader.read_exact(&mut bytes).map_err(crate::result::Error::Io)?;
        entries.push(FileEntry {
            name: names[i].clone(),
            modtime: default_modtime + modtimes[i],
            deflate_hint: deflate_hints[i],
            bytes,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn classfile_stub_detection() {
        let entry = FileEntry {
            name: Rc::from("com/example/Foo.class"),
            modtime: 0,
            deflate_hint: false,
            bytes: vec![],
        };
        assert!(entry.is_classfile_stub());

        let resource = FileEntry {
            name: Rc::from("META-INF/MANIFEST.MF"),
            modtime: 0,
            deflate_hint: false,
            bytes: vec![1, 2, 3],
        };
        assert!(!resource.is_classfile_stub());
    }

    #[test]
    fn reads_single_resource_file() {
        let options = ArchiveOptions::new();
        // Utf8 bands for 2 strings ("", "a.txt"): prefix band is empty
        // (count-2 = 0 values) and big_suffix band is empty (no big
        // suffixes), so only suffix[1] and the chars band carry bytes.
        let mut bytes = vec![];
        bytes.extend(Coding::UNSIGNED5.encode_value(5)); // suffix[1] = 5
        for c in "a.txt".chars() {
            bytes.extend(Coding::UNSIGNED5.encode_value(c as i64));
        }
        // big_suffix band: 0 values, nothing emitted
        bytes.extend(Coding::UNSIGNED5.encode_value(3)); // size_lo
        bytes.extend([1, 2, 3]); // payload
        let entries = read_files(&mut Cursor::new(bytes), 1, options, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(&*entries[0].name, "a.txt");
        assert_eq!(entries[0].bytes, vec![1, 2, 3]);
    }
}
