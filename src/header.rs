//! Archive header parsing (spec.md §4.3): magic, `archive_header_0`
//! (version + options), the optional `archive_header_S` (archive size),
//! and `archive_header_1` (the per-tag constant-pool counts plus file,
//! inner-class, and class counts).

use std::io::Read;

use modular_bitfield::prelude::*;

use crate::band::IntBand;
use crate::coding::Coding;
use crate::cpreader::CpCounts;
use crate::result::{Error, Result};

pub const ARCHIVE_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xD0, 0x0D];

/// The archive-wide options bitfield (spec.md §6's `AO_*` table), packed
/// into a 16-bit word one bool per bit, low bit first.
#[bitfield(bits = 16)]
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    pub deflate_hint: bool,
    pub have_file_headers: bool,
    pub have_special_formats: bool,
    pub have_cp_numbers: bool,
    pub have_cp_extras: bool,
    pub have_file_size_hi: bool,
    pub have_file_modtime: bool,
    pub have_file_options: bool,
    pub have_all_code_flags: bool,
    #[skip]
    __: B7,
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveHeader0 {
    pub minor_version: u16,
    pub major_version: u16,
    pub options: ArchiveOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveHeader1 {
    pub file_count: usize,
    pub inner_class_count: usize,
    pub default_class_minor_version: u16,
    pub default_class_major_version: u16,
    pub class_count: usize,
    pub band_headers_size: usize,
    pub attr_definition_count: usize,
    pub cp_counts: CpCounts,
}

/// Supported class-file version pairs (5.0 through 8.0, spec.md §4.3 step
/// 3), keyed by major version.
const SUPPORTED_MAJOR_VERSIONS: &[u16] = &[49, 50, 51, 52];

fn read_u16_be<R: Read>(reader: &mut R) -> Result<u16> {
    let mut b = [0u8; 2];
    reader.read_exact(&mut b).map_err(Error::Io)?;
    Ok(u16::from_be_bytes(b))
}

fn read_u32_be<R: Read>(reader: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b).map_err(Error::Io)?;
    Ok(u32::from_be_bytes(b))
}

pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut found = [0u8; 4];
    reader.read_exact(&mut found).map_err(Error::Io)?;
    if found != ARCHIVE_MAGIC {
        return Err(Error::MagicMismatch {
            expected: ARCHIVE_MAGIC,
            found,
        });
    }
    Ok(())
}

pub fn read_header_0<R: Read>(reader: &mut R) -> Result<ArchiveHeader0> {
    let minor_version = read_u16_be(reader)?;
    let major_version = read_u16_be(reader)?;
    if !SUPPORTED_MAJOR_VERSIONS.contains(&major_version) {
        return Err(Error::UnsupportedVersion {
            major: major_version,
            minor: minor_version,
        });
    }
    let raw_options = read_u16_be(reader)?;
    let options = ArchiveOptions::from_bytes(raw_options.to_be_bytes());
    Ok(ArchiveHeader0 {
        minor_version,
        major_version,
        options,
    })
}

/// Reads `archive_header_S` (hi/lo halves of the declared archive size)
/// when `HAVE_FILE_HEADERS` is set.
pub fn read_header_size<R: Read>(reader: &mut R) -> Result<u64> {
    let hi = read_u32_be(reader)?;
    let lo = read_u32_be(reader)?;
    Ok(((hi as u64) << 32) | lo as u64)
}

fn read_count<R: Read>(reader: &mut R, name: &'static str) -> Result<usize> {
    let mut band = IntBand::new(name, Coding::UNSIGNED5);
    band.expect_more_length(1);
    band.fill(reader)?;
    let v = band.values()[0];
    if v < 0 {
        return Err(Error::BadLayout {
            context: "header",
            reason: format!("negative count in `{name}`"),
        });
    }
    Ok(v as usize)
}

/// Reads `archive_header_1`: file/inner-class/class counts, the default
/// class version, the band-headers size, the attribute-definition count,
/// and every constant-pool tag's count (omitting the numeric/extra tag
/// groups per the options bitfield).
pub fn read_header_1<R: Read>(reader: &mut R, options: ArchiveOptions, major_version: u16) -> Result<ArchiveHeader1> {
    let mut h = ArchiveHeader1::default();

    if options.have_file_headers() {
        h.file_count = read_count(reader, "archive_file_count")?;
    }
    h.inner_class_count = read_count(reader, "archive_ic_count")?;
    h.default_class_minor_version = read_count(reader, "archive_default_class_minver")? as u16;
    h.default_class_major_version = read_count(reader, "archive_default_class_majver")? as u16;
    h.class_count = read_count(reader, "archive_class_count")?;

    if options.have_special_formats() {
        h.band_headers_size = read_count(reader, "archive_band_headers_size")?;
        h.attr_definition_count = read_count(reader, "archive_attr_definition_count")?;
    }

    let mut cp = CpCounts::default();
    cp.utf8 = read_count(reader, "archive_cp_Utf8_count")?;
    if options.have_cp_numbers() {
        cp.integer = read_count(reader, "archive_cp_Int_count")?;
        cp.float = read_count(reader, "archive_cp_Float_count")?;
        cp.long = read_count(reader, "archive_cp_Long_count")?;
        cp.double = read_count(reader, "archive_cp_Double_count")?;
    }
    cp.string = read_count(reader, "archive_cp_String_count")?;
    cp.class = read_count(reader, "archive_cp_Class_count")?;
    cp.signature = read_count(reader, "archive_cp_Signature_count")?;
    cp.name_and_type = read_count(reader, "archive_cp_Descr_count")?;
    cp.fieldref = read_count(reader, "archive_cp_Field_count")?;
    cp.methodref = read_count(reader, "archive_cp_Method_count")?;
    cp.interface_methodref = read_count(reader, "archive_cp_Imethod_count")?;
    if options.have_cp_extras() {
        cp.method_handle = read_count(reader, "archive_cp_MethodHandle_count")?;
        cp.method_type = read_count(reader, "archive_cp_MethodType_count")?;
        cp.bootstrap_method = read_count(reader, "archive_cp_BootstrapMethod_count")?;
        cp.invoke_dynamic = read_count(reader, "archive_cp_InvokeDynamic_count")?;
    }
    h.cp_counts = cp;

    Ok(h)
}

/// Legacy guard (spec.md §4.3): a non-zero count for a tag introduced
/// after the archive's declared version is fatal in strict mode, or
/// logged and zeroed otherwise (`ReaderOptions::strict_legacy`).
pub fn check_legacy_guard(cp: &mut CpCounts, major_version: u16, strict: bool) -> Result<()> {
    let offenders: &mut [(&'static str, &mut usize, u16)] = &mut [
        ("MethodHandle", &mut cp.method_handle, 51),
        ("MethodType", &mut cp.method_type, 51),
        ("InvokeDynamic", &mut cp.invoke_dynamic, 51),
        ("BootstrapMethod", &mut cp.bootstrap_method, 51),
    ];
    for (name, count, min_version) in offenders.iter_mut() {
        if **count > 0 && major_version < *min_version {
            if strict {
                return Err(Error::LegacyFeatureInOldVersion {
                    feature: name,
                    major: major_version,
                    minor: 0,
                });
            }
            #[cfg(feature = "log")]
            log::warn!("ignoring {name} entries in archive declared as major version {major_version}");
            **count = 0;
        }
    }
    Ok(())
}
