//! Component E: the archive orchestrator (spec.md §4.3). The only public
//! entry point of this crate: reads the header, then dispatches to every
//! other component in the one fixed sequence the format allows —
//! constant pool, global inner classes, user-defined attribute layouts,
//! classes (which themselves drive the bytecode decoder), file bytes,
//! and finally the post-pass. Reading out of this order yields undefined
//! references; it is a programming error, not a recoverable one (spec.md
//! §5).

use std::io::Read;
use std::rc::Rc;

use crate::attr::{self, Context};
use crate::band::{IntBand, RefBand};
use crate::buffer::LimitedBuffer;
use crate::class::{self, Package, UserAttrDef};
use crate::coding::Coding;
use crate::config::ReaderOptions;
use crate::cpreader;
use crate::files;
use crate::header::{self, ArchiveHeader0, ArchiveHeader1};
use crate::pool::{PoolBuilder, Tag};
use crate::postpass;
use crate::result::{Error, Result};

fn attr_context_from_code(code: i64) -> Result<Context> {
    match code {
        0 => Ok(Context::Class),
        1 => Ok(Context::Field),
        2 => Ok(Context::Method),
        3 => Ok(Context::Code),
        other => Err(Error::BadLayout {
            context: "attr_definition_headers",
            reason: format!("unknown attribute context code {other}"),
        }),
    }
}

/// Reads `attr_definition_bands` (spec.md §6, `HAVE_SPECIAL_FORMATS`):
/// one tuple per user-defined attribute layout, each naming a holder
/// context, a Utf8 attribute name, and a Utf8 layout string parsed the
/// same way the predefined layouts are (spec.md §8 scenario 6).
fn read_attr_definitions<R: Read>(reader: &mut R, count: usize, pool: &mut PoolBuilder) -> Result<Vec<UserAttrDef>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut ctx_band = IntBand::new("attr_definition_headers", Coding::UNSIGNED5);
    ctx_band.expect_more_length(count);
    ctx_band.fill(reader)?;
    let ctx_codes = ctx_band.values().to_vec();

    let mut name_band = RefBand::new("attr_definition_name", Coding::UNSIGNED5, Tag::Utf8, false);
    name_band.expect_more_length(count);
    name_band.fill(reader)?;
    let mut layout_band = RefBand::new("attr_definition_layout", Coding::UNSIGNED5, Tag::Utf8, false);
    layout_band.expect_more_length(count);
    layout_band.fill(reader)?;

    let mut out = Vec::with_capacity(count);
    for &code in &ctx_codes {
        let context = attr_context_from_code(code)?;
        let name = name_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
        let layout_entry = layout_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
        let layout = attr::parse_layout(&layout_entry.spelling())?;
        out.push(UserAttrDef { context, name, layout });
    }
    name_band.done_disbursing()?;
    layout_band.done_disbursing()?;
    Ok(out)
}

/// Reads a complete pack archive from `input` and returns the decoded
/// [`Package`]. `options` tunes caller-visible policy only (spec.md's
/// format itself takes no parameters); see [`ReaderOptions`].
pub fn read_package<R: Read>(input: R, options: &ReaderOptions) -> Result<Package> {
    let mut buf = LimitedBuffer::new(input);

    header::read_magic(&mut buf)?;
    let header0: ArchiveHeader0 = header::read_header_0(&mut buf)?;

    #[cfg(feature = "log")]
    log::debug!("archive version {}.{}", header0.major_version, header0.minor_version);

    let declared_size = if header0.options.have_file_headers() {
        let size = header::read_header_size(&mut buf)?;
        if let Some(max) = options.max_archive_size {
            if size > max {
                return Err(Error::ArchiveTooLarge { declared: size, max });
            }
        }
        Some(size)
    } else {
        None
    };

    let mut header1: ArchiveHeader1 = header::read_header_1(&mut buf, header0.options, header0.major_version)?;
    header::check_legacy_guard(&mut header1.cp_counts, header0.major_version, options.strict_legacy)?;

    // `band_headers` (per-band coding overrides, spec.md §3): no band in
    // this crate consults a non-default coding, so an archive that
    // actually emitted overrides (a non-empty `band_headers`) would
    // silently decode every affected band's integers wrong if we just
    // skipped the bytes. Fail loudly instead (see DESIGN.md) rather than
    // guess at codings we can't verify without the full, positional
    // overridable-band table.
    if header0.options.have_special_formats() && header1.band_headers_size > 0 {
        return Err(Error::UnsupportedBandHeaderOverride {
            size: header1.band_headers_size,
        });
    }

    let mut pool = cpreader::read_constant_pool(&mut buf, header1.cp_counts)?;

    let global_inner_classes = class::read_global_inner_classes(&mut buf, header1.inner_class_count, &pool)?;

    let user_defined = if header0.options.have_special_formats() {
        read_attr_definitions(&mut buf, header1.attr_definition_count, &mut pool)?
    } else {
        Vec::new()
    };

    let class_result = class::read_classes(
        &mut buf,
        header1.class_count,
        &mut pool,
        &global_inner_classes,
        &user_defined,
        header0.major_version,
    )?;
    let mut classes = class_result.classes;

    // The format bands a per-file modtime *delta*; it never bands a
    // default to add it to, so every reader in this crate treats that
    // default as zero (see DESIGN.md).
    let default_modtime = 0i64;
    let mut files = files::read_files(&mut buf, header1.file_count, header0.options, default_modtime)?;
    bind_classfile_stubs(&classes, &mut files, default_modtime);

    postpass::finalize(&mut classes, &mut pool, header1.default_class_major_version, header1.default_class_minor_version)?;

    if let Some(size) = declared_size {
        let served = buf.served();
        if served != size {
            return Err(Error::SizeMismatch { diag: buf.diagnostic() });
        }
    }

    let pool = pool.finish();
    Ok(Package::new(pool, classes, files, global_inner_classes, default_modtime))
}

/// Matches classfile stubs (`.class`-named, zero-length file entries) to
/// classes positionally, in declaration order, and synthesizes an empty
/// stub for every class the archive left without one (spec.md §4.9).
fn bind_classfile_stubs(classes: &[class::Class], files: &mut Vec<files::FileEntry>, default_modtime: i64) {
    let bound = files.iter().filter(|f| f.is_classfile_stub()).count();
    for class in classes.iter().skip(bound) {
        files.push(files::FileEntry {
            name: Rc::from(format!("{}.class", class.this_class().spelling())),
            modtime: default_modtime,
            deflate_hint: false,
            bytes: Vec::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn minimal_empty_archive_decodes_to_empty_package() {
        let mut bytes = Vec::new();
        bytes.extend(header::ARCHIVE_MAGIC);
        bytes.extend(0u16.to_be_bytes()); // minor_version
        bytes.extend(52u16.to_be_bytes()); // major_version
        bytes.extend(0u16.to_be_bytes()); // options = 0
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // archive_ic_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // default_class_minver
        bytes.extend(Coding::UNSIGNED5.encode_value(52)); // default_class_majver
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // archive_class_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Utf8_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_String_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Class_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Signature_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Descr_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Field_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Method_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // cp_Imethod_count

        let options = ReaderOptions::default();
        let pkg = read_package(Cursor::new(bytes), &options).unwrap();
        assert!(pkg.classes().is_empty());
        assert!(pkg.files().is_empty());
    }
}
