use std::io::Cursor;

use pack200_reader::coding::Coding;
use pack200_reader::header::{ArchiveOptions, ARCHIVE_MAGIC};
use pack200_reader::result::Error;
use pack200_reader::{read_package, ReaderOptions};

fn u16be(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

fn v5(value: i64) -> Vec<u8> {
    Coding::UNSIGNED5.encode_value(value)
}

fn chars(s: &str) -> Vec<u8> {
    s.chars().flat_map(|c| v5(c as i64)).collect()
}

/// spec.md §8 scenario 1: an archive with every count zeroed decodes to
/// an empty package and leaves nothing unconsumed.
#[test]
fn minimal_empty_archive() {
    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0)); // minor
    bytes.extend(u16be(52)); // major
    bytes.extend(u16be(0)); // options = 0
    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(0)); // archive_class_count
    bytes.extend(v5(0)); // cp_Utf8_count
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(0)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count

    let pkg = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap();
    assert!(pkg.classes().is_empty());
    assert!(pkg.files().is_empty());
    assert!(pkg.global_inner_classes().is_empty());
}

#[test]
fn magic_mismatch_is_rejected() {
    let bytes = vec![0x00, 0x00, 0x00, 0x00];
    let err = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MagicMismatch { .. }));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0)); // minor
    bytes.extend(u16be(44)); // major: below the 49..=52 (5.0..8.0) supported set
    let err = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { major: 44, .. }));
}

/// spec.md §8 scenario 2: a class named `A` extending `java/lang/Object`
/// with no members. Exercises the Utf8 prefix/suffix decoder, the Class
/// tag, and `class_super == class_this` null-super handling is *not*
/// triggered here (distinct classes).
#[test]
fn single_utf8_only_class() {
    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(52));
    bytes.extend(u16be(0)); // options = 0

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(1)); // archive_class_count
    bytes.extend(v5(3)); // cp_Utf8_count: "", "A", "java/lang/Object"
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(2)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count

    // Utf8 bands: prefix has count-2 = 1 value, suffix has count-1 = 2.
    bytes.extend(v5(0)); // prefix[2] (str[2] shares nothing with str[1])
    bytes.extend(v5(1)); // suffix[1] = len("A")
    bytes.extend(v5(16)); // suffix[2] = len("java/lang/Object")
    bytes.extend(chars("A"));
    bytes.extend(chars("java/lang/Object"));
    // big_suffix: 0 values

    // cp_Class: index into the Utf8 pool directly, 0-based.
    bytes.extend(v5(1)); // Class[0] -> Utf8[1] "A"
    bytes.extend(v5(2)); // Class[1] -> Utf8[2] "java/lang/Object"

    // global inner classes: none.
    // attr_definition_bands: skipped (HAVE_SPECIAL_FORMATS unset).

    // class_this / class_super / interfaces.
    bytes.extend(v5(0)); // class_this -> Class[0] "A"
    bytes.extend(v5(1)); // class_super -> Class[1] "java/lang/Object"
    bytes.extend(v5(0)); // class_interface_count
    // class_field_count / class_method_count
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    // class-context flags_lo: no attrs claimed.
    bytes.extend(v5(0));
    // field-context flags_lo: 0 holders -> empty band
    // method-context flags_lo: 0 holders -> empty band
    // code-context: 0 holders -> max_stack/max_locals/handler_count empty
    // code-context flags_lo: 0 holders -> empty
    // bytecode sizer.finish with 0 methods: every shared band empty

    let pkg = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap();
    assert_eq!(pkg.classes().len(), 1);
    let class = &pkg.classes()[0];
    assert_eq!(class.this_class().spelling(), "A");
    assert_eq!(class.super_class().as_ref().unwrap().spelling(), "java/lang/Object");
    assert!(class.fields().is_empty());
    assert!(class.methods().is_empty());

    // post-pass synthesized a classfile stub for the class with no
    // matching file entry (spec.md §4.9).
    assert_eq!(pkg.files().len(), 1);
    assert_eq!(&*pkg.files()[0].name, "A.class");
    assert!(pkg.files()[0].bytes.is_empty());

    // Local CP reconstruction reached both the class's own name and its
    // superclass.
    let local = class.local_pool().unwrap();
    assert!(local.index_of(class.this_class()).is_some());
    assert!(local.index_of(class.super_class().as_ref().unwrap()).is_some());
}

/// spec.md §8 scenario 3: a string containing a non-BMP code point
/// (outside the basic multilingual plane) takes the big-suffix escape
/// path and must decode back to the original character, not mojibake.
#[test]
fn utf8_big_suffix_reconstructs_surrogate_pair() {
    let grinning_face = '\u{1F600}';
    let units: Vec<u16> = grinning_face.encode_utf16(&mut [0u16; 2]).to_vec();
    assert_eq!(units.len(), 2, "non-BMP char must encode as a surrogate pair");

    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(52));
    bytes.extend(u16be(0));

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(0)); // archive_class_count
    bytes.extend(v5(2)); // cp_Utf8_count: "", the emoji
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(0)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count

    // Utf8 bands for count=2: prefix has 0 values, suffix has 1.
    bytes.extend(v5(0)); // suffix[1] = 0 -> big-suffix escape
    // chars band: no non-big suffixes, so empty.
    bytes.extend(v5(2)); // big_suffix[0] = 2 (surrogate pair length)
    for unit in &units {
        bytes.extend(v5(*unit as i64));
    }

    let pkg = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap();
    assert_eq!(pkg.pool().count(pack200_reader::pool::Tag::Utf8), 2);
    let entry = pkg.pool().get(pack200_reader::pool::Tag::Utf8, 1).unwrap();
    match &*entry {
        pack200_reader::pool::Entry::Utf8(s) => assert_eq!(s.chars().next(), Some(grinning_face)),
        other => panic!("expected Utf8 entry, got {other:?}"),
    }
}

/// A class with one field and one method carrying a trivial `Code`
/// attribute (`return`), exercising the member descriptor bands, the
/// attribute flags/claims machinery, and the bytecode decoder's
/// no-operand path end to end.
#[test]
fn class_with_field_and_trivial_method() {
    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(52));
    bytes.extend(u16be(0));

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(1)); // archive_class_count
    bytes.extend(v5(7)); // cp_Utf8_count: "", A, java/lang/Object, x, I, m, ()V
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(2)); // cp_Class_count
    bytes.extend(v5(2)); // cp_Signature_count: I, ()V
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count (Fieldref)
    bytes.extend(v5(0)); // cp_Method_count (Methodref)
    bytes.extend(v5(0)); // cp_Imethod_count

    // Utf8 bands: 6 real strings after the implicit "", no shared prefixes.
    bytes.extend(std::iter::repeat(v5(0)).take(5).flatten().collect::<Vec<u8>>()); // prefix[2..6]
    for s in ["A", "java/lang/Object", "x", "I", "m", "()V"] {
        bytes.extend(v5(s.chars().count() as i64));
    }
    for s in ["A", "java/lang/Object", "x", "I", "m", "()V"] {
        bytes.extend(chars(s));
    }
    // big_suffix: 0 values

    bytes.extend(v5(1)); // cp_Class[0] -> Utf8[1] "A"
    bytes.extend(v5(2)); // cp_Class[1] -> Utf8[2] "java/lang/Object"

    bytes.extend(v5(4)); // cp_Signature_form[0] -> Utf8[4] "I"
    bytes.extend(v5(6)); // cp_Signature_form[1] -> Utf8[6] "()V"
    // cp_Signature_classes: 0 values (neither form has an `L...;` slot)

    // global inner classes: none; attr_definition_bands: skipped.

    bytes.extend(v5(0)); // class_this -> Class[0] "A"
    bytes.extend(v5(1)); // class_super -> Class[1] "java/lang/Object"
    bytes.extend(v5(0)); // class_interface_count

    bytes.extend(v5(1)); // class_field_count
    bytes.extend(v5(1)); // class_method_count

    bytes.extend(v5(3)); // field_descr_name -> Utf8[3] "x"
    bytes.extend(v5(0)); // field_descr_signature -> Signature[0] "I"

    bytes.extend(v5(5)); // method_descr_name -> Utf8[5] "m"
    bytes.extend(v5(1)); // method_descr_signature -> Signature[1] "()V"

    bytes.extend(v5(0)); // class flags_lo: no attributes claimed

    bytes.extend(v5(1)); // field flags_lo: ACC_PUBLIC (bit 0), no attrs claimed

    bytes.extend(v5(1 << 16)); // method flags_lo: claims Code (def index 0), access_flags = 0

    bytes.extend(v5(1)); // code_max_stack
    bytes.extend(v5(1)); // code_max_locals
    bytes.extend(v5(0)); // code_handler_count

    bytes.extend(v5(0)); // code-context flags_lo: no Code-context attrs claimed

    // bc_codes: one method, `return` with no operands, end marker.
    bytes.push(177);
    bytes.push(255);
    // every shared bytecode operand band is empty for this method.

    let pkg = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap();
    assert_eq!(pkg.classes().len(), 1);
    let class = &pkg.classes()[0];
    assert_eq!(class.fields().len(), 1);
    assert_eq!(class.fields()[0].name().spelling(), "x");
    assert_eq!(*class.fields()[0].access_flags(), 1);

    assert_eq!(class.methods().len(), 1);
    let method = &class.methods()[0];
    assert_eq!(method.name().spelling(), "m");
    let code = method.code().as_ref().expect("method claimed Code");
    assert_eq!(code.bytes(), &vec![177u8]);
    assert!(code.handlers().is_empty());
    assert!(code.fixups().is_empty());

    // Local CP reconstruction reached the field's name/descriptor and
    // the method's, plus the class's own name and superclass.
    let local = class.local_pool().unwrap();
    assert!(local.index_of(class.this_class()).is_some());
    assert!(local.index_of(class.fields()[0].name()).is_some());
    assert!(local.index_of(method.name()).is_some());
}

/// spec.md §3 Invariant: `super == this` in `class_super` denotes a null
/// super (the module-info/interface-special convention, spec.md §9 open
/// question (a)), exercised end to end through a full archive rather
/// than the `read_classes` unit test alone.
#[test]
fn super_equal_to_this_means_null_super() {
    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(52));
    bytes.extend(u16be(0));

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(1)); // archive_class_count
    bytes.extend(v5(1)); // cp_Utf8_count: just the implicit "" entry, no bands needed
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(1)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count

    bytes.extend(v5(0)); // cp_Class[0] -> Utf8[0] ""

    bytes.extend(v5(0)); // class_this -> Class[0]
    bytes.extend(v5(0)); // class_super -> Class[0] (same as this => null)
    bytes.extend(v5(0)); // class_interface_count
    bytes.extend(v5(0)); // class_field_count
    bytes.extend(v5(0)); // class_method_count
    bytes.extend(v5(0)); // class flags_lo

    let pkg = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap();
    assert!(pkg.classes()[0].super_class().is_none());
}

/// Archives that claim a `HAVE_CP_EXTRAS` tag (here, `InvokeDynamic`)
/// while declaring a pre-7.0 version are rejected under the default
/// strict-legacy policy (spec.md §4.3's legacy guard).
#[test]
fn legacy_guard_rejects_invokedynamic_count_pre_dot7() {
    let mut options = ArchiveOptions::new();
    options.set_have_cp_extras(true);

    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(49)); // major version 5.0
    bytes.extend(options.into_bytes());

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(49)); // default_class_majver
    bytes.extend(v5(0)); // archive_class_count
    bytes.extend(v5(0)); // cp_Utf8_count
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(0)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count
    bytes.extend(v5(0)); // cp_MethodHandle_count
    bytes.extend(v5(0)); // cp_MethodType_count
    bytes.extend(v5(0)); // cp_BootstrapMethod_count
    bytes.extend(v5(1)); // cp_InvokeDynamic_count: non-zero, illegal pre-7.0

    let err = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::LegacyFeatureInOldVersion {
            feature: "InvokeDynamic",
            ..
        }
    ));
}

/// With `strict_legacy` disabled, the same archive decodes by zeroing
/// the offending count instead of failing.
#[test]
fn legacy_guard_can_be_relaxed_via_reader_options() {
    let mut options_bits = ArchiveOptions::new();
    options_bits.set_have_cp_extras(true);

    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(49));
    bytes.extend(options_bits.into_bytes());

    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(49));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(0));
    bytes.extend(v5(1)); // cp_InvokeDynamic_count

    let options = ReaderOptions {
        strict_legacy: false,
        ..ReaderOptions::default()
    };
    let pkg = read_package(Cursor::new(bytes), &options).unwrap();
    assert!(pkg.classes().is_empty());
}

/// A non-empty `band_headers` (spec.md §3's per-band coding overrides)
/// is rejected rather than silently skipped and mis-decoded downstream
/// (see DESIGN.md: this reader does not apply overridden codings).
#[test]
fn band_headers_override_is_rejected_not_silently_skipped() {
    let mut options = ArchiveOptions::new();
    options.set_have_special_formats(true);

    let mut bytes = Vec::new();
    bytes.extend(ARCHIVE_MAGIC);
    bytes.extend(u16be(0));
    bytes.extend(u16be(52));
    bytes.extend(options.into_bytes());

    bytes.extend(v5(0)); // archive_ic_count
    bytes.extend(v5(0)); // default_class_minver
    bytes.extend(v5(52)); // default_class_majver
    bytes.extend(v5(0)); // archive_class_count
    bytes.extend(v5(5)); // archive_band_headers_size: non-zero, a real override
    bytes.extend(v5(0)); // archive_attr_definition_count
    bytes.extend(v5(0)); // cp_Utf8_count
    bytes.extend(v5(0)); // cp_String_count
    bytes.extend(v5(0)); // cp_Class_count
    bytes.extend(v5(0)); // cp_Signature_count
    bytes.extend(v5(0)); // cp_Descr_count
    bytes.extend(v5(0)); // cp_Field_count
    bytes.extend(v5(0)); // cp_Method_count
    bytes.extend(v5(0)); // cp_Imethod_count

    let err = read_package(Cursor::new(bytes), &ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedBandHeaderOverride { size: 5 }));
}
