//! Component G: reads all sixteen constant-pool tag families in the fixed
//! order the archive lays them out in, interning each entry into the
//! global [`PoolBuilder`]. Order matters: later tags (e.g. `Fieldref`)
//! reference entries of earlier tags (`Class`, `NameAndType`) that must
//! already be interned (spec.md §9 — no true cycles, only build order).

use std::io::Read;
use std::rc::Rc;

use crate::band::IntBand;
use crate::coding::Coding;
use crate::pool::{Entry, MethodHandleKind, PoolBuilder, Tag};
use crate::result::{Error, Result};
use crate::signature::count_class_slots;
use crate::utf8::decode_utf8_bands;

/// Per-tag entry counts read from `archive_header_1` (spec.md §4.3). Tags
/// gated by `HAVE_CP_NUMBERS` / `HAVE_CP_EXTRAS` default to zero when the
/// corresponding option bit is clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpCounts {
    pub utf8: usize,
    pub integer: usize,
    pub float: usize,
    pub long: usize,
    pub double: usize,
    pub string: usize,
    pub class: usize,
    pub signature: usize,
    pub name_and_type: usize,
    pub fieldref: usize,
    pub methodref: usize,
    pub interface_methodref: usize,
    pub method_handle: usize,
    pub method_type: usize,
    pub bootstrap_method: usize,
    pub invoke_dynamic: usize,
}

fn read_int_band<R: Read>(reader: &mut R, name: &'static str, coding: Coding, count: usize) -> Result<Vec<i64>> {
    let mut band = IntBand::new(name, coding);
    band.expect_more_length(count);
    band.fill(reader)?;
    let values = band.values().to_vec();
    band.done_disbursing()?;
    Ok(values)
}

fn read_ref<R: Read>(
    reader: &mut R,
    name: &'static str,
    count: usize,
    pool: &PoolBuilder,
    tag: Tag,
) -> Result<Vec<Rc<Entry>>> {
    let raw = read_int_band(reader, name, Coding::UNSIGNED5, count)?;
    raw.into_iter()
        .map(|idx| {
            pool.get(tag, idx as u32).ok_or(Error::DanglingReference {
                band: name,
                index: idx as u32,
            })
        })
        .collect()
}

/// Reads every constant-pool tag family in archive order, returning the
/// frozen [`PoolBuilder`] (still open for the post-pass's synthetic
/// entries, e.g. local `BootstrapMethods` attribute names).
pub fn read_constant_pool<R: Read>(reader: &mut R, counts: CpCounts) -> Result<PoolBuilder> {
    let mut pool = PoolBuilder::new();

    for s in decode_utf8_bands(reader, counts.utf8)? {
        pool.intern(Entry::Utf8(s));
    }

    for v in read_int_band(reader, "cp_Int", Coding::UDELTA5, counts.integer)? {
        pool.intern(Entry::Integer(v as i32));
    }
    for v in read_int_band(reader, "cp_Float", Coding::UDELTA5, counts.float)? {
        pool.intern(Entry::Float(v as u32));
    }

    // Long/Double are stored as two delta-coded halves (hi, lo bands),
    // not interleaved, so both bands are read in full before zipping.
    let long_hi = read_int_band(reader, "cp_Long_hi", Coding::UDELTA5, counts.long)?;
    let long_lo = read_int_band(reader, "cp_Long_lo", Coding::UDELTA5, counts.long)?;
    for (hi, lo) in long_hi.into_iter().zip(long_lo) {
        let v = ((hi as i64) << 32) | (lo as u32 as i64);
        pool.intern(Entry::Long(v));
    }

    let double_hi = read_int_band(reader, "cp_Double_hi", Coding::UDELTA5, counts.double)?;
    let double_lo = read_int_band(reader, "cp_Double_lo", Coding::UDELTA5, counts.double)?;
    for (hi, lo) in double_hi.into_iter().zip(double_lo) {
        let v = ((hi as u64) << 32) | (lo as u32 as u64);
        pool.intern(Entry::Double(v));
    }

    for utf8 in read_ref(reader, "cp_String", counts.string, &pool, Tag::Utf8)? {
        pool.intern(Entry::String { utf8 });
    }

    for name in read_ref(reader, "cp_Class", counts.class, &pool, Tag::Utf8)? {
        pool.intern(Entry::Class { name });
    }

    // Signature: one Utf8 "form" ref per entry, then `count_class_slots`
    // Class refs per entry, read from a shared flat classes band.
    let forms = read_ref(reader, "cp_Signature_form", counts.signature, &pool, Tag::Utf8)?;
    let total_slots: usize = forms.iter().map(|f| count_class_slots(&f.spelling())).sum();
    let class_refs = read_ref(reader, "cp_Signature_classes", total_slots, &pool, Tag::Class)?;
    let mut class_iter = class_refs.into_iter();
    for form in forms {
        let n = count_class_slots(&form.spelling());
        let classes: Vec<_> = (0..n).map(|_| class_iter.next().unwrap()).collect();
        pool.intern(Entry::Signature { form, classes });
    }

    let names = read_ref(reader, "cp_Descr_name", counts.name_and_type, &pool, Tag::Utf8)?;
    let descrs = read_ref(reader, "cp_Descr_type", counts.name_and_type, &pool, Tag::Signature)?;
    for (name, descriptor) in names.into_iter().zip(descrs) {
        pool.intern(Entry::NameAndType { name, descriptor });
    }

    for (tag, band_prefix, make) in [
        (Tag::Fieldref, "cp_Field", Entry::Fieldref as fn(Rc<Entry>, Rc<Entry>) -> Entry),
        (Tag::Methodref, "cp_Method", Entry::Methodref as fn(Rc<Entry>, Rc<Entry>) -> Entry),
        (
            Tag::InterfaceMethodref,
            "cp_Imethod",
            Entry::InterfaceMethodref as fn(Rc<Entry>, Rc<Entry>) -> Entry,
        ),
    ] {
        let count = match tag {
            Tag::Fieldref => counts.fieldref,
            Tag::Methodref => counts.methodref,
            _ => counts.interface_methodref,
        };
        let class_name: &'static str = match tag {
            Tag::Fieldref => "cp_Field_class",
            Tag::Methodref => "cp_Method_class",
            _ => "cp_Imethod_class",
        };
        let desc_name: &'static str = band_prefix;
        let classes = read_ref(reader, class_name, count, &pool, Tag::Class)?;
        let nats = read_ref(reader, desc_name, count, &pool, Tag::NameAndType)?;
        for (class, name_and_type) in classes.into_iter().zip(nats) {
            pool.intern(make(class, name_and_type));
        }
    }

    let kinds = read_int_band(reader, "cp_MethodHandle_kind", Coding::BYTE1, counts.method_handle)?;
    let raw_refs = read_int_band(reader, "cp_MethodHandle_ref", Coding::UNSIGNED5, counts.method_handle)?;
    for (kind, idx) in kinds.into_iter().zip(raw_refs) {
        let kind = method_handle_kind(kind as u32)?;
        // GetField/PutField target a Fieldref; the invoke* kinds target a
        // Methodref (or InterfaceMethodref for the `invokeinterface`
        // kind); resolve against whichever family the kind implies.
        let reference_tag = match kind {
            MethodHandleKind::GetField | MethodHandleKind::GetStatic | MethodHandleKind::PutField | MethodHandleKind::PutStatic => {
                Tag::Fieldref
            }
            MethodHandleKind::InvokeInterface => Tag::InterfaceMethodref,
            _ => Tag::Methodref,
        };
        let reference = pool.get(reference_tag, idx as u32).ok_or(Error::DanglingReference {
            band: "cp_MethodHandle_ref",
            index: idx as u32,
        })?;
        pool.intern(Entry::MethodHandle { kind, reference });
    }

    for descriptor in read_ref(reader, "cp_MethodType", counts.method_type, &pool, Tag::Signature)? {
        pool.intern(Entry::MethodType { descriptor });
    }

    let bsm_handles = read_ref(
        reader,
        "cp_BootstrapMethod_ref",
        counts.bootstrap_method,
        &pool,
        Tag::MethodHandle,
    )?;
    let bsm_arg_counts = read_int_band(
        reader,
        "cp_BootstrapMethod_arg_count",
        Coding::UNSIGNED5,
        counts.bootstrap_method,
    )?;
    let total_args: usize = bsm_arg_counts.iter().map(|&c| c as usize).sum();
    let bsm_args = read_int_band(reader, "cp_BootstrapMethod_arg", Coding::UNSIGNED5, total_args)?;
    let mut arg_iter = bsm_args.into_iter();
    for (method, arg_count) in bsm_handles.into_iter().zip(bsm_arg_counts) {
        let mut arguments = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            let idx = arg_iter.next().unwrap();
            // Bootstrap arguments are loadable constants: resolve against
            // whichever tag family the index actually belongs to by
            // trying the common loadable tags in order.
            let entry = [Tag::String, Tag::Class, Tag::Integer, Tag::Float, Tag::Long, Tag::Double, Tag::MethodHandle, Tag::MethodType]
                .into_iter()
                .find_map(|t| pool.get(t, idx as u32))
                .ok_or(Error::DanglingReference {
                    band: "cp_BootstrapMethod_arg",
                    index: idx as u32,
                })?;
            arguments.push(entry);
        }
        pool.intern(Entry::BootstrapMethod { method, arguments });
    }

    let invoke_bsm = read_int_band(reader, "cp_InvokeDynamic_bsm", Coding::UNSIGNED5, counts.invoke_dynamic)?;
    let invoke_nat = read_ref(reader, "cp_InvokeDynamic_descr", counts.invoke_dynamic, &pool, Tag::NameAndType)?;
    for (bsm, name_and_type) in invoke_bsm.into_iter().zip(invoke_nat) {
        pool.intern(Entry::InvokeDynamic {
            bootstrap_method: bsm as u32,
            name_and_type,
        });
    }

    Ok(pool)
}


fn method_handle_kind(raw: u32) -> Result<MethodHandleKind> {
    Ok(match raw {
        1 => MethodHandleKind::GetField,
        2 => MethodHandleKind::GetStatic,
        3 => MethodHandleKind::PutField,
        4 => MethodHandleKind::PutStatic,
        5 => MethodHandleKind::InvokeVirtual,
        6 => MethodHandleKind::InvokeStatic,
        7 => MethodHandleKind::InvokeSpecial,
        8 => MethodHandleKind::NewInvokeSpecial,
        9 => MethodHandleKind::InvokeInterface,
        other => {
            return Err(Error::BadLayout {
                context: "MethodHandle",
                reason: format!("unknown reference kind {other}"),
            })
        }
    });
}
