//! Component I: class and member assembly (spec.md §4.7). Reads
//! `class_this`/`class_super`/interfaces, per-class field and method
//! counts, then the flat descriptor and attribute bands for every field
//! and method in the whole archive (everything here stays columnar —
//! one holder context at a time across *all* classes, not a per-class
//! nested read). Methods that claim the `Code` bit get a further,
//! wholly separate Code-context pass: per-holder `max_stack`/`max_locals`,
//! exception handlers, Code-context attributes, and finally the
//! archive-wide two-pass bytecode decode (component J).

use std::io::Read;
use std::rc::Rc;

use derive_getters::Getters;

use crate::attr::{self, AttributeDef, Context, FlagsResult, LayoutElem, Shape};
use crate::band::{IntBand, RefBand};
use crate::bytecode::{self, BytecodeSizer, DecodedCode, ExceptionHandler, Fixup};
use crate::coding::Coding;
use crate::files::FileEntry;
use crate::pool::{Entry, Pool, PoolBuilder, Tag};
use crate::result::{Error, Result};

/// One decoded attribute attached to a holder.
pub use crate::attr::Attribute;

/// A user-defined attribute layout declared via `attr_definition_bands`
/// (spec.md §4.6, §8 scenario 6).
#[derive(Debug, Clone)]
pub struct UserAttrDef {
    pub context: Context,
    pub name: Rc<Entry>,
    pub layout: Vec<LayoutElem>,
}

/// One tuple from the global `InnerClasses` table (read once, up front,
/// and referenced by zero-flag per-class `InnerClasses` tuples).
#[derive(Debug, Clone)]
pub struct InnerClass {
    pub inner: Rc<Entry>,
    pub outer: Option<Rc<Entry>>,
    pub name: Option<Rc<Entry>>,
    pub flags: u16,
}

#[derive(Debug, Clone, Getters)]
pub struct Code {
    max_stack: u16,
    max_locals: u16,
    bytes: Vec<u8>,
    handlers: Vec<ExceptionHandler>,
    attributes: Vec<Attribute>,
    fixups: Vec<Fixup>,
    /// Entries touched by a narrow `ldc`/`ldc_w`/`ldc2_w` in this method;
    /// folded into the owning class's `ldcRefMap` by the local CP
    /// reconstruction pass (spec.md §4.7).
    ldc_refs: Vec<Rc<Entry>>,
}

#[derive(Debug, Clone, Getters)]
pub struct Field {
    name: Rc<Entry>,
    descriptor: Rc<Entry>,
    access_flags: u16,
    attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Getters)]
pub struct Method {
    name: Rc<Entry>,
    descriptor: Rc<Entry>,
    access_flags: u16,
    attributes: Vec<Attribute>,
    code: Option<Code>,
}

#[derive(Debug, Clone, Getters)]
pub struct Class {
    this_class: Rc<Entry>,
    super_class: Option<Rc<Entry>>,
    interfaces: Vec<Rc<Entry>>,
    access_flags: u16,
    attributes: Vec<Attribute>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    inner_classes: Vec<InnerClass>,
    major_version: u16,
    minor_version: u16,
    #[getter(skip)]
    pub(crate) local_pool: Option<crate::postpass::LocalPool>,
}

fn resolve_loadable(pool: &PoolBuilder, idx: u32) -> Option<Rc<Entry>> {
    [Tag::String, Tag::Integer, Tag::Float, Tag::Long, Tag::Double]
        .into_iter()
        .find_map(|t| pool.get(t, idx))
}

/// Reads the archive-wide global `InnerClasses` table (spec.md §4.6's
/// `attrInnerClassesEmpty` paragraph refers to this table by the entries
/// it lets per-class tuples copy from when their flag word is zero).
pub fn read_global_inner_classes<R: Read>(reader: &mut R, count: usize, pool: &PoolBuilder) -> Result<Vec<InnerClass>> {
    let mut this_band = RefBand::new("ic_this_class", Coding::UNSIGNED5, Tag::Class, false);
    this_band.expect_more_length(count);
    this_band.fill(reader)?;
    let mut flags_band = IntBand::new("ic_flags", Coding::UNSIGNED5);
    flags_band.expect_more_length(count);
    flags_band.fill(reader)?;
    let flags: Vec<i64> = flags_band.values().to_vec();
    let long_form = flags.iter().filter(|&&f| f != 0).count();

    let mut outer_band = RefBand::new("ic_outer_class", Coding::UNSIGNED5, Tag::Class, true);
    outer_band.expect_more_length(long_form);
    outer_band.fill(reader)?;
    let mut name_band = RefBand::new("ic_name", Coding::UNSIGNED5, Tag::Utf8, true);
    name_band.expect_more_length(long_form);
    name_band.fill(reader)?;

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let inner = this_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
        let flag = flags[i];
        let (outer, name) = if flag != 0 {
            (outer_band.get_ref(|t, idx| pool.get(t, idx))?, name_band.get_ref(|t, idx| pool.get(t, idx))?)
        } else {
            (None, None)
        };
        out.push(InnerClass {
            inner,
            outer,
            name,
            flags: flag as u16,
        });
    }
    this_band.done_disbursing()?;
    flags_band.done_disbursing()?;
    outer_band.done_disbursing()?;
    name_band.done_disbursing()?;
    Ok(out)
}

/// One context's predefined defs plus any archive-declared extras
/// (spec.md §8 scenario 6), with a name entry parallel to each def:
/// predefined names are synthesized Utf8 entries interned into the
/// shared pool, user-defined names are the real `attr_definition_name`
/// reference already read off the archive.
struct ContextDefs {
    defs: Vec<AttributeDef>,
    names: Vec<Rc<Entry>>,
}

fn build_context_defs(ctx: Context, user_defined: &[UserAttrDef], pool: &mut PoolBuilder) -> ContextDefs {
    let defs = attr::predefined(ctx);
    let mut names: Vec<Rc<Entry>> = defs.iter().map(|d| pool.intern(Entry::Utf8(Rc::from(d.name)))).collect();
    let mut all_defs = defs;
    for u in user_defined.iter().filter(|u| u.context == ctx) {
        all_defs.push(AttributeDef {
            name: "UserDefined",
            shape: Shape::Layout(u.layout.clone()),
        });
        names.push(u.name.clone());
    }
    ContextDefs { defs: all_defs, names }
}

/// Runs the generic (non-`Special`) layout defs of `defs` through the
/// attribute engine, and invokes `special` for the rest, returning each
/// holder's fully decoded attribute list in declared-index order.
fn decode_attrs<R: Read>(
    reader: &mut R,
    ctx_defs: &ContextDefs,
    flags: &FlagsResult,
    holder_count: usize,
    pool: &PoolBuilder,
    mut special: impl FnMut(usize, &str, &[bool], &mut R) -> Result<Vec<Option<Vec<attr::AttrValue>>>>,
) -> Result<Vec<Vec<Attribute>>> {
    let mut out: Vec<Vec<Attribute>> = vec![Vec::new(); holder_count];
    for (def_index, def) in ctx_defs.defs.iter().enumerate() {
        let claims: Vec<bool> = (0..holder_count).map(|h| flags.claims[h].contains(&def_index)).collect();
        let claim_count = claims.iter().filter(|&&c| c).count();
        if claim_count == 0 {
            continue;
        }
        let values_per_claimer: Vec<Vec<attr::AttrValue>> = match &def.shape {
            Shape::NoData => vec![Vec::new(); claim_count],
            Shape::Layout(elems) => {
                let mut resolve = |t: Tag, idx: u32| pool.get(t, idx);
                attr::decode_layout(elems, &claims, claim_count, "attr", reader, &mut resolve)?
            }
            Shape::Special(kind) => {
                let results = special(def_index, kind, &claims, reader)?;
                results.into_iter().flatten().collect()
            }
        };
        let name = ctx_defs.names[def_index].clone();
        let mut iter = values_per_claimer.into_iter();
        for h in 0..holder_count {
            if claims[h] {
                out[h].push(Attribute {
                    name: name.clone(),
                    values: iter.next().unwrap(),
                });
            }
        }
    }
    Ok(out)
}

/// Holds every result of the columnar class/member read, ready for L's
/// per-class post-pass (local CP assembly, inner-class recomputation).
pub struct ClassReadResult {
    pub classes: Vec<Class>,
}

#[allow(clippy::too_many_arguments)]
pub fn read_classes<R: Read>(
    reader: &mut R,
    class_count: usize,
    pool: &mut PoolBuilder,
    global_inner_classes: &[InnerClass],
    user_defined: &[UserAttrDef],
    archive_major_version: u16,
) -> Result<ClassReadResult> {
    if class_count == 0 {
        return Ok(ClassReadResult { classes: Vec::new() });
    }

    // class_this / class_super / interfaces.
    let mut this_band = RefBand::new("class_this", Coding::UNSIGNED5, Tag::Class, false);
    this_band.expect_more_length(class_count);
    this_band.fill(reader)?;
    let mut super_band = RefBand::new("class_super", Coding::UNSIGNED5, Tag::Class, false);
    super_band.expect_more_length(class_count);
    super_band.fill(reader)?;
    let mut iface_count_band = IntBand::new("class_interface_count", Coding::UNSIGNED5);
    iface_count_band.expect_more_length(class_count);
    iface_count_band.fill(reader)?;
    let iface_counts: Vec<usize> = iface_count_band.values().iter().map(|&v| v as usize).collect();
    let total_ifaces: usize = iface_counts.iter().sum();
    let mut iface_band = RefBand::new("class_interface", Coding::UNSIGNED5, Tag::Class, false);
    iface_band.expect_more_length(total_ifaces);
    iface_band.fill(reader)?;

    let mut this_classes = Vec::with_capacity(class_count);
    let mut super_classes = Vec::with_capacity(class_count);
    let mut interfaces_per_class = Vec::with_capacity(class_count);
    for i in 0..class_count {
        let this_entry = this_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
        let super_entry = super_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
        let super_class = if Rc::ptr_eq(&super_entry, &this_entry) { None } else { Some(super_entry) };
        let mut ifaces = Vec::with_capacity(iface_counts[i]);
        for _ in 0..iface_counts[i] {
            ifaces.push(iface_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap());
        }
        this_classes.push(this_entry);
        super_classes.push(super_class);
        interfaces_per_class.push(ifaces);
    }
    this_band.done_disbursing()?;
    super_band.done_disbursing()?;
    iface_band.done_disbursing()?;

    // Per-class field/method counts, then the flat descriptor bands.
    let mut field_count_band = IntBand::new("class_field_count", Coding::UNSIGNED5);
    field_count_band.expect_more_length(class_count);
    field_count_band.fill(reader)?;
    let field_counts: Vec<usize> = field_count_band.values().iter().map(|&v| v as usize).collect();
    let total_fields: usize = field_counts.iter().sum();

    let mut method_count_band = IntBand::new("class_method_count", Coding::UNSIGNED5);
    method_count_band.expect_more_length(class_count);
    method_count_band.fill(reader)?;
    let method_counts: Vec<usize> = method_count_band.values().iter().map(|&v| v as usize).collect();
    let total_methods: usize = method_counts.iter().sum();

    let mut field_name_band = RefBand::new("field_descr_name", Coding::UNSIGNED5, Tag::Utf8, false);
    field_name_band.expect_more_length(total_fields);
    field_name_band.fill(reader)?;
    let mut field_descr_band = RefBand::new("field_descr_signature", Coding::UNSIGNED5, Tag::Signature, false);
    field_descr_band.expect_more_length(total_fields);
    field_descr_band.fill(reader)?;

    let mut field_names = Vec::with_capacity(total_fields);
    let mut field_descrs = Vec::with_capacity(total_fields);
    for _ in 0..total_fields {
        field_names.push(field_name_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap());
        field_descrs.push(field_descr_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap());
    }

    let mut method_name_band = RefBand::new("method_descr_name", Coding::UNSIGNED5, Tag::Utf8, false);
    method_name_band.expect_more_length(total_methods);
    method_name_band.fill(reader)?;
    let mut method_descr_band = RefBand::new("method_descr_signature", Coding::UNSIGNED5, Tag::Signature, false);
    method_descr_band.expect_more_length(total_methods);
    method_descr_band.fill(reader)?;

    let mut method_names = Vec::with_capacity(total_methods);
    let mut method_descrs = Vec::with_capacity(total_methods);
    for _ in 0..total_methods {
        method_names.push(method_name_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap());
        method_descrs.push(method_descr_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap());
    }

    // Class-context attributes (Signature, SourceFile, Deprecated,
    // Synthetic, InnerClasses-special).
    let class_defs = build_context_defs(Context::Class, user_defined, pool);
    let class_flags = attr::read_flags(reader, class_count, class_defs.defs.len(), false, Context::Class)?;
    let class_attrs = decode_attrs(reader, &class_defs, &class_flags, class_count, pool, |_def_index, kind, claims, reader| {
        assert_eq!(kind, "InnerClasses");
        decode_per_class_inner_classes(reader, claims, global_inner_classes, pool)
    })?;

    // Field-context attributes.
    let field_defs = build_context_defs(Context::Field, user_defined, pool);
    let field_flags = attr::read_flags(reader, total_fields, field_defs.defs.len(), false, Context::Field)?;
    let field_attrs = decode_attrs(reader, &field_defs, &field_flags, total_fields, pool, |_def_index, kind, claims, reader| {
        assert_eq!(kind, "ConstantValue");
        let claim_count = claims.iter().filter(|&&c| c).count();
        let mut band = IntBand::new("field_ConstantValue", Coding::UNSIGNED5);
        band.expect_more_length(claim_count);
        band.fill(reader)?;
        let mut out = Vec::with_capacity(claim_count);
        for v in band.values() {
            let entry = resolve_loadable(pool, *v as u32).ok_or(Error::DanglingReference {
                band: "field_ConstantValue",
                index: *v as u32,
            })?;
            out.push(Some(vec![attr::AttrValue::Ref(Some(entry))]));
        }
        Ok(out)
    })?;

    // Method-context attributes (Code is claim-only here; its actual
    // content comes from the dedicated Code-context pass below).
    let method_defs = build_context_defs(Context::Method, user_defined, pool);
    let code_def_index = method_defs.defs.iter().position(|d| d.name == "Code");
    let method_flags = attr::read_flags(reader, total_methods, method_defs.defs.len(), false, Context::Method)?;
    let method_attrs = decode_attrs(reader, &method_defs, &method_flags, total_methods, pool, |def_index, kind, claims, _reader| {
        assert_eq!(kind, "Code");
        let _ = def_index;
        Ok(claims.iter().map(|&c| if c { Some(Vec::new()) } else { None }).collect())
    })?;

    let code_claims: Vec<bool> = match code_def_index {
        Some(i) => (0..total_methods).map(|h| method_flags.claims[h].contains(&i)).collect(),
        None => vec![false; total_methods],
    };
    let code_holder_count = code_claims.iter().filter(|&&c| c).count();

    // Code-context: max_stack/max_locals, handlers, Code-context
    // attributes, then the archive-wide bytecode decode.
    let mut max_stack_band = IntBand::new("code_max_stack", Coding::UNSIGNED5);
    max_stack_band.expect_more_length(code_holder_count);
    max_stack_band.fill(reader)?;
    let mut max_locals_band = IntBand::new("code_max_locals", Coding::UNSIGNED5);
    max_locals_band.expect_more_length(code_holder_count);
    max_locals_band.fill(reader)?;
    let mut handler_count_band = IntBand::new("code_handler_count", Coding::UNSIGNED5);
    handler_count_band.expect_more_length(code_holder_count);
    handler_count_band.fill(reader)?;
    let handler_counts: Vec<usize> = handler_count_band.values().iter().map(|&v| v as usize).collect();
    let total_handlers: usize = handler_counts.iter().sum();

    let mut resolve_cls = |t: Tag, idx: u32| pool.get(t, idx);
    let all_handlers = bytecode::read_handlers(reader, total_handlers, &mut resolve_cls)?;
    let mut handler_iter = all_handlers.into_iter();
    let mut handlers_per_method = Vec::with_capacity(code_holder_count);
    for &n in &handler_counts {
        handlers_per_method.push((0..n).map(|_| handler_iter.next().unwrap()).collect::<Vec<_>>());
    }

    let code_defs = build_context_defs(Context::Code, user_defined, pool);
    let code_flags = attr::read_flags(reader, code_holder_count, code_defs.defs.len(), false, Context::Code)?;
    let code_attrs = decode_attrs(reader, &code_defs, &code_flags, code_holder_count, pool, |_, _, _, _| {
        unreachable!("no Special Code-context attributes defined")
    })?;

    // Bytecode: size every Code holder's method against `bc_codes`, then
    // fill the shared operand bands once, then expand each in order.
    let mut sizer = BytecodeSizer::new();
    let mut size_handles = Vec::with_capacity(code_holder_count);
    for _ in 0..code_holder_count {
        size_handles.push(sizer.size_method(reader)?);
    }
    let (mut bands, methods) = sizer.finish(reader)?;

    // Map each Code holder back to its owning class, for `this`/`super`
    // context in self-linker/invokeinit expansion.
    let mut method_class_of = Vec::with_capacity(total_methods);
    for (class_idx, &count) in method_counts.iter().enumerate() {
        for _ in 0..count {
            method_class_of.push(class_idx);
        }
    }
    let code_holder_class: Vec<usize> = (0..total_methods)
        .filter(|&m| code_claims[m])
        .map(|m| method_class_of[m])
        .collect();

    let mut decoded_codes = Vec::with_capacity(code_holder_count);
    for (i, &handle_idx) in size_handles.iter().enumerate() {
        let class_idx = code_holder_class[i];
        let mut resolve = |t: Tag, idx: u32| pool.get(t, idx);
        let decoded = bytecode::expand_method(
            &methods[handle_idx],
            &mut bands,
            &mut resolve,
            Some(this_classes[class_idx].clone()),
            super_classes[class_idx].clone(),
            archive_major_version,
            pool.entries(Tag::Methodref),
        )?;
        decoded_codes.push(decoded);
    }

    // Assemble per-method Code holders.
    let mut code_by_method: Vec<Option<Code>> = vec![None; total_methods];
    {
        let mut code_cursor = 0usize;
        for m in 0..total_methods {
            if code_claims[m] {
                let decoded: DecodedCode = decoded_codes[code_cursor].clone();
                code_by_method[m] = Some(Code {
                    max_stack: max_stack_band.values()[code_cursor] as u16,
                    max_locals: max_locals_band.values()[code_cursor] as u16,
                    bytes: decoded.bytes,
                    handlers: handlers_per_method[code_cursor].clone(),
                    attributes: code_attrs[code_cursor].clone(),
                    fixups: decoded.fixups,
                    ldc_refs: decoded.ldc_refs,
                });
                code_cursor += 1;
            }
        }
    }

    // Slice flat field/method/attribute vectors back into per-class groups.
    let mut classes = Vec::with_capacity(class_count);
    let mut field_cursor = 0usize;
    let mut method_cursor = 0usize;
    for c in 0..class_count {
        let mut fields = Vec::with_capacity(field_counts[c]);
        for _ in 0..field_counts[c] {
            fields.push(Field {
                name: field_names[field_cursor].clone(),
                descriptor: field_descrs[field_cursor].clone(),
                access_flags: field_flags.access_flags[field_cursor],
                attributes: field_attrs[field_cursor].clone(),
            });
            field_cursor += 1;
        }

        let mut methods_out = Vec::with_capacity(method_counts[c]);
        for _ in 0..method_counts[c] {
            methods_out.push(Method {
                name: method_names[method_cursor].clone(),
                descriptor: method_descrs[method_cursor].clone(),
                access_flags: method_flags.access_flags[method_cursor],
                attributes: method_attrs[method_cursor].clone(),
                code: code_by_method[method_cursor].take(),
            });
            method_cursor += 1;
        }

        let inner_classes = class_attrs[c]
            .iter()
            .find(|a| a.name.spelling() == "InnerClasses")
            .map(inner_classes_from_attribute)
            .unwrap_or_default();

        classes.push(Class {
            this_class: this_classes[c].clone(),
            super_class: super_classes[c].clone(),
            interfaces: interfaces_per_class[c].clone(),
            access_flags: class_flags.access_flags[c],
            attributes: class_attrs[c].clone(),
            fields,
            methods: methods_out,
            inner_classes,
            major_version: 0,
            minor_version: 0,
            local_pool: None,
        });
    }

    Ok(ClassReadResult { classes })
}

/// Decodes `class_InnerClasses_N`/`_RC`/`_F` (plus conditional
/// `_outer_RCN`/`_name_RUN`) for the classes that claim the bit,
/// producing one [`InnerClass`] list per claiming holder in the same
/// order `decode_attrs` expects. Zero-flag tuples copy a matching entry
/// out of the global table by this-class identity.
fn decode_per_class_inner_classes<R: Read>(
    reader: &mut R,
    claims: &[bool],
    global: &[InnerClass],
    pool: &PoolBuilder,
) -> Result<Vec<Option<Vec<attr::AttrValue>>>> {
    let claim_count = claims.iter().filter(|&&c| c).count();
    let mut tuple_count_band = IntBand::new("class_InnerClasses_N", Coding::UNSIGNED5);
    tuple_count_band.expect_more_length(claim_count);
    tuple_count_band.fill(reader)?;
    let tuple_counts: Vec<usize> = tuple_count_band.values().iter().map(|&v| v as usize).collect();
    let total_tuples: usize = tuple_counts.iter().sum();

    let mut rc_band = RefBand::new("class_InnerClasses_RC", Coding::UNSIGNED5, Tag::Class, false);
    rc_band.expect_more_length(total_tuples);
    rc_band.fill(reader)?;
    let mut f_band = IntBand::new("class_InnerClasses_F", Coding::UNSIGNED5);
    f_band.expect_more_length(total_tuples);
    f_band.fill(reader)?;
    let flag_values: Vec<i64> = f_band.values().to_vec();
    let long_form = flag_values.iter().filter(|&&f| f != 0).count();

    let mut outer_band = RefBand::new("class_InnerClasses_outer_RCN", Coding::UNSIGNED5, Tag::Class, true);
    outer_band.expect_more_length(long_form);
    outer_band.fill(reader)?;
    let mut name_band = RefBand::new("class_InnerClasses_name_RUN", Coding::UNSIGNED5, Tag::Utf8, true);
    name_band.expect_more_length(long_form);
    name_band.fill(reader)?;

    let mut out: Vec<Option<Vec<attr::AttrValue>>> = Vec::with_capacity(claim_count);
    let mut tuple_idx = 0usize;
    for &count in &tuple_counts {
        let mut tuples = Vec::with_capacity(count);
        for _ in 0..count {
            let inner = rc_band.get_ref(|t, idx| pool.get(t, idx))?.unwrap();
            let flag = flag_values[tuple_idx];
            tuple_idx += 1;
            let resolved = if flag == 0 {
                global
                    .iter()
                    .find(|g| Rc::ptr_eq(&g.inner, &inner))
                    .cloned()
                    .unwrap_or(InnerClass {
                        inner: inner.clone(),
                        outer: None,
                        name: None,
                        flags: 0,
                    })
            } else {
                InnerClass {
                    inner,
                    outer: outer_band.get_ref(|t, idx| pool.get(t, idx))?,
                    name: name_band.get_ref(|t, idx| pool.get(t, idx))?,
                    flags: flag as u16,
                }
            };
            tuples.push(attr::AttrValue::Seq(vec![
                attr::AttrValue::Ref(Some(resolved.inner.clone())),
                attr::AttrValue::Ref(resolved.outer.clone()),
                attr::AttrValue::Ref(resolved.name.clone()),
                attr::AttrValue::Int(resolved.flags as i64),
            ]));
        }
        out.push(Some(tuples));
    }
    rc_band.done_disbursing()?;
    f_band.done_disbursing()?;
    outer_band.done_disbursing()?;
    name_band.done_disbursing()?;
    Ok(out)
}

/// Materializes an `InnerClass` list straight out of a decoded
/// `InnerClasses` [`Attribute`] (the four-element tuple shape produced by
/// [`decode_per_class_inner_classes`]).
pub fn inner_classes_from_attribute(attr: &Attribute) -> Vec<InnerClass> {
    attr.values
        .iter()
        .filter_map(|v| v.as_seq())
        .map(|tuple| InnerClass {
            inner: tuple[0].as_ref().expect("inner class tuple always has an inner ref"),
            outer: tuple[1].as_ref(),
            name: tuple[2].as_ref(),
            flags: tuple[3].as_int().unwrap_or(0) as u16,
        })
        .collect()
}

#[derive(Debug, Getters)]
pub struct Package {
    pool: Pool,
    classes: Vec<Class>,
    files: Vec<FileEntry>,
    global_inner_classes: Vec<InnerClass>,
    default_modtime: i64,
}

impl Package {
    pub fn new(pool: Pool, classes: Vec<Class>, files: Vec<FileEntry>, global_inner_classes: Vec<InnerClass>, default_modtime: i64) -> Self {
        Self {
            pool,
            classes,
            files,
            global_inner_classes,
            default_modtime,
        }
    }

    pub fn classes_mut(&mut self) -> &mut Vec<Class> {
        &mut self.classes
    }
}

impl Class {
    pub fn set_inner_classes(&mut self, inner_classes: Vec<InnerClass>) {
        self.inner_classes = inner_classes;
    }

    pub fn set_version(&mut self, major: u16, minor: u16) {
        self.major_version = major;
        self.minor_version = minor;
    }

    pub fn set_local_pool(&mut self, local_pool: crate::postpass::LocalPool) {
        self.local_pool = Some(local_pool);
    }

    pub fn local_pool(&self) -> Option<&crate::postpass::LocalPool> {
        self.local_pool.as_ref()
    }

    pub fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }
}
