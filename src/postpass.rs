//! Component L: the post-pass reconstructor (spec.md §4.7). Runs once
//! per class after the columnar class/member/bytecode passes have
//! finished: gathers every constant-pool entry the class actually
//! touches, synthesizes a `BootstrapMethods` attribute when invokedynamic
//! pulled any bootstrap bindings into that set, and lays the result out
//! as an ordered local constant-pool map. Also folds the archive's
//! default class-file version onto every class, since nothing upstream
//! of this pass carries a per-class version band.

use std::collections::HashMap;
use std::rc::Rc;

use crate::attr::{Attribute, AttrValue};
use crate::class::Class;
use crate::pool::{output_order, Entry, PoolBuilder, Tag, ALL_TAGS};
use crate::result::Result;

/// A class's local constant pool: slot `0` is unused, double-word entries
/// (`Long`/`Double`) occupy two consecutive slots with the second left
/// `None`, and `[1..narrow_limit)` is the region every narrow `ldc` in
/// this class's bytecode resolves into (so it must fit in one byte).
#[derive(Debug, Clone, Default)]
pub struct LocalPool {
    slots: Vec<Option<Rc<Entry>>>,
    narrow_limit: usize,
}

impl LocalPool {
    pub fn get(&self, index: usize) -> Option<&Rc<Entry>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn narrow_limit(&self) -> usize {
        self.narrow_limit
    }

    pub fn index_of(&self, entry: &Rc<Entry>) -> Option<usize> {
        self.slots.iter().position(|s| s.as_ref().is_some_and(|e| Rc::ptr_eq(e, entry)))
    }
}

fn collect_attr_values(values: &[AttrValue], out: &mut Vec<Rc<Entry>>) {
    for v in values {
        match v {
            AttrValue::Int(_) => {}
            AttrValue::Ref(Some(e)) => out.push(e.clone()),
            AttrValue::Ref(None) => {}
            AttrValue::Seq(items) => collect_attr_values(items, out),
            AttrValue::Union { values, .. } => collect_attr_values(values, out),
        }
    }
}

fn collect_attributes(attrs: &[Attribute], out: &mut Vec<Rc<Entry>>) {
    for a in attrs {
        out.push(a.name.clone());
        collect_attr_values(&a.values, out);
    }
}

/// Every entry a class's own fields touch directly (before transitive
/// closure): `this`/`super`/interfaces, member descriptors, attribute
/// payloads, and (separately tracked) the narrow-`ldc` set.
fn seed_refs(class: &Class) -> (Vec<Rc<Entry>>, Vec<Rc<Entry>>) {
    let mut refs = vec![class.this_class().clone()];
    if let Some(s) = class.super_class() {
        refs.push(s.clone());
    }
    refs.extend(class.interfaces().iter().cloned());
    collect_attributes(class.attributes(), &mut refs);

    for f in class.fields() {
        refs.push(f.name().clone());
        refs.push(f.descriptor().clone());
        collect_attributes(f.attributes(), &mut refs);
    }

    let mut ldc_refs = Vec::new();
    for m in class.methods() {
        refs.push(m.name().clone());
        refs.push(m.descriptor().clone());
        collect_attributes(m.attributes(), &mut refs);
        if let Some(code) = m.code() {
            for h in code.handlers() {
                if let Some(ct) = &h.catch_type {
                    refs.push(ct.clone());
                }
            }
            collect_attributes(code.attributes(), &mut refs);
            for fx in code.fixups() {
                refs.push(fx.entry.clone());
            }
            ldc_refs.extend(code.ldc_refs().iter().cloned());
        }
    }

    for ic in class.inner_classes() {
        refs.push(ic.inner.clone());
        if let Some(o) = &ic.outer {
            refs.push(o.clone());
        }
        if let Some(n) = &ic.name {
            refs.push(n.clone());
        }
    }

    (refs, ldc_refs)
}

/// Completes `seed` into its full transitive closure under
/// `Entry::direct_refs`, additionally resolving an `InvokeDynamic`
/// entry's bootstrap-method index against the global pool (the index is
/// stored raw on the entry rather than as an `Rc`, so the walk needs
/// pool access to pull the referenced `BootstrapMethod` entry in).
fn transitive_closure(seed: Vec<Rc<Entry>>, pool: &PoolBuilder) -> Vec<Rc<Entry>> {
    let mut seen: HashMap<*const Entry, Rc<Entry>> = HashMap::new();
    let mut stack = seed;
    while let Some(e) = stack.pop() {
        let ptr = Rc::as_ptr(&e);
        if seen.contains_key(&ptr) {
            continue;
        }
        seen.insert(ptr, e.clone());
        stack.extend(e.direct_refs());
        if let Entry::InvokeDynamic { bootstrap_method, .. } = &*e {
            if let Some(bsm) = pool.get(Tag::BootstrapMethod, *bootstrap_method) {
                stack.push(bsm);
            }
        }
    }
    seen.into_values().collect()
}

/// Builds the index map the output-order comparator needs: each entry's
/// position within its tag's archive-wide list, restricted to entries
/// actually in this class's closure.
fn build_index_of(pool: &PoolBuilder, closure: &[Rc<Entry>]) -> HashMap<*const Entry, u32> {
    let wanted: std::collections::HashSet<*const Entry> = closure.iter().map(Rc::as_ptr).collect();
    let mut map = HashMap::new();
    for &tag in ALL_TAGS.iter() {
        for (i, e) in pool.entries(tag).iter().enumerate() {
            let ptr = Rc::as_ptr(e);
            if wanted.contains(&ptr) {
                map.insert(ptr, i as u32);
            }
        }
    }
    map
}

/// Lays `region` (already partitioned into narrow/wide) out in
/// output-order, interleaving a `None` placeholder after every
/// double-word entry, and appends the result onto `slots`.
fn layout_region(region: &mut [Rc<Entry>], index_of: &HashMap<*const Entry, u32>, slots: &mut Vec<Option<Rc<Entry>>>) {
    region.sort_by(|a, b| output_order(a, b, index_of));
    for e in region.iter() {
        let double = e.tag().is_double_word();
        slots.push(Some(e.clone()));
        if double {
            slots.push(None);
        }
    }
}

fn build_local_pool(closure: Vec<Rc<Entry>>, ldc_refs: &[Rc<Entry>], pool: &PoolBuilder) -> LocalPool {
    let index_of = build_index_of(pool, &closure);

    let narrow: std::collections::HashSet<*const Entry> = ldc_refs.iter().map(Rc::as_ptr).collect();
    let mut narrow_region: Vec<Rc<Entry>> = closure.iter().filter(|e| narrow.contains(&Rc::as_ptr(e))).cloned().collect();
    let mut wide_region: Vec<Rc<Entry>> = closure.iter().filter(|e| !narrow.contains(&Rc::as_ptr(e))).cloned().collect();

    let mut slots: Vec<Option<Rc<Entry>>> = vec![None]; // slot 0 unused
    layout_region(&mut narrow_region, &index_of, &mut slots);
    let narrow_limit = slots.len();
    layout_region(&mut wide_region, &index_of, &mut slots);

    LocalPool { slots, narrow_limit }
}

/// If this class's closure contains any `BootstrapMethod` entries,
/// synthesizes a `BootstrapMethods` attribute naming them (sorted by
/// natural entry order) plus the Utf8 name the attribute needs, and
/// pushes it onto the class.
fn synthesize_bootstrap_methods(class: &mut Class, closure: &[Rc<Entry>], pool: &mut PoolBuilder) {
    let mut bootstraps: Vec<Rc<Entry>> = closure.iter().filter(|e| e.tag() == Tag::BootstrapMethod).cloned().collect();
    if bootstraps.is_empty() {
        return;
    }
    bootstraps.sort_by_key(|e| e.spelling());
    let name = pool.intern(Entry::Utf8(Rc::from("BootstrapMethods")));
    let values = bootstraps
        .into_iter()
        .map(|bsm| {
            let (method, arguments) = match &*bsm {
                Entry::BootstrapMethod { method, arguments } => (method.clone(), arguments.clone()),
                _ => unreachable!("filtered to BootstrapMethod entries"),
            };
            AttrValue::Seq(vec![
                AttrValue::Ref(Some(method)),
                AttrValue::Seq(arguments.into_iter().map(|a| AttrValue::Ref(Some(a))).collect()),
            ])
        })
        .collect();
    class.push_attribute(Attribute {
        name,
        values: vec![AttrValue::Seq(values)],
    });
}

/// Runs the post-pass over every class in the archive: local CP
/// reconstruction, `BootstrapMethods` synthesis, and version folding
/// (spec.md §4.7). Must run after `class::read_classes` and before the
/// pool builder is frozen, since bootstrap-method synthesis interns a
/// new Utf8 name.
pub fn finalize(classes: &mut [Class], pool: &mut PoolBuilder, default_major: u16, default_minor: u16) -> Result<()> {
    for class in classes.iter_mut() {
        class.set_version(default_major, default_minor);

        let (seed, _) = seed_refs(class);
        let closure = transitive_closure(seed, pool);
        synthesize_bootstrap_methods(class, &closure, pool);

        // Re-derive: the synthesized attribute's own Utf8 name is only
        // reachable from the class now that the attribute is attached.
        let (seed, ldc_refs) = seed_refs(class);
        let closure = transitive_closure(seed, pool);

        let local_pool = build_local_pool(closure, &ldc_refs, pool);
        class.set_local_pool(local_pool);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::read_classes;
    use crate::coding::Coding;
    use std::io::Cursor;

    #[test]
    fn local_pool_places_class_entries_and_leaves_slot_zero_empty() {
        let mut pool = PoolBuilder::new();
        let a = pool.intern(Entry::Utf8(Rc::from("A")));
        let object = pool.intern(Entry::Utf8(Rc::from("java/lang/Object")));
        pool.intern(Entry::Class { name: a });
        pool.intern(Entry::Class { name: object });

        let mut bytes = vec![];
        bytes.extend(Coding::UNSIGNED5.encode_value(0));
        bytes.extend(Coding::UNSIGNED5.encode_value(1));
        bytes.extend(Coding::UNSIGNED5.encode_value(0));
        bytes.extend(Coding::UNSIGNED5.encode_value(0));
        bytes.extend(Coding::UNSIGNED5.encode_value(0));
        bytes.extend(Coding::UNSIGNED5.encode_value(0));

        let mut result = read_classes(&mut Cursor::new(bytes), 1, &mut pool, &[], &[], 52).unwrap();
        finalize(&mut result.classes, &mut pool, 52, 0).unwrap();

        let local = result.classes[0].local_pool().unwrap();
        assert!(local.get(0).is_none());
        assert!(local.len() > 1);
        assert!(local.index_of(result.classes[0].this_class()).is_some());
        assert_eq!(*result.classes[0].major_version(), 52);
    }

    #[test]
    fn double_word_constant_value_entry_is_followed_by_null_slot() {
        let mut pool = PoolBuilder::new();
        let a = pool.intern(Entry::Utf8(Rc::from("A")));
        let object = pool.intern(Entry::Utf8(Rc::from("java/lang/Object")));
        pool.intern(Entry::Class { name: a });
        pool.intern(Entry::Class { name: object });
        pool.intern(Entry::Utf8(Rc::from("x"))); // field name, Utf8 idx 2
        let form = pool.intern(Entry::Utf8(Rc::from("J"))); // Utf8 idx 3
        pool.intern(Entry::Signature { form, classes: vec![] }); // Signature idx 0
        let long_entry = pool.intern(Entry::Long(42));

        let mut bytes = vec![];
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // class_this = Class[0] "A"
        bytes.extend(Coding::UNSIGNED5.encode_value(1)); // class_super = Class[1] "Object"
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // class_interface_count
        bytes.extend(Coding::UNSIGNED5.encode_value(1)); // class_field_count
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // class_method_count
        bytes.extend(Coding::UNSIGNED5.encode_value(2)); // field_descr_name -> Utf8[2] "x"
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // field_descr_signature -> Signature[0]
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // class flags_lo (no attrs)
        bytes.extend(Coding::UNSIGNED5.encode_value(1 << 16)); // field flags_lo: claims ConstantValue
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // field_ConstantValue -> Long[0]
        // method/code-context bands all empty (0 holders)

        let mut result = read_classes(&mut Cursor::new(bytes), 1, &mut pool, &[], &[], 52).unwrap();
        finalize(&mut result.classes, &mut pool, 52, 0).unwrap();

        let local = result.classes[0].local_pool().unwrap();
        let idx = local.index_of(&long_entry).expect("Long entry reachable via ConstantValue");
        assert!(local.get(idx + 1).is_none());
    }
}
