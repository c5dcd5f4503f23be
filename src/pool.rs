//! Component D: the constant-pool store. Every entry is interned behind an
//! `Rc` handle and compared structurally; tags are read in a fixed order
//! (spec.md §9) so a `Class` can reference a `Utf8` that has already been
//! fully constructed even though, in the output class file, `Signature`
//! entries look like they point forward through `Class` to `Utf8` again —
//! there are no true cycles, only a layered build order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// The sixteen constant-pool tag families named in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    String,
    Class,
    Signature,
    NameAndType,
    Fieldref,
    Methodref,
    InterfaceMethodref,
    MethodHandle,
    MethodType,
    InvokeDynamic,
    BootstrapMethod,
}

/// Every tag family, in the archive order `cpreader` reads them — used by
/// the post-pass reachability walk to build a global index map.
pub const ALL_TAGS: [Tag; 16] = [
    Tag::Utf8,
    Tag::Integer,
    Tag::Float,
    Tag::Long,
    Tag::Double,
    Tag::String,
    Tag::Class,
    Tag::Signature,
    Tag::NameAndType,
    Tag::Fieldref,
    Tag::Methodref,
    Tag::InterfaceMethodref,
    Tag::MethodHandle,
    Tag::MethodType,
    Tag::InvokeDynamic,
    Tag::BootstrapMethod,
];

impl Tag {
    /// Tags introduced in class-file version 7.0 or later (`MethodHandle`,
    /// `MethodType`, `InvokeDynamic`) or with invokedynamic's 8.0
    /// `BootstrapMethod` companion — used by the legacy-version guard in
    /// `header.rs`.
    pub fn min_major_version(self) -> u16 {
        match self {
            Tag::MethodHandle | Tag::MethodType | Tag::InvokeDynamic | Tag::BootstrapMethod => 51,
            _ => 45,
        }
    }

    /// `Long` and `Double` occupy two slots in an output constant pool.
    pub fn is_double_word(self) -> bool {
        matches!(self, Tag::Long | Tag::Double)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodHandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

/// A constant-pool entry. Compound entries hold `Rc` handles to their
/// referents rather than indices, so once built a class's bytecode and
/// attributes can walk straight to the referenced entry without a second
/// pool lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Utf8(Rc<str>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String {
        utf8: Rc<Entry>,
    },
    Class {
        name: Rc<Entry>,
    },
    /// `form` is the erased Utf8 descriptor; `classes` are the `Class`
    /// entries inserted at each `L...;` marker, in order. Erases to a
    /// plain Utf8 in output (spec.md §3).
    Signature {
        form: Rc<Entry>,
        classes: Vec<Rc<Entry>>,
    },
    NameAndType {
        name: Rc<Entry>,
        descriptor: Rc<Entry>,
    },
    Fieldref {
        class: Rc<Entry>,
        name_and_type: Rc<Entry>,
    },
    Methodref {
        class: Rc<Entry>,
        name_and_type: Rc<Entry>,
    },
    InterfaceMethodref {
        class: Rc<Entry>,
        name_and_type: Rc<Entry>,
    },
    MethodHandle {
        kind: MethodHandleKind,
        reference: Rc<Entry>,
    },
    MethodType {
        descriptor: Rc<Entry>,
    },
    InvokeDynamic {
        bootstrap_method: u32,
        name_and_type: Rc<Entry>,
    },
    BootstrapMethod {
        method: Rc<Entry>,
        arguments: Vec<Rc<Entry>>,
    },
}

impl Entry {
    pub fn tag(&self) -> Tag {
        match self {
            Entry::Utf8(_) => Tag::Utf8,
            Entry::Integer(_) => Tag::Integer,
            Entry::Float(_) => Tag::Float,
            Entry::Long(_) => Tag::Long,
            Entry::Double(_) => Tag::Double,
            Entry::String { .. } => Tag::String,
            Entry::Class { .. } => Tag::Class,
            Entry::Signature { .. } => Tag::Signature,
            Entry::NameAndType { .. } => Tag::NameAndType,
            Entry::Fieldref { .. } => Tag::Fieldref,
            Entry::Methodref { .. } => Tag::Methodref,
            Entry::InterfaceMethodref { .. } => Tag::InterfaceMethodref,
            Entry::MethodHandle { .. } => Tag::MethodHandle,
            Entry::MethodType { .. } => Tag::MethodType,
            Entry::InvokeDynamic { .. } => Tag::InvokeDynamic,
            Entry::BootstrapMethod { .. } => Tag::BootstrapMethod,
        }
    }

    /// A stable textual key used for ordering entries that lack an output
    /// index (§4.7's comparator) and for the `utf8_signatures` side map.
    pub fn spelling(&self) -> String {
        match self {
            Entry::Utf8(s) => s.to_string(),
            Entry::Integer(v) => v.to_string(),
            Entry::Float(v) => v.to_string(),
            Entry::Long(v) => v.to_string(),
            Entry::Double(v) => v.to_string(),
            Entry::String { utf8 } => utf8.spelling(),
            Entry::Class { name } => name.spelling(),
            Entry::Signature { form, .. } => form.spelling(),
            Entry::NameAndType { name, descriptor } => format!("{}:{}", name.spelling(), descriptor.spelling()),
            Entry::Fieldref { class, name_and_type }
            | Entry::Methodref { class, name_and_type }
            | Entry::InterfaceMethodref { class, name_and_type } => {
                format!("{}.{}", class.spelling(), name_and_type.spelling())
            }
            Entry::MethodHandle { kind, reference } => format!("{:?}:{}", kind, reference.spelling()),
            Entry::MethodType { descriptor } => descriptor.spelling(),
            Entry::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => format!("#{}:{}", bootstrap_method, name_and_type.spelling()),
            Entry::BootstrapMethod { method, arguments } => {
                format!("{}({})", method.spelling(), arguments.len())
            }
        }
    }

    /// Every entry this one directly references, used by the post-pass
    /// reachability walk (§4.7).
    pub fn direct_refs(&self) -> Vec<Rc<Entry>> {
        match self {
            Entry::Utf8(_) | Entry::Integer(_) | Entry::Float(_) | Entry::Long(_) | Entry::Double(_) => vec![],
            Entry::String { utf8 } => vec![utf8.clone()],
            Entry::Class { name } => vec![name.clone()],
            Entry::Signature { form, classes } => {
                let mut v = vec![form.clone()];
                v.extend(classes.iter().cloned());
                v
            }
            Entry::NameAndType { name, descriptor } => vec![name.clone(), descriptor.clone()],
            Entry::Fieldref { class, name_and_type }
            | Entry::Methodref { class, name_and_type }
            | Entry::InterfaceMethodref { class, name_and_type } => vec![class.clone(), name_and_type.clone()],
            Entry::MethodHandle { reference, .. } => vec![reference.clone()],
            Entry::MethodType { descriptor } => vec![descriptor.clone()],
            Entry::InvokeDynamic { name_and_type, .. } => vec![name_and_type.clone()],
            Entry::BootstrapMethod { method, arguments } => {
                let mut v = vec![method.clone()];
                v.extend(arguments.iter().cloned());
                v
            }
        }
    }
}

/// Interning registry: structurally-equal entries share one `Rc`
/// allocation. Populated in tag order by `cpreader`, then frozen into
/// per-tag vectors for `RefBand` resolution.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    by_tag: HashMap<Tag, Vec<Rc<Entry>>>,
    interned: HashMap<Entry, Rc<Entry>>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `entry`, appends it to its tag's ordered list (archive
    /// order, which is also output order for the global pool), and
    /// returns the shared handle.
    pub fn intern(&mut self, entry: Entry) -> Rc<Entry> {
        if let Some(existing) = self.interned.get(&entry) {
            return existing.clone();
        }
        let tag = entry.tag();
        let rc = Rc::new(entry);
        self.interned.insert((*rc).clone(), rc.clone());
        self.by_tag.entry(tag).or_default().push(rc.clone());
        rc
    }

    pub fn get(&self, tag: Tag, index: u32) -> Option<Rc<Entry>> {
        self.by_tag.get(&tag)?.get(index as usize).cloned()
    }

    pub fn count(&self, tag: Tag) -> usize {
        self.by_tag.get(&tag).map_or(0, Vec::len)
    }

    pub fn entries(&self, tag: Tag) -> &[Rc<Entry>] {
        self.by_tag.get(&tag).map_or(&[], Vec::as_slice)
    }

    pub fn finish(self) -> Pool {
        Pool { by_tag: self.by_tag }
    }
}

/// The frozen, archive-wide constant pool.
#[derive(Debug, Default)]
pub struct Pool {
    by_tag: HashMap<Tag, Vec<Rc<Entry>>>,
}

impl Pool {
    pub fn get(&self, tag: Tag, index: u32) -> Option<Rc<Entry>> {
        self.by_tag.get(&tag)?.get(index as usize).cloned()
    }

    pub fn count(&self, tag: Tag) -> usize {
        self.by_tag.get(&tag).map_or(0, Vec::len)
    }

    pub fn entries(&self, tag: Tag) -> &[Rc<Entry>] {
        self.by_tag.get(&tag).map_or(&[], Vec::as_slice)
    }
}

/// Output-order comparator for a class's local CP map (spec.md §4.7):
/// entries with a known output index sort by that index; entries without
/// one sort by `(tag, spelling)`; an indexed entry always precedes an
/// unindexed one.
pub fn output_order(
    a: &Rc<Entry>,
    b: &Rc<Entry>,
    index_of: &HashMap<*const Entry, u32>,
) -> Ordering {
    let ia = index_of.get(&(Rc::as_ptr(a) as *const Entry));
    let ib = index_of.get(&(Rc::as_ptr(b) as *const Entry));
    match (ia, ib) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => (a.tag(), a.spelling()).cmp(&(b.tag(), b.spelling())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_shares_handles() {
        let mut pool = PoolBuilder::new();
        let a = pool.intern(Entry::Utf8(Rc::from("hello")));
        let b = pool.intern(Entry::Utf8(Rc::from("hello")));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.count(Tag::Utf8), 1);
    }

    #[test]
    fn distinct_entries_get_distinct_slots() {
        let mut pool = PoolBuilder::new();
        pool.intern(Entry::Utf8(Rc::from("a")));
        pool.intern(Entry::Utf8(Rc::from("b")));
        assert_eq!(pool.count(Tag::Utf8), 2);
        assert_eq!(pool.get(Tag::Utf8, 0).unwrap().spelling(), "a");
        assert_eq!(pool.get(Tag::Utf8, 1).unwrap().spelling(), "b");
    }
}
