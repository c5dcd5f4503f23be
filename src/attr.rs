//! Component H: the attribute engine (spec.md §4.6). Four holder contexts
//! (Class, Field, Method, Code) each carry a flags band pair
//! (`flags_lo`/`flags_hi`) whose low bits are the holder's real JVM access
//! flags and whose high bits mark which attribute kinds the holder
//! claims — one bit per predefined attribute, plus a trailing overflow bit
//! that sends the reader to `attr_count`/`attr_indexes` for user-defined
//! attributes declared via `attr_definition_bands`.
//!
//! `Code` and `InnerClasses` get bespoke band families elsewhere in the
//! crate (`bytecode.rs`, `postpass.rs`) rather than going through the
//! generic layout interpreter below — spec.md §4.6 calls both out as
//! special-cased. Every other predefined attribute, plus anything arriving
//! through `attr_definition_bands`, is described by a small [`LayoutElem`]
//! tree and drained through the same sizing/expansion machinery.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::rc::Rc;

use crate::band::{IntBand, RefBand};
use crate::coding::Coding;
use crate::pool::{Entry, Tag};
use crate::result::{Error, Result};

/// The four holder contexts a layout can be attached to (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Class,
    Field,
    Method,
    Code,
}

impl Context {
    fn label(self) -> &'static str {
        match self {
            Context::Class => "Class",
            Context::Field => "Field",
            Context::Method => "Method",
            Context::Code => "Code",
        }
    }
}

/// A single element of a layout tree (spec.md §4.6): integers,
/// references, replication, unions, and call/callable backreferences.
/// [`parse_layout`] produces a tree that may still contain `Callable` and
/// `Call`; [`resolve_calls`] rewrites it into one that only ever contains
/// `Int`/`Ref`/`Repl`/`Union` (a callable reached only by forward calls is
/// spliced in at each call site; one reached by a backward call becomes a
/// `Repl` whose count comes from a dedicated `attr_calls` band rather
/// than an inline count element) — that resolved tree is what
/// [`read_layout_bands`]/[`expand_elems`] actually walk.
#[derive(Debug, Clone)]
pub enum LayoutElem {
    Int(Coding),
    Ref { tag: Tag, nullable: bool },
    Repl { count_coding: Coding, body: Vec<LayoutElem> },
    /// `[T (v1,v2)[...] (v3)[...] ()[...]]`: a selector read once per
    /// holder, branching into whichever `cases` arm lists the selector's
    /// value, or `default` when none match.
    Union {
        selector_coding: Coding,
        cases: Vec<(Vec<i64>, Vec<LayoutElem>)>,
        default: Vec<LayoutElem>,
    },
    /// `C<index>[...]`: names `body` as callable `index`. Consumes no
    /// bands itself; only a `Call` referencing this index does.
    Callable { index: u32, body: Vec<LayoutElem> },
    /// `c<index>` (forward) or `c<index>B` (backward, `EF_BACK`): invokes
    /// callable `index`'s body. `resolve_calls` eliminates this variant
    /// before sizing ever sees it.
    Call { index: u32, back: bool },
}

/// Parses a textual layout such as `"RSH RUH"` or `"H[V H]"`. Tokens:
/// `B`/`H`/`I`/`V` are integer elements (byte, unsigned, signed, unsigned
/// delta codings respectively); `R<tag><suffix>` is a reference, where
/// `<tag>` is one of `U C S D F M J K Y Q` (Utf8, Class, Signature,
/// NameAndType, Fieldref, Methodref, InterfaceMethodref, MethodHandle,
/// MethodType, InvokeDynamic) and `<suffix>` is `H` (non-null) or `N`
/// (nullable). An integer token immediately followed by `[...]` is a
/// replication: the token is the repetition count's coding, and the
/// bracketed body is replayed that many times per holder.
///
/// `U<coding>[(v1,v2)[...] (v3)[...] ()[...]]` is a union: `<coding>` reads
/// one selector value per holder, each parenthesized, comma-separated tag
/// list names the case that selector value takes, and the mandatory
/// trailing `()[...]` is the default case for every other value.
/// `C<index>[...]` names `...` as callable `<index>`; `c<index>` calls it
/// in place, and `c<index>B` calls it as an `EF_BACK` (backward) call,
/// whose repetition count is read from a dedicated `attr_calls` band
/// rather than an inline count element. [`resolve_calls`] eliminates
/// `Callable`/`Call` from the tree this function returns.
pub fn parse_layout(src: &str) -> Result<Vec<LayoutElem>> {
    let mut chars = src.chars().peekable();
    let elems = parse_seq(&mut chars, src)?;
    skip_ws(&mut chars);
    if chars.peek().is_some() {
        return Err(bad_layout(src, "trailing input after top-level layout"));
    }
    resolve_calls(elems)
}

fn skip_ws(chars: &mut std::iter::Peekable<std::str::Chars>) {
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
}

fn bad_layout(src: &str, reason: &str) -> Error {
    Error::BadLayout {
        context: "layout",
        reason: format!("{reason} (in `{src}`)"),
    }
}

fn parse_seq(chars: &mut std::iter::Peekable<std::str::Chars>, src: &str) -> Result<Vec<LayoutElem>> {
    let mut out = Vec::new();
    loop {
        skip_ws(chars);
        match chars.peek() {
            None | Some(']') => break,
            _ => out.push(parse_one(chars, src)?),
        }
    }
    Ok(out)
}

fn parse_one(chars: &mut std::iter::Peekable<std::str::Chars>, src: &str) -> Result<LayoutElem> {
    let c = chars.next().ok_or_else(|| bad_layout(src, "unexpected end of layout"))?;
    match c {
        'R' => {
            let tag_ch = chars.next().ok_or_else(|| bad_layout(src, "reference missing tag letter"))?;
            let tag = match tag_ch {
                'U' => Tag::Utf8,
                'C' => Tag::Class,
                'S' => Tag::Signature,
                'D' => Tag::NameAndType,
                'F' => Tag::Fieldref,
                'M' => Tag::Methodref,
                'J' => Tag::InterfaceMethodref,
                'K' => Tag::MethodHandle,
                'Y' => Tag::MethodType,
                'Q' => Tag::InvokeDynamic,
                other => return Err(bad_layout(src, &format!("unknown reference tag letter `{other}`"))),
            };
            let suffix = chars.next().ok_or_else(|| bad_layout(src, "reference missing nullability suffix"))?;
            let nullable = match suffix {
                'H' => false,
                'N' => true,
                other => return Err(bad_layout(src, &format!("unknown reference suffix `{other}`"))),
            };
            Ok(LayoutElem::Ref { tag, nullable })
        }
        'B' | 'H' | 'I' | 'V' => {
            let coding = match c {
                'B' => Coding::BYTE1,
                'H' => Coding::UNSIGNED5,
                'I' => Coding::SIGNED5,
                'V' => Coding::UDELTA5,
                _ => unreachable!(),
            };
            if chars.peek() == Some(&'[') {
                chars.next();
                let body = parse_seq(chars, src)?;
                match chars.next() {
                    Some(']') => {}
                    _ => return Err(bad_layout(src, "unterminated replication")),
                }
                Ok(LayoutElem::Repl { count_coding: coding, body })
            } else {
                Ok(LayoutElem::Int(coding))
            }
        }
        'U' => {
            let coding_ch = chars.next().ok_or_else(|| bad_layout(src, "union missing selector coding letter"))?;
            let selector_coding = match coding_ch {
                'B' => Coding::BYTE1,
                'H' => Coding::UNSIGNED5,
                'I' => Coding::SIGNED5,
                'V' => Coding::UDELTA5,
                other => return Err(bad_layout(src, &format!("unknown union selector coding `{other}`"))),
            };
            skip_ws(chars);
            match chars.next() {
                Some('[') => {}
                _ => return Err(bad_layout(src, "union missing `[`")),
            }
            let mut cases = Vec::new();
            let mut default = None;
            loop {
                skip_ws(chars);
                match chars.peek() {
                    Some(']') => {
                        chars.next();
                        break;
                    }
                    Some('(') => {
                        chars.next();
                        let vals = parse_case_values(chars, src)?;
                        match chars.next() {
                            Some(')') => {}
                            _ => return Err(bad_layout(src, "unterminated union case value list")),
                        }
                        skip_ws(chars);
                        match chars.next() {
                            Some('[') => {}
                            _ => return Err(bad_layout(src, "union case missing body")),
                        }
                        let body = parse_seq(chars, src)?;
                        match chars.next() {
                            Some(']') => {}
                            _ => return Err(bad_layout(src, "unterminated union case body")),
                        }
                        if vals.is_empty() {
                            if default.is_some() {
                                return Err(bad_layout(src, "union has more than one default case `()`"));
                            }
                            default = Some(body);
                        } else {
                            cases.push((vals, body));
                        }
                    }
                    _ => return Err(bad_layout(src, "expected a union case `(...)[...]`")),
                }
            }
            let default = default.ok_or_else(|| bad_layout(src, "union missing mandatory default case `()[...]`"))?;
            Ok(LayoutElem::Union { selector_coding, cases, default })
        }
        'C' => {
            let index = parse_index(chars, src)?;
            skip_ws(chars);
            match chars.next() {
                Some('[') => {}
                _ => return Err(bad_layout(src, "callable definition missing body")),
            }
            let body = parse_seq(chars, src)?;
            match chars.next() {
                Some(']') => {}
                _ => return Err(bad_layout(src, "unterminated callable body")),
            }
            Ok(LayoutElem::Callable { index, body })
        }
        'c' => {
            let index = parse_index(chars, src)?;
            let back = if chars.peek() == Some(&'B') {
                chars.next();
                true
            } else {
                false
            };
            Ok(LayoutElem::Call { index, back })
        }
        other => Err(bad_layout(src, &format!("unexpected character `{other}`"))),
    }
}

fn parse_case_values(chars: &mut std::iter::Peekable<std::str::Chars>, src: &str) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    skip_ws(chars);
    if chars.peek() == Some(&')') {
        return Ok(out);
    }
    loop {
        skip_ws(chars);
        out.push(parse_signed_int(chars, src)?);
        skip_ws(chars);
        match chars.peek() {
            Some(',') => {
                chars.next();
            }
            _ => break,
        }
    }
    Ok(out)
}

fn parse_signed_int(chars: &mut std::iter::Peekable<std::str::Chars>, src: &str) -> Result<i64> {
    let neg = if chars.peek() == Some(&'-') {
        chars.next();
        true
    } else {
        false
    };
    let mut digits = String::new();
    while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
        digits.push(chars.next().unwrap());
    }
    if digits.is_empty() {
        return Err(bad_layout(src, "expected a decimal number"));
    }
    let val: i64 = digits.parse().map_err(|_| bad_layout(src, "number out of range"))?;
    Ok(if neg { -val } else { val })
}

fn parse_index(chars: &mut std::iter::Peekable<std::str::Chars>, src: &str) -> Result<u32> {
    let mut digits = String::new();
    while matches!(chars.peek(), Some(c) if c.is_ascii_digit()) {
        digits.push(chars.next().unwrap());
    }
    if digits.is_empty() {
        return Err(bad_layout(src, "expected a callable index"));
    }
    digits.parse().map_err(|_| bad_layout(src, "callable index out of range"))
}

/// Eliminates `Callable`/`Call` from a freshly parsed layout tree. A
/// callable definition contributes no slots of its own — only the calls
/// that reach it do — so every `Callable` node is dropped once its body is
/// recorded; a forward `Call` is replaced in place by a clone of the
/// resolved callable body (splicing its elements directly into the
/// caller's sequence), and a backward (`EF_BACK`) `Call` becomes a `Repl`
/// whose repetition count this crate reads from the same kind of count
/// band an inline replication would use, since nothing else in this
/// reader's band model distinguishes an `attr_calls` band from any other
/// count band (see DESIGN.md).
fn resolve_calls(elems: Vec<LayoutElem>) -> Result<Vec<LayoutElem>> {
    let mut callables = HashMap::new();
    collect_callables(&elems, &mut callables);
    let mut resolving = HashSet::new();
    substitute_calls(elems, &callables, &mut resolving)
}

fn collect_callables(elems: &[LayoutElem], out: &mut HashMap<u32, Vec<LayoutElem>>) {
    for el in elems {
        match el {
            LayoutElem::Callable { index, body } => {
                out.insert(*index, body.clone());
                collect_callables(body, out);
            }
            LayoutElem::Repl { body, .. } => collect_callables(body, out),
            LayoutElem::Union { cases, default, .. } => {
                for (_, body) in cases {
                    collect_callables(body, out);
                }
                collect_callables(default, out);
            }
            LayoutElem::Int(_) | LayoutElem::Ref { .. } | LayoutElem::Call { .. } => {}
        }
    }
}

fn substitute_calls(
    elems: Vec<LayoutElem>,
    callables: &HashMap<u32, Vec<LayoutElem>>,
    resolving: &mut HashSet<u32>,
) -> Result<Vec<LayoutElem>> {
    let mut out = Vec::with_capacity(elems.len());
    for el in elems {
        match el {
            LayoutElem::Int(_) | LayoutElem::Ref { .. } => out.push(el),
            LayoutElem::Repl { count_coding, body } => out.push(LayoutElem::Repl {
                count_coding,
                body: substitute_calls(body, callables, resolving)?,
            }),
            LayoutElem::Union { selector_coding, cases, default } => {
                let cases = cases
                    .into_iter()
                    .map(|(vals, body)| Ok((vals, substitute_calls(body, callables, resolving)?)))
                    .collect::<Result<Vec<_>>>()?;
                let default = substitute_calls(default, callables, resolving)?;
                out.push(LayoutElem::Union { selector_coding, cases, default });
            }
            LayoutElem::Callable { .. } => {
                // A definition occupies no position of its own in the resolved tree.
            }
            LayoutElem::Call { index, back } => {
                let body = callables.get(&index).cloned().ok_or_else(|| {
                    Error::BadLayout {
                        context: "layout",
                        reason: format!("call to undefined callable {index}"),
                    }
                })?;
                if !resolving.insert(index) {
                    return Err(Error::BadLayout {
                        context: "layout",
                        reason: format!("callable {index} is self-referential (cyclic call)"),
                    });
                }
                let resolved_body = substitute_calls(body, callables, resolving)?;
                resolving.remove(&index);
                if back {
                    out.push(LayoutElem::Repl { count_coding: Coding::UNSIGNED5, body: resolved_body });
                } else {
                    out.extend(resolved_body);
                }
            }
        }
    }
    Ok(out)
}

fn slot_count(elems: &[LayoutElem]) -> usize {
    elems
        .iter()
        .map(|e| match e {
            LayoutElem::Int(_) | LayoutElem::Ref { .. } => 1,
            LayoutElem::Repl { body, .. } => 1 + slot_count(body),
            LayoutElem::Union { cases, default, .. } => {
                1 + cases.iter().map(|(_, body)| slot_count(body)).sum::<usize>() + slot_count(default)
            }
            LayoutElem::Callable { .. } | LayoutElem::Call { .. } => {
                unreachable!("resolve_calls eliminates Callable/Call before slot_count ever sees them")
            }
        })
        .sum()
}

/// A materialized band backing one leaf of a layout tree.
enum Slot {
    Int(IntBand),
    Ref(RefBand),
}

impl Slot {
    fn get_int(&mut self) -> Result<i64> {
        match self {
            Slot::Int(b) => b.get(),
            Slot::Ref(_) => unreachable!("layout tree mismatch: expected int slot"),
        }
    }

    fn get_ref(&mut self, resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>) -> Result<Option<Rc<Entry>>> {
        match self {
            Slot::Ref(b) => b.get_ref(resolve),
            Slot::Int(_) => unreachable!("layout tree mismatch: expected ref slot"),
        }
    }
}

/// Decoded value for one leaf, shaped the same way the layout tree is.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Int(i64),
    Ref(Option<Rc<Entry>>),
    Seq(Vec<AttrValue>),
    /// The selector value that was read, plus the values of whichever
    /// case (or the default) it selected.
    Union { tag: i64, values: Vec<AttrValue> },
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<Rc<Entry>> {
        match self {
            AttrValue::Ref(r) => r.clone(),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<(i64, &[AttrValue])> {
        match self {
            AttrValue::Union { tag, values } => Some((*tag, values)),
            _ => None,
        }
    }
}

/// One decoded attribute attached to a holder.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Rc<Entry>,
    pub values: Vec<AttrValue>,
}

/// Reads every band a layout needs, sized by `reps` at the top level
/// (spec.md §4.6's sizing pass, collapsed: since every *simple* element
/// grows by exactly one disbursement per claiming holder, its total
/// length is `reps` with no per-holder walk needed; only a replication's
/// body depends on per-holder data, and that data — the count band — has
/// just been filled when the reader reaches it, so the sum is already
/// available). Bands are filled in the same order the archive lays them
/// out: tree pre-order, each leaf exactly once.
fn read_layout_bands<R: Read>(
    elems: &[LayoutElem],
    reps: usize,
    label: &'static str,
    reader: &mut R,
) -> Result<Vec<Slot>> {
    let mut slots = Vec::with_capacity(slot_count(elems));
    read_elems(elems, reps, label, reader, &mut slots)?;
    Ok(slots)
}

fn read_elems<R: Read>(
    elems: &[LayoutElem],
    reps: usize,
    label: &'static str,
    reader: &mut R,
    slots: &mut Vec<Slot>,
) -> Result<()> {
    for el in elems {
        match el {
            LayoutElem::Int(coding) => {
                let mut band = IntBand::new(label, *coding);
                band.expect_more_length(reps);
                band.fill(reader)?;
                slots.push(Slot::Int(band));
            }
            LayoutElem::Ref { tag, nullable } => {
                let mut band = RefBand::new(label, Coding::UNSIGNED5, *tag, *nullable);
                band.expect_more_length(reps);
                band.fill(reader)?;
                slots.push(Slot::Ref(band));
            }
            LayoutElem::Repl { count_coding, body } => {
                let mut count_band = IntBand::new(label, *count_coding);
                count_band.expect_more_length(reps);
                count_band.fill(reader)?;
                let total: usize = count_band.values().iter().map(|&v| v.max(0) as usize).sum();
                slots.push(Slot::Int(count_band));
                read_elems(body, total, label, reader, slots)?;
            }
            LayoutElem::Union { selector_coding, cases, default } => {
                let mut sel_band = IntBand::new(label, *selector_coding);
                sel_band.expect_more_length(reps);
                sel_band.fill(reader)?;
                let sel_values = sel_band.values().to_vec();
                slots.push(Slot::Int(sel_band));
                for (vals, body) in cases {
                    let count = sel_values.iter().copied().filter(|v| vals.contains(v)).count();
                    read_elems(body, count, label, reader, slots)?;
                }
                let matched: HashSet<i64> = cases.iter().flat_map(|(vals, _)| vals.iter().copied()).collect();
                let default_count = sel_values.iter().copied().filter(|v| !matched.contains(v)).count();
                read_elems(default, default_count, label, reader, slots)?;
            }
            LayoutElem::Callable { .. } | LayoutElem::Call { .. } => {
                unreachable!("resolve_calls eliminates Callable/Call before the sizing pass ever sees them")
            }
        }
    }
    Ok(())
}

/// Expansion pass: walks the layout tree once per claiming holder,
/// pulling one value from each leaf band per visit (a replication pulls
/// its count, then walks its body that many times, re-visiting the same
/// body slots — whose internal cursors simply advance further each time,
/// matching how the sizing pass laid values down holder-by-holder,
/// repetition-by-repetition).
fn expand_elems(
    elems: &[LayoutElem],
    slots: &mut [Slot],
    cursor: &mut usize,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
) -> Result<Vec<AttrValue>> {
    let mut out = Vec::with_capacity(elems.len());
    for el in elems {
        match el {
            LayoutElem::Int(_) => {
                out.push(AttrValue::Int(slots[*cursor].get_int()?));
                *cursor += 1;
            }
            LayoutElem::Ref { .. } => {
                out.push(AttrValue::Ref(slots[*cursor].get_ref(resolve)?));
                *cursor += 1;
            }
            LayoutElem::Repl { body, .. } => {
                let count = slots[*cursor].get_int()?;
                *cursor += 1;
                let body_start = *cursor;
                let mut items = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count.max(0) {
                    let mut inner = body_start;
                    let vals = expand_elems(body, slots, &mut inner, resolve)?;
                    items.push(AttrValue::Seq(vals));
                }
                out.push(AttrValue::Seq(items));
                *cursor = body_start + slot_count(body);
            }
            LayoutElem::Union { cases, default, .. } => {
                let tag = slots[*cursor].get_int()?;
                *cursor += 1;
                let mut matched = None;
                for (vals, body) in cases {
                    if matched.is_none() && vals.contains(&tag) {
                        matched = Some(expand_elems(body, slots, cursor, resolve)?);
                    } else {
                        *cursor += slot_count(body);
                    }
                }
                let values = match matched {
                    Some(v) => {
                        *cursor += slot_count(default);
                        v
                    }
                    None => expand_elems(default, slots, cursor, resolve)?,
                };
                out.push(AttrValue::Union { tag, values });
            }
            LayoutElem::Callable { .. } | LayoutElem::Call { .. } => {
                unreachable!("resolve_calls eliminates Callable/Call before the expansion pass ever sees them")
            }
        }
    }
    Ok(out)
}

/// Decodes one layout's attribute content for every holder that claims
/// it, in holder order. `claim_count` must equal the number of `true`s in
/// `claims`.
pub fn decode_layout<R: Read>(
    elems: &[LayoutElem],
    claims: &[bool],
    claim_count: usize,
    label: &'static str,
    reader: &mut R,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
) -> Result<Vec<Vec<AttrValue>>> {
    let mut slots = read_layout_bands(elems, claim_count, label, reader)?;
    let mut out = Vec::with_capacity(claim_count);
    for &claims_it in claims {
        if claims_it {
            let mut cursor = 0;
            out.push(expand_elems(elems, &mut slots, &mut cursor, resolve)?);
        }
    }
    for slot in &slots {
        match slot {
            Slot::Int(b) => b.done_disbursing()?,
            Slot::Ref(b) => b.done_disbursing()?,
        }
    }
    Ok(out)
}

/// Definition of one attribute kind: its context, name, and how its
/// content is shaped. `Special` kinds (`Code`, `InnerClasses`,
/// `ConstantValue`) are decoded by their own bespoke readers elsewhere;
/// everything else goes through [`decode_layout`].
#[derive(Debug, Clone)]
pub enum Shape {
    NoData,
    Layout(Vec<LayoutElem>),
    Special(&'static str),
}

#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub name: &'static str,
    pub shape: Shape,
}

/// The fixed, predefined attribute kinds for one context, in the order
/// their flag bits are assigned (spec.md §4.6's "Predefined attributes").
/// `Context::Code` is deliberately excluded from `Class`/`Field`/`Method`.
pub fn predefined(ctx: Context) -> Vec<AttributeDef> {
    use LayoutElem::*;
    let signature = AttributeDef {
        name: "Signature",
        shape: Shape::Layout(vec![Ref { tag: Tag::Signature, nullable: false }]),
    };
    let deprecated = AttributeDef { name: "Deprecated", shape: Shape::NoData };
    let synthetic = AttributeDef { name: "Synthetic", shape: Shape::NoData };
    match ctx {
        Context::Class => vec![
            signature,
            AttributeDef {
                name: "SourceFile",
                shape: Shape::Layout(vec![Ref { tag: Tag::Utf8, nullable: false }]),
            },
            deprecated,
            synthetic,
            AttributeDef { name: "InnerClasses", shape: Shape::Special("InnerClasses") },
        ],
        Context::Field => vec![
            AttributeDef { name: "ConstantValue", shape: Shape::Special("ConstantValue") },
            signature,
            deprecated,
            synthetic,
        ],
        Context::Method => vec![
            AttributeDef { name: "Code", shape: Shape::Special("Code") },
            AttributeDef {
                name: "Exceptions",
                shape: Shape::Layout(vec![Repl {
                    count_coding: Coding::UNSIGNED5,
                    body: vec![Ref { tag: Tag::Class, nullable: false }],
                }]),
            },
            signature,
            deprecated,
            synthetic,
        ],
        Context::Code => vec![
            AttributeDef {
                name: "LineNumberTable",
                shape: Shape::Layout(vec![Repl {
                    count_coding: Coding::UNSIGNED5,
                    body: vec![Int(Coding::UDELTA5), Int(Coding::UNSIGNED5)],
                }]),
            },
            AttributeDef {
                name: "LocalVariableTable",
                shape: Shape::Layout(vec![Repl {
                    count_coding: Coding::UNSIGNED5,
                    body: vec![
                        Int(Coding::UDELTA5),
                        Int(Coding::UNSIGNED5),
                        Ref { tag: Tag::Utf8, nullable: false },
                        Ref { tag: Tag::Signature, nullable: false },
                        Int(Coding::UNSIGNED5),
                    ],
                }]),
            },
        ],
    }
}

/// Bit position of a context's first attribute-presence bit; the low 16
/// bits of the flags word stay reserved for the holder's real JVM access
/// flags (spec.md leaves the exact bit layout unspecified — see
/// DESIGN.md for this crate's choice).
const ATTR_BIT_BASE: u32 = 16;

/// Decoded per-holder flags: residual access flags plus which attribute
/// indices (into `predefined(ctx) ++ extra_defs`) this holder claims.
pub struct FlagsResult {
    pub access_flags: Vec<u16>,
    pub claims: Vec<Vec<usize>>,
}

/// Reads `flags_lo` (and `flags_hi` when `uses_hi`), masks off the
/// attribute-presence bits, and resolves the overflow bit via
/// `attr_count`/`attr_indexes` when set.
pub fn read_flags<R: Read>(
    reader: &mut R,
    holder_count: usize,
    num_defs: usize,
    uses_hi: bool,
    ctx: Context,
) -> Result<FlagsResult> {
    let mut lo = IntBand::new("flags_lo", Coding::UNSIGNED5);
    lo.expect_more_length(holder_count);
    lo.fill(reader)?;
    let lo_values = lo.values().to_vec();

    let hi_values = if uses_hi {
        let mut hi = IntBand::new("flags_hi", Coding::UNSIGNED5);
        hi.expect_more_length(holder_count);
        hi.fill(reader)?;
        hi.values().to_vec()
    } else {
        vec![0; holder_count]
    };

    let overflow_bit = ATTR_BIT_BASE + num_defs as u32;
    let mut access_flags = Vec::with_capacity(holder_count);
    let mut claims = Vec::with_capacity(holder_count);
    let mut overflow_holders = Vec::new();

    for i in 0..holder_count {
        let word = ((hi_values[i] as u64) << 32) | (lo_values[i] as u32 as u64);
        access_flags.push((word & 0xFFFF) as u16);
        let mut holder_claims = Vec::new();
        for bit in 0..num_defs {
            if word & (1u64 << (ATTR_BIT_BASE as u64 + bit as u64)) != 0 {
                holder_claims.push(bit);
            }
        }
        if word & (1u64 << overflow_bit as u64) != 0 {
            overflow_holders.push(i);
        }
        claims.push(holder_claims);
    }

    if !overflow_holders.is_empty() {
        let mut attr_count = IntBand::new("attr_count", Coding::UNSIGNED5);
        attr_count.expect_more_length(overflow_holders.len());
        attr_count.fill(reader)?;
        let counts = attr_count.values().to_vec();
        let total: usize = counts.iter().map(|&c| c.max(0) as usize).sum();
        let mut attr_indexes = IntBand::new("attr_indexes", Coding::UNSIGNED5);
        attr_indexes.expect_more_length(total);
        attr_indexes.fill(reader)?;
        let mut idx_iter = attr_indexes.values().iter().copied();
        for (&holder, &count) in overflow_holders.iter().zip(counts.iter()) {
            for _ in 0..count {
                let idx = idx_iter.next().unwrap();
                if idx < 0 {
                    return Err(Error::BadAttrIndex { context: ctx.label(), index: idx as u32 });
                }
                claims[holder].push(idx as usize);
            }
        }
    }

    Ok(FlagsResult { access_flags, claims })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_six_layout() {
        let elems = parse_layout("RSH RUH").unwrap();
        assert_eq!(elems.len(), 2);
        assert!(matches!(elems[0], LayoutElem::Ref { tag: Tag::Signature, nullable: false }));
        assert!(matches!(elems[1], LayoutElem::Ref { tag: Tag::Utf8, nullable: false }));
    }

    #[test]
    fn parses_replication_layout() {
        let elems = parse_layout("H[V H]").unwrap();
        assert_eq!(elems.len(), 1);
        match &elems[0] {
            LayoutElem::Repl { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("expected replication, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse_layout("Z").is_err());
    }

    #[test]
    fn decodes_simple_ref_layout_for_two_holders() {
        use std::io::Cursor;
        let utf8 = Rc::new(Entry::Utf8(Rc::from("hi")));
        let elems = vec![LayoutElem::Ref { tag: Tag::Utf8, nullable: false }];
        let bytes: Vec<u8> = [1i64, 1].iter().flat_map(|v| Coding::UNSIGNED5.encode_value(*v)).collect();
        let mut resolve = |_t: Tag, _i: u32| Some(utf8.clone());
        let decoded = decode_layout(&elems, &[true, true], 2, "test", &mut Cursor::new(bytes), &mut resolve).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0][0].as_ref().is_some());
    }

    #[test]
    fn flags_overflow_reads_attr_indexes() {
        use std::io::Cursor;
        // holder 0: bit 16 set (predefined #0) and overflow bit (16+1=17) set.
        let flags_lo = (1u64 << 16) | (1u64 << 17);
        let mut bytes = Coding::UNSIGNED5.encode_value(flags_lo as i64);
        bytes.extend(Coding::UNSIGNED5.encode_value(1)); // attr_count[0] = 1
        bytes.extend(Coding::UNSIGNED5.encode_value(5)); // attr_indexes[0] = 5
        let result = read_flags(&mut Cursor::new(bytes), 1, 1, false, Context::Class).unwrap();
        assert_eq!(result.claims[0], vec![0, 5]);
    }

    #[test]
    fn parses_union_layout() {
        let elems = parse_layout("UB[(0)[H] (1,2)[V] ()[B]]").unwrap();
        assert_eq!(elems.len(), 1);
        match &elems[0] {
            LayoutElem::Union { selector_coding, cases, default } => {
                assert_eq!(*selector_coding, Coding::BYTE1);
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].0, vec![0]);
                assert_eq!(cases[1].0, vec![1, 2]);
                assert_eq!(default.len(), 1);
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn union_without_default_case_is_rejected() {
        assert!(parse_layout("UB[(0)[H]]").is_err());
    }

    #[test]
    fn decodes_union_layout_dispatching_each_holder_to_its_case() {
        use std::io::Cursor;
        let elems = vec![LayoutElem::Union {
            selector_coding: Coding::UNSIGNED5,
            cases: vec![(vec![0], vec![LayoutElem::Int(Coding::UNSIGNED5)]), (vec![1], vec![LayoutElem::Int(Coding::UNSIGNED5)])],
            default: vec![LayoutElem::Int(Coding::UNSIGNED5)],
        }];

        let mut bytes = Vec::new();
        for v in [0i64, 1, 5] {
            bytes.extend(Coding::UNSIGNED5.encode_value(v)); // selector, one per holder
        }
        bytes.extend(Coding::UNSIGNED5.encode_value(100)); // case (0): holder 0's value
        bytes.extend(Coding::UNSIGNED5.encode_value(200)); // case (1): holder 1's value
        bytes.extend(Coding::UNSIGNED5.encode_value(300)); // default: holder 2's value

        let mut resolve = |_t: Tag, _i: u32| None;
        let decoded = decode_layout(&elems, &[true, true, true], 3, "test", &mut Cursor::new(bytes), &mut resolve).unwrap();

        let (tag0, vals0) = decoded[0][0].as_union().unwrap();
        assert_eq!((tag0, vals0[0].as_int()), (0, Some(100)));
        let (tag1, vals1) = decoded[1][0].as_union().unwrap();
        assert_eq!((tag1, vals1[0].as_int()), (1, Some(200)));
        let (tag2, vals2) = decoded[2][0].as_union().unwrap();
        assert_eq!((tag2, vals2[0].as_int()), (5, Some(300)));
    }

    #[test]
    fn forward_call_splices_callable_body_at_each_call_site() {
        let elems = parse_layout("C0[H] c0 c0").unwrap();
        assert_eq!(elems.len(), 2);
        assert!(elems.iter().all(|e| matches!(e, LayoutElem::Int(Coding::UNSIGNED5))));
    }

    #[test]
    fn backward_call_becomes_a_replication_sized_off_its_own_band() {
        let elems = parse_layout("C0[H] c0B").unwrap();
        assert_eq!(elems.len(), 1);
        match &elems[0] {
            LayoutElem::Repl { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(body[0], LayoutElem::Int(Coding::UNSIGNED5)));
            }
            other => panic!("expected a replication, got {other:?}"),
        }
    }

    #[test]
    fn self_referential_callable_is_rejected() {
        assert!(parse_layout("C0[c0] c0").is_err());
    }

    #[test]
    fn call_to_undefined_callable_is_rejected() {
        assert!(parse_layout("c0").is_err());
    }
}
