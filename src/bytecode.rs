//! Component J: the two-pass bytecode decoder (spec.md §4.8). The archive
//! carries every method's opcode bytes concatenated in one shared
//! `bc_codes` stream, terminated per method by [`opcodes::END_MARKER`],
//! with each opcode's operands spread across shared per-kind bands sized
//! by a first scanning pass and drained by a second expansion pass.
//!
//! This follows the same two-step materialize-then-replay shape used
//! elsewhere in this crate's stream readers (size fully, then consume via
//! an independent cursor) scaled up to a whole archive: [`BytecodeSizer`]
//! plays the role of the directory scan, [`expand_method`] the role of a
//! stream reader walking the now-fixed layout.

use std::io::Read;
use std::rc::Rc;

use crate::band::IntBand;
use crate::coding::Coding;
use crate::opcodes::{self, ExtOp, InitTarget, LdcFlavor, MemberOpKind, OperandShape, RefTarget};
use crate::pool::{Entry, Tag};
use crate::result::{Error, Result};

/// A deferred patch: write the class-local CP index for `entry` into
/// `buf[offset..offset+width]` once that class's local pool is known
/// (post-pass L).
#[derive(Debug, Clone)]
pub struct Fixup {
    pub offset: usize,
    pub width: u8,
    pub entry: Rc<Entry>,
}

#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: Option<Rc<Entry>>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedCode {
    pub bytes: Vec<u8>,
    pub insn_map: Vec<u32>,
    pub handlers: Vec<ExceptionHandler>,
    pub fixups: Vec<Fixup>,
    /// Entries touched by a narrow `ldc`/`ldc_w`/`ldc2_w` in this method,
    /// fed into the class's `ldcRefMap` for local CP assembly (§4.7).
    pub ldc_refs: Vec<Rc<Entry>>,
    /// Unresolved branch/switch targets, patched by [`resolve_labels`] once
    /// `insn_map` covers the whole method (spec.md §4.8's "label pass").
    label_fixups: Vec<LabelFixup>,
}

/// A branch or switch target awaiting `decode_bci`: `raw` is the band
/// value, read as a signed delta in *instruction count* from the
/// instruction at `from_instr` to its target; `from_instr` doubles as the
/// pc the emitted offset is relative to (branch offsets in the JVM are
/// relative to the branch opcode's own pc).
#[derive(Debug, Clone, Copy)]
struct LabelFixup {
    from_instr: usize,
    offset: usize,
    width: u8,
    raw: i64,
}

/// Converts band-encoded label deltas into absolute byte offsets, then
/// absolute offsets into opcode-relative ones, patching `out.bytes`
/// in place. Must run after every instruction in the method has
/// contributed its `insn_map` entry.
fn resolve_labels(out: &mut DecodedCode) -> Result<()> {
    let end_pc = out.bytes.len() as i64;
    for fixup in out.label_fixups.drain(..) {
        let target_instr = fixup.from_instr as i64 + fixup.raw;
        let target_pc = if target_instr == out.insn_map.len() as i64 {
            end_pc
        } else {
            *out.insn_map.get(target_instr as usize).ok_or(Error::BadLayout {
                context: "bc_label",
                reason: format!("branch target instruction {target_instr} out of range"),
            })? as i64
        };
        let op_pc = out.insn_map[fixup.from_instr] as i64;
        let relative = target_pc - op_pc;
        match fixup.width {
            2 => {
                let v = i16::try_from(relative).map_err(|_| Error::BadLayout {
                    context: "bc_label",
                    reason: format!("branch offset {relative} does not fit in 2 bytes"),
                })?;
                out.bytes[fixup.offset..fixup.offset + 2].copy_from_slice(&v.to_be_bytes());
            }
            4 => {
                let v = relative as i32;
                out.bytes[fixup.offset..fixup.offset + 4].copy_from_slice(&v.to_be_bytes());
            }
            other => unreachable!("label fixup width {other}"),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum SwitchKind {
    Table,
    Lookup,
}

#[derive(Debug, Clone)]
enum RawInstr {
    Standard { opcode: u8, wide: bool },
    Ext(ExtOp),
    Switch { kind: SwitchKind },
}

/// Every shared operand band the bytecode decoder drains, filled once
/// the sizing pass across the whole archive has finished.
pub struct BytecodeBands {
    pub byte: IntBand,
    pub short: IntBand,
    pub local: IntBand,
    pub label: IntBand,
    pub classref: IntBand,
    pub fieldref: IntBand,
    pub methodref: IntBand,
    pub imethodref: IntBand,
    pub intref: IntBand,
    pub floatref: IntBand,
    pub stringref: IntBand,
    pub longref: IntBand,
    pub doubleref: IntBand,
    pub qualifiedref: IntBand,
    pub thisfield: IntBand,
    pub superfield: IntBand,
    pub thismethod: IntBand,
    pub supermethod: IntBand,
    pub initref: IntBand,
    pub escref: IntBand,
    pub escsize: IntBand,
    pub escbytes: crate::band::ByteBand,
    pub case_count: IntBand,
    pub case_values: IntBand,
}

impl BytecodeBands {
    pub fn new() -> Self {
        Self {
            byte: IntBand::new("bc_byte", Coding::BYTE1),
            short: IntBand::new("bc_short", Coding::SIGNED5),
            local: IntBand::new("bc_local", Coding::UNSIGNED5),
            label: IntBand::new("bc_label", Coding::SIGNED5),
            classref: IntBand::new("bc_classref", Coding::UNSIGNED5),
            fieldref: IntBand::new("bc_fieldref", Coding::UNSIGNED5),
            methodref: IntBand::new("bc_methodref", Coding::UNSIGNED5),
            imethodref: IntBand::new("bc_imethodref", Coding::UNSIGNED5),
            intref: IntBand::new("bc_intref", Coding::UNSIGNED5),
            floatref: IntBand::new("bc_floatref", Coding::UNSIGNED5),
            stringref: IntBand::new("bc_stringref", Coding::UNSIGNED5),
            longref: IntBand::new("bc_longref", Coding::UNSIGNED5),
            doubleref: IntBand::new("bc_doubleref", Coding::UNSIGNED5),
            qualifiedref: IntBand::new("bc_qualifiedref", Coding::UNSIGNED5),
            thisfield: IntBand::new("bc_thisfield", Coding::UNSIGNED5),
            superfield: IntBand::new("bc_superfield", Coding::UNSIGNED5),
            thismethod: IntBand::new("bc_thismethod", Coding::UNSIGNED5),
            supermethod: IntBand::new("bc_supermethod", Coding::UNSIGNED5),
            initref: IntBand::new("bc_initref", Coding::UNSIGNED5),
            escref: IntBand::new("bc_escref", Coding::UNSIGNED5),
            escsize: IntBand::new("bc_escsize", Coding::UNSIGNED5),
            escbytes: crate::band::ByteBand::new("bc_escbytes"),
            case_count: IntBand::new("bc_case_count", Coding::UNSIGNED5),
            case_values: IntBand::new("bc_case_values", Coding::SIGNED5),
        }
    }
}

struct PendingSwitch {
    kind: SwitchKind,
}

/// Drives the archive-wide sizing pass: scans every method's raw opcode
/// bytes out of `bc_codes`, growing the shared operand bands, then fills
/// them all once every method has been scanned.
pub struct BytecodeSizer {
    bands: BytecodeBands,
    pending_switches: Vec<PendingSwitch>,
    methods: Vec<Vec<RawInstr>>,
}

impl BytecodeSizer {
    pub fn new() -> Self {
        Self {
            bands: BytecodeBands::new(),
            pending_switches: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Scans one method's opcodes out of `bc_codes`, returning that
    /// method's index into the sizer for later expansion.
    pub fn size_method<R: Read>(&mut self, bc_codes: &mut R) -> Result<usize> {
        let mut instrs = Vec::new();
        let mut wide_pending = false;
        loop {
            let mut b = [0u8; 1];
            bc_codes.read_exact(&mut b).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::TruncatedStream {
                        band: "bc_codes",
                        diag: Default::default(),
                    }
                } else {
                    Error::Io(e)
                }
            })?;
            let opcode = b[0];
            if opcode == opcodes::END_MARKER {
                break;
            }
            if opcode == opcodes::WIDE {
                wide_pending = true;
                instrs.push(RawInstr::Standard { opcode, wide: false });
                continue;
            }
            let wide = wide_pending;
            wide_pending = false;

            if let Some(shape) = opcodes::operand_shape(opcode) {
                self.grow_for_shape(opcode, shape, wide);
                match shape {
                    OperandShape::TableSwitch => {
                        self.pending_switches.push(PendingSwitch { kind: SwitchKind::Table });
                        instrs.push(RawInstr::Switch { kind: SwitchKind::Table });
                        continue;
                    }
                    OperandShape::LookupSwitch => {
                        self.pending_switches.push(PendingSwitch { kind: SwitchKind::Lookup });
                        instrs.push(RawInstr::Switch { kind: SwitchKind::Lookup });
                        continue;
                    }
                    _ => {}
                }
            } else if let Some(ext) = ExtOp::decode(opcode) {
                self.grow_for_ext(ext);
                instrs.push(RawInstr::Ext(ext));
                continue;
            } else {
                return Err(Error::IllegalOpcode(opcode));
            }
            instrs.push(RawInstr::Standard { opcode, wide });
        }
        self.methods.push(instrs);
        Ok(self.methods.len() - 1)
    }

    fn grow_for_shape(&mut self, opcode: u8, shape: OperandShape, wide: bool) {
        use OperandShape::*;
        match shape {
            None | WidePrefix | TableSwitch | LookupSwitch => {}
            Byte => self.bands.byte.expect_more_length(1),
            Short => self.bands.short.expect_more_length(1),
            LocalVar => self.bands.local.expect_more_length(1),
            IncLocal => {
                self.bands.local.expect_more_length(1);
                if wide {
                    self.bands.short.expect_more_length(1);
                } else {
                    self.bands.byte.expect_more_length(1);
                }
            }
            ConstPool1 => self.bands.intref.expect_more_length(1),
            ConstPool2 => {
                let band = self.ref_band_for(opcode);
                band.expect_more_length(1);
            }
            InvokeInterface => self.bands.methodref.expect_more_length(1),
            InvokeDynamic => self.bands.qualifiedref.expect_more_length(1),
            MultiANewArray => {
                self.bands.classref.expect_more_length(1);
                self.bands.byte.expect_more_length(1);
            }
            Branch2 | Branch4 => self.bands.label.expect_more_length(1),
        }
    }

    fn ref_band_for(&mut self, opcode: u8) -> &mut IntBand {
        match opcode {
            178..=181 => &mut self.bands.fieldref,
            182 | 183 | 184 => &mut self.bands.methodref,
            187 | 189 | 192 | 193 => &mut self.bands.classref,
            19 => &mut self.bands.stringref,
            20 => &mut self.bands.longref,
            _ => &mut self.bands.classref,
        }
    }

    fn grow_for_ext(&mut self, ext: ExtOp) {
        match ext {
            ExtOp::SelfLinker { aload0: _, target, kind } => {
                let band = match (target, kind.is_field()) {
                    (RefTarget::This, true) => &mut self.bands.thisfield,
                    (RefTarget::Super, true) => &mut self.bands.superfield,
                    (RefTarget::This, false) => &mut self.bands.thismethod,
                    (RefTarget::Super, false) => &mut self.bands.supermethod,
                };
                band.expect_more_length(1);
            }
            ExtOp::InvokeInit { .. } => self.bands.initref.expect_more_length(1),
            ExtOp::Ldc { flavor, .. } => {
                let band = match flavor {
                    LdcFlavor::Int => &mut self.bands.intref,
                    LdcFlavor::Class => &mut self.bands.classref,
                    LdcFlavor::Float => &mut self.bands.floatref,
                    LdcFlavor::String => &mut self.bands.stringref,
                    LdcFlavor::Qualified => &mut self.bands.qualifiedref,
                };
                band.expect_more_length(1);
            }
            ExtOp::RefEscape => {
                self.bands.escsize.expect_more_length(1);
                self.bands.escref.expect_more_length(1);
            }
            ExtOp::ByteEscape => {
                self.bands.escsize.expect_more_length(1);
                // the byte count itself is only known once `escsize` is
                // filled; `escbytes` grows in the post-size reconciliation
                // step below.
            }
        }
    }

    /// Finishes sizing: resolves every queued switch's case count and
    /// label/value band growth, then fills every shared band in the
    /// archive's declared order. Returns the filled bands plus the raw
    /// per-method instruction lists ready for expansion.
    pub fn finish<R: Read>(mut self, reader: &mut R) -> Result<(BytecodeBands, Vec<Vec<RawInstrHandle>>)> {
        self.bands.case_count.expect_more_length(self.pending_switches.len());
        // `byte_escape`'s raw payload length also depends on `escsize`
        // values, which aren't known until that band is filled; account
        // for it by filling `escsize` ahead of the rest (it only depends
        // on a plain count, already fully grown above).
        self.bands.escsize.fill(reader)?;
        let escsize_values = self.bands.escsize.values().to_vec();
        self.bands.escsize.reset_for_second_pass();

        let mut escsize_cursor = 0usize;
        for method in &self.methods {
            for instr in method {
                if let RawInstr::Ext(ExtOp::ByteEscape) = instr {
                    let n = escsize_values[escsize_cursor] as usize;
                    self.bands.escbytes.expect_more_length(n);
                    escsize_cursor += 1;
                }
            }
        }

        self.bands.byte.fill(reader)?;
        self.bands.short.fill(reader)?;
        self.bands.local.fill(reader)?;
        self.bands.classref.fill(reader)?;
        self.bands.fieldref.fill(reader)?;
        self.bands.methodref.fill(reader)?;
        self.bands.imethodref.fill(reader)?;
        self.bands.intref.fill(reader)?;
        self.bands.floatref.fill(reader)?;
        self.bands.stringref.fill(reader)?;
        self.bands.longref.fill(reader)?;
        self.bands.doubleref.fill(reader)?;
        self.bands.qualifiedref.fill(reader)?;
        self.bands.thisfield.fill(reader)?;
        self.bands.superfield.fill(reader)?;
        self.bands.thismethod.fill(reader)?;
        self.bands.supermethod.fill(reader)?;
        self.bands.initref.fill(reader)?;
        self.bands.escref.fill(reader)?;
        self.bands.case_count.fill(reader)?;

        let case_counts = self.bands.case_count.values().to_vec();
        let mut label_extra = 0usize;
        let mut value_extra = 0usize;
        for (i, pending) in self.pending_switches.iter().enumerate() {
            let n = case_counts[i] as usize;
            label_extra += 1 + n; // default + each case label
            value_extra += match pending.kind {
                SwitchKind::Table => 1,  // just the `low` bound
                SwitchKind::Lookup => n, // explicit match value per case
            };
        }
        self.bands.label.expect_more_length(label_extra);
        self.bands.case_values.expect_more_length(value_extra);
        self.bands.label.fill(reader)?;
        self.bands.case_values.fill(reader)?;
        self.bands.escbytes.fill(reader)?;

        let methods = self
            .methods
            .into_iter()
            .map(|instrs| instrs.into_iter().map(RawInstrHandle).collect())
            .collect();
        Ok((self.bands, methods))
    }
}

/// Opaque handle around a sized instruction, consumed in order by
/// [`expand_method`]. Kept out of the public enum so callers can't
/// construct one out of band.
pub struct RawInstrHandle(RawInstr);

/// Expansion pass (spec.md §4.8): replays one method's sized
/// instructions against the now-filled shared bands, emitting standard
/// JVM bytecode plus fixups, an instruction-boundary map, and the set of
/// narrow-`ldc` references for this method's class.
pub fn expand_method(
    instrs: &[RawInstrHandle],
    bands: &mut BytecodeBands,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
    this_class: Option<Rc<Entry>>,
    super_class: Option<Rc<Entry>>,
    archive_major_version: u16,
    methodrefs: &[Rc<Entry>],
) -> Result<DecodedCode> {
    let mut out = DecodedCode::default();
    let mut new_class: Option<Rc<Entry>> = this_class.clone();

    let mut resolve_band = |bands: &mut BytecodeBands, which: BandKind| -> Result<u32> {
        let v = match which {
            BandKind::Byte => bands.byte.get()?,
            BandKind::Short => bands.short.get()?,
            BandKind::Local => bands.local.get()?,
            BandKind::Label => bands.label.get()?,
            BandKind::ClassRef => bands.classref.get()?,
            BandKind::FieldRef => bands.fieldref.get()?,
            BandKind::MethodRef => bands.methodref.get()?,
            BandKind::IMethodRef => bands.imethodref.get()?,
            BandKind::IntRef => bands.intref.get()?,
            BandKind::FloatRef => bands.floatref.get()?,
            BandKind::StringRef => bands.stringref.get()?,
            BandKind::LongRef => bands.longref.get()?,
            BandKind::DoubleRef => bands.doubleref.get()?,
            BandKind::QualifiedRef => bands.qualifiedref.get()?,
            BandKind::ThisField => bands.thisfield.get()?,
            BandKind::SuperField => bands.superfield.get()?,
            BandKind::ThisMethod => bands.thismethod.get()?,
            BandKind::SuperMethod => bands.supermethod.get()?,
            BandKind::InitRef => bands.initref.get()?,
            BandKind::EscRef => bands.escref.get()?,
            BandKind::EscSize => bands.escsize.get()?,
            BandKind::CaseCount => bands.case_count.get()?,
            BandKind::CaseValue => bands.case_values.get()?,
        };
        Ok(v as u32)
    };

    for (instr_index, handle) in instrs.iter().enumerate() {
        let pc = out.bytes.len();
        out.insn_map.push(pc as u32);
        match &handle.0 {
            RawInstr::Standard { opcode, wide } => {
                expand_standard(
                    *opcode,
                    *wide,
                    instr_index,
                    &mut out,
                    bands,
                    &mut resolve_band,
                    resolve,
                    &mut new_class,
                    archive_major_version,
                )?;
            }
            RawInstr::Ext(ext) => {
                let init_target_class = match ext {
                    ExtOp::InvokeInit { target } => match target {
                        InitTarget::This => this_class.as_ref(),
                        InitTarget::Super => super_class.as_ref(),
                        InitTarget::New => new_class.as_ref(),
                    },
                    _ => None,
                };
                expand_ext(*ext, &mut out, bands, &mut resolve_band, resolve, init_target_class, methodrefs)?;
            }
            RawInstr::Switch { kind } => {
                expand_switch(*kind, instr_index, &mut out, bands, &mut resolve_band)?;
            }
        }
    }

    resolve_labels(&mut out)?;
    Ok(out)
}

enum BandKind {
    Byte,
    Short,
    Local,
    Label,
    ClassRef,
    FieldRef,
    MethodRef,
    IMethodRef,
    IntRef,
    FloatRef,
    StringRef,
    LongRef,
    DoubleRef,
    QualifiedRef,
    ThisField,
    SuperField,
    ThisMethod,
    SuperMethod,
    InitRef,
    EscRef,
    EscSize,
    CaseCount,
    CaseValue,
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[allow(clippy::too_many_arguments)]
fn expand_standard(
    opcode: u8,
    wide: bool,
    instr_index: usize,
    out: &mut DecodedCode,
    bands: &mut BytecodeBands,
    band: &mut impl FnMut(&mut BytecodeBands, BandKind) -> Result<u32>,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
    new_class: &mut Option<Rc<Entry>>,
    archive_major_version: u16,
) -> Result<()> {
    use crate::opcodes::OperandShape::*;
    out.bytes.push(opcode);
    let shape = match opcodes::operand_shape(opcode) {
        Some(s) => s,
        None => return Ok(()),
    };
    match shape {
        None | TableSwitch | LookupSwitch => {}
        WidePrefix => {}
        Byte => {
            let v = band(bands, BandKind::Byte)?;
            out.bytes.push(v as u8);
        }
        Short => {
            let v = band(bands, BandKind::Short)?;
            push_u16(&mut out.bytes, v as u16);
        }
        LocalVar => {
            let v = band(bands, BandKind::Local)?;
            if wide {
                push_u16(&mut out.bytes, v as u16);
            } else {
                out.bytes.push(v as u8);
            }
        }
        IncLocal => {
            let slot = band(bands, BandKind::Local)?;
            if wide {
                push_u16(&mut out.bytes, slot as u16);
                let delta = band(bands, BandKind::Short)?;
                push_u16(&mut out.bytes, delta as u16);
            } else {
                out.bytes.push(slot as u8);
                let delta = band(bands, BandKind::Byte)?;
                out.bytes.push(delta as u8);
            }
        }
        ConstPool1 => {
            let idx = band(bands, BandKind::IntRef)?;
            let entry = resolve(Tag::Integer, idx).ok_or(Error::DanglingReference {
                band: "bc_intref",
                index: idx,
            })?;
            out.ldc_refs.push(entry.clone());
            let offset = out.bytes.len();
            out.bytes.push(0);
            out.fixups.push(Fixup { offset, width: 1, entry });
        }
        ConstPool2 => {
            let (kind, tag) = const_pool2_tag(opcode);
            let idx = band(bands, kind)?;
            let entry = if opcode == opcodes::INVOKESTATIC || opcode == opcodes::INVOKESPECIAL {
                // The 8.0 exception (spec.md §4.8, §7): `invokestatic`/
                // `invokespecial` may carry an `InterfaceMethodref` once the
                // archive declares major version 52 (Java 8.0) or later.
                match resolve(Tag::Methodref, idx) {
                    Some(e) => e,
                    None if archive_major_version >= 52 => {
                        resolve(Tag::InterfaceMethodref, idx).ok_or(Error::DanglingReference {
                            band: "bc_ref",
                            index: idx,
                        })?
                    }
                    None => {
                        if resolve(Tag::InterfaceMethodref, idx).is_some() {
                            return Err(Error::OpcodeReferenceTagMismatch {
                                opcode,
                                expected: "Methodref",
                                found: "InterfaceMethodref",
                            });
                        }
                        return Err(Error::DanglingReference { band: "bc_ref", index: idx });
                    }
                }
            } else {
                resolve(tag, idx).ok_or(Error::DanglingReference {
                    band: "bc_ref",
                    index: idx,
                })?
            };
            if opcode == opcodes::NEW {
                *new_class = Some(entry.clone());
            }
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            out.fixups.push(Fixup { offset, width: 2, entry });
        }
        InvokeInterface => {
            let idx = band(bands, BandKind::MethodRef)?;
            let entry = resolve(Tag::InterfaceMethodref, idx)
                .or_else(|| resolve(Tag::Methodref, idx))
                .ok_or(Error::DanglingReference {
                    band: "bc_imethodref",
                    index: idx,
                })?;
            let arg_size = descriptor_arg_slots(&entry) + 1;
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            out.bytes.push(arg_size as u8);
            out.bytes.push(0);
            out.fixups.push(Fixup { offset, width: 2, entry });
        }
        InvokeDynamic => {
            let idx = band(bands, BandKind::QualifiedRef)?;
            let entry = resolve(Tag::InvokeDynamic, idx).ok_or(Error::DanglingReference {
                band: "bc_qualifiedref",
                index: idx,
            })?;
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            push_u16(&mut out.bytes, 0);
            out.fixups.push(Fixup { offset, width: 2, entry });
        }
        MultiANewArray => {
            let idx = band(bands, BandKind::ClassRef)?;
            let entry = resolve(Tag::Class, idx).ok_or(Error::DanglingReference {
                band: "bc_classref",
                index: idx,
            })?;
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            out.fixups.push(Fixup { offset, width: 2, entry });
            let dims = band(bands, BandKind::Byte)?;
            out.bytes.push(dims as u8);
        }
        Branch2 => {
            let raw = band(bands, BandKind::Label)? as i32 as i64;
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            out.label_fixups.push(LabelFixup {
                from_instr: instr_index,
                offset,
                width: 2,
                raw,
            });
        }
        Branch4 => {
            let raw = band(bands, BandKind::Label)? as i32 as i64;
            let offset = out.bytes.len();
            out.bytes.extend_from_slice(&[0, 0, 0, 0]);
            out.label_fixups.push(LabelFixup {
                from_instr: instr_index,
                offset,
                width: 4,
                raw,
            });
        }
    }
    Ok(())
}

/// Finds the `ordinal`-th `Methodref` in `methodrefs` whose class is
/// `target` and whose name is `<init>`, in the pool's declaration order
/// (spec.md §4.8's "n-th `<init>` overload in this/super/newClass").
fn nth_init_overload(methodrefs: &[Rc<Entry>], target: &Rc<Entry>, ordinal: u32) -> Option<Rc<Entry>> {
    methodrefs
        .iter()
        .filter(|e| match e.as_ref() {
            Entry::Methodref { class, name_and_type } => Rc::ptr_eq(class, target) && is_init_name(name_and_type.as_ref()),
            _ => false,
        })
        .nth(ordinal as usize)
        .cloned()
}

fn is_init_name(name_and_type: &Entry) -> bool {
    matches!(name_and_type, Entry::NameAndType { name, .. } if name.spelling() == "<init>")
}

fn const_pool2_tag(opcode: u8) -> (BandKind, Tag) {
    match opcode {
        178..=181 => (BandKind::FieldRef, Tag::Fieldref),
        182 | 183 | 184 => (BandKind::MethodRef, Tag::Methodref),
        187 | 189 | 192 | 193 => (BandKind::ClassRef, Tag::Class),
        19 => (BandKind::StringRef, Tag::String),
        20 => (BandKind::LongRef, Tag::Long),
        _ => (BandKind::ClassRef, Tag::Class),
    }
}

fn descriptor_arg_slots(methodref: &Entry) -> usize {
    let descriptor = match methodref {
        Entry::Methodref { name_and_type, .. } | Entry::InterfaceMethodref { name_and_type, .. } => {
            match name_and_type.as_ref() {
                Entry::NameAndType { descriptor, .. } => descriptor.spelling(),
                _ => String::new(),
            }
        }
        _ => String::new(),
    };
    let mut slots = 0usize;
    let mut chars = descriptor.trim_start_matches('(').chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ')' => break,
            'J' | 'D' => slots += 2,
            'L' => {
                slots += 1;
                for c2 in chars.by_ref() {
                    if c2 == ';' {
                        break;
                    }
                }
            }
            '[' => {
                while chars.peek() == Some(&'[') {
                    chars.next();
                }
                match chars.next() {
                    Some('L') => {
                        slots += 1;
                        for c2 in chars.by_ref() {
                            if c2 == ';' {
                                break;
                            }
                        }
                    }
                    _ => slots += 1,
                }
            }
            _ => slots += 1,
        }
    }
    slots
}

#[allow(clippy::too_many_arguments)]
fn expand_ext(
    ext: ExtOp,
    out: &mut DecodedCode,
    bands: &mut BytecodeBands,
    band: &mut impl FnMut(&mut BytecodeBands, BandKind) -> Result<u32>,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
    init_target_class: Option<&Rc<Entry>>,
    methodrefs: &[Rc<Entry>],
) -> Result<()> {
    match ext {
        ExtOp::SelfLinker { aload0, target, kind } => {
            if aload0 {
                out.bytes.push(42); // aload_0
            }
            let (bk, tag) = match (target, kind.is_field()) {
                (RefTarget::This, true) => (BandKind::ThisField, Tag::Fieldref),
                (RefTarget::Super, true) => (BandKind::SuperField, Tag::Fieldref),
                (RefTarget::This, false) => (BandKind::ThisMethod, Tag::Methodref),
                (RefTarget::Super, false) => (BandKind::SuperMethod, Tag::Methodref),
            };
            let idx = band(bands, bk)?;
            let entry = resolve(tag, idx).ok_or(Error::DanglingReference {
                band: "bc_self_linker",
                index: idx,
            })?;
            out.bytes.push(kind.standard_opcode());
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            if kind == MemberOpKind::InvokeInterface {
                let arg_size = descriptor_arg_slots(&entry) + 1;
                out.bytes.push(arg_size as u8);
                out.bytes.push(0);
            }
            out.fixups.push(Fixup { offset, width: 2, entry });
        }
        ExtOp::InvokeInit { target: _ } => {
            // `bc_initref` is an ordinal, not a direct CP index: it selects
            // the n-th `<init>` overload of the target class (this/super/
            // the most recently `_new`-ed class), in that class's Methodref
            // declaration order (spec.md §4.8).
            let idx = band(bands, BandKind::InitRef)?;
            let target = init_target_class.ok_or(Error::DanglingReference {
                band: "bc_initref",
                index: idx,
            })?;
            let entry = nth_init_overload(methodrefs, target, idx).ok_or(Error::DanglingReference {
                band: "bc_initref",
                index: idx,
            })?;
            out.bytes.push(opcodes::INVOKESPECIAL);
            let offset = out.bytes.len();
            push_u16(&mut out.bytes, 0);
            out.fixups.push(Fixup { offset, width: 2, entry });
        }
        ExtOp::Ldc { flavor, wide } => {
            let (bk, tag) = match flavor {
                LdcFlavor::Int => (BandKind::IntRef, Tag::Integer),
                LdcFlavor::Class => (BandKind::ClassRef, Tag::Class),
                LdcFlavor::Float => (BandKind::FloatRef, Tag::Float),
                LdcFlavor::String => (BandKind::StringRef, Tag::String),
                LdcFlavor::Qualified => (BandKind::QualifiedRef, Tag::InvokeDynamic),
            };
            let idx = band(bands, bk)?;
            let entry = resolve(tag, idx).ok_or(Error::DanglingReference {
                band: "bc_ldc",
                index: idx,
            })?;
            out.ldc_refs.push(entry.clone());
            if wide {
                out.bytes.push(opcodes::LDC_W);
                let offset = out.bytes.len();
                push_u16(&mut out.bytes, 0);
                out.fixups.push(Fixup { offset, width: 2, entry });
            } else {
                out.bytes.push(opcodes::LDC);
                let offset = out.bytes.len();
                out.bytes.push(0);
                out.fixups.push(Fixup { offset, width: 1, entry });
            }
        }
        ExtOp::RefEscape => {
            let width = band(bands, BandKind::EscSize)?;
            let idx = band(bands, BandKind::EscRef)?;
            let entry = resolve(Tag::Utf8, idx)
                .or_else(|| resolve(Tag::Class, idx))
                .ok_or(Error::DanglingReference {
                    band: "bc_escref",
                    index: idx,
                })?;
            let offset = out.bytes.len();
            if width == 1 {
                out.bytes.push(0);
            } else {
                push_u16(&mut out.bytes, 0);
            }
            out.fixups.push(Fixup {
                offset,
                width: width as u8,
                entry,
            });
        }
        ExtOp::ByteEscape => {
            let n = band(bands, BandKind::EscSize)? as usize;
            for _ in 0..n {
                out.bytes.push(bands.escbytes.get()?);
            }
        }
    }
    Ok(())
}

fn expand_switch(
    kind: SwitchKind,
    instr_index: usize,
    out: &mut DecodedCode,
    bands: &mut BytecodeBands,
    band: &mut impl FnMut(&mut BytecodeBands, BandKind) -> Result<u32>,
) -> Result<()> {
    let opcode = match kind {
        SwitchKind::Table => opcodes::TABLESWITCH,
        SwitchKind::Lookup => opcodes::LOOKUPSWITCH,
    };
    out.bytes.push(opcode);
    while out.bytes.len() % 4 != 0 {
        out.bytes.push(0);
    }

    let mut push_label = |out: &mut DecodedCode, raw: i64| {
        let offset = out.bytes.len();
        out.bytes.extend_from_slice(&[0, 0, 0, 0]);
        out.label_fixups.push(LabelFixup {
            from_instr: instr_index,
            offset,
            width: 4,
            raw,
        });
    };

    let default_raw = band(bands, BandKind::Label)? as i32 as i64;
    push_label(out, default_raw);

    let case_count = band(bands, BandKind::CaseCount)? as usize;
    match kind {
        SwitchKind::Table => {
            let low = band(bands, BandKind::CaseValue)? as i32;
            let high = low + case_count as i32 - 1;
            out.bytes.extend_from_slice(&low.to_be_bytes());
            out.bytes.extend_from_slice(&high.to_be_bytes());
            for _ in 0..case_count {
                let raw = band(bands, BandKind::Label)? as i32 as i64;
                push_label(out, raw);
            }
        }
        SwitchKind::Lookup => {
            out.bytes.extend_from_slice(&(case_count as i32).to_be_bytes());
            for _ in 0..case_count {
                let value = band(bands, BandKind::CaseValue)? as i32;
                out.bytes.extend_from_slice(&value.to_be_bytes());
                let raw = band(bands, BandKind::Label)? as i32 as i64;
                push_label(out, raw);
            }
        }
    }
    Ok(())
}

/// Decodes exception-handler tuples for one method: `handler_count`
/// `(class, start, end_off, catch_off)` tuples whose last three fields
/// are delta-cumulative (spec.md §4.8's "Handlers" paragraph).
pub fn read_handlers<R: Read>(
    reader: &mut R,
    count: usize,
    resolve: &mut impl FnMut(Tag, u32) -> Option<Rc<Entry>>,
) -> Result<Vec<ExceptionHandler>> {
    let mut class = IntBand::new("code_handler_class", Coding::UNSIGNED5);
    class.expect_more_length(count);
    class.fill(reader)?;
    let mut start = IntBand::new("code_handler_start", Coding::UNSIGNED5);
    start.expect_more_length(count);
    start.fill(reader)?;
    let mut end_off = IntBand::new("code_handler_end", Coding::UNSIGNED5);
    end_off.expect_more_length(count);
    end_off.fill(reader)?;
    let mut catch_off = IntBand::new("code_handler_catch", Coding::UNSIGNED5);
    catch_off.expect_more_length(count);
    catch_off.fill(reader)?;

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let class_idx = class.get()?;
        let start_pc = start.get()? as u32;
        let end_pc = start_pc + end_off.get()? as u32;
        let handler_pc = end_pc + catch_off.get()? as u32;
        let catch_type = if class_idx == 0 {
            None
        } else {
            Some(resolve(Tag::Class, (class_idx - 1) as u32).ok_or(Error::DanglingReference {
                band: "code_handler_class",
                index: class_idx as u32,
            })?)
        };
        out.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn utf8(s: &str) -> Rc<Entry> {
        Rc::new(Entry::Utf8(Rc::from(s)))
    }

    #[test]
    fn sizes_and_expands_return_void() {
        let mut sizer = BytecodeSizer::new();
        let bytes = vec![177u8, opcodes::END_MARKER]; // `return`
        let idx = sizer.size_method(&mut Cursor::new(bytes)).unwrap();
        let (mut bands, methods) = sizer.finish(&mut Cursor::new(Vec::<u8>::new())).unwrap();
        let mut resolve = |_tag: Tag, _idx: u32| -> Option<Rc<Entry>> { None };
        let decoded = expand_method(&methods[idx], &mut bands, &mut resolve, None, None, 52, &[]).unwrap();
        assert_eq!(decoded.bytes, vec![177]);
    }

    #[test]
    fn descriptor_arg_slots_counts_wide_types() {
        let descriptor = utf8("(JDLjava/lang/String;)V");
        let nat = Rc::new(Entry::NameAndType {
            name: utf8("m"),
            descriptor,
        });
        let class = Rc::new(Entry::Class { name: utf8("C") });
        let methodref = Entry::Methodref {
            class,
            name_and_type: nat,
        };
        // J -> 2 slots, D -> 2 slots, Ljava/lang/String; -> 1 slot.
        assert_eq!(descriptor_arg_slots(&methodref), 5);
    }

    #[test]
    fn self_linker_op_emits_aload0_getfield_and_fixup() {
        let mut sizer = BytecodeSizer::new();
        // byte 211 = SELF_LINKER_BASE(202) + aload0(1)*7 + GetField(2): `aload_0; getfield`.
        let bytes = vec![211u8, opcodes::END_MARKER];
        let idx = sizer.size_method(&mut Cursor::new(bytes)).unwrap();
        let band_bytes = Coding::UNSIGNED5.encode_value(0); // bc_thisfield: index 0
        let (mut bands, methods) = sizer.finish(&mut Cursor::new(band_bytes)).unwrap();

        let field = Rc::new(Entry::Fieldref {
            class: Rc::new(Entry::Class { name: utf8("A") }),
            name_and_type: Rc::new(Entry::NameAndType { name: utf8("x"), descriptor: utf8("I") }),
        });
        let mut resolve = |tag: Tag, _idx: u32| -> Option<Rc<Entry>> {
            assert_eq!(tag, Tag::Fieldref);
            Some(field.clone())
        };
        let decoded = expand_method(&methods[idx], &mut bands, &mut resolve, None, None, 52, &[]).unwrap();

        assert_eq!(decoded.bytes, vec![42, 180, 0, 0]); // aload_0, getfield, <cp index fixup>
        assert_eq!(decoded.fixups.len(), 1);
        assert_eq!(decoded.fixups[0].offset, 2);
        assert_eq!(decoded.fixups[0].width, 2);
    }

    #[test]
    fn invokeinit_resolves_nth_overload_of_target_class() {
        let mut sizer = BytecodeSizer::new();
        // byte 231 = INVOKEINIT_BASE(230) + 1: `invokeinit_super`.
        let bytes = vec![231u8, opcodes::END_MARKER];
        let idx = sizer.size_method(&mut Cursor::new(bytes)).unwrap();
        let band_bytes = Coding::UNSIGNED5.encode_value(1); // bc_initref: ordinal 1 (second overload)
        let (mut bands, methods) = sizer.finish(&mut Cursor::new(band_bytes)).unwrap();

        let this_class = Rc::new(Entry::Class { name: utf8("A") });
        let super_class = Rc::new(Entry::Class { name: utf8("B") });
        let other_class = Rc::new(Entry::Class { name: utf8("C") });
        let init_nat = |descriptor: &str| {
            Rc::new(Entry::NameAndType {
                name: utf8("<init>"),
                descriptor: utf8(descriptor),
            })
        };
        // Overloads of A::<init> interleaved with B::<init> and a non-init
        // Methodref, to exercise both the class filter and the name filter.
        let a_init_0 = Rc::new(Entry::Methodref {
            class: this_class.clone(),
            name_and_type: init_nat("()V"),
        });
        let not_init = Rc::new(Entry::Methodref {
            class: super_class.clone(),
            name_and_type: Rc::new(Entry::NameAndType { name: utf8("m"), descriptor: utf8("()V") }),
        });
        let b_init_0 = Rc::new(Entry::Methodref {
            class: super_class.clone(),
            name_and_type: init_nat("()V"),
        });
        let b_init_1 = Rc::new(Entry::Methodref {
            class: super_class.clone(),
            name_and_type: init_nat("(I)V"),
        });
        let unrelated = Rc::new(Entry::Methodref {
            class: other_class,
            name_and_type: init_nat("()V"),
        });
        let methodrefs = vec![a_init_0, not_init, b_init_0, b_init_1.clone(), unrelated];

        let mut resolve = |_t: Tag, _i: u32| -> Option<Rc<Entry>> { None };
        let decoded = expand_method(
            &methods[idx],
            &mut bands,
            &mut resolve,
            Some(this_class),
            Some(super_class),
            52,
            &methodrefs,
        )
        .unwrap();

        assert_eq!(decoded.bytes, vec![opcodes::INVOKESPECIAL, 0, 0]);
        assert_eq!(decoded.fixups.len(), 1);
        assert!(Rc::ptr_eq(&decoded.fixups[0].entry, &b_init_1));
    }

    #[test]
    fn handler_offsets_are_cumulative() {
        let mut bytes = vec![];
        bytes.extend(Coding::UNSIGNED5.encode_value(0)); // class: 0 => no catch type
        bytes.extend(Coding::UNSIGNED5.encode_value(10)); // start
        bytes.extend(Coding::UNSIGNED5.encode_value(5)); // end_off
        bytes.extend(Coding::UNSIGNED5.encode_value(2)); // catch_off
        let mut resolve = |_t: Tag, _i: u32| -> Option<Rc<Entry>> { None };
        let handlers = read_handlers(&mut Cursor::new(bytes), 1, &mut resolve).unwrap();
        assert_eq!(handlers[0].start_pc, 10);
        assert_eq!(handlers[0].end_pc, 15);
        assert_eq!(handlers[0].handler_pc, 17);
    }

    fn interface_methodref() -> Rc<Entry> {
        Rc::new(Entry::InterfaceMethodref {
            class: Rc::new(Entry::Class { name: utf8("I") }),
            name_and_type: Rc::new(Entry::NameAndType { name: utf8("m"), descriptor: utf8("()V") }),
        })
    }

    #[test]
    fn invokestatic_accepts_interface_methodref_at_version_eight() {
        let mut sizer = BytecodeSizer::new();
        let bytes = vec![opcodes::INVOKESTATIC, opcodes::END_MARKER];
        let idx = sizer.size_method(&mut Cursor::new(bytes)).unwrap();
        let band_bytes = Coding::UNSIGNED5.encode_value(0);
        let (mut bands, methods) = sizer.finish(&mut Cursor::new(band_bytes)).unwrap();

        let imethod = interface_methodref();
        let mut resolve = |tag: Tag, _idx: u32| -> Option<Rc<Entry>> {
            match tag {
                Tag::Methodref => None,
                Tag::InterfaceMethodref => Some(imethod.clone()),
                _ => None,
            }
        };
        let decoded = expand_method(&methods[idx], &mut bands, &mut resolve, None, None, 52, &[]).unwrap();
        assert_eq!(decoded.bytes[0], opcodes::INVOKESTATIC);
        assert_eq!(decoded.fixups[0].entry.tag(), Tag::InterfaceMethodref);
    }

    #[test]
    fn invokespecial_rejects_interface_methodref_before_version_eight() {
        let mut sizer = BytecodeSizer::new();
        let bytes = vec![opcodes::INVOKESPECIAL, opcodes::END_MARKER];
        let idx = sizer.size_method(&mut Cursor::new(bytes)).unwrap();
        let band_bytes = Coding::UNSIGNED5.encode_value(0);
        let (mut bands, methods) = sizer.finish(&mut Cursor::new(band_bytes)).unwrap();

        let imethod = interface_methodref();
        let mut resolve = |tag: Tag, _idx: u32| -> Option<Rc<Entry>> {
            match tag {
                Tag::Methodref => None,
                Tag::InterfaceMethodref => Some(imethod.clone()),
                _ => None,
            }
        };
        let err = expand_method(&methods[idx], &mut bands, &mut resolve, None, None, 51, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::OpcodeReferenceTagMismatch {
                opcode: opcodes::INVOKESPECIAL,
                expected: "Methodref",
                found: "InterfaceMethodref",
            }
        ));
    }
}
