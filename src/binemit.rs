//! Instruction records and the raw AArch64 encoder helpers every later
//! module builds on (spec.md sections 4.5, 4.7, 4.8).
//!
//! Grounded on the encoder call sites visible throughout
//! `examples/original_source` (`cf_generate_prologue.cpp`,
//! `cf_generate_epilogue.cpp`, `VectorCodeGen.cpp`): every encoder call
//! returns one instruction record carrying both the encoded word and a
//! human-readable assembly comment, and branches to a not-yet-placed
//! label carry the label's name rather than a resolved displacement.
//! `BitPatcher` itself mirrors the `patcher.patch(value, offset, width)`
//! calls seen throughout `VectorCodeGen.cpp` (e.g. `sub_vector_2s`'s
//! `0x2ea18400` base with `Rd`/`Rn`/`Rm` fields cleared and reset).
//!
//! Buffer positions use `cranelift-codegen::binemit::CodeOffset`'s
//! naming (`crate::binemit::relaxation`'s `CodeOffset` in the teacher
//! crate), even though this back-end never needs the rest of that
//! module's machinery — there is exactly one ISA and no relaxation.

use crate::isa::registers::Reg;

/// A byte position in the emitted code buffer.
pub type CodeOffset = u32;

/// Incrementally builds a 32-bit instruction word by clearing and setting
/// bit fields against a known base opcode.
#[derive(Debug, Clone, Copy)]
pub struct BitPatcher {
    value: u32,
}

impl BitPatcher {
    /// Start from a known-good base opcode word.
    pub fn new(base: u32) -> Self {
        Self { value: base }
    }

    /// Set bits `[offset, offset+width)` to `field_value`, clearing
    /// whatever was there first.
    pub fn patch(&mut self, field_value: u32, offset: u32, width: u32) -> &mut Self {
        let mask = if width >= 32 {
            u32::MAX
        } else {
            ((1u32 << width) - 1) << offset
        };
        self.value = (self.value & !mask) | ((field_value << offset) & mask);
        self
    }

    /// The instruction word built so far.
    pub fn value(self) -> u32 {
        self.value
    }
}

/// What one [`Instruction`] actually is: a fully resolved word, a bare
/// label definition (no code), or a branch whose displacement can only
/// be filled in once [`crate::label::LabelManager`] knows where its
/// target landed.
#[derive(Debug, Clone)]
pub enum InstructionEncoding {
    /// A complete 32-bit instruction word, ready to emit as-is.
    Word(u32),
    /// A pseudo-instruction marking where `name` is defined; contributes
    /// no bytes to the output.
    LabelDefinition(String),
    /// `base` has every field set except the branch displacement
    /// (`imm19`, bits 5-23), patched in once `target_label`'s offset is
    /// known.
    UnresolvedBranch { base: u32, target_label: String },
}

/// One emitted instruction or pseudo-instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// How this instruction encodes (or doesn't, for labels).
    pub encoding: InstructionEncoding,
    /// Disassembly-style comment, kept for debug output and tests; never
    /// consumed by the encoder itself.
    pub assembly_text: String,
}

impl Instruction {
    fn word(value: u32, assembly_text: impl Into<String>) -> Self {
        Self {
            encoding: InstructionEncoding::Word(value),
            assembly_text: assembly_text.into(),
        }
    }

    /// A bare label definition.
    pub fn label_definition(name: impl Into<String>) -> Self {
        Self {
            encoding: InstructionEncoding::LabelDefinition(name.into()),
            assembly_text: String::new(),
        }
    }
}

fn reg_num(r: Reg) -> u32 {
    u32::from(r.encoding())
}

/// `STP Xt, Xt2, [Xn, #imm]!` (64-bit, pre-indexed). `imm` must be a
/// multiple of 8 in `[-512, 504]`.
pub fn create_stp_pre_imm(rt: Reg, rt2: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) & 0x7F;
    let word = BitPatcher::new(0xA980_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rt2), 10, 5)
        .patch(scaled as u32, 15, 7)
        .value();
    Instruction::word(
        word,
        format!(
            "stp {}, {}, [{}, #{}]!",
            rt.name(),
            rt2.name(),
            rn.name(),
            imm
        ),
    )
}

/// `STP Xt, Xt2, [Xn, #imm]` (64-bit, signed offset, no write-back).
pub fn create_stp_imm(rt: Reg, rt2: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) & 0x7F;
    let word = BitPatcher::new(0xA900_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rt2), 10, 5)
        .patch(scaled as u32, 15, 7)
        .value();
    Instruction::word(
        word,
        format!("stp {}, {}, [{}, #{}]", rt.name(), rt2.name(), rn.name(), imm),
    )
}

/// `SUB Xd, Xn, #imm` (64-bit immediate, `imm` in `[0, 4095]`).
pub fn create_sub_imm(rd: Reg, rn: Reg, imm: u32) -> Instruction {
    let word = BitPatcher::new(0xD100_0000)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(imm, 10, 12)
        .value();
    Instruction::word(word, format!("sub {}, {}, #{}", rd.name(), rn.name(), imm))
}

/// `ADD Xd, Xn, #imm` (64-bit immediate, `imm` in `[0, 4095]`).
pub fn create_add_imm(rd: Reg, rn: Reg, imm: u32) -> Instruction {
    let word = BitPatcher::new(0x9100_0000)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(imm, 10, 12)
        .value();
    Instruction::word(word, format!("add {}, {}, #{}", rd.name(), rn.name(), imm))
}

/// `MOV X29, SP` — the frame-pointer establishment move, an `ADD
/// Xd, Xn, #0` alias.
pub fn create_mov_fp_sp() -> Instruction {
    let mut instr = create_add_imm(Reg::FP, Reg::SP, 0);
    instr.assembly_text = "mov fp, sp".to_string();
    instr
}

/// `MOV SP, X29` — frame deallocation, an `ADD Xd, Xn, #0` alias.
pub fn create_mov_sp_fp() -> Instruction {
    let mut instr = create_add_imm(Reg::SP, Reg::FP, 0);
    instr.assembly_text = "mov sp, fp".to_string();
    instr
}

/// `MOVZ`+`MOVK`×3 sequence loading a full 64-bit immediate into `rd`
/// (spec.md 4.5, canary load sequence).
pub fn create_movz_movk_abs64(rd: Reg, value: u64) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(4);
    for hw in 0..4u32 {
        let chunk = ((value >> (hw * 16)) & 0xFFFF) as u32;
        let base = if hw == 0 { 0xD280_0000 } else { 0xF280_0000 };
        let word = BitPatcher::new(base)
            .patch(reg_num(rd), 0, 5)
            .patch(chunk, 5, 16)
            .patch(hw, 21, 2)
            .value();
        let mnemonic = if hw == 0 { "movz" } else { "movk" };
        out.push(Instruction::word(
            word,
            format!("{} {}, #{:#x}, lsl #{}", mnemonic, rd.name(), chunk, hw * 16),
        ));
    }
    out
}

/// `STR Xt, [Xn, #imm]` (64-bit, unsigned offset, multiple of 8).
pub fn create_str_imm(rt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) as u32;
    let word = BitPatcher::new(0xF900_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("str {}, [{}, #{}]", rt.name(), rn.name(), imm))
}

/// `STR Dt, [Xn, #imm]` (64-bit scalar FP, unsigned offset).
pub fn create_str_fp_imm(rt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) as u32;
    let word = BitPatcher::new(0xFD00_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("str {}, [{}, #{}]", rt.name(), rn.name(), imm))
}

/// `LDR Xt, [Xn, #imm]` (64-bit, unsigned offset).
pub fn create_ldr_imm(rt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) as u32;
    let word = BitPatcher::new(0xF940_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("ldr {}, [{}, #{}]", rt.name(), rn.name(), imm))
}

/// `LDR Dt, [Xn, #imm]` (64-bit scalar FP, unsigned offset).
pub fn create_ldr_fp_imm(rt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 8, 0);
    let scaled = (imm / 8) as u32;
    let word = BitPatcher::new(0xFD40_0000)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("ldr {}, [{}, #{}]", rt.name(), rn.name(), imm))
}

/// `CMP Xn, Xm` (64-bit register), a `SUBS XZR, Xn, Xm` alias.
pub fn create_cmp_reg(rn: Reg, rm: Reg) -> Instruction {
    let word = BitPatcher::new(0xEB00_001F)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rm), 16, 5)
        .value();
    Instruction::word(word, format!("cmp {}, {}", rn.name(), rm.name()))
}

/// `CMP Xn, #imm` (64-bit, `imm` in `[0, 4095]`), a `SUBS XZR, Xn, #imm` alias.
pub fn create_cmp_imm(rn: Reg, imm: u32) -> Instruction {
    let word = BitPatcher::new(0xF100_001F)
        .patch(reg_num(rn), 5, 5)
        .patch(imm, 10, 12)
        .value();
    Instruction::word(word, format!("cmp {}, #{}", rn.name(), imm))
}

/// AArch64 condition codes used by `B.cond`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Ge,
    Lt,
    Gt,
    Le,
    /// Unsigned higher-or-same (spec.md 4.7, bounds checking).
    Hs,
    /// Unsigned lower.
    Lo,
}

impl Condition {
    fn encoding(self) -> u32 {
        match self {
            Condition::Eq => 0b0000,
            Condition::Ne => 0b0001,
            Condition::Hs => 0b0010,
            Condition::Lo => 0b0011,
            Condition::Ge => 0b1010,
            Condition::Lt => 0b1011,
            Condition::Gt => 0b1100,
            Condition::Le => 0b1101,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Ge => "ge",
            Condition::Lt => "lt",
            Condition::Gt => "gt",
            Condition::Le => "le",
            Condition::Hs => "hs",
            Condition::Lo => "lo",
        }
    }
}

/// `B.cond target_label`, with `imm19` left for [`crate::label`] to fill
/// in once `target_label`'s final offset is known.
pub fn create_branch_conditional(cond: Condition, target_label: impl Into<String>) -> Instruction {
    let base = BitPatcher::new(0x5400_0000).patch(cond.encoding(), 0, 4).value();
    let target_label = target_label.into();
    Instruction {
        encoding: InstructionEncoding::UnresolvedBranch {
            base,
            target_label: target_label.clone(),
        },
        assembly_text: format!("b.{} {}", cond.mnemonic(), target_label),
    }
}

/// `B target_label`, unconditional.
pub fn create_branch_unconditional(target_label: impl Into<String>) -> Instruction {
    let base = 0x1400_0000u32;
    let target_label = target_label.into();
    Instruction {
        encoding: InstructionEncoding::UnresolvedBranch {
            base,
            target_label: target_label.clone(),
        },
        assembly_text: format!("b {}", target_label),
    }
}

/// `BL target_label`, a direct call.
pub fn create_branch_link(target_label: impl Into<String>) -> Instruction {
    let base = 0x9400_0000u32;
    let target_label = target_label.into();
    Instruction {
        encoding: InstructionEncoding::UnresolvedBranch {
            base,
            target_label: target_label.clone(),
        },
        assembly_text: format!("bl {}", target_label),
    }
}

/// `RET` (return via `X30`).
pub fn create_return() -> Instruction {
    Instruction::word(0xD65F_03C0, "ret")
}

/// `BLR Xn` — indirect call through a register (virtual dispatch).
pub fn create_blr(rn: Reg) -> Instruction {
    let word = BitPatcher::new(0xD63F_0000).patch(reg_num(rn), 5, 5).value();
    Instruction::word(word, format!("blr {}", rn.name()))
}

/// `BRK #imm16`.
pub fn create_brk(imm: u16) -> Instruction {
    let word = BitPatcher::new(0xD420_0000).patch(u32::from(imm), 5, 16).value();
    Instruction::word(word, format!("brk #{}", imm))
}

/// `MOV Xd, Xn` (64-bit register move, an `ORR Xd, XZR, Xn` alias).
pub fn create_mov_reg(rd: Reg, rn: Reg) -> Instruction {
    let word = BitPatcher::new(0xAA00_03E0)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 16, 5)
        .value();
    Instruction::word(word, format!("mov {}, {}", rd.name(), rn.name()))
}

/// Three-register ALU form shared by `ADD`/`SUB`/`MUL`/`SDIV`/`AND`/`ORR`/`EOR`.
fn three_reg(base: u32, rd: Reg, rn: Reg, rm: Reg) -> u32 {
    BitPatcher::new(base)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rm), 16, 5)
        .value()
}

/// `ADD Xd, Xn, Xm` (64-bit register).
pub fn create_add_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x8B00_0000, rd, rn, rm),
        format!("add {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `SUB Xd, Xn, Xm` (64-bit register).
pub fn create_sub_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0xCB00_0000, rd, rn, rm),
        format!("sub {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `MUL Xd, Xn, Xm` (64-bit register), a `MADD Xd, Xn, Xm, XZR` alias.
pub fn create_mul_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    let word = BitPatcher::new(0x9B00_7C00)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rm), 16, 5)
        .value();
    Instruction::word(word, format!("mul {}, {}, {}", rd.name(), rn.name(), rm.name()))
}

/// `SDIV Xd, Xn, Xm` (64-bit signed division).
pub fn create_sdiv_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x9AC0_0C00, rd, rn, rm),
        format!("sdiv {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `AND Xd, Xn, Xm` (64-bit register).
pub fn create_and_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x8A00_0000, rd, rn, rm),
        format!("and {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `ORR Xd, Xn, Xm` (64-bit register).
pub fn create_orr_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0xAA00_0000, rd, rn, rm),
        format!("orr {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `EOR Xd, Xn, Xm` (64-bit register).
pub fn create_eor_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0xCA00_0000, rd, rn, rm),
        format!("eor {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `LSL Xd, Xn, Xm` (64-bit register), an `LSLV` alias.
pub fn create_lsl_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x9AC0_2000, rd, rn, rm),
        format!("lsl {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `LSR Xd, Xn, Xm` (64-bit register), an `LSRV` alias.
pub fn create_lsr_reg(rd: Reg, rn: Reg, rm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x9AC0_2400, rd, rn, rm),
        format!("lsr {}, {}, {}", rd.name(), rn.name(), rm.name()),
    )
}

/// `NEG Xd, Xn` (64-bit), a `SUB Xd, XZR, Xn` alias.
pub fn create_neg_reg(rd: Reg, rn: Reg) -> Instruction {
    let word = BitPatcher::new(0xCB00_03E0)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 16, 5)
        .value();
    Instruction::word(word, format!("neg {}, {}", rd.name(), rn.name()))
}

/// `MVN Xd, Xn` (64-bit bitwise NOT), an `ORN Xd, XZR, Xn` alias.
pub fn create_mvn_reg(rd: Reg, rn: Reg) -> Instruction {
    let word = BitPatcher::new(0xAA20_03E0)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 16, 5)
        .value();
    Instruction::word(word, format!("mvn {}, {}", rd.name(), rn.name()))
}

/// `CSET Xd, cond` — set `rd` to 1 if `cond` holds, else 0.
pub fn create_cset(rd: Reg, cond: Condition) -> Instruction {
    let inverted = cond.invert().encoding();
    let word = BitPatcher::new(0x9A9F_07E0)
        .patch(reg_num(rd), 0, 5)
        .patch(inverted, 12, 4)
        .value();
    Instruction::word(word, format!("cset {}, {}", rd.name(), cond.mnemonic()))
}

/// `SBFX Xd, Xn, #lsb, #width` — signed bitfield extract.
pub fn create_sbfx(rd: Reg, rn: Reg, lsb: u32, width: u32) -> Instruction {
    let imms = lsb + width - 1;
    let word = BitPatcher::new(0x9340_0000)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(imms, 10, 6)
        .patch(lsb, 16, 6)
        .value();
    Instruction::word(word, format!("sbfx {}, {}, #{}, #{}", rd.name(), rn.name(), lsb, width))
}

/// `BFI Xd, Xn, #lsb, #width` — bitfield insert, preserving the rest of `rd`.
pub fn create_bfi(rd: Reg, rn: Reg, lsb: u32, width: u32) -> Instruction {
    let immr = (64 - lsb) % 64;
    let imms = width - 1;
    let word = BitPatcher::new(0xB340_0000)
        .patch(reg_num(rd), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(imms, 10, 6)
        .patch(immr, 16, 6)
        .value();
    Instruction::word(word, format!("bfi {}, {}, #{}, #{}", rd.name(), rn.name(), lsb, width))
}

/// `SCVTF Dd, Xn` — signed integer to double-precision float.
pub fn create_scvtf(dd: Reg, xn: Reg) -> Instruction {
    let word = BitPatcher::new(0x9E62_0000)
        .patch(reg_num(dd), 0, 5)
        .patch(reg_num(xn), 5, 5)
        .value();
    Instruction::word(word, format!("scvtf {}, {}", dd.name(), xn.name()))
}

/// `FCVTZS Xd, Dn` — truncating double-precision float to signed integer.
pub fn create_fcvtzs(xd: Reg, dn: Reg) -> Instruction {
    let word = BitPatcher::new(0x9E78_0000)
        .patch(reg_num(xd), 0, 5)
        .patch(reg_num(dn), 5, 5)
        .value();
    Instruction::word(word, format!("fcvtzs {}, {}", xd.name(), dn.name()))
}

/// `FMOV Dd, Xn` — bit-preserving move from a 64-bit `X` register into a
/// `D` register (`examples/original_source/VectorCodeGen.cpp`'s
/// `vecgen_fmov_x_to_d`, base `0x9E670000`).
pub fn create_fmov_x_to_d(dd: Reg, xn: Reg) -> Instruction {
    let word = BitPatcher::new(0x9E67_0000)
        .patch(reg_num(dd), 0, 5)
        .patch(reg_num(xn), 5, 5)
        .value();
    Instruction::word(word, format!("fmov {}, {}", dd.name(), xn.name()))
}

/// `FMOV Xd, Dn` — the mirror of [`create_fmov_x_to_d`], base `0x9E660000`.
pub fn create_fmov_d_to_x(xd: Reg, dn: Reg) -> Instruction {
    let word = BitPatcher::new(0x9E66_0000)
        .patch(reg_num(xd), 0, 5)
        .patch(reg_num(dn), 5, 5)
        .value();
    Instruction::word(word, format!("fmov {}, {}", xd.name(), dn.name()))
}

/// `FADD Dd, Dn, Dm` (scalar double-precision).
pub fn create_fadd_scalar(dd: Reg, dn: Reg, dm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x1E60_2800, dd, dn, dm),
        format!("fadd {}, {}, {}", dd.name(), dn.name(), dm.name()),
    )
}

/// `FSUB Dd, Dn, Dm` (scalar double-precision).
pub fn create_fsub_scalar(dd: Reg, dn: Reg, dm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x1E60_3800, dd, dn, dm),
        format!("fsub {}, {}, {}", dd.name(), dn.name(), dm.name()),
    )
}

/// `FMUL Dd, Dn, Dm` (scalar double-precision).
pub fn create_fmul_scalar(dd: Reg, dn: Reg, dm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x1E60_0800, dd, dn, dm),
        format!("fmul {}, {}, {}", dd.name(), dn.name(), dm.name()),
    )
}

/// `FDIV Dd, Dn, Dm` (scalar double-precision).
pub fn create_fdiv_scalar(dd: Reg, dn: Reg, dm: Reg) -> Instruction {
    Instruction::word(
        three_reg(0x1E60_1800, dd, dn, dm),
        format!("fdiv {}, {}, {}", dd.name(), dn.name(), dm.name()),
    )
}

/// `FMOV Dd, Dn` (scalar double-precision register move).
pub fn create_fmov_reg(dd: Reg, dn: Reg) -> Instruction {
    let word = BitPatcher::new(0x1E60_4000)
        .patch(reg_num(dd), 0, 5)
        .patch(reg_num(dn), 5, 5)
        .value();
    Instruction::word(word, format!("fmov {}, {}", dd.name(), dn.name()))
}

/// `FCMP Dn, Dm` (scalar double-precision).
pub fn create_fcmp_scalar(dn: Reg, dm: Reg) -> Instruction {
    let word = BitPatcher::new(0x1E60_2000)
        .patch(reg_num(dn), 5, 5)
        .patch(reg_num(dm), 16, 5)
        .value();
    Instruction::word(word, format!("fcmp {}, {}", dn.name(), dm.name()))
}

/// `LDR Xt, [Xn, Xm]` (64-bit, register offset, used for scaled vector and
/// list-element addressing).
pub fn create_ldr_reg_offset(rt: Reg, rn: Reg, rm: Reg) -> Instruction {
    let word = BitPatcher::new(0xF868_6800)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rm), 16, 5)
        .value();
    Instruction::word(word, format!("ldr {}, [{}, {}]", rt.name(), rn.name(), rm.name()))
}

/// `STR Xt, [Xn, Xm]` (64-bit, register offset).
pub fn create_str_reg_offset(rt: Reg, rn: Reg, rm: Reg) -> Instruction {
    let word = BitPatcher::new(0xF828_6800)
        .patch(reg_num(rt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(reg_num(rm), 16, 5)
        .value();
    Instruction::word(word, format!("str {}, [{}, {}]", rt.name(), rn.name(), rm.name()))
}

/// `LDR Qt, [Xn, #imm]` (128-bit NEON load, unsigned offset scaled by 16;
/// base+Q-bit grounded on `VectorCodeGen.cpp`'s `vecgen_ldr_q`).
pub fn create_ldr_q_imm(qt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 16, 0);
    let scaled = (imm / 16) as u32;
    let word = BitPatcher::new(0x7D40_0000)
        .patch(reg_num(qt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("ldr {}, [{}, #{}]", qt.name(), rn.name(), imm))
}

/// `STR Qt, [Xn, #imm]` (128-bit NEON store, unsigned offset scaled by 16).
pub fn create_str_q_imm(qt: Reg, rn: Reg, imm: i32) -> Instruction {
    debug_assert_eq!(imm % 16, 0);
    let scaled = (imm / 16) as u32;
    let word = BitPatcher::new(0x7D00_0000)
        .patch(reg_num(qt), 0, 5)
        .patch(reg_num(rn), 5, 5)
        .patch(scaled, 10, 12)
        .value();
    Instruction::word(word, format!("str {}, [{}, #{}]", qt.name(), rn.name(), imm))
}

impl Condition {
    fn invert(self) -> Condition {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Ge => Condition::Lt,
            Condition::Lt => Condition::Ge,
            Condition::Gt => Condition::Le,
            Condition::Le => Condition::Gt,
            Condition::Hs => Condition::Lo,
            Condition::Lo => Condition::Hs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_patcher_clears_before_setting() {
        let mut p = BitPatcher::new(0xFFFF_FFFF);
        p.patch(0, 0, 5);
        assert_eq!(p.value() & 0x1F, 0);
        p.patch(0b10101, 0, 5);
        assert_eq!(p.value() & 0x1F, 0b10101);
    }

    #[test]
    fn stp_pre_imm_encodes_rt_rn_rt2_and_offset() {
        let instr = create_stp_pre_imm(Reg::FP, Reg::LR, Reg::SP, -16);
        if let InstructionEncoding::Word(word) = instr.encoding {
            assert_eq!(word & 0x1F, 29); // Rt = FP
            assert_eq!((word >> 5) & 0x1F, 31); // Rn = SP
            assert_eq!((word >> 10) & 0x1F, 30); // Rt2 = LR
            let imm7 = (word >> 15) & 0x7F;
            assert_eq!(imm7, (-2i32 as u32) & 0x7F); // -16/8 = -2
        } else {
            panic!("expected a resolved word");
        }
    }

    #[test]
    fn movz_movk_sequence_covers_all_four_halfwords() {
        let instrs = create_movz_movk_abs64(Reg::x(9), 0x1122_3344_5566_7788);
        assert_eq!(instrs.len(), 4);
        for (hw, instr) in instrs.iter().enumerate() {
            if let InstructionEncoding::Word(word) = instr.encoding {
                assert_eq!((word >> 21) & 0b11, hw as u32);
            } else {
                panic!("expected a resolved word");
            }
        }
    }

    #[test]
    fn sbfx_and_bfi_round_trip_lsb_and_width() {
        let extract = create_sbfx(Reg::x(1), Reg::x(0), 32, 32);
        if let InstructionEncoding::Word(word) = extract.encoding {
            assert_eq!((word >> 16) & 0x3F, 32); // immr = lsb
            assert_eq!((word >> 10) & 0x3F, 63); // imms = lsb+width-1
        } else {
            panic!("expected a resolved word");
        }

        let insert = create_bfi(Reg::x(1), Reg::x(0), 0, 32);
        if let InstructionEncoding::Word(word) = insert.encoding {
            assert_eq!((word >> 10) & 0x3F, 31); // imms = width-1
        } else {
            panic!("expected a resolved word");
        }
    }

    #[test]
    fn scvtf_and_fcvtzs_reference_expected_registers() {
        let to_float = create_scvtf(Reg::d(2), Reg::x(3));
        assert!(to_float.assembly_text.contains("d2"));
        assert!(to_float.assembly_text.contains("x3"));
        let to_int = create_fcvtzs(Reg::x(4), Reg::d(5));
        assert!(to_int.assembly_text.contains("x4"));
        assert!(to_int.assembly_text.contains("d5"));
    }

    #[test]
    fn conditional_branch_is_unresolved_until_labels_are_placed() {
        let instr = create_branch_conditional(Condition::Ne, "foo_stackprot_upper");
        match instr.encoding {
            InstructionEncoding::UnresolvedBranch { target_label, .. } => {
                assert_eq!(target_label, "foo_stackprot_upper");
            }
            _ => panic!("expected an unresolved branch"),
        }
    }
}
