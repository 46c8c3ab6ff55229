//! Concrete AArch64 registers, their encodings and their ABI roles.
//!
//! Three banks, following the shape of `cranelift-codegen`'s generic
//! `RegBank` (contiguous range, `prefix`+ decimal naming, a parse/display
//! pair) but hand-specialised to AArch64 since there is only one ISA here:
//!
//! - General purpose: `X0`-`X30`, plus the zero register/stack pointer.
//! - Scalar floating point: `D0`-`D31` (the low 64 bits of `V0`-`V31`).
//! - NEON vector: `V0`-`V31` (128-bit), addressed via `.2S`/`.4S`/`.2D`
//!   arrangements by the code generator.

use std::fmt;

/// Which bank a [`Reg`] belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// 64-bit general-purpose integer registers.
    Gpr,
    /// 64-bit scalar floating-point registers (low half of a `V` register).
    Fpr,
    /// 128-bit NEON vector registers.
    Vec,
}

/// A physical AArch64 register.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Reg {
    class: RegClass,
    /// Register number within its bank, 0-31 (`X`/`D`/`V` share the
    /// 0-31 numbering space; `Sp`/`Fp`/`Lr` are aliases of X31/X29/X30
    /// exposed as named constants below for readability at call sites).
    number: u8,
}

impl Reg {
    /// Construct a general-purpose register `Xn`. Panics if `n > 30`; use
    /// [`Reg::SP`] for the stack pointer, whose encoding (31) is special.
    pub const fn x(n: u8) -> Reg {
        Reg {
            class: RegClass::Gpr,
            number: n,
        }
    }

    /// Construct a scalar floating-point register `Dn`.
    pub const fn d(n: u8) -> Reg {
        Reg {
            class: RegClass::Fpr,
            number: n,
        }
    }

    /// Construct a 128-bit NEON register `Vn` (also written `Qn` when the
    /// assembly text refers to the whole 128 bits rather than an
    /// arrangement).
    pub const fn v(n: u8) -> Reg {
        Reg {
            class: RegClass::Vec,
            number: n,
        }
    }

    /// Frame pointer, `X29`.
    pub const FP: Reg = Reg::x(29);
    /// Link register, `X30`.
    pub const LR: Reg = Reg::x(30);
    /// Stack pointer. Encodes to 31 in load/store and data-processing
    /// forms that accept SP; callers must not confuse this with the zero
    /// register, which shares the same encoding in other instruction
    /// classes.
    pub const SP: Reg = Reg::x(31);
    /// Global-pointer-table base, by this back-end's convention.
    pub const GLOBAL_BASE: Reg = Reg::x(28);
    /// Runtime-function veneer table base, by this back-end's convention.
    pub const VENEER_BASE: Reg = Reg::x(19);

    /// Which bank this register belongs to.
    pub fn class(self) -> RegClass {
        self.class
    }

    /// Register number within its bank (0-31).
    pub fn number(self) -> u8 {
        self.number
    }

    /// The 5-bit field value used to encode this register as Rd/Rn/Rm/Rt
    /// in a 32-bit instruction word.
    pub fn encoding(self) -> u32 {
        u32::from(self.number)
    }

    /// Assembly mnemonic, e.g. `"x3"`, `"d8"`, `"v0"`.
    pub fn name(self) -> String {
        match self.class {
            RegClass::Gpr if self.number == 29 => "fp".to_string(),
            RegClass::Gpr if self.number == 30 => "lr".to_string(),
            RegClass::Gpr if self.number == 31 => "sp".to_string(),
            RegClass::Gpr => format!("x{}", self.number),
            RegClass::Fpr => format!("d{}", self.number),
            RegClass::Vec => format!("v{}", self.number),
        }
    }

    /// Upper-case assembly mnemonic, matching the style used throughout
    /// `examples/original_source` (`"X3"`, `"D8"`, `"V0"`).
    pub fn name_upper(self) -> String {
        self.name().to_uppercase()
    }

    /// True if this register is preserved across a call under AAPCS64 and
    /// therefore a legal home for a call-crossing variable (spec.md
    /// property P2): `X19`-`X28` and `D8`-`D15`. `V` registers alias `D`
    /// registers for this purpose; only the callee-saved `D`/`V8`-`V15`
    /// range is considered variable-safe.
    pub fn is_callee_saved(self) -> bool {
        match self.class {
            RegClass::Gpr => (19..=28).contains(&self.number),
            RegClass::Fpr => (8..=15).contains(&self.number),
            RegClass::Vec => (8..=15).contains(&self.number),
        }
    }

    /// True if this register is clobbered by a `BL`/`BLR` under AAPCS64.
    pub fn is_caller_saved(self) -> bool {
        match self.class {
            RegClass::Gpr => self.number <= 17 || self.number == 30,
            RegClass::Fpr => self.number <= 7 || (16..=31).contains(&self.number),
            RegClass::Vec => self.number <= 7 || (16..=31).contains(&self.number),
        }
    }

    /// True if this register is reserved by the ABI/this back-end's own
    /// conventions and therefore excluded from every allocation pool
    /// (spec.md 4.4): `SP`, `FP`, `LR`, and the two register used as
    /// fixed bases, `X19` (veneer/runtime-table base) and `X28` (global
    /// data-segment base).
    pub fn is_reserved(self) -> bool {
        self == Reg::SP
            || self == Reg::FP
            || self == Reg::LR
            || self == Reg::GLOBAL_BASE
            || self == Reg::VENEER_BASE
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name_upper())
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name_upper())
    }
}

/// Parse a register name such as `"X19"`, `"d8"`, `"V3"`, `"FP"`, `"SP"`.
/// Case-insensitive, matching the original encoder's string-keyed
/// register API.
pub fn parse_reg(name: &str) -> Option<Reg> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "FP" => return Some(Reg::FP),
        "LR" => return Some(Reg::LR),
        "SP" => return Some(Reg::SP),
        "XZR" | "WZR" => return Some(Reg::x(31)),
        _ => {}
    }
    let (prefix, rest) = upper.split_at(1);
    let n: u8 = rest.parse().ok()?;
    match prefix {
        "X" | "W" if n <= 31 => Some(Reg::x(n)),
        "D" | "S" if n <= 31 => Some(Reg::d(n)),
        "V" | "Q" if n <= 31 => Some(Reg::v(n)),
        _ => None,
    }
}

/// Register pools used by [`crate::register_manager`] and
/// [`crate::regalloc`], grounded 1:1 on `RegisterManager.cpp`'s static
/// pool tables.
pub mod pools {
    use super::Reg;

    /// `X19`-`X27`: the sole pool for spillable, allocator-assigned
    /// integer variables. `X28` is excluded here because this back-end
    /// reserves it as the global-data-segment base whenever a function
    /// touches globals (spec.md 4.5 prologue algorithm).
    pub fn variable_gpr() -> Vec<Reg> {
        (19..=27).map(Reg::x).collect()
    }

    /// `X0`-`X15`: caller-saved scratch pool for short-lived values.
    pub fn scratch_gpr() -> Vec<Reg> {
        (0..=15).map(Reg::x).collect()
    }

    /// `D8`-`D15`: callee-saved floating-point variable pool.
    pub fn variable_fpr() -> Vec<Reg> {
        (8..=15).map(Reg::d).collect()
    }

    /// `D0`-`D7`, `D16`-`D31`: caller-saved floating-point scratch pool.
    pub fn scratch_fpr() -> Vec<Reg> {
        (0..=7).chain(16..=31).map(Reg::d).collect()
    }

    /// `V8`-`V15`: callee-saved NEON variable pool.
    pub fn variable_vec() -> Vec<Reg> {
        (8..=15).map(Reg::v).collect()
    }

    /// `V0`-`V7`, `V16`-`V31`: caller-saved NEON scratch pool.
    pub fn scratch_vec() -> Vec<Reg> {
        (0..=7).chain(16..=31).map(Reg::v).collect()
    }

    /// `X19`-`X28`: every callee-saved temp a
    /// `acquire_callee_saved_temp_reg` call may hand out, indexed the way
    /// `RegisterManager::get_callee_saved_temp_reg_name` does.
    pub fn callee_saved_temp(index: usize) -> Option<Reg> {
        if index < 10 {
            Some(Reg::x(19 + index as u8))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        for name in ["X19", "d8", "V3", "FP", "SP", "LR"] {
            let reg = parse_reg(name).unwrap();
            let back = parse_reg(&reg.name_upper()).unwrap();
            assert_eq!(reg, back);
        }
    }

    #[test]
    fn callee_vs_caller_saved_partitions_are_disjoint() {
        for n in 0..=30u8 {
            let r = Reg::x(n);
            assert!(!(r.is_callee_saved() && r.is_caller_saved()));
        }
    }

    #[test]
    fn reserved_registers_excluded_from_pools() {
        assert!(Reg::SP.is_reserved());
        assert!(Reg::FP.is_reserved());
        assert!(Reg::LR.is_reserved());
        assert!(Reg::GLOBAL_BASE.is_reserved());
        assert!(Reg::VENEER_BASE.is_reserved());
        assert!(!pools::variable_gpr().contains(&Reg::GLOBAL_BASE));
        assert!(!pools::variable_gpr().contains(&Reg::VENEER_BASE));
    }

    #[test]
    fn variable_pool_matches_register_manager_cpp() {
        let names: Vec<String> = pools::variable_gpr().iter().map(|r| r.name_upper()).collect();
        assert_eq!(
            names,
            vec!["X19", "X20", "X21", "X22", "X23", "X24", "X25", "X26", "X27"]
        );
    }
}
