//! `VarType`: the bitfield sum type used throughout the compiler to
//! describe the type of a symbol, expression or literal.
//!
//! Equality is bitwise (spec.md section 3): `POINTER_TO | LIST | INTEGER`
//! is a distinct, valid combination describing a pointer to an integer
//! list, and it compares equal only to another value with exactly the
//! same bits set.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Base tags, modifiers and first-class SIMD vector tags, all packed into
/// one bitfield. Base tags and vector tags are mutually exclusive in
/// practice but are not enforced to be so at the type level, matching the
/// permissive C++ original (`VarType` there is a plain bitmask too).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarType(u32);

macro_rules! bitflag_consts {
    ($($(#[$meta:meta])* $name:ident = $bit:expr;)*) => {
        impl VarType {
            $(
                $(#[$meta])*
                pub const $name: VarType = VarType(1 << $bit);
            )*
        }
    };
}

bitflag_consts! {
    // Base tags.
    /// 64-bit signed integer.
    INTEGER = 0;
    /// 64-bit IEEE-754 double.
    FLOAT = 1;
    /// BCPL string (length-prefixed byte payload).
    STRING = 2;
    /// Dynamically typed value (runtime-tagged).
    ANY = 3;
    /// A class instance.
    OBJECT = 4;

    // Modifiers.
    /// The value is a pointer to the base/combined type.
    POINTER_TO = 8;
    /// The value is a list (head/tail/payload/length header).
    LIST = 9;
    /// The value is a heap-allocated vector (`VEC`/`FVEC`/`STRING n`).
    VEC = 10;
    /// The value is a read-only table literal (`TABLE`/`FTABLE`).
    TABLE = 11;
    /// The value is immutable.
    CONST = 12;

    // First-class SIMD vector tags (128 or 64 bit packed values).
    /// Two packed 32-bit integers in a 64-bit register.
    PAIR = 16;
    /// Two packed 32-bit floats in a 64-bit register.
    FPAIR = 17;
    /// Four packed 16-bit integers in a 64-bit register.
    QUAD = 18;
    /// Eight packed 8-bit integers in a 64-bit register.
    OCT = 19;
    /// Eight packed 32-bit floats, 256 bits, heap-resident.
    FOCT = 20;
    /// A heap-allocated array of PAIRs.
    PAIRS = 21;
    /// A heap-allocated array of FPAIRs.
    FPAIRS = 22;
}

impl VarType {
    /// The empty type: no bits set. Used as an accumulator starting point.
    pub const UNKNOWN: VarType = VarType(0);

    /// Combine `self` with `other`, keeping all bits from both.
    pub const fn with(self, other: VarType) -> VarType {
        VarType(self.0 | other.0)
    }

    /// True if every bit set in `mask` is also set in `self`.
    pub fn contains(self, mask: VarType) -> bool {
        (self.0 & mask.0) == mask.0
    }

    /// True if `self` and `mask` share at least one bit.
    pub fn intersects(self, mask: VarType) -> bool {
        (self.0 & mask.0) != 0
    }

    /// Strip `mask`'s bits out of `self`.
    pub fn without(self, mask: VarType) -> VarType {
        VarType(self.0 & !mask.0)
    }

    /// Raw bit pattern, for serialization or FFI boundaries.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct a `VarType` from a raw bit pattern.
    pub fn from_bits(bits: u32) -> VarType {
        VarType(bits)
    }

    /// True if this combination denotes one of the 128-bit-ish SIMD
    /// vector tags (`PAIR`, `FPAIR`, `QUAD`, `OCT`, `FOCT`, `PAIRS`,
    /// `FPAIRS`).
    pub fn is_simd_vector(self) -> bool {
        const SIMD_MASK: VarType = VarType(
            VarType::PAIR.0
                | VarType::FPAIR.0
                | VarType::QUAD.0
                | VarType::OCT.0
                | VarType::FOCT.0
                | VarType::PAIRS.0
                | VarType::FPAIRS.0,
        );
        self.intersects(SIMD_MASK)
    }

    /// True if this combination's scalar arithmetic is floating point:
    /// `FLOAT` itself, or a float-lane SIMD tag.
    pub fn is_float_like(self) -> bool {
        self.contains(VarType::FLOAT)
            || self.contains(VarType::FPAIR)
            || self.contains(VarType::FOCT)
            || self.contains(VarType::FPAIRS)
    }

    /// Size in bytes of one value of this type, as held in a register or a
    /// single stack/struct slot. Heap-resident aggregates (`VEC`,
    /// `TABLE`, `LIST` headers, `FOCT`, `PAIRS`) are pointers from the
    /// point of view of a register or stack slot; their backing storage
    /// size is not this function's concern.
    pub fn size_in_bytes(self) -> u32 {
        if self.contains(VarType::POINTER_TO)
            || self.contains(VarType::VEC)
            || self.contains(VarType::TABLE)
            || self.contains(VarType::LIST)
            || self.contains(VarType::OBJECT)
            || self.contains(VarType::FOCT)
            || self.contains(VarType::PAIRS)
            || self.contains(VarType::FPAIRS)
        {
            return 8;
        }
        if self.contains(VarType::INTEGER)
            || self.contains(VarType::FLOAT)
            || self.contains(VarType::STRING)
            || self.contains(VarType::ANY)
            || self.contains(VarType::PAIR)
            || self.contains(VarType::FPAIR)
            || self.contains(VarType::QUAD)
            || self.contains(VarType::OCT)
        {
            return 8;
        }
        // Unknown/empty combination: treat as a machine word, matching
        // the original's default-to-INTEGER behaviour for untyped slots.
        8
    }

    /// True if this type occupies a D/NEON-lane float argument register
    /// under the argument-coercion rules of spec.md 4.7/4.8 (plain
    /// `FLOAT`; SIMD float tags are passed as raw 64-bit bit patterns in
    /// X registers per 4.8, so they are excluded here).
    pub fn passes_in_float_register(self) -> bool {
        self.contains(VarType::FLOAT) && !self.is_simd_vector()
    }
}

impl BitOr for VarType {
    type Output = VarType;
    fn bitor(self, rhs: VarType) -> VarType {
        self.with(rhs)
    }
}

impl BitOrAssign for VarType {
    fn bitor_assign(&mut self, rhs: VarType) {
        *self = self.with(rhs);
    }
}

impl BitAnd for VarType {
    type Output = VarType;
    fn bitand(self, rhs: VarType) -> VarType {
        VarType(self.0 & rhs.0)
    }
}

impl fmt::Debug for VarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: &[(VarType, &str)] = &[
            (VarType::INTEGER, "INTEGER"),
            (VarType::FLOAT, "FLOAT"),
            (VarType::STRING, "STRING"),
            (VarType::ANY, "ANY"),
            (VarType::OBJECT, "OBJECT"),
            (VarType::POINTER_TO, "POINTER_TO"),
            (VarType::LIST, "LIST"),
            (VarType::VEC, "VEC"),
            (VarType::TABLE, "TABLE"),
            (VarType::CONST, "CONST"),
            (VarType::PAIR, "PAIR"),
            (VarType::FPAIR, "FPAIR"),
            (VarType::QUAD, "QUAD"),
            (VarType::OCT, "OCT"),
            (VarType::FOCT, "FOCT"),
            (VarType::PAIRS, "PAIRS"),
            (VarType::FPAIRS, "FPAIRS"),
        ];
        if self.0 == 0 {
            return write!(f, "UNKNOWN");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_types_are_bitwise_equal() {
        let a = VarType::POINTER_TO.with(VarType::LIST).with(VarType::INTEGER);
        let b = VarType::INTEGER.with(VarType::POINTER_TO).with(VarType::LIST);
        assert_eq!(a, b);
        assert!(a.contains(VarType::LIST));
        assert!(!a.contains(VarType::FLOAT));
    }

    #[test]
    fn scalar_and_vector_sizes() {
        assert_eq!(VarType::INTEGER.size_in_bytes(), 8);
        assert_eq!(VarType::FLOAT.size_in_bytes(), 8);
        assert_eq!(VarType::PAIR.size_in_bytes(), 8);
        assert_eq!(
            VarType::POINTER_TO.with(VarType::OBJECT).size_in_bytes(),
            8
        );
    }

    #[test]
    fn simd_and_float_like_classification() {
        assert!(VarType::FPAIR.is_simd_vector());
        assert!(VarType::FPAIR.is_float_like());
        assert!(VarType::PAIR.is_simd_vector());
        assert!(!VarType::PAIR.is_float_like());
        assert!(VarType::FLOAT.is_float_like());
        assert!(!VarType::FLOAT.is_simd_vector());
    }

    #[test]
    fn debug_formats_combined_flags() {
        let ty = VarType::POINTER_TO.with(VarType::LIST).with(VarType::INTEGER);
        assert_eq!(format!("{:?}", ty), "INTEGER|POINTER_TO|LIST");
    }
}
