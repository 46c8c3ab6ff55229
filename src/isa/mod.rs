//! AArch64 instruction-set description.
//!
//! cranelift-codegen describes an ISA generically (banks of register
//! units, classes generated from a DSL by its `meta` crate) because it
//! targets x86, arm32, arm64 and riscv from one codebase. This crate only
//! ever targets AArch64 / AAPCS64, so the generic `RegBank`/`RegClass`
//! machinery is replaced by a small concrete register enum in
//! [`registers`], keeping the same *shape* (banks, a parse/display pair,
//! register-unit numbering) that `cranelift-codegen::isa::registers`
//! established.

pub mod call_conv;
pub mod registers;

pub use call_conv::CallConv;
pub use registers::Reg;
