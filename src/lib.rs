//! AArch64 code generation back-end for the NBCPL compiler.
//!
//! This crate consumes a fully parsed and semantically checked AST (plus a
//! symbol table and a class table, both modeled as traits so the front end
//! can supply its own implementation) and lowers it to a stream of
//! [`binemit::Instruction`] records targeting AArch64 / AAPCS64.
//!
//! The pipeline, leaves first, is: [`analysis`] (type propagation, metrics,
//! AST rewrites) -> [`super_call`] (SUPER-call desugaring) -> [`cfg`] +
//! [`liveness`] -> [`regalloc`] (linear scan) -> [`frame`] (call-frame
//! layout) -> [`codegen`] (the main instruction emitter, with
//! [`vector`] as its SIMD sub-component).
//!
//! The compiler is single-threaded and non-reentrant: all mutable state is
//! owned by a [`codegen::Compiler`] value that the embedder constructs once
//! per compilation unit.

#![deny(unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod binemit;
pub mod cfg;
pub mod class_table;
pub mod codegen;
pub mod error;
pub mod frame;
pub mod isa;
pub mod label;
pub mod liveness;
pub mod metrics;
pub mod regalloc;
pub mod register_manager;
pub mod settings;
pub mod super_call;
pub mod symbol;
pub mod types;
pub mod vector;

pub mod analysis;
pub mod ast;

pub use crate::error::{CodegenError, CodegenResult};
pub use crate::types::VarType;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stack canary constants emitted by the prologue and checked by the
/// epilogue (spec.md "Stack canary constants"). Bit-exact; do not change
/// without updating every existing JIT image that embeds them.
pub const UPPER_CANARY_VALUE: u64 = 0x1122_3344_5566_7788;
/// See [`UPPER_CANARY_VALUE`].
pub const LOWER_CANARY_VALUE: u64 = 0xAABB_CCDD_EEFF_0011;
