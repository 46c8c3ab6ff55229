//! Error types for the AArch64 back-end.
//!
//! Three error kinds flow through the compiler (spec.md section 7):
//! semantic errors accumulate during analysis and are reported together;
//! compiler-internal invariant failures abort the current function's
//! compilation; runtime failures (bounds checks, canary mismatches) are
//! not Rust errors at all, they are trap instructions emitted into the
//! output stream.

use failure_derive::Fail;
use std::fmt;

/// A single semantic diagnostic collected during [`crate::analysis`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    /// Human-readable description of the problem.
    pub message: String,
    /// Name of the function in which the error was found, if any.
    pub function_name: Option<String>,
}

impl SemanticError {
    /// Create a new semantic error not attributed to a particular function.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            function_name: None,
        }
    }

    /// Attribute this error to the function currently being analysed.
    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.function_name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Compiler-internal invariant failures and fatal conditions.
///
/// These are never expected in a correct pipeline: a missing symbol-table
/// entry during code generation, an offset query issued before the
/// prologue was generated, an exhausted scratch-register pool, and so on.
/// They propagate to the top of the current function's compilation and
/// abort it; there is no partial-success result for a function once one of
/// these is raised.
#[derive(Debug, Fail)]
pub enum CodegenError {
    /// A name that should have been resolved via the register allocator,
    /// the call frame, or the register manager was not found anywhere.
    UnresolvedSymbol {
        /// The symbol that could not be found.
        name: String,
        /// The function being compiled when the lookup failed.
        function: String,
    },

    /// A [`crate::frame::CallFrame`] operation that requires the prologue
    /// to already (or not yet) be generated was called out of order.
    FrameSequencing {
        /// The function whose frame was misused.
        function: String,
        /// What went wrong.
        reason: String,
    },

    /// All registers in a pool were exhausted and no spill candidate was
    /// available — spec.md 4.6 "expression too complex".
    RegisterPoolExhausted {
        /// The pool that ran dry (e.g. "scratch", "fp-scratch", "vector").
        pool: String,
        /// The function being compiled.
        function: String,
    },

    /// An immediate value did not fit in the encoding being produced.
    ImmediateOutOfRange {
        /// The value that did not fit.
        value: i64,
        /// What the immediate was for.
        context: String,
        /// The function being compiled.
        function: String,
    },

    /// A SIMD lane index was out of range for the vector type being
    /// accessed.
    LaneOutOfRange {
        /// The offending lane index.
        index: u32,
        /// The vector type being indexed.
        ty: crate::types::VarType,
        /// The function being compiled.
        function: String,
    },

    /// Every accumulated semantic error, surfaced once analysis is
    /// complete. Carries the full list so the driver can report them all.
    Semantic(Vec<SemanticError>),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodegenError::UnresolvedSymbol { name, function } => {
                write!(f, "unresolved symbol '{}' in function '{}'", name, function)
            }
            CodegenError::FrameSequencing { function, reason } => {
                write!(f, "call frame for '{}' used out of order: {}", function, reason)
            }
            CodegenError::RegisterPoolExhausted { pool, function } => {
                write!(f, "register pool '{}' exhausted in function '{}'", pool, function)
            }
            CodegenError::ImmediateOutOfRange { value, context, function } => {
                write!(f, "immediate {} out of range for {} (function '{}')", value, context, function)
            }
            CodegenError::LaneOutOfRange { index, ty, function } => {
                write!(f, "lane index {} out of range for {:?} (function '{}')", index, ty, function)
            }
            CodegenError::Semantic(errors) => {
                write!(f, "{} semantic error(s)", errors.len())
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type CodegenResult<T> = Result<T, CodegenError>;
