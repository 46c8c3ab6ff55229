//! Calling convention identifiers.
//!
//! Narrower than `cranelift-codegen::isa::call_conv::CallConv` (which
//! spans several host platforms' ABIs): this back-end only ever targets
//! AAPCS64, plus an internal self-recursive tail-call convention used by
//! [`crate::codegen`]'s body-entry label (spec.md 4.7, "Emit the function
//! entry label, prologue, then a body-entry label for tail-call
//! optimisation of self-recursion").

use std::fmt;
use std::str::FromStr;

/// Calling convention used for a given call site.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// The standard AArch64 Procedure Call Standard.
    Aapcs64,
    /// A direct jump to a function's body-entry label, bypassing its own
    /// prologue, used only for tail-recursive self-calls.
    SelfTailCall,
}

impl CallConv {
    /// The convention used for every externally visible function and for
    /// every call to a runtime ABI symbol (spec.md section 6).
    pub fn default_for_target() -> Self {
        CallConv::Aapcs64
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CallConv::Aapcs64 => "aapcs64",
            CallConv::SelfTailCall => "self_tail_call",
        })
    }
}

impl FromStr for CallConv {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aapcs64" => Ok(CallConv::Aapcs64),
            "self_tail_call" => Ok(CallConv::SelfTailCall),
            _ => Err(()),
        }
    }
}
