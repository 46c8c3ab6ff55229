//! Compilation flags.
//!
//! Modeled on the builder shape of cranelift's generated `settings.rs`
//! (a flat set of named flags queried throughout the pipeline), but
//! hand-written here: this crate targets exactly one ISA, so it has no
//! need for cranelift's meta/DSL settings-table generator.

/// Flags controlling optional behaviour of the analyser, register
/// allocator and code generator. Constructed once per compilation unit
/// and threaded by reference through every pass.
#[derive(Debug, Clone)]
pub struct Flags {
    /// Use the NEON fast path in the vector code generator; when `false`,
    /// unsupported NEON arrangements fall back to scalar lowering
    /// wherever possible and abort only when no scalar path exists
    /// (spec.md section 7, "`--no-neon`").
    pub enable_neon: bool,

    /// Emit bounds checks before vector/string element access (spec.md
    /// section 4.7, "Bounds checking").
    pub enable_bounds_checks: bool,

    /// Emit and verify stack canaries in the prologue/epilogue (spec.md
    /// section 4.5).
    pub enable_stack_canaries: bool,

    /// Fold FOR-loop `end`/`step` expressions known to be constant at
    /// compile time, skipping backing-variable allocation (spec.md
    /// section 4.1, "FOR-loop variable renaming"; property P7).
    pub fold_for_loop_constants: bool,

    /// Enable local value numbering for literal/variable re-materialisation
    /// (spec.md section 4.7, "Local value tracking").
    pub enable_known_address_tracking: bool,

    /// Emit `trace!`-level diagnostics (register spill decisions, frame
    /// layout dumps) in addition to the default `debug!`-level ones.
    pub verbose: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            enable_neon: true,
            enable_bounds_checks: true,
            enable_stack_canaries: false,
            fold_for_loop_constants: true,
            enable_known_address_tracking: true,
            verbose: false,
        }
    }
}

impl Flags {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mirroring cranelift's `set_*` generated
    /// methods closely enough to be familiar while staying a plain method
    /// chain instead of a string-keyed setter.
    pub fn with_neon(mut self, enabled: bool) -> Self {
        self.enable_neon = enabled;
        self
    }

    /// See [`Flags::enable_stack_canaries`].
    pub fn with_stack_canaries(mut self, enabled: bool) -> Self {
        self.enable_stack_canaries = enabled;
        self
    }

    /// See [`Flags::enable_bounds_checks`].
    pub fn with_bounds_checks(mut self, enabled: bool) -> Self {
        self.enable_bounds_checks = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let flags = Flags::default();
        assert!(flags.enable_neon);
        assert!(flags.enable_bounds_checks);
        assert!(!flags.enable_stack_canaries);
    }

    #[test]
    fn builder_chains() {
        let flags = Flags::new().with_neon(false).with_stack_canaries(true);
        assert!(!flags.enable_neon);
        assert!(flags.enable_stack_canaries);
    }
}
