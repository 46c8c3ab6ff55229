//! `FunctionMetrics`: per-function measurements gathered by the analyser
//! and consumed by later passes (spec.md section 3).

use crate::types::VarType;
use std::collections::{HashMap, HashSet};

/// Per-function flags set by the analyser (spec.md section 3).
#[derive(Debug, Clone, Default)]
pub struct FunctionFlags {
    /// The function reads or writes at least one `GLOBAL` variable.
    pub accesses_globals: bool,
    /// The function allocates at least one SIMD vector (`PAIRS`, `FOCT`,
    /// ...).
    pub has_vector_allocations: bool,
    /// The function (transitively, after the call-graph fixed point)
    /// performs heap allocation.
    pub performs_heap_allocation: bool,
    /// The function makes no calls to other user functions (informs
    /// register-pressure and call-crossing decisions).
    pub is_leaf: bool,
    /// The function's body is exactly `RESULTIS _this.m` and it is a
    /// leaf — a trivial accessor eligible for caller-side inlining.
    pub is_trivial_accessor: bool,
    /// The function's body is exactly `_this.m := param` and it is a
    /// leaf — a trivial setter eligible for caller-side inlining.
    pub is_trivial_setter: bool,
    /// This function uses `X19`/`X28` as fixed bases and therefore forces
    /// both into its callee-saved save list (spec.md section 4.5,
    /// "Prologue algorithm").
    pub uses_global_pointers: bool,
}

/// Per-function measurements produced by [`crate::analysis`], refined by
/// [`crate::liveness`], and read by [`crate::regalloc`],
/// [`crate::frame`] and [`crate::codegen`] (spec.md section 3).
#[derive(Debug, Clone, Default)]
pub struct FunctionMetrics {
    /// Declared parameter count, including an injected `_this`.
    pub num_parameters: usize,
    /// Count of locals whose inferred type is `INTEGER`-like.
    pub num_integer_locals: usize,
    /// Count of locals whose inferred type is `FLOAT`-like.
    pub num_float_locals: usize,
    /// Parameter name to its positional index.
    pub parameter_index: HashMap<String, usize>,
    /// Every local/parameter's inferred type, keyed by name.
    pub variable_types: HashMap<String, VarType>,
    /// Behavioural flags.
    pub flags: FunctionFlags,
    /// For a trivial accessor/setter, the member name it touches.
    pub accessed_member_name: Option<String>,
    /// High-water mark of simultaneously live variables, across all
    /// blocks (spec.md section 4.3, "Register-pressure metric").
    pub max_live_variables: usize,
    /// Number of callee-saved temporaries this function is predicted to
    /// need, derived from `max_live_variables`.
    pub required_callee_saved_temps: usize,
    /// The specific callee-saved registers reserved ahead of time.
    pub required_callee_saved_regs: HashSet<String>,
    /// Instruction indices (within the eventual emitted stream) that are
    /// call sites, recorded for post-hoc veneer/relocation bookkeeping.
    pub call_site_indices: Vec<usize>,
    /// Names of every user function this function calls directly.
    pub callees: HashSet<String>,
}

impl FunctionMetrics {
    /// Start a fresh, empty metrics record for a function with `n`
    /// parameters named `param_names` in declaration order.
    pub fn new(param_names: &[String]) -> Self {
        let mut parameter_index = HashMap::new();
        for (i, name) in param_names.iter().enumerate() {
            parameter_index.insert(name.clone(), i);
        }
        Self {
            num_parameters: param_names.len(),
            parameter_index,
            flags: FunctionFlags {
                is_leaf: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Record (or refine) the type of a local or parameter, and bump the
    /// integer/float local counters the first time a non-parameter name
    /// is typed.
    pub fn record_variable_type(&mut self, name: &str, ty: VarType) {
        let is_new_local =
            !self.variable_types.contains_key(name) && !self.parameter_index.contains_key(name);
        self.variable_types.insert(name.to_string(), ty);
        if is_new_local {
            if ty.is_float_like() {
                self.num_float_locals += 1;
            } else {
                self.num_integer_locals += 1;
            }
        }
    }

    /// Record a direct call to `callee`; clears `is_leaf`.
    pub fn record_call(&mut self, callee: &str, instruction_index: usize) {
        self.flags.is_leaf = false;
        self.callees.insert(callee.to_string());
        self.call_site_indices.push(instruction_index);
    }
}

/// Fixed-point propagation of `performs_heap_allocation` across the call
/// graph (spec.md section 4.1, "Call-graph construction"): any function
/// that transitively calls a heap-allocating function is itself marked as
/// performing heap allocation.
pub fn propagate_heap_allocation(metrics: &mut HashMap<String, FunctionMetrics>) {
    loop {
        let mut changed = false;
        let snapshot: HashMap<String, (bool, HashSet<String>)> = metrics
            .iter()
            .map(|(name, m)| (name.clone(), (m.flags.performs_heap_allocation, m.callees.clone())))
            .collect();
        for (name, (allocates, callees)) in &snapshot {
            if *allocates {
                continue;
            }
            let callee_allocates = callees.iter().any(|callee| {
                snapshot
                    .get(callee)
                    .map(|(a, _)| *a)
                    .unwrap_or(false)
            });
            if callee_allocates {
                metrics.get_mut(name).unwrap().flags.performs_heap_allocation = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_allocation_propagates_transitively() {
        let mut metrics = HashMap::new();
        let mut a = FunctionMetrics::new(&[]);
        a.callees.insert("b".to_string());
        let mut b = FunctionMetrics::new(&[]);
        b.callees.insert("c".to_string());
        let mut c = FunctionMetrics::new(&[]);
        c.flags.performs_heap_allocation = true;
        metrics.insert("a".to_string(), a);
        metrics.insert("b".to_string(), b);
        metrics.insert("c".to_string(), c);

        propagate_heap_allocation(&mut metrics);

        assert!(metrics["a"].flags.performs_heap_allocation);
        assert!(metrics["b"].flags.performs_heap_allocation);
        assert!(metrics["c"].flags.performs_heap_allocation);
    }

    #[test]
    fn leaf_flag_cleared_on_first_call() {
        let mut m = FunctionMetrics::new(&[]);
        assert!(m.flags.is_leaf);
        m.record_call("helper", 3);
        assert!(!m.flags.is_leaf);
        assert_eq!(m.call_site_indices, vec![3]);
    }
}
