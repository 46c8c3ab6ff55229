//! Linear-scan register allocator (spec.md section 4.4).
//!
//! spec.md treats the allocator as an external collaborator and only
//! specifies its output contract (properties P1-P3); this module is the
//! reference implementation this crate ships to satisfy that contract,
//! grounded on two sources: the call-crossing discipline of
//! `examples/original_source/RegisterManager.cpp` (which pool a variable
//! must come from) and the classic linear-scan shape `cranelift-codegen`
//! exposes via `regalloc::register_set::RegisterSet` (which register is
//! free right now).
//!
//! Variables are program-point ranges, not instruction ranges: a point is
//! a block's position in [`crate::cfg::FunctionCfg::emission_order`]. This
//! crate's code generator only ever needs block-granularity liveness to
//! make spill/allocate decisions (spec.md 4.3, "block iteration order is
//! not semantically significant"), so finer-grained points would be spent
//! precision the rest of the pipeline never asks for.

pub mod register_set;

use crate::cfg::FunctionCfg;
use crate::isa::registers::{pools, Reg};
use crate::metrics::FunctionMetrics;
use register_set::RegisterSet;
use std::collections::HashMap;

/// One variable's allocation result (spec.md GLOSSARY, `LiveInterval`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    /// The variable this interval describes.
    pub variable_name: String,
    /// First program point (emission-order block index) at which the
    /// variable is live.
    pub start_point: usize,
    /// Last program point at which the variable is live.
    pub end_point: usize,
    /// The physical register assigned, if not spilled.
    pub assigned_register: Option<Reg>,
    /// True if this variable was spilled to the stack instead.
    pub is_spilled: bool,
}

/// Map from variable name to its computed interval, the allocator's
/// output for one function (spec.md section 3, `LiveInterval` map).
pub type AllocationResult = HashMap<String, LiveInterval>;

/// Compute each live variable's `[start_point, end_point]` span from the
/// CFG's per-block `use_set`/`def_set`/`live_in`/`live_out` (populated by
/// [`crate::liveness::analyse`]), using position in `emission_order` as
/// the program point.
fn compute_spans(cfg: &FunctionCfg) -> HashMap<String, (usize, usize)> {
    let mut spans: HashMap<String, (usize, usize)> = HashMap::new();
    for (point, &block_id) in cfg.emission_order.iter().enumerate() {
        let block = match cfg.blocks.get(&block_id) {
            Some(b) => b,
            None => continue,
        };
        let touched = block
            .use_set
            .iter()
            .chain(block.def_set.iter())
            .chain(block.live_in.iter())
            .chain(block.live_out.iter());
        for name in touched {
            let entry = spans.entry(name.clone()).or_insert((point, point));
            entry.0 = entry.0.min(point);
            entry.1 = entry.1.max(point);
        }
    }
    spans
}

/// Run linear-scan allocation for one function, honouring spec.md 4.4's
/// three guarantees: non-overlapping non-spilled assignments on the same
/// register (P1), callee-saved homes for call-crossing variables (P2),
/// and final spill decisions the code generator never revisits (P3 is the
/// frame manager's half of the contract; this function only ever spills,
/// never un-spills).
pub fn allocate(cfg: &FunctionCfg, metrics: &FunctionMetrics) -> AllocationResult {
    let spans = compute_spans(cfg);

    // Sort by start point, ties broken by name for determinism.
    let mut order: Vec<(String, usize, usize)> = spans
        .into_iter()
        .map(|(name, (start, end))| (name, start, end))
        .collect();
    order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut int_variable = RegisterSet::new(pools::variable_gpr());
    let mut float_variable = RegisterSet::new(pools::variable_fpr());

    // Active intervals per pool, sorted by end point for early retirement.
    let mut active_int: Vec<(usize, Reg)> = Vec::new();
    let mut active_float: Vec<(usize, Reg)> = Vec::new();

    let mut result = AllocationResult::new();

    for (name, start, end) in order {
        expire_old(&mut active_int, start, &mut int_variable);
        expire_old(&mut active_float, start, &mut float_variable);

        let is_float = metrics
            .variable_types
            .get(&name)
            .map(|ty| ty.is_float_like())
            .unwrap_or(false);

        let (set, active) = if is_float {
            (&mut float_variable, &mut active_float)
        } else {
            (&mut int_variable, &mut active_int)
        };

        // `pools::variable_gpr`/`variable_fpr` only contain X19-X27/D8-D15,
        // both entirely callee-saved, so every register this allocator can
        // hand out already satisfies P2 without a separate pool switch.
        let interval = match set.first_available() {
            Some(reg) => {
                set.take(reg);
                active.push((end, reg));
                active.sort_by_key(|(e, _)| *e);
                LiveInterval {
                    variable_name: name.clone(),
                    start_point: start,
                    end_point: end,
                    assigned_register: Some(reg),
                    is_spilled: false,
                }
            }
            None => LiveInterval {
                variable_name: name.clone(),
                start_point: start,
                end_point: end,
                assigned_register: None,
                is_spilled: true,
            },
        };
        result.insert(name, interval);
    }

    result
}

fn expire_old(active: &mut Vec<(usize, Reg)>, current_point: usize, set: &mut RegisterSet) {
    let mut i = 0;
    while i < active.len() {
        if active[i].0 < current_point {
            let (_, reg) = active.remove(i);
            set.free(reg);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlock, BlockId};
    use crate::types::VarType;
    use std::collections::HashMap as StdHashMap;

    fn build_cfg() -> FunctionCfg {
        let mut b0 = BasicBlock::new(BlockId(0));
        b0.def_set = vec!["a".to_string()];
        b0.live_out = vec!["a".to_string()];
        b0.successors = vec![BlockId(1)];

        let mut b1 = BasicBlock::new(BlockId(1));
        b1.use_set = vec!["a".to_string()];
        b1.live_in = vec!["a".to_string()];
        b1.contains_call = true;
        b1.predecessors = vec![BlockId(0)];

        let mut blocks = StdHashMap::new();
        blocks.insert(BlockId(0), b0);
        blocks.insert(BlockId(1), b1);

        FunctionCfg {
            blocks,
            entry: BlockId(0),
            emission_order: vec![BlockId(0), BlockId(1)],
        }
    }

    #[test]
    fn call_crossing_variable_gets_callee_saved_register() {
        let mut cfg = build_cfg();
        crate::liveness::analyse(&mut cfg);
        let mut metrics = FunctionMetrics::new(&[]);
        metrics.record_variable_type("a", VarType::INTEGER);

        let result = allocate(&cfg, &metrics);
        let interval = &result["a"];
        assert!(!interval.is_spilled);
        assert!(interval.assigned_register.unwrap().is_callee_saved());
    }

    #[test]
    fn non_overlapping_intervals_can_share_a_register() {
        let mut b0 = BasicBlock::new(BlockId(0));
        b0.def_set = vec!["a".to_string()];
        b0.live_out = vec![];
        b0.successors = vec![BlockId(1)];
        let mut b1 = BasicBlock::new(BlockId(1));
        b1.def_set = vec!["b".to_string()];
        b1.predecessors = vec![BlockId(0)];

        let mut blocks = StdHashMap::new();
        blocks.insert(BlockId(0), b0);
        blocks.insert(BlockId(1), b1);
        let mut cfg = FunctionCfg {
            blocks,
            entry: BlockId(0),
            emission_order: vec![BlockId(0), BlockId(1)],
        };
        crate::liveness::analyse(&mut cfg);
        let mut metrics = FunctionMetrics::new(&[]);
        metrics.record_variable_type("a", VarType::INTEGER);
        metrics.record_variable_type("b", VarType::INTEGER);

        let result = allocate(&cfg, &metrics);
        // `a` dies before `b` starts, so both may receive the allocator's
        // first-available register without violating P1.
        assert_eq!(
            result["a"].assigned_register,
            result["b"].assigned_register
        );
    }

    #[test]
    fn pool_exhaustion_spills_remaining_variables() {
        let mut b0 = BasicBlock::new(BlockId(0));
        let names: Vec<String> = (0..20).map(|i| format!("v{}", i)).collect();
        b0.def_set = names.clone();
        b0.live_out = names.clone();

        let mut blocks = StdHashMap::new();
        blocks.insert(BlockId(0), b0);
        let mut cfg = FunctionCfg {
            blocks,
            entry: BlockId(0),
            emission_order: vec![BlockId(0)],
        };
        crate::liveness::analyse(&mut cfg);
        let mut metrics = FunctionMetrics::new(&[]);
        for name in &names {
            metrics.record_variable_type(name, VarType::INTEGER);
        }

        let result = allocate(&cfg, &metrics);
        let spilled = result.values().filter(|i| i.is_spilled).count();
        // Only 9 integer variable registers exist (X19-X27); everything
        // beyond that must spill.
        assert_eq!(spilled, names.len() - 9);
    }
}
