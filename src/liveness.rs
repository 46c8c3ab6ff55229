//! Liveness analysis (spec.md section 4.3).
//!
//! Grounded on `examples/original_source/LivenessAnalysisPass.cpp`: a
//! variable read before being defined within a block is a `use`; a
//! variable written is a `def`, independent of whether it is also read
//! later in the same block. The data-flow fixed point itself follows the
//! textbook backward equations, matching the iterative style of
//! `cranelift-codegen::regalloc::context::Context::run`'s own pass
//! sequencing (run to a fixed point, re-verify, continue).

use crate::ast::{Expr, Statement};
use crate::cfg::{BasicBlock, FunctionCfg};
use std::collections::HashSet;

/// Compute `use`/`def` for a single block's statement list (spec.md 4.3,
/// "Per-block use/def"), storing the results directly on the block.
pub fn compute_use_def(block: &mut BasicBlock) {
    let mut use_set = HashSet::new();
    let mut def_set = HashSet::new();
    let mut contains_call = false;

    for stmt in &block.statements {
        visit_statement(stmt, &mut use_set, &mut def_set, &mut contains_call);
    }

    block.use_set = use_set.into_iter().collect();
    block.def_set = def_set.into_iter().collect();
    block.contains_call = contains_call;
}

fn visit_statement(
    stmt: &Statement,
    use_set: &mut HashSet<String>,
    def_set: &mut HashSet<String>,
    contains_call: &mut bool,
) {
    match stmt {
        Statement::Assignment { lhs, rhs } => {
            // RHS first: a use recorded here precedes any def from this
            // same statement's LHS, matching the original's statement
            // ordering exactly.
            for expr in rhs {
                visit_expr(expr, use_set, def_set, contains_call);
            }
            for expr in lhs {
                if let Expr::VariableAccess(name) = expr {
                    def_set.insert(name.clone());
                } else {
                    // Non-variable LHS forms (member/vector/pointer
                    // stores) still read their base expressions.
                    visit_expr(expr, use_set, def_set, contains_call);
                }
            }
        }
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                visit_statement(s, use_set, def_set, contains_call);
            }
        }
        Statement::If { cond, then_branch } | Statement::Unless { cond, then_branch } => {
            visit_expr(cond, use_set, def_set, contains_call);
            visit_statement(then_branch, use_set, def_set, contains_call);
        }
        Statement::Test {
            cond,
            then_branch,
            else_branch,
        } => {
            visit_expr(cond, use_set, def_set, contains_call);
            visit_statement(then_branch, use_set, def_set, contains_call);
            visit_statement(else_branch, use_set, def_set, contains_call);
        }
        Statement::While { cond, body } | Statement::Until { cond, body } => {
            visit_expr(cond, use_set, def_set, contains_call);
            visit_statement(body, use_set, def_set, contains_call);
        }
        Statement::Repeat { body, cond, .. } => {
            visit_statement(body, use_set, def_set, contains_call);
            visit_expr(cond, use_set, def_set, contains_call);
        }
        Statement::For {
            renamed_var,
            start,
            end,
            step,
            body,
            ..
        } => {
            visit_expr(start, use_set, def_set, contains_call);
            visit_expr(end, use_set, def_set, contains_call);
            visit_expr(step, use_set, def_set, contains_call);
            def_set.insert(renamed_var.clone());
            visit_statement(body, use_set, def_set, contains_call);
        }
        Statement::Switchon {
            expr,
            cases,
            default,
        } => {
            visit_expr(expr, use_set, def_set, contains_call);
            for (_, case_body) in cases {
                visit_statement(case_body, use_set, def_set, contains_call);
            }
            if let Some(default_body) = default {
                visit_statement(default_body, use_set, def_set, contains_call);
            }
        }
        Statement::Resultis(expr) => visit_expr(expr, use_set, def_set, contains_call),
        Statement::RoutineCall(expr) => {
            *contains_call = true;
            visit_expr(expr, use_set, def_set, contains_call);
        }
        Statement::Free(expr) => visit_expr(expr, use_set, def_set, contains_call),
        Statement::Return
        | Statement::LabelTarget(_)
        | Statement::Goto(_)
        | Statement::Endcase
        | Statement::Brk(_)
        | Statement::Finish
        | Statement::Nop => {}
    }
}

fn visit_expr(
    expr: &Expr,
    use_set: &mut HashSet<String>,
    def_set: &mut HashSet<String>,
    contains_call: &mut bool,
) {
    match expr {
        Expr::VariableAccess(name) => {
            if !def_set.contains(name) {
                use_set.insert(name.clone());
            }
        }
        Expr::BinaryOp { lhs, rhs, .. } => {
            visit_expr(lhs, use_set, def_set, contains_call);
            visit_expr(rhs, use_set, def_set, contains_call);
        }
        Expr::UnaryOp { operand, .. } => visit_expr(operand, use_set, def_set, contains_call),
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            visit_expr(cond, use_set, def_set, contains_call);
            visit_expr(then_expr, use_set, def_set, contains_call);
            visit_expr(else_expr, use_set, def_set, contains_call);
        }
        Expr::Valof(body) => visit_statement(body, use_set, def_set, contains_call),
        Expr::FunctionCall { callee, args } => {
            *contains_call = true;
            visit_expr(callee, use_set, def_set, contains_call);
            for arg in args {
                visit_expr(arg, use_set, def_set, contains_call);
            }
        }
        Expr::MemberAccess { object, .. } => visit_expr(object, use_set, def_set, contains_call),
        Expr::SuperMethodAccess { .. } => {}
        Expr::New { args, .. } => {
            *contains_call = true;
            for arg in args {
                visit_expr(arg, use_set, def_set, contains_call);
            }
        }
        Expr::VecAllocation(e)
        | Expr::FVecAllocation(e)
        | Expr::StringAllocation(e)
        | Expr::PairsAllocation(e)
        | Expr::FPairsAllocation(e) => {
            *contains_call = true;
            visit_expr(e, use_set, def_set, contains_call);
        }
        Expr::VectorAccess { vector, index } | Expr::FloatVectorIndirection { vector, index } => {
            visit_expr(vector, use_set, def_set, contains_call);
            visit_expr(index, use_set, def_set, contains_call);
        }
        Expr::CharIndirection { string, index } => {
            visit_expr(string, use_set, def_set, contains_call);
            visit_expr(index, use_set, def_set, contains_call);
        }
        Expr::Pair(a, b) | Expr::FPair(a, b) => {
            visit_expr(a, use_set, def_set, contains_call);
            visit_expr(b, use_set, def_set, contains_call);
        }
        Expr::Quad(elems) => {
            for e in elems {
                visit_expr(e, use_set, def_set, contains_call);
            }
        }
        Expr::Oct(elems) | Expr::FOct(elems) => {
            for e in elems {
                visit_expr(e, use_set, def_set, contains_call);
            }
        }
        Expr::LaneAccess { vector, .. } => visit_expr(vector, use_set, def_set, contains_call),
        Expr::Number(_)
        | Expr::Float(_)
        | Expr::StringLiteral(_)
        | Expr::CharLiteral(_)
        | Expr::Boolean(_)
        | Expr::Null
        | Expr::Table(_)
        | Expr::FTable(_) => {}
    }
}

/// Run the backward iterative fixed point over every block in `cfg`
/// (spec.md 4.3, "Data flow"). Block iteration order is not semantically
/// significant, only fixed-point equality is (spec.md section 5); this
/// iterates in ascending `BlockId` order purely for determinism of
/// intermediate trace output.
pub fn analyse(cfg: &mut FunctionCfg) {
    let mut ids: Vec<_> = cfg.blocks.keys().copied().collect();
    ids.sort();

    for &id in &ids {
        compute_use_def(cfg.blocks.get_mut(&id).unwrap());
    }

    loop {
        let mut changed = false;
        for &id in &ids {
            let successors = cfg.blocks[&id].successors.clone();
            let mut new_out: HashSet<String> = HashSet::new();
            for succ in &successors {
                if let Some(succ_block) = cfg.blocks.get(succ) {
                    new_out.extend(succ_block.live_in.iter().cloned());
                }
            }

            let block = cfg.blocks.get_mut(&id).unwrap();
            let def_set: HashSet<String> = block.def_set.iter().cloned().collect();
            let use_set: HashSet<String> = block.use_set.iter().cloned().collect();

            let mut new_in = use_set.clone();
            new_in.extend(new_out.difference(&def_set).cloned());

            let old_in: HashSet<String> = block.live_in.iter().cloned().collect();
            let old_out: HashSet<String> = block.live_out.iter().cloned().collect();
            if new_in != old_in || new_out != old_out {
                changed = true;
            }

            let mut in_vec: Vec<String> = new_in.into_iter().collect();
            in_vec.sort();
            let mut out_vec: Vec<String> = new_out.into_iter().collect();
            out_vec.sort();
            block.live_in = in_vec;
            block.live_out = out_vec;
        }
        if !changed {
            break;
        }
    }
}

/// Register-pressure metric for a function: the maximum, over all blocks,
/// of `max(|in[B]|, |out[B]|)` (spec.md 4.3, "Register-pressure metric").
pub fn register_pressure(cfg: &FunctionCfg) -> usize {
    cfg.blocks
        .values()
        .map(|b| b.live_in.len().max(b.live_out.len()))
        .max()
        .unwrap_or(0)
}

/// The set of variable names live across at least one call-containing
/// block: `in[B] ∪ out[B]` restricted to `contains_call` blocks,
/// unioned over every such block (spec.md 4.4 property P2, "call-crossing
/// discipline").
pub fn call_crossing_variables(cfg: &FunctionCfg) -> HashSet<String> {
    let mut result = HashSet::new();
    for block in cfg.blocks.values() {
        if block.contains_call {
            result.extend(block.live_in.iter().cloned());
            result.extend(block.live_out.iter().cloned());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockId;
    use std::collections::HashMap;

    fn var(name: &str) -> Expr {
        Expr::VariableAccess(name.to_string())
    }

    fn assign(name: &str, rhs: Expr) -> Statement {
        Statement::Assignment {
            lhs: vec![var(name)],
            rhs: vec![rhs],
        }
    }

    #[test]
    fn idempotent_fixed_point_matches_property_p8() {
        // B0: a := 1         -> def {a}
        // B0 -> B1
        // B1: b := a + c     -> use {a, c}, def {b}
        let mut blocks = HashMap::new();
        let mut b0 = BasicBlock::new(BlockId(0));
        b0.statements = vec![assign("a", Expr::Number(1))];
        b0.successors = vec![BlockId(1)];
        let mut b1 = BasicBlock::new(BlockId(1));
        b1.statements = vec![assign(
            "b",
            Expr::BinaryOp {
                op: crate::ast::BinOp::Add,
                lhs: Box::new(var("a")),
                rhs: Box::new(var("c")),
            },
        )];
        b1.predecessors = vec![BlockId(0)];
        blocks.insert(BlockId(0), b0);
        blocks.insert(BlockId(1), b1);

        let mut cfg = FunctionCfg {
            blocks,
            entry: BlockId(0),
            emission_order: vec![BlockId(0), BlockId(1)],
        };

        analyse(&mut cfg);
        let first_in0 = cfg.blocks[&BlockId(0)].live_in.clone();
        let first_out0 = cfg.blocks[&BlockId(0)].live_out.clone();

        analyse(&mut cfg);
        assert_eq!(cfg.blocks[&BlockId(0)].live_in, first_in0);
        assert_eq!(cfg.blocks[&BlockId(0)].live_out, first_out0);

        // `c` is used in B1 without being defined anywhere, so it is live
        // into both blocks; `a` is defined in B0 so it is not live-in
        // there.
        assert!(cfg.blocks[&BlockId(0)].live_out.contains(&"c".to_string()));
        assert!(!cfg.blocks[&BlockId(0)].live_in.contains(&"a".to_string()));
        assert!(cfg.blocks[&BlockId(1)].live_in.contains(&"a".to_string()));
    }

    #[test]
    fn call_marks_block_and_crossing_variables() {
        let mut block = BasicBlock::new(BlockId(0));
        block.statements = vec![Statement::RoutineCall(Expr::FunctionCall {
            callee: Box::new(var("helper")),
            args: vec![var("x")],
        })];
        compute_use_def(&mut block);
        assert!(block.contains_call);
        assert!(block.use_set.contains(&"x".to_string()));
    }
}
