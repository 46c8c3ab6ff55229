//! Statement lowering (spec.md 4.7).
//!
//! Two entry points, grounded on the same split `examples/original_source/
//! NewCodeGenerator.h` draws between its CFG-driven `visit` overrides and
//! its recursive `generate_block_recursive` used inside `VALOF`:
//!
//! - [`lower_cfg_statement`] is shallow: a basic block's statements are
//!   lowered one at a time, and a control-flow statement (`IF`, `WHILE`,
//!   ...) only evaluates its controlling expression — the CFG already
//!   split its branches into other blocks (see `crate::cfg`'s module
//!   doc), so recursing into `then_branch`/`body` here would lower that
//!   code twice.
//! - [`lower_statement_recursive`] fully recurses, including into loop
//!   and conditional bodies. It is the only statement lowerer `VALOF`
//!   uses (spec.md section 3, `Expr::Valof`: "expression-level control
//!   flow the CFG does not model at all") and is the fallback used when a
//!   function has no CFG supplied at all (this crate's own unit tests).
//!
//! `SWITCHON` is lowered completely inline by both entry points via a
//! compare-and-branch chain, since its `cases`/`default` are embedded
//! `Statement` bodies rather than separate CFG blocks (spec.md 4.7,
//! "Control-flow statements"; `crate::cfg`'s module doc).

use crate::ast::{Expr, Statement};
use crate::binemit::{self, Condition, Instruction};
use crate::error::CodegenResult;
use crate::isa::registers::Reg;

use super::expr::lower_expr;
use super::function::{BranchSense, FunctionContext};
use super::Compiler;

/// Lower one statement as it appears inside a CFG-driven basic block.
/// Returns the statement's code plus, for a control-flow statement, the
/// condition register and sense the block epilogue should branch on.
pub fn lower_cfg_statement(
    compiler: &mut Compiler,
    ctx: &mut FunctionContext,
    statement: &Statement,
) -> CodegenResult<(Vec<Instruction>, Option<(Reg, BranchSense)>)> {
    match statement {
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            let mut code = Vec::new();
            let mut last = None;
            for s in stmts {
                let (c, info) = lower_cfg_statement(compiler, ctx, s)?;
                code.extend(c);
                last = info;
            }
            Ok((code, last))
        }
        Statement::If { cond, .. } | Statement::Test { cond, .. } | Statement::While { cond, .. } => {
            let (reg, code) = lower_condition(compiler, ctx, cond)?;
            Ok((code, Some((reg, BranchSense::Normal))))
        }
        Statement::Unless { cond, .. } | Statement::Until { cond, .. } => {
            let (reg, code) = lower_condition(compiler, ctx, cond)?;
            Ok((code, Some((reg, BranchSense::Inverted))))
        }
        Statement::Repeat { cond, is_until, .. } => {
            let (reg, code) = lower_condition(compiler, ctx, cond)?;
            let sense = if *is_until { BranchSense::Inverted } else { BranchSense::Normal };
            Ok((code, Some((reg, sense))))
        }
        Statement::For {
            renamed_var,
            end,
            constant_end_value,
            ..
        } => {
            let mut code = Vec::new();
            let (var_reg, var_code) = ctx.get_variable_register(compiler, renamed_var)?;
            code.extend(var_code);
            let end_reg = if let Some(value) = constant_end_value {
                let r = ctx.regs.acquire_scratch_reg()?;
                code.extend(super::function::materialise_int(r, *value));
                r
            } else {
                let (r, c) = lower_expr(compiler, ctx, end)?;
                code.extend(c);
                r
            };
            code.push(binemit::create_cmp_reg(var_reg, end_reg));
            let cond_reg = ctx.regs.acquire_scratch_reg()?;
            code.push(binemit::create_cset(cond_reg, Condition::Le));
            ctx.release(end_reg);
            Ok((code, Some((cond_reg, BranchSense::Normal))))
        }
        Statement::Switchon { .. } => lower_switchon_inline(compiler, ctx, statement).map(|c| (c, None)),
        other => lower_simple_statement(compiler, ctx, other).map(|c| (c, None)),
    }
}

/// Lower a statement and every statement nested inside it, recursing into
/// loop/conditional bodies rather than deferring to CFG-synthesised
/// branches. Used only where no CFG block structure exists: inside
/// `VALOF`, and as the whole-body fallback when a function has no CFG.
pub fn lower_statement_recursive(compiler: &mut Compiler, ctx: &mut FunctionContext, statement: &Statement) -> CodegenResult<Vec<Instruction>> {
    match statement {
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            let mut code = Vec::new();
            for s in stmts {
                code.extend(lower_statement_recursive(compiler, ctx, s)?);
            }
            Ok(code)
        }
        Statement::If { cond, then_branch } => {
            let (reg, mut code) = lower_condition(compiler, ctx, cond)?;
            let end_label = compiler.labels_mut().create_label();
            code.push(binemit::create_cmp_imm(reg, 0));
            code.push(binemit::create_branch_conditional(Condition::Eq, end_label.clone()));
            ctx.release(reg);
            code.extend(lower_statement_recursive(compiler, ctx, then_branch)?);
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::Unless { cond, then_branch } => {
            let (reg, mut code) = lower_condition(compiler, ctx, cond)?;
            let end_label = compiler.labels_mut().create_label();
            code.push(binemit::create_cmp_imm(reg, 0));
            code.push(binemit::create_branch_conditional(Condition::Ne, end_label.clone()));
            ctx.release(reg);
            code.extend(lower_statement_recursive(compiler, ctx, then_branch)?);
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::Test {
            cond,
            then_branch,
            else_branch,
        } => {
            let (reg, mut code) = lower_condition(compiler, ctx, cond)?;
            let else_label = compiler.labels_mut().create_label();
            let end_label = compiler.labels_mut().create_label();
            code.push(binemit::create_cmp_imm(reg, 0));
            code.push(binemit::create_branch_conditional(Condition::Eq, else_label.clone()));
            ctx.release(reg);
            code.extend(lower_statement_recursive(compiler, ctx, then_branch)?);
            code.push(binemit::create_branch_unconditional(end_label.clone()));
            code.push(Instruction::label_definition(else_label));
            code.extend(lower_statement_recursive(compiler, ctx, else_branch)?);
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::While { cond, body } => {
            let top_label = compiler.labels_mut().create_label();
            let end_label = compiler.labels_mut().create_label();
            let mut code = vec![Instruction::label_definition(top_label.clone())];
            let (reg, cond_code) = lower_condition(compiler, ctx, cond)?;
            code.extend(cond_code);
            code.push(binemit::create_cmp_imm(reg, 0));
            code.push(binemit::create_branch_conditional(Condition::Eq, end_label.clone()));
            ctx.release(reg);
            code.extend(lower_statement_recursive(compiler, ctx, body)?);
            code.push(binemit::create_branch_unconditional(top_label));
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::Until { cond, body } => {
            let top_label = compiler.labels_mut().create_label();
            let end_label = compiler.labels_mut().create_label();
            let mut code = vec![Instruction::label_definition(top_label.clone())];
            let (reg, cond_code) = lower_condition(compiler, ctx, cond)?;
            code.extend(cond_code);
            code.push(binemit::create_cmp_imm(reg, 0));
            code.push(binemit::create_branch_conditional(Condition::Ne, end_label.clone()));
            ctx.release(reg);
            code.extend(lower_statement_recursive(compiler, ctx, body)?);
            code.push(binemit::create_branch_unconditional(top_label));
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::Repeat { body, cond, is_until } => {
            let top_label = compiler.labels_mut().create_label();
            let mut code = vec![Instruction::label_definition(top_label.clone())];
            code.extend(lower_statement_recursive(compiler, ctx, body)?);
            let (reg, cond_code) = lower_condition(compiler, ctx, cond)?;
            code.extend(cond_code);
            code.push(binemit::create_cmp_imm(reg, 0));
            let continue_cond = if *is_until { Condition::Eq } else { Condition::Ne };
            code.push(binemit::create_branch_conditional(continue_cond, top_label));
            ctx.release(reg);
            Ok(code)
        }
        Statement::For {
            renamed_var,
            start,
            end,
            step,
            constant_end_value,
            constant_step_value,
            body,
            ..
        } => {
            let mut code = Vec::new();
            let (start_reg, start_code) = lower_expr(compiler, ctx, start)?;
            code.extend(start_code);
            code.extend(ctx.bind_variable_value(renamed_var, start_reg)?);
            ctx.release(start_reg);

            let top_label = compiler.labels_mut().create_label();
            let end_label = compiler.labels_mut().create_label();
            code.push(Instruction::label_definition(top_label.clone()));

            let (var_reg, var_code) = ctx.get_variable_register(compiler, renamed_var)?;
            code.extend(var_code);
            let end_reg = if let Some(value) = constant_end_value {
                let r = ctx.regs.acquire_scratch_reg()?;
                code.extend(super::function::materialise_int(r, *value));
                r
            } else {
                let (r, c) = lower_expr(compiler, ctx, end)?;
                code.extend(c);
                r
            };
            code.push(binemit::create_cmp_reg(var_reg, end_reg));
            code.push(binemit::create_branch_conditional(Condition::Gt, end_label.clone()));
            ctx.release(end_reg);

            code.extend(lower_statement_recursive(compiler, ctx, body)?);

            let (var_reg, var_code) = ctx.get_variable_register(compiler, renamed_var)?;
            code.extend(var_code);
            let step_reg = if let Some(value) = constant_step_value {
                let r = ctx.regs.acquire_scratch_reg()?;
                code.extend(super::function::materialise_int(r, *value));
                r
            } else {
                let (r, c) = lower_expr(compiler, ctx, step)?;
                code.extend(c);
                r
            };
            code.push(binemit::create_add_reg(var_reg, var_reg, step_reg));
            code.extend(ctx.bind_variable_value(renamed_var, var_reg)?);
            ctx.release(step_reg);
            code.push(binemit::create_branch_unconditional(top_label));
            code.push(Instruction::label_definition(end_label));
            Ok(code)
        }
        Statement::Switchon { .. } => lower_switchon_inline(compiler, ctx, statement),
        other => lower_simple_statement(compiler, ctx, other),
    }
}

/// `SWITCHON expr INTO { CASE c1: body1; ...; DEFAULT: bodyN }`, lowered
/// as a linear compare-and-branch ladder (spec.md 4.7: "the code
/// generator is free to emit a linear compare-branch ladder or a table").
fn lower_switchon_inline(compiler: &mut Compiler, ctx: &mut FunctionContext, statement: &Statement) -> CodegenResult<Vec<Instruction>> {
    let (expr, cases, default) = match statement {
        Statement::Switchon { expr, cases, default } => (expr, cases, default),
        _ => unreachable!("lower_switchon_inline called with a non-SWITCHON statement"),
    };
    let (selector, mut code) = lower_expr(compiler, ctx, expr)?;
    let endcase_label = compiler.labels_mut().create_label();
    ctx.endcase_targets.push(endcase_label.clone());

    let mut case_labels = Vec::with_capacity(cases.len());
    for (constant, _) in cases {
        let label = compiler.labels_mut().create_label();
        let scratch = ctx.regs.acquire_scratch_reg()?;
        code.extend(super::function::materialise_int(scratch, *constant));
        code.push(binemit::create_cmp_reg(selector, scratch));
        code.push(binemit::create_branch_conditional(Condition::Eq, label.clone()));
        ctx.release(scratch);
        case_labels.push(label);
    }
    ctx.release(selector);

    let default_label = compiler.labels_mut().create_label();
    code.push(binemit::create_branch_unconditional(default_label.clone()));

    for ((_, body), label) in cases.iter().zip(case_labels.iter()) {
        code.push(Instruction::label_definition(label.clone()));
        code.extend(lower_statement_recursive(compiler, ctx, body)?);
        code.push(binemit::create_branch_unconditional(endcase_label.clone()));
    }

    code.push(Instruction::label_definition(default_label));
    if let Some(default_body) = default {
        code.extend(lower_statement_recursive(compiler, ctx, default_body)?);
    }
    code.push(Instruction::label_definition(endcase_label));
    ctx.endcase_targets.pop();
    Ok(code)
}

/// Evaluate a controlling expression, normalising the result to a plain
/// integer register suitable for `CMP #0` (a float comparison already
/// lands in condition flags via `FCMP`, so a boolean-valued float
/// condition is coerced to an integer 0/1 with `CSET` first).
fn lower_condition(compiler: &mut Compiler, ctx: &mut FunctionContext, cond: &Expr) -> CodegenResult<(Reg, Vec<Instruction>)> {
    lower_expr(compiler, ctx, cond)
}

/// Statements with no nested control flow: assignment, call, return,
/// housekeeping. Shared verbatim between the CFG-driven and recursive
/// lowerers.
fn lower_simple_statement(compiler: &mut Compiler, ctx: &mut FunctionContext, statement: &Statement) -> CodegenResult<Vec<Instruction>> {
    match statement {
        Statement::Assignment { lhs, rhs } => super::expr::lower_assignment(compiler, ctx, lhs, rhs),
        Statement::Return => Ok(vec![binemit::create_branch_unconditional(ctx.epilogue_label())]),
        Statement::Resultis(expr) => {
            let (reg, mut code) = lower_expr(compiler, ctx, expr)?;
            if let Some(target) = ctx.resultis_targets.last().cloned() {
                let ty = if target.dest.class() == crate::isa::registers::RegClass::Fpr {
                    crate::types::VarType::FLOAT
                } else {
                    crate::types::VarType::INTEGER
                };
                if target.dest != reg {
                    code.push(super::function::move_reg(target.dest, reg, ty));
                }
                ctx.release(reg);
                code.push(binemit::create_branch_unconditional(target.label));
                return Ok(code);
            }
            let dest = if ctx.return_type.passes_in_float_register() { Reg::d(0) } else { Reg::x(0) };
            if dest != reg {
                code.push(super::function::move_reg(dest, reg, ctx.return_type));
            }
            ctx.release(reg);
            code.push(binemit::create_branch_unconditional(ctx.epilogue_label()));
            Ok(code)
        }
        Statement::RoutineCall(expr) => {
            let (reg, code) = lower_expr(compiler, ctx, expr)?;
            ctx.release(reg);
            Ok(code)
        }
        Statement::Free(expr) => {
            let (reg, mut code) = lower_expr(compiler, ctx, expr)?;
            if reg != Reg::x(0) {
                code.push(binemit::create_mov_reg(Reg::x(0), reg));
            }
            code.push(compiler.call_runtime("BCPL_FREE_LIST"));
            ctx.regs.invalidate_caller_saved_registers();
            ctx.release(reg);
            Ok(code)
        }
        Statement::LabelTarget(name) => Ok(vec![Instruction::label_definition(name.clone())]),
        Statement::Goto(name) => Ok(vec![binemit::create_branch_unconditional(name.clone())]),
        Statement::Endcase => {
            let target = ctx
                .endcase_targets
                .last()
                .cloned()
                .unwrap_or_else(|| ctx.epilogue_label());
            Ok(vec![binemit::create_branch_unconditional(target)])
        }
        Statement::Brk(code_val) => Ok(vec![binemit::create_brk(*code_val)]),
        Statement::Finish => Ok(vec![binemit::create_brk(0xFFFF)]),
        Statement::Nop => Ok(Vec::new()),
        Statement::Block(_)
        | Statement::Compound(_)
        | Statement::If { .. }
        | Statement::Unless { .. }
        | Statement::Test { .. }
        | Statement::While { .. }
        | Statement::Until { .. }
        | Statement::Repeat { .. }
        | Statement::For { .. }
        | Statement::Switchon { .. } => {
            unreachable!("control-flow statements are handled by their own match arms")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionDeclaration;
    use crate::class_table::InMemoryClassTable;
    use crate::codegen::function::ResultisTarget;
    use crate::metrics::FunctionMetrics;
    use crate::regalloc::AllocationResult;
    use crate::settings::Flags;
    use crate::symbol::InMemorySymbolTable;
    use crate::types::VarType;

    fn simple_decl(name: &str) -> FunctionDeclaration {
        FunctionDeclaration {
            name: name.to_string(),
            parameters: vec![],
            return_type: VarType::INTEGER,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body: Statement::Nop,
        }
    }

    // Small builder so every test below can get a ready `FunctionContext`
    // without repeating the `FunctionMetrics`/`InMemorySymbolTable`/
    // `InMemoryClassTable` boilerplate `function.rs`'s own tests use.
    fn fresh_ctx<'a>(decl: &'a FunctionDeclaration, locals: &[&str], symbols: &'a InMemorySymbolTable, classes: &'a InMemoryClassTable) -> FunctionContext<'a> {
        let mut metrics = FunctionMetrics::new(&[]);
        for local in locals {
            metrics.record_variable_type(local, VarType::INTEGER);
        }
        FunctionContext::new(decl.name.clone(), None, decl, Flags::new(), metrics, AllocationResult::new(), symbols, classes).unwrap()
    }

    #[test]
    fn if_statement_branches_past_its_body_when_false() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let stmt = Statement::If {
            cond: Expr::Number(1),
            then_branch: Box::new(Statement::Assignment {
                lhs: vec![Expr::VariableAccess("x".to_string())],
                rhs: vec![Expr::Number(1)],
            }),
        };
        let code = lower_statement_recursive(&mut compiler, &mut ctx, &stmt).unwrap();
        assert!(code.iter().any(|i| i.assembly_text.starts_with("b.eq")));
        let has_label = code.iter().any(|i| matches!(i.encoding, crate::binemit::InstructionEncoding::LabelDefinition(_)));
        assert!(has_label);
    }

    #[test]
    fn while_loop_emits_top_and_end_labels() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let stmt = Statement::While {
            cond: Expr::VariableAccess("x".to_string()),
            body: Box::new(Statement::Assignment {
                lhs: vec![Expr::VariableAccess("x".to_string())],
                rhs: vec![Expr::Number(0)],
            }),
        };
        let code = lower_statement_recursive(&mut compiler, &mut ctx, &stmt).unwrap();
        let label_count = code.iter().filter(|i| matches!(i.encoding, crate::binemit::InstructionEncoding::LabelDefinition(_))).count();
        assert_eq!(label_count, 2);
        assert!(code.iter().any(|i| i.assembly_text.starts_with("b ")));
    }

    #[test]
    fn for_loop_increments_by_the_folded_constant_step() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["i_for_var_0"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let stmt = Statement::For {
            renamed_var: "i_for_var_0".to_string(),
            original_var: "i".to_string(),
            start: Expr::Number(0),
            end: Expr::Number(10),
            step: Expr::Number(1),
            constant_end_value: Some(10),
            constant_step_value: Some(1),
            body: Box::new(Statement::Nop),
        };
        let code = lower_statement_recursive(&mut compiler, &mut ctx, &stmt).unwrap();
        assert!(code.iter().any(|i| i.assembly_text.starts_with("add")));
        assert!(code.iter().any(|i| i.assembly_text.starts_with("cmp")));
    }

    #[test]
    fn switchon_falls_through_to_default_when_no_case_matches() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let stmt = Statement::Switchon {
            expr: Expr::VariableAccess("x".to_string()),
            cases: vec![(1, Statement::Endcase)],
            default: Some(Box::new(Statement::Endcase)),
        };
        let code = lower_statement_recursive(&mut compiler, &mut ctx, &stmt).unwrap();
        assert!(ctx.endcase_targets.is_empty());
        assert!(!code.is_empty());
    }

    #[test]
    fn resultis_inside_valof_coerces_integer_into_float_target() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        ctx.resultis_targets.push(ResultisTarget {
            label: "done".to_string(),
            dest: Reg::d(3),
        });
        let code = lower_simple_statement(&mut compiler, &mut ctx, &Statement::Resultis(Expr::Number(7))).unwrap();
        assert!(code.iter().any(|i| i.assembly_text.starts_with("scvtf")));
    }

    #[test]
    fn resultis_at_function_level_branches_to_the_epilogue() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let code = lower_simple_statement(&mut compiler, &mut ctx, &Statement::Resultis(Expr::Number(7))).unwrap();
        assert!(code.iter().any(|i| i.assembly_text == "b f_epilogue" || i.assembly_text.contains("f_epilogue")));
    }

    #[test]
    fn endcase_with_no_active_switchon_falls_back_to_epilogue() {
        let decl = simple_decl("f");
        let symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let mut ctx = fresh_ctx(&decl, &["x"], &symbols, &classes);
        ctx.frame.generate_prologue().unwrap();
        let mut compiler = Compiler::new(Flags::new());
        let code = lower_simple_statement(&mut compiler, &mut ctx, &Statement::Endcase).unwrap();
        assert!(code.iter().any(|i| i.assembly_text.contains("f_epilogue")));
    }
}
