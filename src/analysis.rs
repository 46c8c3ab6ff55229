//! AST analyser (spec.md section 4.1): type propagation, metric
//! collection, and the handful of tree rewrites code generation depends
//! on.
//!
//! Grounded on `examples/original_source/analysis/ASTAnalyzer.h` and its
//! `az_impl/az_*.cpp` visitors: `az_visit_ForStatement.cpp` for loop
//! variable renaming, `az_process_class_methods.cpp` for implicit
//! `_this` injection and accessor/setter recognition, and
//! `az_analyze_register_usage.cpp`/`az_get_effective_variable_name.cpp`
//! for the per-function metrics this module populates. Unlike the
//! original's `ASTAnalyzer::getInstance()` singleton, every entry point
//! here takes its symbol/class tables and emits a fresh
//! `HashMap<String, FunctionMetrics>` rather than mutating global state
//! (spec.md section 9, "Global singletons").

use crate::ast::{BinOp, Declaration, Expr, FunctionDeclaration, Param, Program, Statement, UnOp};
use crate::class_table::ClassTable;
use crate::error::{CodegenError, SemanticError};
use crate::metrics::{self, FunctionMetrics};
use crate::symbol::{Symbol, SymbolKind, SymbolTable};
use crate::types::VarType;
use std::collections::HashMap;

/// Run every analysis pass over `program`, returning one
/// [`FunctionMetrics`] per function/routine/method and accumulating
/// semantic errors rather than failing fast (spec.md 4.1, "Contract").
pub fn analyse(
    program: &mut Program,
    symbols: &mut dyn SymbolTable,
    classes: &dyn ClassTable,
) -> Result<HashMap<String, FunctionMetrics>, CodegenError> {
    let mut errors = Vec::new();

    for decl in &mut program.declarations {
        if let Declaration::Class { name, methods, .. } = decl {
            inject_implicit_this(methods, name);
        }
    }

    for decl in &mut program.declarations {
        if let Declaration::Function(f) | Declaration::Routine(f) = decl {
            rename_for_loops(&mut f.body);
        }
        if let Declaration::Class { methods, .. } = decl {
            for m in methods {
                rename_for_loops(&mut m.body);
            }
        }
    }

    for decl in &mut program.declarations {
        if let Declaration::Function(f) | Declaration::Routine(f) = decl {
            infer_parameter_types(f);
        }
        if let Declaration::Class { methods, .. } = decl {
            for m in methods {
                infer_parameter_types(m);
            }
        }
    }

    let mut metrics_map = HashMap::new();
    for decl in &program.declarations {
        match decl {
            Declaration::Function(f) | Declaration::Routine(f) => {
                let m = analyse_function(f, symbols, classes, &mut errors);
                metrics_map.insert(f.name.clone(), m);
            }
            Declaration::Class { methods, .. } => {
                for m in methods {
                    let fm = analyse_function(m, symbols, classes, &mut errors);
                    metrics_map.insert(qualified_method_name(m), fm);
                }
            }
            Declaration::Global { .. } | Declaration::Manifest { .. } => {}
        }
    }

    metrics::propagate_heap_allocation(&mut metrics_map);

    if errors.is_empty() {
        Ok(metrics_map)
    } else {
        Err(CodegenError::Semantic(errors))
    }
}

fn qualified_method_name(m: &FunctionDeclaration) -> String {
    match &m.owning_class {
        Some(class) => format!("{}::{}", class, m.name),
        None => m.name.clone(),
    }
}

/// Prepend `_this` to every method's parameter list that does not
/// already start with it, and rewrite bare `SELF` references to `_this`
/// (spec.md 4.1, "Implicit `_this` injection").
fn inject_implicit_this(methods: &mut [FunctionDeclaration], class_name: &str) {
    for method in methods {
        let already_has_this = method.parameters.first().map(|p| p.name == "_this").unwrap_or(false);
        if !already_has_this {
            method.parameters.insert(
                0,
                Param {
                    name: "_this".to_string(),
                    var_type: VarType::POINTER_TO.with(VarType::OBJECT),
                },
            );
        }
        rewrite_self(&mut method.body);
        let _ = class_name;
    }
}

fn rewrite_self(stmt: &mut Statement) {
    walk_statement_exprs(stmt, &mut |e| rewrite_self_expr(e));
}

fn rewrite_self_expr(expr: &mut Expr) {
    if let Expr::VariableAccess(name) = expr {
        if name == "SELF" {
            *name = "_this".to_string();
        }
    }
}

/// Rename each `FOR` loop's control variable to a fresh, unique name and
/// fold a constant `end`/`step` into the node so code generation skips
/// allocating a backing variable (spec.md 4.1, "FOR-loop variable
/// renaming"; property P7).
fn rename_for_loops(stmt: &mut Statement) {
    let mut counter = 0usize;
    let mut aliases: Vec<(String, String)> = Vec::new();
    rename_for_loops_inner(stmt, &mut counter, &mut aliases);
}

fn rename_for_loops_inner(stmt: &mut Statement, counter: &mut usize, aliases: &mut Vec<(String, String)>) {
    match stmt {
        Statement::For {
            renamed_var,
            original_var,
            start,
            end,
            step,
            constant_end_value,
            constant_step_value,
            body,
        } => {
            let fresh = format!("{}_for_var_{}", original_var, counter);
            *counter += 1;
            *renamed_var = fresh.clone();
            aliases.push((original_var.clone(), fresh.clone()));

            substitute_variable(start, original_var, &fresh);
            substitute_variable(end, original_var, &fresh);
            substitute_variable(step, original_var, &fresh);

            *constant_end_value = evaluate_constant_expression(end);
            *constant_step_value = evaluate_constant_expression(step);

            substitute_in_statement(body, original_var, &fresh);
            rename_for_loops_inner(body, counter, aliases);

            aliases.pop();
        }
        _ => walk_statement_children(stmt, &mut |child| rename_for_loops_inner(child, counter, aliases)),
    }
}

fn substitute_variable(expr: &mut Expr, from: &str, to: &str) {
    walk_expr(expr, &mut |e| {
        if let Expr::VariableAccess(name) = e {
            if name == from {
                *name = to.to_string();
            }
        }
    });
}

fn substitute_in_statement(stmt: &mut Statement, from: &str, to: &str) {
    walk_statement_exprs(stmt, &mut |e| substitute_variable(e, from, to));
}

/// Before metrics collection, scan each parameter's usage for a signal
/// that it is really a `FLOAT` even though the signature left it as the
/// default `INTEGER` (spec.md 4.1, "Parameter-type inference"). A one-
/// shot pass: a parameter the signature already fixed to something
/// other than `INTEGER` is never touched.
fn infer_parameter_types(func: &mut FunctionDeclaration) {
    for p in &mut func.parameters {
        if p.var_type != VarType::INTEGER {
            continue;
        }
        if parameter_paired_with_float_literal(&func.body, &p.name) {
            p.var_type = VarType::FLOAT;
        }
    }
}

/// True if `name` sits directly across a binary operator from a float
/// literal anywhere in `stmt`, the same signal `infer_expression_type`
/// uses to promote a binary op's result to `FLOAT`.
fn parameter_paired_with_float_literal(stmt: &Statement, name: &str) -> bool {
    let mut found = false;
    walk_statement_exprs_ref(stmt, &mut |e| {
        if found {
            return;
        }
        if let Expr::BinaryOp { lhs, rhs, .. } = e {
            let lhs_is_param = matches!(lhs.as_ref(), Expr::VariableAccess(n) if n == name);
            let rhs_is_param = matches!(rhs.as_ref(), Expr::VariableAccess(n) if n == name);
            if (lhs_is_param && matches!(rhs.as_ref(), Expr::Float(_))) || (rhs_is_param && matches!(lhs.as_ref(), Expr::Float(_))) {
                found = true;
            }
        }
    });
    found
}

/// Fold literal and manifest-constant expressions at compile time
/// (spec.md 4.1, "`evaluate_constant_expression`"). Returns `None` for
/// anything not known at analysis time.
fn evaluate_constant_expression(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Boolean(b) => Some(if *b { 1 } else { 0 }),
        Expr::UnaryOp { op: UnOp::Neg, operand } => evaluate_constant_expression(operand).map(|v| -v),
        Expr::BinaryOp { op, lhs, rhs } => {
            let l = evaluate_constant_expression(lhs)?;
            let r = evaluate_constant_expression(rhs)?;
            match op {
                BinOp::Add => Some(l + r),
                BinOp::Sub => Some(l - r),
                BinOp::Mul => Some(l * r),
                BinOp::Div if r != 0 => Some(l / r),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Infer an expression's [`VarType`] by structural recursion (spec.md
/// 4.1, "`infer_expression_type`"). Binary ops promote to `FLOAT` (or
/// preserve a SIMD tag) when either operand carries one; most unary ops
/// preserve the operand's type.
pub fn infer_expression_type(expr: &Expr, symbols: &dyn SymbolTable) -> VarType {
    match expr {
        Expr::Number(_) => VarType::INTEGER,
        Expr::Float(_) => VarType::FLOAT,
        Expr::StringLiteral(_) => VarType::POINTER_TO.with(VarType::STRING),
        Expr::CharLiteral(_) => VarType::INTEGER,
        Expr::Boolean(_) => VarType::INTEGER,
        Expr::Null => VarType::UNKNOWN,
        Expr::VariableAccess(name) => symbols.lookup(name).map(|s| s.var_type).unwrap_or(VarType::INTEGER),
        Expr::BinaryOp { lhs, rhs, .. } => {
            let l = infer_expression_type(lhs, symbols);
            let r = infer_expression_type(rhs, symbols);
            if l.is_simd_vector() {
                l
            } else if r.is_simd_vector() {
                r
            } else if l.is_float_like() || r.is_float_like() {
                VarType::FLOAT
            } else {
                VarType::INTEGER
            }
        }
        Expr::UnaryOp { op, operand } => infer_unary(*op, operand, symbols),
        Expr::Conditional { then_expr, .. } => infer_expression_type(then_expr, symbols),
        Expr::Valof(_) => VarType::INTEGER,
        Expr::FunctionCall { callee, .. } => match callee.as_ref() {
            Expr::VariableAccess(name) => symbols.lookup(name).map(|s| s.var_type).unwrap_or(VarType::INTEGER),
            _ => VarType::INTEGER,
        },
        Expr::MemberAccess { .. } => VarType::INTEGER,
        Expr::SuperMethodAccess { .. } => VarType::INTEGER,
        Expr::New { class_name, .. } => {
            let _ = class_name;
            VarType::POINTER_TO.with(VarType::OBJECT)
        }
        Expr::VecAllocation(_) => VarType::POINTER_TO.with(VarType::VEC).with(VarType::INTEGER),
        Expr::FVecAllocation(_) => VarType::POINTER_TO.with(VarType::VEC).with(VarType::FLOAT),
        Expr::StringAllocation(_) => VarType::POINTER_TO.with(VarType::STRING),
        Expr::VectorAccess { .. } => VarType::INTEGER,
        Expr::FloatVectorIndirection { .. } => VarType::FLOAT,
        Expr::CharIndirection { .. } => VarType::INTEGER,
        Expr::Pair(..) => VarType::PAIR,
        Expr::FPair(..) => VarType::FPAIR,
        Expr::Quad(_) => VarType::QUAD,
        Expr::Oct(_) => VarType::OCT,
        Expr::FOct(_) => VarType::FOCT,
        Expr::PairsAllocation(_) => VarType::POINTER_TO.with(VarType::PAIRS),
        Expr::FPairsAllocation(_) => VarType::POINTER_TO.with(VarType::FPAIRS),
        Expr::LaneAccess { vector, .. } => {
            let vt = infer_expression_type(vector, symbols);
            if vt.is_float_like() {
                VarType::FLOAT
            } else {
                VarType::INTEGER
            }
        }
        Expr::Table(_) => VarType::POINTER_TO.with(VarType::TABLE).with(VarType::INTEGER),
        Expr::FTable(_) => VarType::POINTER_TO.with(VarType::TABLE).with(VarType::FLOAT),
    }
}

fn infer_unary(op: UnOp, operand: &Expr, symbols: &dyn SymbolTable) -> VarType {
    let operand_ty = infer_expression_type(operand, symbols);
    match op {
        UnOp::Neg | UnOp::Not | UnOp::Indirection => operand_ty,
        UnOp::AddressOf => VarType::POINTER_TO.with(operand_ty),
        UnOp::Hd | UnOp::Tl | UnOp::Rest => operand_ty.without(VarType::LIST).without(VarType::POINTER_TO),
        UnOp::Len => VarType::INTEGER,
        UnOp::FloatConvert => VarType::FLOAT,
        UnOp::FixConvert => VarType::INTEGER,
    }
}

/// Parse a `WRITEF`-family format literal for `*I *F *S *N` and `%d %f
/// %s %N %S %P %Q` specifiers and check the count against the supplied
/// arguments (spec.md 4.1, "`WRITEF` validation").
fn count_format_specifiers(format: &str) -> usize {
    let mut count = 0;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if (c == '*' || c == '%') && chars.peek().is_some() {
            chars.next();
            count += 1;
        }
    }
    count
}

fn validate_writef_calls(stmt: &Statement, function_name: &str, errors: &mut Vec<SemanticError>) {
    walk_statement_exprs_ref(stmt, &mut |e| validate_writef_expr(e, function_name, errors));
}

fn validate_writef_expr(expr: &Expr, function_name: &str, errors: &mut Vec<SemanticError>) {
    if let Expr::FunctionCall { callee, args } = expr {
        if let Expr::VariableAccess(name) = callee.as_ref() {
            if name.starts_with("WRITEF") {
                if let Some(Expr::StringLiteral(fmt)) = args.first() {
                    let expected = count_format_specifiers(fmt);
                    let actual = args.len() - 1;
                    if expected != actual {
                        errors.push(
                            SemanticError::new(format!(
                                "WRITEF format expects {} argument(s), got {}",
                                expected, actual
                            ))
                            .in_function(function_name.to_string()),
                        );
                    }
                }
            }
        }
    }
}

fn analyse_function(
    func: &FunctionDeclaration,
    symbols: &mut dyn SymbolTable,
    classes: &dyn ClassTable,
    errors: &mut Vec<SemanticError>,
) -> FunctionMetrics {
    let param_names: Vec<String> = func.parameters.iter().map(|p| p.name.clone()).collect();
    let mut m = FunctionMetrics::new(&param_names);

    for p in &func.parameters {
        m.record_variable_type(&p.name, p.var_type);
        symbols.add_symbol(Symbol::new(p.name.clone(), SymbolKind::Parameter, p.var_type));
    }

    collect_locals_and_calls(&func.body, &mut m, symbols, func.owning_class.as_deref(), classes);
    validate_writef_calls(&func.body, &func.name, errors);

    m.flags.accesses_globals = m.flags.accesses_globals || function_accesses_globals(&func.body, symbols);
    m.flags.uses_global_pointers = m.flags.accesses_globals;
    m.flags.has_vector_allocations = statement_has_vector_allocation(&func.body);

    if let Some((member, is_setter)) = trivial_accessor_or_setter(func) {
        if m.flags.is_leaf {
            if is_setter {
                m.flags.is_trivial_setter = true;
            } else {
                m.flags.is_trivial_accessor = true;
            }
            m.accessed_member_name = Some(member);
        }
    }

    m
}

/// Recognise `RESULTIS _this.m` (accessor) or `_this.m := param`
/// (setter) bodies (spec.md 4.1, "Trivial accessor/setter detection").
fn trivial_accessor_or_setter(func: &FunctionDeclaration) -> Option<(String, bool)> {
    match &func.body {
        Statement::Resultis(Expr::MemberAccess { object, member }) => {
            if matches!(object.as_ref(), Expr::VariableAccess(n) if n == "_this") {
                Some((member.clone(), false))
            } else {
                None
            }
        }
        Statement::Assignment { lhs, rhs } if lhs.len() == 1 && rhs.len() == 1 => {
            if let Expr::MemberAccess { object, member } = &lhs[0] {
                if matches!(object.as_ref(), Expr::VariableAccess(n) if n == "_this") {
                    if matches!(&rhs[0], Expr::VariableAccess(_)) {
                        return Some((member.clone(), true));
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn function_accesses_globals(stmt: &Statement, symbols: &dyn SymbolTable) -> bool {
    let mut found = false;
    walk_statement_exprs_ref(stmt, &mut |e| {
        if let Expr::VariableAccess(name) = e {
            if let Some(sym) = symbols.lookup(name) {
                if sym.kind == SymbolKind::GlobalVar {
                    found = true;
                }
            }
        }
    });
    found
}

fn statement_has_vector_allocation(stmt: &Statement) -> bool {
    let mut found = false;
    walk_statement_exprs_ref(stmt, &mut |e| {
        if matches!(
            e,
            Expr::VecAllocation(_)
                | Expr::FVecAllocation(_)
                | Expr::PairsAllocation(_)
                | Expr::FPairsAllocation(_)
                | Expr::FOct(_)
        ) {
            found = true;
        }
    });
    found
}

/// Walk a function body recording every local's inferred type and every
/// direct call as a callee (spec.md 4.1, "Call-graph construction"; also
/// covers the locals half of per-function metrics).
fn collect_locals_and_calls(
    stmt: &Statement,
    m: &mut FunctionMetrics,
    symbols: &dyn SymbolTable,
    owning_class: Option<&str>,
    classes: &dyn ClassTable,
) {
    match stmt {
        Statement::Assignment { lhs, rhs } => {
            for e in rhs {
                record_calls_in_expr(e, m);
            }
            for e in lhs {
                if let Expr::VariableAccess(name) = e {
                    if !m.parameter_index.contains_key(name) && !is_member(name, owning_class, classes) {
                        let ty = rhs
                            .first()
                            .map(|r| infer_expression_type(r, symbols))
                            .unwrap_or(VarType::INTEGER);
                        m.record_variable_type(name, ty);
                    }
                }
                record_calls_in_expr(e, m);
            }
        }
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                collect_locals_and_calls(s, m, symbols, owning_class, classes);
            }
        }
        Statement::If { cond, then_branch } | Statement::Unless { cond, then_branch } => {
            record_calls_in_expr(cond, m);
            collect_locals_and_calls(then_branch, m, symbols, owning_class, classes);
        }
        Statement::Test { cond, then_branch, else_branch } => {
            record_calls_in_expr(cond, m);
            collect_locals_and_calls(then_branch, m, symbols, owning_class, classes);
            collect_locals_and_calls(else_branch, m, symbols, owning_class, classes);
        }
        Statement::While { cond, body } | Statement::Until { cond, body } => {
            record_calls_in_expr(cond, m);
            collect_locals_and_calls(body, m, symbols, owning_class, classes);
        }
        Statement::Repeat { body, cond, .. } => {
            collect_locals_and_calls(body, m, symbols, owning_class, classes);
            record_calls_in_expr(cond, m);
        }
        Statement::For { renamed_var, start, end, step, body, .. } => {
            record_calls_in_expr(start, m);
            record_calls_in_expr(end, m);
            record_calls_in_expr(step, m);
            m.record_variable_type(renamed_var, VarType::INTEGER);
            collect_locals_and_calls(body, m, symbols, owning_class, classes);
        }
        Statement::Switchon { expr, cases, default } => {
            record_calls_in_expr(expr, m);
            for (_, body) in cases {
                collect_locals_and_calls(body, m, symbols, owning_class, classes);
            }
            if let Some(d) = default {
                collect_locals_and_calls(d, m, symbols, owning_class, classes);
            }
        }
        Statement::Resultis(e) | Statement::RoutineCall(e) | Statement::Free(e) => record_calls_in_expr(e, m),
        Statement::Return
        | Statement::LabelTarget(_)
        | Statement::Goto(_)
        | Statement::Endcase
        | Statement::Brk(_)
        | Statement::Finish
        | Statement::Nop => {}
    }
}

fn is_member(name: &str, owning_class: Option<&str>, classes: &dyn ClassTable) -> bool {
    owning_class
        .and_then(|c| classes.get_class(c))
        .map(|entry| entry.find_member(name).is_some())
        .unwrap_or(false)
}

fn record_calls_in_expr(expr: &Expr, m: &mut FunctionMetrics) {
    walk_expr_ref(expr, &mut |e| {
        if let Expr::FunctionCall { callee, .. } = e {
            if let Expr::VariableAccess(name) = callee.as_ref() {
                if !crate::label::LabelManager::is_runtime_label(name) {
                    let index = m.call_site_indices.len();
                    m.record_call(name, index);
                }
            }
        }
        if matches!(
            e,
            Expr::VecAllocation(_) | Expr::FVecAllocation(_) | Expr::StringAllocation(_) | Expr::PairsAllocation(_) | Expr::FPairsAllocation(_)
        ) {
            m.flags.performs_heap_allocation = true;
        }
    });
}

// --- generic AST walkers -------------------------------------------------
//
// `az_impl`'s many `az_visit_*.cpp` files are one class method per node
// kind; this crate collapses that into a handful of recursive walkers
// parameterised by a closure, since every pass above only needs to touch
// expressions, not restructure statements.

fn walk_statement_children(stmt: &mut Statement, f: &mut dyn FnMut(&mut Statement)) {
    match stmt {
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                f(s);
            }
        }
        Statement::If { then_branch, .. } | Statement::Unless { then_branch, .. } => f(then_branch),
        Statement::Test { then_branch, else_branch, .. } => {
            f(then_branch);
            f(else_branch);
        }
        Statement::While { body, .. } | Statement::Until { body, .. } | Statement::Repeat { body, .. } => f(body),
        Statement::For { body, .. } => f(body),
        Statement::Switchon { cases, default, .. } => {
            for (_, body) in cases {
                f(body);
            }
            if let Some(d) = default {
                f(d);
            }
        }
        _ => {}
    }
}

fn walk_statement_exprs(stmt: &mut Statement, f: &mut dyn FnMut(&mut Expr)) {
    match stmt {
        Statement::Assignment { lhs, rhs } => {
            for e in lhs.iter_mut().chain(rhs.iter_mut()) {
                f(e);
                walk_expr(e, f);
            }
        }
        Statement::If { cond, then_branch } | Statement::Unless { cond, then_branch } => {
            f(cond);
            walk_expr(cond, f);
            walk_statement_exprs(then_branch, f);
        }
        Statement::Test { cond, then_branch, else_branch } => {
            f(cond);
            walk_expr(cond, f);
            walk_statement_exprs(then_branch, f);
            walk_statement_exprs(else_branch, f);
        }
        Statement::While { cond, body } | Statement::Until { cond, body } => {
            f(cond);
            walk_expr(cond, f);
            walk_statement_exprs(body, f);
        }
        Statement::Repeat { body, cond, .. } => {
            walk_statement_exprs(body, f);
            f(cond);
            walk_expr(cond, f);
        }
        Statement::For { start, end, step, body, .. } => {
            for e in [start, end, step] {
                f(e);
                walk_expr(e, f);
            }
            walk_statement_exprs(body, f);
        }
        Statement::Switchon { expr, cases, default } => {
            f(expr);
            walk_expr(expr, f);
            for (_, body) in cases {
                walk_statement_exprs(body, f);
            }
            if let Some(d) = default {
                walk_statement_exprs(d, f);
            }
        }
        Statement::Resultis(e) | Statement::RoutineCall(e) | Statement::Free(e) => {
            f(e);
            walk_expr(e, f);
        }
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                walk_statement_exprs(s, f);
            }
        }
        Statement::Return
        | Statement::LabelTarget(_)
        | Statement::Goto(_)
        | Statement::Endcase
        | Statement::Brk(_)
        | Statement::Finish
        | Statement::Nop => {}
    }
}

fn walk_statement_exprs_ref(stmt: &Statement, f: &mut dyn FnMut(&Expr)) {
    match stmt {
        Statement::Assignment { lhs, rhs } => {
            for e in lhs.iter().chain(rhs.iter()) {
                walk_expr_ref(e, f);
            }
        }
        Statement::If { cond, then_branch } | Statement::Unless { cond, then_branch } => {
            walk_expr_ref(cond, f);
            walk_statement_exprs_ref(then_branch, f);
        }
        Statement::Test { cond, then_branch, else_branch } => {
            walk_expr_ref(cond, f);
            walk_statement_exprs_ref(then_branch, f);
            walk_statement_exprs_ref(else_branch, f);
        }
        Statement::While { cond, body } | Statement::Until { cond, body } => {
            walk_expr_ref(cond, f);
            walk_statement_exprs_ref(body, f);
        }
        Statement::Repeat { body, cond, .. } => {
            walk_statement_exprs_ref(body, f);
            walk_expr_ref(cond, f);
        }
        Statement::For { start, end, step, body, .. } => {
            for e in [start, end, step] {
                walk_expr_ref(e, f);
            }
            walk_statement_exprs_ref(body, f);
        }
        Statement::Switchon { expr, cases, default } => {
            walk_expr_ref(expr, f);
            for (_, body) in cases {
                walk_statement_exprs_ref(body, f);
            }
            if let Some(d) = default {
                walk_statement_exprs_ref(d, f);
            }
        }
        Statement::Resultis(e) | Statement::RoutineCall(e) | Statement::Free(e) => walk_expr_ref(e, f),
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                walk_statement_exprs_ref(s, f);
            }
        }
        Statement::Return
        | Statement::LabelTarget(_)
        | Statement::Goto(_)
        | Statement::Endcase
        | Statement::Brk(_)
        | Statement::Finish
        | Statement::Nop => {}
    }
}

fn walk_expr(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    f(expr);
    match expr {
        Expr::BinaryOp { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        Expr::UnaryOp { operand, .. } => walk_expr(operand, f),
        Expr::Conditional { cond, then_expr, else_expr } => {
            walk_expr(cond, f);
            walk_expr(then_expr, f);
            walk_expr(else_expr, f);
        }
        Expr::Valof(body) => walk_statement_exprs(body, f),
        Expr::FunctionCall { callee, args } => {
            walk_expr(callee, f);
            for a in args {
                walk_expr(a, f);
            }
        }
        Expr::MemberAccess { object, .. } => walk_expr(object, f),
        Expr::New { args, .. } => {
            for a in args {
                walk_expr(a, f);
            }
        }
        Expr::VecAllocation(e) | Expr::FVecAllocation(e) | Expr::StringAllocation(e) | Expr::PairsAllocation(e) | Expr::FPairsAllocation(e) => {
            walk_expr(e, f)
        }
        Expr::VectorAccess { vector, index } | Expr::FloatVectorIndirection { vector, index } => {
            walk_expr(vector, f);
            walk_expr(index, f);
        }
        Expr::CharIndirection { string, index } => {
            walk_expr(string, f);
            walk_expr(index, f);
        }
        Expr::Pair(a, b) | Expr::FPair(a, b) => {
            walk_expr(a, f);
            walk_expr(b, f);
        }
        Expr::Quad(elems) => {
            for e in elems {
                walk_expr(e, f);
            }
        }
        Expr::Oct(elems) | Expr::FOct(elems) => {
            for e in elems {
                walk_expr(e, f);
            }
        }
        Expr::LaneAccess { vector, .. } => walk_expr(vector, f),
        _ => {}
    }
}

fn walk_expr_ref(expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::BinaryOp { lhs, rhs, .. } => {
            walk_expr_ref(lhs, f);
            walk_expr_ref(rhs, f);
        }
        Expr::UnaryOp { operand, .. } => walk_expr_ref(operand, f),
        Expr::Conditional { cond, then_expr, else_expr } => {
            walk_expr_ref(cond, f);
            walk_expr_ref(then_expr, f);
            walk_expr_ref(else_expr, f);
        }
        Expr::Valof(body) => walk_statement_exprs_ref(body, f),
        Expr::FunctionCall { callee, args } => {
            walk_expr_ref(callee, f);
            for a in args {
                walk_expr_ref(a, f);
            }
        }
        Expr::MemberAccess { object, .. } => walk_expr_ref(object, f),
        Expr::New { args, .. } => {
            for a in args {
                walk_expr_ref(a, f);
            }
        }
        Expr::VecAllocation(e) | Expr::FVecAllocation(e) | Expr::StringAllocation(e) | Expr::PairsAllocation(e) | Expr::FPairsAllocation(e) => {
            walk_expr_ref(e, f)
        }
        Expr::VectorAccess { vector, index } | Expr::FloatVectorIndirection { vector, index } => {
            walk_expr_ref(vector, f);
            walk_expr_ref(index, f);
        }
        Expr::CharIndirection { string, index } => {
            walk_expr_ref(string, f);
            walk_expr_ref(index, f);
        }
        Expr::Pair(a, b) | Expr::FPair(a, b) => {
            walk_expr_ref(a, f);
            walk_expr_ref(b, f);
        }
        Expr::Quad(elems) => {
            for e in elems {
                walk_expr_ref(e, f);
            }
        }
        Expr::Oct(elems) | Expr::FOct(elems) => {
            for e in elems {
                walk_expr_ref(e, f);
            }
        }
        Expr::LaneAccess { vector, .. } => walk_expr_ref(vector, f),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::InMemorySymbolTable;
    use crate::class_table::InMemoryClassTable;

    fn make_for(var: &str, end: Expr, step: Expr) -> Statement {
        Statement::For {
            renamed_var: var.to_string(),
            original_var: var.to_string(),
            start: Expr::Number(1),
            end,
            step,
            constant_end_value: None,
            constant_step_value: None,
            body: Box::new(Statement::Nop),
        }
    }

    #[test]
    fn for_loop_variable_is_renamed_uniquely() {
        let mut stmt = make_for("i", Expr::Number(10), Expr::Number(1));
        rename_for_loops(&mut stmt);
        if let Statement::For { renamed_var, .. } = &stmt {
            assert_eq!(renamed_var, "i_for_var_0");
        } else {
            panic!("expected For");
        }
    }

    #[test]
    fn constant_end_and_step_are_folded() {
        let mut stmt = make_for("i", Expr::Number(10), Expr::Number(1));
        rename_for_loops(&mut stmt);
        if let Statement::For { constant_end_value, constant_step_value, .. } = &stmt {
            assert_eq!(*constant_end_value, Some(10));
            assert_eq!(*constant_step_value, Some(1));
        } else {
            panic!("expected For");
        }
    }

    #[test]
    fn non_constant_end_is_not_folded() {
        let mut stmt = make_for("i", Expr::VariableAccess("n".to_string()), Expr::Number(1));
        rename_for_loops(&mut stmt);
        if let Statement::For { constant_end_value, .. } = &stmt {
            assert_eq!(*constant_end_value, None);
        } else {
            panic!("expected For");
        }
    }

    #[test]
    fn implicit_this_is_prepended_once() {
        let mut methods = vec![FunctionDeclaration {
            name: "draw".to_string(),
            parameters: vec![],
            return_type: VarType::INTEGER,
            owning_class: Some("Shape".to_string()),
            is_final: false,
            is_constructor: false,
            body: Statement::Return,
        }];
        inject_implicit_this(&mut methods, "Shape");
        assert_eq!(methods[0].parameters[0].name, "_this");
        inject_implicit_this(&mut methods, "Shape");
        assert_eq!(methods[0].parameters.len(), 1);
    }

    #[test]
    fn parameter_paired_with_float_literal_is_promoted() {
        let mut func = FunctionDeclaration {
            name: "scale".to_string(),
            parameters: vec![Param { name: "x".to_string(), var_type: VarType::INTEGER }],
            return_type: VarType::FLOAT,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body: Statement::Resultis(Expr::BinaryOp {
                op: BinOp::Mul,
                lhs: Box::new(Expr::VariableAccess("x".to_string())),
                rhs: Box::new(Expr::Float(2.0)),
            }),
        };
        infer_parameter_types(&mut func);
        assert_eq!(func.parameters[0].var_type, VarType::FLOAT);
    }

    #[test]
    fn parameter_already_typed_is_never_downgraded() {
        let mut func = FunctionDeclaration {
            name: "id".to_string(),
            parameters: vec![Param { name: "x".to_string(), var_type: VarType::PAIR }],
            return_type: VarType::PAIR,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body: Statement::Resultis(Expr::VariableAccess("x".to_string())),
        };
        infer_parameter_types(&mut func);
        assert_eq!(func.parameters[0].var_type, VarType::PAIR);
    }

    #[test]
    fn parameter_with_no_float_usage_stays_integer() {
        let mut func = FunctionDeclaration {
            name: "inc".to_string(),
            parameters: vec![Param { name: "x".to_string(), var_type: VarType::INTEGER }],
            return_type: VarType::INTEGER,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body: Statement::Resultis(Expr::BinaryOp {
                op: BinOp::Add,
                lhs: Box::new(Expr::VariableAccess("x".to_string())),
                rhs: Box::new(Expr::Number(1)),
            }),
        };
        infer_parameter_types(&mut func);
        assert_eq!(func.parameters[0].var_type, VarType::INTEGER);
    }

    #[test]
    fn accessor_body_is_flagged_trivial() {
        let func = FunctionDeclaration {
            name: "getX".to_string(),
            parameters: vec![Param { name: "_this".to_string(), var_type: VarType::POINTER_TO.with(VarType::OBJECT) }],
            return_type: VarType::INTEGER,
            owning_class: Some("Point".to_string()),
            is_final: false,
            is_constructor: false,
            body: Statement::Resultis(Expr::MemberAccess {
                object: Box::new(Expr::VariableAccess("_this".to_string())),
                member: "x".to_string(),
            }),
        };
        let (member, is_setter) = trivial_accessor_or_setter(&func).unwrap();
        assert_eq!(member, "x");
        assert!(!is_setter);
    }

    #[test]
    fn writef_argument_mismatch_is_reported() {
        let mut symbols = InMemorySymbolTable::new();
        let classes = InMemoryClassTable::new();
        let body = Statement::RoutineCall(Expr::FunctionCall {
            callee: Box::new(Expr::VariableAccess("WRITEF".to_string())),
            args: vec![Expr::StringLiteral("*N*N".to_string()), Expr::Number(1)],
        });
        let func = FunctionDeclaration {
            name: "main".to_string(),
            parameters: vec![],
            return_type: VarType::INTEGER,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body,
        };
        let mut errors = Vec::new();
        let classes_ref: &dyn ClassTable = &classes;
        let _ = analyse_function(&func, &mut symbols, classes_ref, &mut errors);
        assert_eq!(errors.len(), 1);
    }
}
