//! SUPER-call desugaring (spec.md section 4.2, "SUPER-call transformer").
//!
//! Grounded on `examples/original_source/SuperCallTransformationPass.{h,cpp}`:
//! `SUPER.method(args)` rewrites to `ParentClass::method(_this, args)` before
//! liveness analysis ever sees the tree, so a SUPER call is indistinguishable
//! from any other direct call by the time [`crate::liveness`] and
//! [`crate::regalloc`] run. This pass runs per class, tracking only the
//! enclosing class name; it does not need a symbol table, unlike the
//! original, since lowering the whole `SuperMethodAccess` node to a
//! qualified `VariableAccess` is the entire job.

use crate::ast::{Declaration, Expr, FunctionDeclaration, Program, Statement};
use crate::class_table::ClassTable;
use crate::error::{CodegenError, CodegenResult};

/// Rewrite every `SUPER.method(...)` call in `program` into a direct call
/// to the enclosing class's parent implementation. Returns an error if a
/// `SUPER` call appears in a class with no parent (spec.md 4.2, "Edge
/// cases").
pub fn transform(program: &mut Program, classes: &dyn ClassTable) -> CodegenResult<()> {
    for decl in &mut program.declarations {
        if let Declaration::Class { name, methods, .. } = decl {
            let parent = classes
                .get_class(name)
                .and_then(|entry| entry.parent_name);
            for method in methods {
                transform_function(method, name, parent.as_deref())?;
            }
        }
    }
    Ok(())
}

fn transform_function(
    func: &mut FunctionDeclaration,
    class_name: &str,
    parent_name: Option<&str>,
) -> CodegenResult<()> {
    transform_statement(&mut func.body, class_name, parent_name)
}

fn transform_statement(
    stmt: &mut Statement,
    class_name: &str,
    parent_name: Option<&str>,
) -> CodegenResult<()> {
    match stmt {
        Statement::Block(stmts) | Statement::Compound(stmts) => {
            for s in stmts {
                transform_statement(s, class_name, parent_name)?;
            }
        }
        Statement::Assignment { lhs, rhs } => {
            for e in lhs.iter_mut().chain(rhs.iter_mut()) {
                transform_expr(e, class_name, parent_name)?;
            }
        }
        Statement::If { cond, then_branch } | Statement::Unless { cond, then_branch } => {
            transform_expr(cond, class_name, parent_name)?;
            transform_statement(then_branch, class_name, parent_name)?;
        }
        Statement::Test {
            cond,
            then_branch,
            else_branch,
        } => {
            transform_expr(cond, class_name, parent_name)?;
            transform_statement(then_branch, class_name, parent_name)?;
            transform_statement(else_branch, class_name, parent_name)?;
        }
        Statement::While { cond, body } | Statement::Until { cond, body } => {
            transform_expr(cond, class_name, parent_name)?;
            transform_statement(body, class_name, parent_name)?;
        }
        Statement::Repeat { body, cond, .. } => {
            transform_statement(body, class_name, parent_name)?;
            transform_expr(cond, class_name, parent_name)?;
        }
        Statement::For {
            start,
            end,
            step,
            body,
            ..
        } => {
            transform_expr(start, class_name, parent_name)?;
            transform_expr(end, class_name, parent_name)?;
            transform_expr(step, class_name, parent_name)?;
            transform_statement(body, class_name, parent_name)?;
        }
        Statement::Switchon {
            expr,
            cases,
            default,
        } => {
            transform_expr(expr, class_name, parent_name)?;
            for (_, case_body) in cases {
                transform_statement(case_body, class_name, parent_name)?;
            }
            if let Some(default_body) = default {
                transform_statement(default_body, class_name, parent_name)?;
            }
        }
        Statement::Resultis(expr) | Statement::RoutineCall(expr) | Statement::Free(expr) => {
            transform_expr(expr, class_name, parent_name)?;
        }
        Statement::Return
        | Statement::LabelTarget(_)
        | Statement::Goto(_)
        | Statement::Endcase
        | Statement::Brk(_)
        | Statement::Finish
        | Statement::Nop => {}
    }
    Ok(())
}

fn transform_expr(
    expr: &mut Expr,
    class_name: &str,
    parent_name: Option<&str>,
) -> CodegenResult<()> {
    match expr {
        Expr::FunctionCall { callee, args } => {
            for arg in args.iter_mut() {
                transform_expr(arg, class_name, parent_name)?;
            }
            if let Expr::SuperMethodAccess { method } = callee.as_ref() {
                let parent = parent_name.ok_or_else(|| CodegenError::Semantic(vec![
                    crate::error::SemanticError::new(format!(
                        "SUPER call in class '{}' with no parent",
                        class_name
                    ))
                    .in_function(method.clone()),
                ]))?;
                let qualified = format!("{}::{}", parent, method);
                **callee = Expr::VariableAccess(qualified);
                args.insert(0, Expr::VariableAccess("_this".to_string()));
            } else {
                transform_expr(callee, class_name, parent_name)?;
            }
        }
        Expr::BinaryOp { lhs, rhs, .. } => {
            transform_expr(lhs, class_name, parent_name)?;
            transform_expr(rhs, class_name, parent_name)?;
        }
        Expr::UnaryOp { operand, .. } => transform_expr(operand, class_name, parent_name)?,
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            transform_expr(cond, class_name, parent_name)?;
            transform_expr(then_expr, class_name, parent_name)?;
            transform_expr(else_expr, class_name, parent_name)?;
        }
        Expr::Valof(body) => transform_statement(body, class_name, parent_name)?,
        Expr::MemberAccess { object, .. } => transform_expr(object, class_name, parent_name)?,
        Expr::New { args, .. } => {
            for arg in args.iter_mut() {
                transform_expr(arg, class_name, parent_name)?;
            }
        }
        Expr::VecAllocation(e)
        | Expr::FVecAllocation(e)
        | Expr::StringAllocation(e)
        | Expr::PairsAllocation(e)
        | Expr::FPairsAllocation(e) => transform_expr(e, class_name, parent_name)?,
        Expr::VectorAccess { vector, index } | Expr::FloatVectorIndirection { vector, index } => {
            transform_expr(vector, class_name, parent_name)?;
            transform_expr(index, class_name, parent_name)?;
        }
        Expr::CharIndirection { string, index } => {
            transform_expr(string, class_name, parent_name)?;
            transform_expr(index, class_name, parent_name)?;
        }
        Expr::Pair(a, b) | Expr::FPair(a, b) => {
            transform_expr(a, class_name, parent_name)?;
            transform_expr(b, class_name, parent_name)?;
        }
        Expr::Quad(elems) => {
            for e in elems.iter_mut() {
                transform_expr(e, class_name, parent_name)?;
            }
        }
        Expr::Oct(elems) | Expr::FOct(elems) => {
            for e in elems.iter_mut() {
                transform_expr(e, class_name, parent_name)?;
            }
        }
        Expr::LaneAccess { vector, .. } => transform_expr(vector, class_name, parent_name)?,
        Expr::SuperMethodAccess { method } => {
            // A bare SUPER method reference outside of a call has no
            // lowering (spec.md 4.2, "Non-goals": SUPER is only valid as
            // a call callee).
            return Err(CodegenError::Semantic(vec![
                crate::error::SemanticError::new("SUPER used outside of a call expression")
                    .in_function(method.clone()),
            ]));
        }
        Expr::Number(_)
        | Expr::Float(_)
        | Expr::StringLiteral(_)
        | Expr::CharLiteral(_)
        | Expr::Boolean(_)
        | Expr::Null
        | Expr::VariableAccess(_)
        | Expr::Table(_)
        | Expr::FTable(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_table::{ClassEntry, InMemoryClassTable};
    use crate::types::VarType;

    fn make_program() -> (Program, InMemoryClassTable) {
        let body = Statement::Resultis(Expr::FunctionCall {
            callee: Box::new(Expr::SuperMethodAccess {
                method: "draw".to_string(),
            }),
            args: vec![Expr::Number(1)],
        });
        let method = FunctionDeclaration {
            name: "draw".to_string(),
            parameters: vec![],
            return_type: VarType::INTEGER,
            owning_class: Some("Circle".to_string()),
            is_final: false,
            is_constructor: false,
            body,
        };
        let program = Program {
            declarations: vec![Declaration::Class {
                name: "Circle".to_string(),
                parent: Some("Shape".to_string()),
                methods: vec![method],
            }],
        };
        let mut classes = InMemoryClassTable::new();
        classes.insert(ClassEntry {
            name: "Circle".to_string(),
            parent_name: Some("Shape".to_string()),
            ..Default::default()
        });
        (program, classes)
    }

    #[test]
    fn rewrites_super_call_to_qualified_parent_call() {
        let (mut program, classes) = make_program();
        transform(&mut program, &classes).unwrap();
        if let Declaration::Class { methods, .. } = &program.declarations[0] {
            if let Statement::Resultis(Expr::FunctionCall { callee, args }) = &methods[0].body {
                match callee.as_ref() {
                    Expr::VariableAccess(name) => assert_eq!(name, "Shape::draw"),
                    _ => panic!("expected VariableAccess callee"),
                }
                assert_eq!(args.len(), 2);
                match &args[0] {
                    Expr::VariableAccess(name) => assert_eq!(name, "_this"),
                    _ => panic!("expected _this as first argument"),
                }
            } else {
                panic!("expected a transformed function call");
            }
        } else {
            panic!("expected a class declaration");
        }
    }

    #[test]
    fn errors_when_parent_is_missing() {
        let mut classes = InMemoryClassTable::new();
        classes.insert(ClassEntry {
            name: "Root".to_string(),
            parent_name: None,
            ..Default::default()
        });
        let body = Statement::RoutineCall(Expr::FunctionCall {
            callee: Box::new(Expr::SuperMethodAccess {
                method: "init".to_string(),
            }),
            args: vec![],
        });
        let method = FunctionDeclaration {
            name: "init".to_string(),
            parameters: vec![],
            return_type: VarType::INTEGER,
            owning_class: Some("Root".to_string()),
            is_final: false,
            is_constructor: false,
            body,
        };
        let mut program = Program {
            declarations: vec![Declaration::Class {
                name: "Root".to_string(),
                parent: None,
                methods: vec![method],
            }],
        };
        assert!(transform(&mut program, &classes).is_err());
    }
}
