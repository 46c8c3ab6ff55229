//! Abstract syntax tree consumed by this crate.
//!
//! The lexer/parser that produces this tree is out of scope (spec.md
//! section 1); this module exists only so the analyser, SUPER-call
//! transformer and code generator have a concrete tree to walk, mutate
//! and consume. Node names follow the C++ original
//! (`examples/original_source/analysis/az_impl/az_visit_*.cpp`,
//! `examples/original_source/generators/gen_*.cpp`) so the mapping from
//! spec behaviour to implementation stays traceable.

use crate::types::VarType;

/// A whole compilation unit: top-level declarations in source order.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Top-level declarations.
    pub declarations: Vec<Declaration>,
}

/// A top-level or class-member declaration.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// `LET name(params) = expr` or `LET name(params) BE { ... }`: a
    /// value-returning function.
    Function(FunctionDeclaration),
    /// `ROUTINE` (no return value).
    Routine(FunctionDeclaration),
    /// `GLOBAL name` or `GLOBAL name := init`.
    Global {
        /// Declared name.
        name: String,
        /// Declared type, if known at parse time.
        var_type: VarType,
        /// Optional initialiser.
        init: Option<Expr>,
    },
    /// `MANIFEST name = const_expr`.
    Manifest {
        /// Declared name.
        name: String,
        /// The compile-time constant value.
        value: i64,
    },
    /// A class with its own member functions/routines (member layout and
    /// the vtable blueprint live in [`crate::class_table::ClassTable`],
    /// supplied by the front end; this variant only carries the method
    /// bodies the code generator must still lower).
    Class {
        /// Class name.
        name: String,
        /// Immediate superclass, if any.
        parent: Option<String>,
        /// Method bodies declared directly on this class.
        methods: Vec<FunctionDeclaration>,
    },
}

/// A function, routine, or method body.
#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    /// Unqualified name (methods are qualified by [`crate::class_table`]
    /// at dispatch time, not here).
    pub name: String,
    /// Declared parameters, in order. The implicit `_this` parameter is
    /// injected into this list by [`crate::analysis`] before code
    /// generation ever sees the declaration.
    pub parameters: Vec<Param>,
    /// Declared or inferred return type.
    pub return_type: VarType,
    /// The owning class, for a method; `None` for a free function.
    pub owning_class: Option<String>,
    /// Whether this method is `final` (spec.md 4.7, skips vtable
    /// indirection even though nominally virtual).
    pub is_final: bool,
    /// Whether this is a constructor (`CREATE`); also skips vtable
    /// indirection.
    pub is_constructor: bool,
    /// The function body.
    pub body: Statement,
}

/// A formal parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub var_type: VarType,
}

/// A statement. Control-flow statements carry only their controlling
/// expression; per spec.md section 4.7 ("Block epilogue") the actual
/// branch is synthesised from the CFG, not emitted by the statement
/// visitor itself.
#[derive(Debug, Clone)]
pub enum Statement {
    /// `{ stmt; stmt; ... }` — introduces a new lexical scope.
    Block(Vec<Statement>),
    /// A sequence of statements that does *not* introduce a new scope
    /// (`stmt1; stmt2`).
    Compound(Vec<Statement>),
    /// `lhs1, lhs2, ... := rhs1, rhs2, ...`.
    Assignment {
        /// Left-hand-side targets, evaluated for their address/location.
        lhs: Vec<Expr>,
        /// Right-hand-side values, evaluated left to right before any
        /// store happens (spec.md 4.7, "Assignment").
        rhs: Vec<Expr>,
    },
    /// `IF cond THEN body`.
    If {
        /// Controlling expression.
        cond: Expr,
        /// Taken branch.
        then_branch: Box<Statement>,
    },
    /// `UNLESS cond THEN body` (the BCPL inverse of `IF`).
    Unless {
        /// Controlling expression.
        cond: Expr,
        /// Taken branch, executed when `cond` is false.
        then_branch: Box<Statement>,
    },
    /// `TEST cond THEN a ELSE b`.
    Test {
        /// Controlling expression.
        cond: Expr,
        /// Taken when `cond` is true.
        then_branch: Box<Statement>,
        /// Taken when `cond` is false.
        else_branch: Box<Statement>,
    },
    /// `WHILE cond DO body`.
    While {
        /// Controlling expression, re-evaluated each iteration.
        cond: Expr,
        /// Loop body.
        body: Box<Statement>,
    },
    /// `UNTIL cond DO body`.
    Until {
        /// Controlling expression; the loop continues while false.
        cond: Expr,
        /// Loop body.
        body: Box<Statement>,
    },
    /// `REPEAT body WHILE cond` / `REPEAT body UNTIL cond` (BCPL's
    /// post-tested loop; `is_until` selects the sense of `cond`).
    Repeat {
        /// Loop body, executed at least once.
        body: Box<Statement>,
        /// Condition re-checked after each iteration.
        cond: Expr,
        /// If true, loop continues while `cond` is false (`REPEATUNTIL`).
        is_until: bool,
    },
    /// `FOR v = start TO end BY step DO body`.
    For {
        /// The loop control variable, after renaming by the analyser
        /// (spec.md 4.1, "FOR-loop variable renaming").
        renamed_var: String,
        /// The original source name, kept for diagnostics.
        original_var: String,
        /// Initial value.
        start: Expr,
        /// Bound expression.
        end: Expr,
        /// Step expression (defaults to the literal `1`).
        step: Expr,
        /// Set by the analyser when `end` was a compile-time integer
        /// constant; when set, no backing variable is allocated for it
        /// (spec.md property P7).
        constant_end_value: Option<i64>,
        /// As above, for `step`.
        constant_step_value: Option<i64>,
        /// Loop body.
        body: Box<Statement>,
    },
    /// `SWITCHON expr INTO { CASE c1: ...; DEFAULT: ... }`.
    Switchon {
        /// The switch's controlling expression.
        expr: Expr,
        /// Each case's compile-time constant and its body.
        cases: Vec<(i64, Statement)>,
        /// The default body, if declared.
        default: Option<Box<Statement>>,
    },
    /// `RETURN` — routine exit, no value.
    Return,
    /// `RESULTIS expr` — function exit with a value.
    Resultis(Expr),
    /// A call to a `ROUTINE` made as a statement, discarding any result.
    RoutineCall(Expr),
    /// `FREEVEC`/`FREE`-style release of a heap vector.
    Free(Expr),
    /// A label target: `name:`.
    LabelTarget(String),
    /// An unconditional jump to a label.
    Goto(String),
    /// `ENDCASE` — exits the innermost `SWITCHON`.
    Endcase,
    /// `BRK #n` trap, surfaced directly in source for test fixtures.
    Brk(u16),
    /// `FINISH` — terminates the whole program.
    Finish,
    /// No-op.
    Nop,
}

/// An expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Integer literal.
    Number(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal; the analyser/codegen intern it into the data
    /// section.
    StringLiteral(String),
    /// Character literal.
    CharLiteral(char),
    /// `TRUE`/`FALSE`.
    Boolean(bool),
    /// `NULL` (typed `0`).
    Null,
    /// A variable, parameter, global, or manifest reference, by name.
    VariableAccess(String),
    /// `op lhs rhs`.
    BinaryOp {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `op operand`.
    UnaryOp {
        /// The operator.
        op: UnOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// `cond -> then_expr, else_expr`.
    Conditional {
        /// Controlling expression.
        cond: Box<Expr>,
        /// Value when true.
        then_expr: Box<Expr>,
        /// Value when false.
        else_expr: Box<Expr>,
    },
    /// `VALOF { ... RESULTIS expr }`.
    Valof(Box<Statement>),
    /// A call to a known or function-pointer callee with arguments,
    /// evaluated left to right (spec.md 4.7, "Function / method call
    /// dispatcher").
    FunctionCall {
        /// The callee expression (a name, a member access, a SUPER
        /// access, or an arbitrary function-pointer-valued expression).
        callee: Box<Expr>,
        /// Argument expressions, in source order.
        args: Vec<Expr>,
    },
    /// `obj.member` — field access or, when used as a call callee, method
    /// access.
    MemberAccess {
        /// The receiver object expression.
        object: Box<Expr>,
        /// The member name.
        member: String,
    },
    /// `SUPER.method` — only ever appears as a call callee; rewritten
    /// away by [`crate::super_call`] before liveness analysis.
    SuperMethodAccess {
        /// The method name.
        method: String,
    },
    /// `NEW ClassName(args)`.
    New {
        /// Class to instantiate.
        class_name: String,
        /// Constructor arguments.
        args: Vec<Expr>,
    },
    /// `VEC n`.
    VecAllocation(Box<Expr>),
    /// `FVEC n`.
    FVecAllocation(Box<Expr>),
    /// `STRING n`.
    StringAllocation(Box<Expr>),
    /// `v[i]` integer-vector element access.
    VectorAccess {
        /// The vector expression.
        vector: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// `v[i]` float-vector element access.
    FloatVectorIndirection {
        /// The vector expression.
        vector: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// `s%i` character indirection into a string.
    CharIndirection {
        /// The string expression.
        string: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// A packed `PAIR(a, b)` literal/constructor.
    Pair(Box<Expr>, Box<Expr>),
    /// A packed `FPAIR(a, b)` literal/constructor.
    FPair(Box<Expr>, Box<Expr>),
    /// A packed `QUAD(a, b, c, d)` literal/constructor.
    Quad([Box<Expr>; 4]),
    /// A packed `OCT(a..h)` literal/constructor.
    Oct([Box<Expr>; 8]),
    /// A heap-allocated `FOCT(a..h)` literal/constructor.
    FOct([Box<Expr>; 8]),
    /// `PAIRS n` allocation.
    PairsAllocation(Box<Expr>),
    /// `FPAIRS n` allocation.
    FPairsAllocation(Box<Expr>),
    /// `v.laneI` lane access on a SIMD value.
    LaneAccess {
        /// The vector expression.
        vector: Box<Expr>,
        /// Lane index.
        lane: u32,
    },
    /// `TABLE a, b, c` literal.
    Table(Vec<i64>),
    /// `FTABLE a, b, c` literal.
    FTable(Vec<f64>),
}

/// Binary operators. Comparisons produce a boolean-as-integer result;
/// everything else follows standard BCPL arithmetic/bitwise semantics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `REM`
    Rem,
    /// `=`
    Eq,
    /// `~=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&` (bitwise and / logical and)
    And,
    /// `|` (bitwise or / logical or)
    Or,
    /// `XOR`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// Unary operators, including the BCPL list/vector intrinsics (spec.md
/// 4.7, "List intrinsics").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise/logical complement.
    Not,
    /// `@x` — address-of.
    AddressOf,
    /// `!x` — pointer indirection (load through a pointer).
    Indirection,
    /// `HD` — list head.
    Hd,
    /// `TL` — list tail, destructive (spec.md 4.7).
    Tl,
    /// `REST` — list tail, non-destructive.
    Rest,
    /// `LEN` — vector/string/list length.
    Len,
    /// `FLOAT` — int-to-float conversion.
    FloatConvert,
    /// `FIX` — float-to-int conversion (truncating).
    FixConvert,
}
