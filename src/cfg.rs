//! Control-flow graph data model (spec.md section 3, "BasicBlock";
//! section 6, "CFGMap").
//!
//! The CFG *builder* is an external collaborator (spec.md section 2,
//! component D): the front end splits each function into basic blocks and
//! hands this crate the block list plus successor/predecessor edges. This
//! mirrors `cranelift-codegen::flowgraph::ControlFlowGraph`'s split
//! between "here is the graph shape" and "here is how it was computed" —
//! our version is a plain, AST-statement-indexed graph rather than one
//! keyed by IR instructions, since this back-end consumes an AST directly
//! rather than its own SSA IR.

use crate::ast::Statement;
use std::collections::HashMap;

/// Opaque identifier for a [`BasicBlock`] within one function's CFG.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId(pub u32);

/// A basic block: a straight-line statement run plus its graph edges and
/// the liveness sets [`crate::liveness`] fills in (spec.md section 3).
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// This block's identifier.
    pub id: BlockId,
    /// Statements in the block, in execution order. Control-flow
    /// statements appear here too, but only for their controlling
    /// expression — per spec.md 4.7 the branch itself is synthesised from
    /// `successors`, not from the statement.
    pub statements: Vec<Statement>,
    /// Blocks that can branch or fall through into this one.
    pub predecessors: Vec<BlockId>,
    /// Blocks this one can branch or fall through into, in source/branch
    /// order (e.g. `[then_block, else_block]` for a two-way conditional).
    pub successors: Vec<BlockId>,
    /// True if any statement in this block is a call (function, routine,
    /// or method) — read by [`crate::liveness`] to flag call-crossing
    /// variables (spec.md 4.3).
    pub contains_call: bool,
    /// Variables read before being defined within this block.
    pub use_set: Vec<String>,
    /// Variables assigned within this block.
    pub def_set: Vec<String>,
    /// Liveness-in set, filled in by [`crate::liveness::analyse`].
    pub live_in: Vec<String>,
    /// Liveness-out set, filled in by [`crate::liveness::analyse`].
    pub live_out: Vec<String>,
}

impl BasicBlock {
    /// A new, empty block with the given id.
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// One function's control-flow graph (spec.md section 6, "CFGMap").
#[derive(Debug, Clone, Default)]
pub struct FunctionCfg {
    /// Every block, indexed by id.
    pub blocks: HashMap<BlockId, BasicBlock>,
    /// The function's single entry block.
    pub entry: BlockId,
    /// Blocks in a topological (or at minimum, reverse-postorder-ish)
    /// emission order, used by the code generator to decide whether a
    /// fall-through is available (spec.md 4.7, "Block epilogue").
    pub emission_order: Vec<BlockId>,
}

impl FunctionCfg {
    /// Borrow a block by id, or `None` if the id is not part of this
    /// graph.
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    /// The block immediately following `id` in emission order, if any —
    /// used to decide whether an unconditional successor needs an
    /// explicit branch or falls through (spec.md 4.7).
    pub fn next_in_emission_order(&self, id: BlockId) -> Option<BlockId> {
        let pos = self.emission_order.iter().position(|&b| b == id)?;
        self.emission_order.get(pos + 1).copied()
    }
}

/// Map of function name to its [`FunctionCfg`] (spec.md section 6,
/// "CFGMap").
pub trait CfgMap {
    /// Borrow the CFG for `function_name`, if known.
    fn cfg_for(&self, function_name: &str) -> Option<&FunctionCfg>;
}

impl CfgMap for HashMap<String, FunctionCfg> {
    fn cfg_for(&self, function_name: &str) -> Option<&FunctionCfg> {
        self.get(function_name)
    }
}
