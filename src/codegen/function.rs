//! Per-function lowering context (spec.md 4.7, "Per-function driver").
//!
//! Owns everything that is reset for each function compiled: the call
//! frame, the register manager, the allocator's output, and the small
//! amount of local value-numbering state (spec.md 4.7, "Local value
//! tracking"). Everything that survives across functions — labels, the
//! data section, global-variable slots — lives on [`super::Compiler`]
//! instead and is threaded through by reference.

use crate::ast::FunctionDeclaration;
use crate::binemit::{self, Instruction};
use crate::class_table::ClassTable;
use crate::error::CodegenResult;
use crate::frame::CallFrame;
use crate::isa::registers::{parse_reg, Reg, RegClass};
use crate::metrics::FunctionMetrics;
use crate::regalloc::AllocationResult;
use crate::register_manager::RegisterManager;
use crate::settings::Flags;
use crate::symbol::{SymbolKind, SymbolTable};
use crate::types::VarType;
use std::collections::HashMap;

/// A literal or plain-variable value a local variable was last assigned,
/// kept so a later read can re-materialise it instead of reloading
/// (spec.md 4.7, "Local value tracking"). Any other kind of assignment
/// invalidates the entry.
#[derive(Debug, Clone)]
pub enum KnownValue {
    Number(i64),
    Float(f64),
    Variable(String),
}

/// Sense in which a block-epilogue branch should read a condition
/// register: `Normal` branches to the "true" successor when the
/// register is non-zero, `Inverted` does so when it is zero (`UNTIL`,
/// `UNLESS`, and `REPEAT ... UNTIL` all continue/branch on falsity).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BranchSense {
    Normal,
    Inverted,
}

/// Where a `RESULTIS` inside the innermost active `VALOF` expression
/// should land its value: moved into `dest`, then an unconditional
/// branch to `label`. An empty stack means `RESULTIS` is at function-body
/// level and should fall back to the `X0`/`D0` + epilogue-branch
/// convention instead (spec.md 4.7, "Return paths").
#[derive(Debug, Clone)]
pub struct ResultisTarget {
    pub label: String,
    pub dest: Reg,
}

pub struct FunctionContext<'a> {
    pub name: String,
    pub owning_class: Option<String>,
    pub flags: Flags,
    pub frame: CallFrame,
    pub regs: RegisterManager,
    pub metrics: FunctionMetrics,
    pub allocation: AllocationResult,
    pub symbols: &'a dyn SymbolTable,
    pub classes: &'a dyn ClassTable,
    pub return_type: VarType,
    pub known_values: HashMap<String, KnownValue>,
    pub bounds_error_used: bool,
    /// Label each active `SWITCHON`'s `ENDCASE` should jump to, innermost
    /// last.
    pub endcase_targets: Vec<String>,
    /// Landing site for `RESULTIS` inside nested `VALOF` expressions,
    /// innermost last.
    pub resultis_targets: Vec<ResultisTarget>,
}

impl<'a> FunctionContext<'a> {
    /// Build a fresh context for `decl`, declaring its parameters and
    /// every local the analyser typed, and applying the allocator's
    /// register-pressure hints to the frame and register manager
    /// (spec.md 4.7, steps 2-4 of the per-function driver).
    pub fn new(
        name: String,
        owning_class: Option<String>,
        decl: &FunctionDeclaration,
        flags: Flags,
        metrics: FunctionMetrics,
        allocation: AllocationResult,
        symbols: &'a dyn SymbolTable,
        classes: &'a dyn ClassTable,
    ) -> CodegenResult<Self> {
        let mut frame = CallFrame::new(name.clone(), flags.enable_stack_canaries);
        for param in &decl.parameters {
            frame.add_parameter(&param.name, param.var_type)?;
        }
        let mut local_names: Vec<String> = metrics
            .variable_types
            .keys()
            .filter(|n| !metrics.parameter_index.contains_key(n.as_str()))
            .cloned()
            .collect();
        local_names.sort();
        for local in &local_names {
            let ty = metrics.variable_types[local];
            frame.add_local(local, ty)?;
        }
        frame.set_uses_global_pointers(metrics.flags.uses_global_pointers);
        for reg_name in &metrics.required_callee_saved_regs {
            if let Some(reg) = parse_reg(reg_name) {
                frame.force_save_register(reg);
            }
        }
        frame.reserve_registers_based_on_pressure(metrics.max_live_variables);
        if metrics.required_callee_saved_temps > 0 {
            frame.preallocate_spill_slots(metrics.required_callee_saved_temps);
        }

        let mut regs = RegisterManager::new();
        regs.set_neon_enabled(flags.enable_neon);
        regs.sync_with_allocator(&allocation);

        Ok(Self {
            name,
            owning_class,
            flags,
            frame,
            regs,
            metrics,
            allocation,
            symbols,
            classes,
            return_type: decl.return_type,
            known_values: HashMap::new(),
            bounds_error_used: false,
            endcase_targets: Vec::new(),
            resultis_targets: Vec::new(),
        })
    }

    /// Lower a whole CFG in emission order: define each block's label,
    /// lower its statements, then synthesise the branch to its
    /// successor(s) from the CFG edges rather than from the statements
    /// themselves (spec.md 4.7, "Block epilogue").
    pub fn lower_cfg(&mut self, compiler: &mut super::Compiler, cfg: &crate::cfg::FunctionCfg) -> CodegenResult<Vec<Instruction>> {
        let mut code = Vec::new();
        for &block_id in &cfg.emission_order {
            let block = match cfg.block(block_id) {
                Some(b) => b.clone(),
                None => continue,
            };
            code.push(Instruction::label_definition(self.block_label(block_id)));
            let mut branch_info = None;
            for statement in &block.statements {
                let (stmt_code, info) = super::stmt::lower_cfg_statement(compiler, self, statement)?;
                code.extend(stmt_code);
                if info.is_some() {
                    branch_info = info;
                }
            }
            code.extend(self.emit_block_epilogue(cfg, &block, branch_info));
        }
        Ok(code)
    }

    fn emit_block_epilogue(&mut self, cfg: &crate::cfg::FunctionCfg, block: &crate::cfg::BasicBlock, branch: Option<(Reg, BranchSense)>) -> Vec<Instruction> {
        let mut code = Vec::new();
        match block.successors.len() {
            0 => {}
            1 => {
                let target = block.successors[0];
                if cfg.next_in_emission_order(block.id) != Some(target) {
                    code.push(binemit::create_branch_unconditional(self.block_label(target)));
                }
            }
            _ => {
                let (reg, sense) = match branch {
                    Some(v) => v,
                    None => return code,
                };
                let taken = block.successors[0];
                let not_taken = block.successors[1];
                code.push(binemit::create_cmp_imm(reg, 0));
                let cond = match sense {
                    BranchSense::Normal => crate::binemit::Condition::Ne,
                    BranchSense::Inverted => crate::binemit::Condition::Eq,
                };
                code.push(binemit::create_branch_conditional(cond, self.block_label(taken)));
                if cfg.next_in_emission_order(block.id) != Some(not_taken) {
                    code.push(binemit::create_branch_unconditional(self.block_label(not_taken)));
                }
                self.release(reg);
            }
        }
        code
    }

    /// The block label for `id` within this function, used both as a
    /// branch target and as the label this function's `lower_cfg` defines
    /// immediately before lowering the block's statements.
    pub fn block_label(&self, id: crate::cfg::BlockId) -> String {
        format!("{}_block{}", self.name, id.0)
    }

    /// This function's shared epilogue label, the target of `RETURN` and
    /// `RESULTIS`.
    pub fn epilogue_label(&self) -> String {
        format!("{}_epilogue", self.name)
    }

    /// The per-function bounds-error trap label, emitted once the first
    /// time a bounds check is lowered (spec.md 4.7, "Bounds checking").
    pub fn bounds_error_label(&mut self) -> String {
        self.bounds_error_used = true;
        format!("{}_bounds_error", self.name)
    }

    /// Emit the trap the bounds-error label above branches to: a bare
    /// `BRK` distinguishable from the stack-canary traps `CallFrame`
    /// emits by its immediate, mirroring how `generate_epilogue` defines
    /// its own trap labels right next to the checks that branch to them.
    pub fn emit_bounds_error_trap(&self) -> Vec<Instruction> {
        vec![
            Instruction::label_definition(format!("{}_bounds_error", self.name)),
            binemit::create_brk(1),
        ]
    }

    /// Best-effort type of a declared name: the analyser's metrics first,
    /// falling back to whatever the symbol table itself believes.
    pub fn variable_type(&self, name: &str) -> VarType {
        self.metrics
            .variable_types
            .get(name)
            .copied()
            .or_else(|| self.symbols.lookup(name).map(|s| s.var_type))
            .unwrap_or(VarType::INTEGER)
    }

    /// True if `name` resolves to a `GLOBAL` declaration in the symbol
    /// table.
    pub fn is_global(&self, name: &str) -> bool {
        matches!(
            self.symbols.lookup(name).map(|s| s.kind),
            Some(SymbolKind::GlobalVar)
        )
    }

    /// The compile-time value of a `MANIFEST`, if `name` names one.
    pub fn manifest_value(&self, name: &str) -> Option<i64> {
        let symbol = self.symbols.lookup(name)?;
        if symbol.kind == SymbolKind::Manifest {
            Some(symbol.location)
        } else {
            None
        }
    }

    /// Move `X0../D0..` into each parameter's allocated home register or
    /// spill slot, honouring the ABI split between integer and float
    /// argument registers (spec.md 4.7, step 6 of the per-function
    /// driver).
    pub fn move_incoming_arguments(&mut self) -> CodegenResult<Vec<Instruction>> {
        let mut code = Vec::new();
        let mut ordered: Vec<(String, usize)> = self
            .metrics
            .parameter_index
            .iter()
            .map(|(n, &i)| (n.clone(), i))
            .collect();
        ordered.sort_by_key(|(_, i)| *i);

        let mut ngrn: u8 = 0;
        let mut nsrn: u8 = 0;
        for (name, _) in ordered {
            let ty = self.variable_type(&name);
            let src = if ty.passes_in_float_register() {
                let r = Reg::d(nsrn);
                nsrn += 1;
                r
            } else {
                let r = Reg::x(ngrn);
                ngrn += 1;
                r
            };
            code.extend(self.bind_incoming_argument(&name, ty, src)?);
        }
        Ok(code)
    }

    fn bind_incoming_argument(&mut self, name: &str, ty: VarType, src: Reg) -> CodegenResult<Vec<Instruction>> {
        let mut code = Vec::new();
        if let Some(interval) = self.allocation.get(name).cloned() {
            if interval.is_spilled {
                let off = self.frame.get_offset(name)?;
                code.push(store_to_offset(src, Reg::FP, off, ty));
            } else if let Some(dest) = interval.assigned_register {
                if dest != src {
                    code.push(move_reg(dest, src, ty));
                }
                self.regs.set_initialized(dest, true);
                self.regs.mark_dirty(dest, false);
            }
        } else {
            let off = self.frame.get_offset(name)?;
            code.push(store_to_offset(src, Reg::FP, off, ty));
        }
        Ok(code)
    }

    /// Resolve `name`'s current value into a register, emitting whatever
    /// load/spill-eviction code is needed (spec.md 4.7, "Variable access
    /// (`get_variable_register`)").
    pub fn get_variable_register(&mut self, compiler: &mut super::Compiler, name: &str) -> CodegenResult<(Reg, Vec<Instruction>)> {
        let mut code = Vec::new();
        if let Some(r) = self.regs.register_for_variable(name) {
            return Ok((r, code));
        }
        let ty = self.variable_type(name);
        if self.is_global(name) {
            let slot = compiler.global_slot(name);
            let reg = if ty.passes_in_float_register() {
                self.regs.acquire_fp_scratch_reg()?
            } else {
                self.regs.acquire_scratch_reg()?
            };
            code.push(load_from_offset(reg, Reg::GLOBAL_BASE, slot * 8, ty));
            return Ok((reg, code));
        }
        if let Some(value) = self.manifest_value(name) {
            let reg = self.regs.acquire_scratch_reg()?;
            code.extend(materialise_int(reg, value));
            return Ok((reg, code));
        }
        let (reg, evicted) = self.regs.acquire_variable_reg(name, &mut self.frame);
        if let Some(ev) = evicted {
            if let Some(off) = ev.spill_offset {
                let evty = self.variable_type(&ev.variable_name);
                code.push(store_to_offset(ev.from_register, Reg::FP, off, evty));
            }
        }
        let off = self.frame.get_offset(name)?;
        code.push(load_from_offset(reg, Reg::FP, off, ty));
        self.regs.set_initialized(reg, true);
        Ok((reg, code))
    }

    /// Commit `value_reg`'s contents as `name`'s new value: move it into
    /// `name`'s already-bound register if it has one, otherwise acquire
    /// one (spilling the LRU dirty variable first), and mark the result
    /// dirty so it is written back lazily on eviction rather than
    /// immediately (spec.md 4.6, "Acquisition").
    pub fn bind_variable_value(&mut self, name: &str, value_reg: Reg) -> CodegenResult<Vec<Instruction>> {
        let mut code = Vec::new();
        let ty = self.variable_type(name);
        if let Some(existing) = self.regs.register_for_variable(name) {
            if existing != value_reg {
                code.push(move_reg(existing, value_reg, ty));
            }
            self.regs.mark_dirty(existing, true);
            self.regs.set_initialized(existing, true);
            return Ok(code);
        }
        let (dest, evicted) = self.regs.acquire_variable_reg(name, &mut self.frame);
        if let Some(ev) = evicted {
            if let Some(off) = ev.spill_offset {
                let evty = self.variable_type(&ev.variable_name);
                code.push(store_to_offset(ev.from_register, Reg::FP, off, evty));
            }
        }
        if dest != value_reg {
            code.push(move_reg(dest, value_reg, ty));
        }
        self.regs.mark_dirty(dest, true);
        self.regs.set_initialized(dest, true);
        Ok(code)
    }

    /// Store `value_reg` directly into `name`'s global slot.
    pub fn store_global(&mut self, compiler: &mut super::Compiler, name: &str, value_reg: Reg, ty: VarType) -> Instruction {
        let slot = compiler.global_slot(name);
        store_to_offset(value_reg, Reg::GLOBAL_BASE, slot * 8, ty)
    }

    /// The register `_this` is bound to inside a method body.
    pub fn this_register(&mut self, compiler: &mut super::Compiler) -> CodegenResult<(Reg, Vec<Instruction>)> {
        self.get_variable_register(compiler, "_this")
    }

    /// Release a register returned by [`crate::codegen::expr::lower_expr`]
    /// once its value has been consumed. By convention every expression
    /// lowering returns a register the caller exclusively owns — a
    /// variable's own home register is never handed back directly, it is
    /// copied into a fresh scratch first — so this is always safe to call
    /// and never disturbs a variable binding (spec.md 4.7 describes
    /// `expression_result_reg_` the same way: "the next consumer releases
    /// it").
    pub fn release(&mut self, reg: Reg) {
        self.regs.release_scratch_reg(reg);
    }
}

/// `MOV`/`FMOV` between two physical registers, or a converting
/// `SCVTF`/`FCVTZS` when `dest` and `src` sit in different register
/// banks (spec.md 4.7, "AArch64 argument coercion": an integer source
/// landing in a float slot gets `SCVTF`, a float source landing in an
/// integer slot gets a truncating `FCVTZS`). `ty` only disambiguates
/// same-bank moves; the bank mismatch itself is read off the registers,
/// not inferred from the destination's declared type.
pub(super) fn move_reg(dest: Reg, src: Reg, ty: VarType) -> Instruction {
    match (dest.class(), src.class()) {
        (RegClass::Fpr, RegClass::Gpr) => binemit::create_scvtf(dest, src),
        (RegClass::Gpr, RegClass::Fpr) => binemit::create_fcvtzs(dest, src),
        _ if ty.passes_in_float_register() => binemit::create_fmov_reg(dest, src),
        _ => binemit::create_mov_reg(dest, src),
    }
}

/// `LDR`/`LDR` (FP variant) from `[base, #offset]`.
pub(super) fn load_from_offset(dest: Reg, base: Reg, offset: i32, ty: VarType) -> Instruction {
    if ty.passes_in_float_register() {
        binemit::create_ldr_fp_imm(dest, base, offset)
    } else {
        binemit::create_ldr_imm(dest, base, offset)
    }
}

/// `STR`/`STR` (FP variant) to `[base, #offset]`.
pub(super) fn store_to_offset(src: Reg, base: Reg, offset: i32, ty: VarType) -> Instruction {
    if ty.passes_in_float_register() {
        binemit::create_str_fp_imm(src, base, offset)
    } else {
        binemit::create_str_imm(src, base, offset)
    }
}

/// Materialise a 64-bit integer constant into `dest` via `MOVZ`/`MOVK`.
pub(super) fn materialise_int(dest: Reg, value: i64) -> Vec<Instruction> {
    binemit::create_movz_movk_abs64(dest, value as u64)
}

/// Materialise a `f64` constant into `dest` by loading its bit pattern
/// into a scratch integer register and bridging with `FMOV`.
pub(super) fn materialise_float(dest: Reg, scratch_x: Reg, value: f64) -> Vec<Instruction> {
    let mut code = materialise_int(scratch_x, value.to_bits() as i64);
    code.push(binemit::create_fmov_x_to_d(dest, scratch_x));
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, FunctionDeclaration, Param, Statement};
    use crate::class_table::InMemoryClassTable;
    use crate::symbol::InMemorySymbolTable;

    fn decl() -> FunctionDeclaration {
        FunctionDeclaration {
            name: "f".into(),
            parameters: vec![Param {
                name: "x".into(),
                var_type: VarType::INTEGER,
            }],
            return_type: VarType::INTEGER,
            owning_class: None,
            is_final: false,
            is_constructor: false,
            body: Statement::Resultis(Expr::VariableAccess("x".into())),
        }
    }

    #[test]
    fn move_incoming_arguments_binds_parameter_register() {
        let d = decl();
        let mut metrics = FunctionMetrics::new(&["x".to_string()]);
        metrics.record_variable_type("x", VarType::INTEGER);
        let symbols = InMemorySymbolTable::default();
        let classes = InMemoryClassTable::new();
        let mut ctx = FunctionContext::new(
            "f".into(),
            None,
            &d,
            Flags::new(),
            metrics,
            AllocationResult::new(),
            &symbols,
            &classes,
        )
        .unwrap();
        ctx.frame.generate_prologue().unwrap();
        let code = ctx.move_incoming_arguments().unwrap();
        assert!(!code.is_empty());
    }
}
