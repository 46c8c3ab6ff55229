//! Label and veneer management (spec.md section 4.9).
//!
//! Grounded on `examples/original_source/LabelManager.h`: fresh-name
//! generation, a name -> byte-offset map, and runtime-routine name
//! recognition are kept; the singleton pattern is dropped (see
//! `crate::register_manager`'s module doc for the same reasoning) in
//! favour of a value owned by the code generator for one compilation unit.

use crate::binemit::{self, CodeOffset, Instruction, InstructionEncoding};
use crate::isa::registers::Reg;
use std::collections::HashMap;

/// Names recognised as belonging to the runtime support library rather
/// than to user code, mirroring `LabelManager`'s `runtime_labels_` table
/// plus the ABI symbol list spec.md section 6 names.
const RUNTIME_SYMBOLS: &[&str] = &[
    "GETVEC",
    "FGETVEC",
    "BCPL_ALLOC_WORDS",
    "BCPL_ALLOC_CHARS",
    "BCPL_LIST_GET_NTH",
    "BCPL_FREE_LIST",
    "returnNodeToFreelist",
    "WRITEF",
    "WRITEF1",
    "WRITEF2",
    "WRITEF3",
    "WRITEF4",
    "WRITEF5",
    "WRITEF6",
    "WRITEF7",
];

/// Generates fresh label names, records final byte offsets once linking
/// has placed every block, and builds veneer trampolines for external
/// runtime calls.
pub struct LabelManager {
    next_id: usize,
    defined: HashMap<String, CodeOffset>,
    veneers: HashMap<String, CodeOffset>,
}

impl LabelManager {
    /// A fresh manager with no labels defined.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            defined: HashMap::new(),
            veneers: HashMap::new(),
        }
    }

    /// True if `name` is one of the fixed runtime ABI symbols (spec.md
    /// section 6), never a user-defined function.
    pub fn is_runtime_label(name: &str) -> bool {
        RUNTIME_SYMBOLS.contains(&name)
    }

    /// Generate a new unique label name, `L0`, `L1`, ...
    pub fn create_label(&mut self) -> String {
        let name = format!("L{}", self.next_id);
        self.next_id += 1;
        name
    }

    /// Record `label_name`'s final byte offset once it has been placed in
    /// the output buffer. Idempotent on repeated calls with the same
    /// offset; redefining to a different offset is a compiler-internal bug.
    pub fn define_label(&mut self, label_name: impl Into<String>, offset: CodeOffset) {
        self.defined.insert(label_name.into(), offset);
    }

    /// The final offset of a previously defined label, if any.
    pub fn label_offset(&self, label_name: &str) -> Option<CodeOffset> {
        self.defined.get(label_name).copied()
    }

    /// True if `label_name` has been `define_label`-ed already.
    pub fn is_label_defined(&self, label_name: &str) -> bool {
        self.defined.contains_key(label_name)
    }

    /// Whether a veneer trampoline has already been emitted for `symbol`.
    pub fn has_veneer(&self, symbol: &str) -> bool {
        self.veneers.contains_key(symbol)
    }

    /// The byte offset of `symbol`'s veneer entry point, once emitted.
    pub fn veneer_offset(&self, symbol: &str) -> Option<CodeOffset> {
        self.veneers.get(symbol).copied()
    }

    /// Build the 8-word `MOVZ/MOVK`×3 + `BR` trampoline for `symbol` at
    /// `address`, and record `symbol_veneer`'s entry offset as `at_offset`
    /// (the position this sequence will occupy in the veneer region,
    /// supplied by the caller since this manager does not itself own a
    /// code buffer).
    pub fn emit_veneer(&mut self, symbol: &str, address: u64, scratch: Reg, at_offset: CodeOffset) -> Vec<Instruction> {
        let mut code = binemit::create_movz_movk_abs64(scratch, address);
        code.push(create_branch_register(scratch));
        self.veneers.insert(format!("{}_veneer", symbol), at_offset);
        code
    }
}

impl Default for LabelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `BR Xn` — unconditional branch through a register, the tail of a
/// veneer trampoline (spec.md 4.9).
fn create_branch_register(rn: Reg) -> Instruction {
    let word = binemit::BitPatcher::new(0xD61F_0000).patch(u32::from(rn.encoding()), 5, 5).value();
    Instruction {
        encoding: InstructionEncoding::Word(word),
        assembly_text: format!("br {}", rn.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_labels_are_unique_and_sequential() {
        let mut lm = LabelManager::new();
        assert_eq!(lm.create_label(), "L0");
        assert_eq!(lm.create_label(), "L1");
    }

    #[test]
    fn runtime_symbols_are_recognised() {
        assert!(LabelManager::is_runtime_label("WRITEF"));
        assert!(LabelManager::is_runtime_label("GETVEC"));
        assert!(!LabelManager::is_runtime_label("my_function"));
    }

    #[test]
    fn veneer_emission_records_entry_offset() {
        let mut lm = LabelManager::new();
        let code = lm.emit_veneer("GETVEC", 0x1000, Reg::x(16), 64);
        assert_eq!(code.len(), 5); // 4 movz/movk + 1 br
        assert_eq!(lm.veneer_offset("GETVEC_veneer"), Some(64));
        assert!(lm.has_veneer("GETVEC"));
    }

    #[test]
    fn label_offset_round_trips() {
        let mut lm = LabelManager::new();
        assert!(!lm.is_label_defined("L0"));
        lm.define_label("L0", 128);
        assert!(lm.is_label_defined("L0"));
        assert_eq!(lm.label_offset("L0"), Some(128));
    }
}
