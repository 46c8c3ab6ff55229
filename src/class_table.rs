//! Class table data model and trait (spec.md section 6, "ClassTable").
//!
//! Like [`crate::symbol::SymbolTable`], the class table is owned by the
//! front end; this module defines the shape the code generator needs:
//! member layout, vtable blueprint, and parent links for `SUPER` calls.

use crate::types::VarType;
use std::collections::HashMap;

/// Visibility of a member variable, tracked for completeness; this back
/// end does not itself enforce access control (that is a front-end
/// semantic-checking concern, out of scope per spec.md section 1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Visible to the declaring class and its subclasses.
    Public,
    /// Visible only within the declaring class.
    Private,
}

/// A single member-variable slot in an object's layout.
#[derive(Debug, Clone)]
pub struct MemberVariable {
    /// Field name.
    pub name: String,
    /// Byte offset from the object base pointer (the vtable pointer
    /// occupies offset 0, so the first declared field starts at 8).
    pub offset: i64,
    /// Field type.
    pub var_type: VarType,
    /// Declared visibility.
    pub visibility: Visibility,
}

/// One entry of a class's parameter list (for method signatures).
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub var_type: VarType,
}

/// Metadata for one method of a class.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Unqualified method name, e.g. `"draw"`.
    pub name: String,
    /// Mangled, class-qualified name, e.g. `"Shape::draw"`, used as the
    /// direct-call target for constructors and `final` methods.
    pub qualified_name: String,
    /// Index into the class's vtable, in 8-byte slots from the vtable
    /// base (spec.md section 3 invariant: "the i-th virtual method is at
    /// offset 8*i of the vtable").
    pub vtable_slot: u32,
    /// Whether this method participates in dynamic dispatch at all.
    pub is_virtual: bool,
    /// Whether this method is sealed against overriding, and therefore
    /// callable with a direct `BL` even though it is nominally virtual
    /// (spec.md section 4.7, "Function / method call dispatcher").
    pub is_final: bool,
    /// Declared parameter list, not including the implicit `_this`.
    pub parameters: Vec<Param>,
    /// Declared return type.
    pub return_type: VarType,
}

/// One class's layout, vtable blueprint and inheritance link.
#[derive(Debug, Clone, Default)]
pub struct ClassEntry {
    /// This class's own name.
    pub name: String,
    /// The immediate superclass, if any.
    pub parent_name: Option<String>,
    /// Member variables in declaration order (own + inherited, with
    /// inherited fields preceding this class's own — matching standard
    /// single-inheritance layout so a subclass pointer is usable wherever
    /// a parent-class pointer is expected).
    pub member_variables: Vec<MemberVariable>,
    /// Every method reachable on this class, keyed by qualified name.
    pub member_methods: HashMap<String, MethodInfo>,
    /// Ordered list of qualified method names, index == vtable slot.
    pub vtable_blueprint: Vec<String>,
}

impl ClassEntry {
    /// Find a member variable by unqualified name, if declared (directly
    /// or inherited) on this class.
    pub fn find_member(&self, name: &str) -> Option<&MemberVariable> {
        self.member_variables.iter().find(|m| m.name == name)
    }

    /// Find method metadata by unqualified name.
    pub fn find_method_by_name(&self, name: &str) -> Option<&MethodInfo> {
        self.member_methods
            .values()
            .find(|m| m.name == name && m.qualified_name.starts_with(&self.name))
    }
}

/// Per-class layout and dispatch metadata (spec.md section 6).
pub trait ClassTable {
    /// Look up a class's full entry by name.
    fn get_class(&self, name: &str) -> Option<ClassEntry>;
}

/// A simple in-memory [`ClassTable`], used by this crate's own tests.
#[derive(Default)]
pub struct InMemoryClassTable {
    classes: HashMap<String, ClassEntry>,
}

impl InMemoryClassTable {
    /// Construct an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully built class entry.
    pub fn insert(&mut self, entry: ClassEntry) {
        self.classes.insert(entry.name.clone(), entry);
    }
}

impl ClassTable for InMemoryClassTable {
    fn get_class(&self, name: &str) -> Option<ClassEntry> {
        self.classes.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtable_slot_matches_blueprint_index() {
        let mut entry = ClassEntry {
            name: "Shape".into(),
            ..Default::default()
        };
        entry.vtable_blueprint = vec!["Shape::area".into(), "Shape::draw".into()];
        entry.member_methods.insert(
            "Shape::draw".into(),
            MethodInfo {
                name: "draw".into(),
                qualified_name: "Shape::draw".into(),
                vtable_slot: 1,
                is_virtual: true,
                is_final: false,
                parameters: vec![],
                return_type: VarType::INTEGER,
            },
        );
        let slot = entry.member_methods["Shape::draw"].vtable_slot;
        assert_eq!(entry.vtable_blueprint[slot as usize], "Shape::draw");
    }
}
