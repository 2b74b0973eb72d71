// Cb execution core: Scope Stack (C2) and the Variable binding (§3.3).
//
// Grounded directly on the teacher's `env::Env<T>`: an `Rc`-chained
// map with a `RefCell`-guarded current frame and an `Option<parent>`
// link. That shape already gives top-down-then-global lookup for
// free; this module instantiates it with `T = VarRef` and adds the
// stack discipline (push/pop), the secondary function-pointer map,
// and synthesized temp names spec.md §3.5 calls for.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::{IntWidth, TypeTag, Value};

/// A binding as described in spec.md §3.3. `struct_members` lives on
/// `StructInstance` (see struct_engine.rs) rather than here, so that a
/// Variable of struct type is `Variable { value: Value::Struct(..), .. }`
/// and the aggregate/shadow duplication (§9) is centered on one path.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub type_tag: TypeTag,
    pub type_name: Option<String>,
    pub is_const: bool,
    pub is_assigned: bool,
    pub is_reference: bool,
    pub is_unsigned: bool,
    pub is_private: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value, type_tag: TypeTag) -> Self {
        Variable {
            name: name.into(),
            value,
            type_tag,
            type_name: None,
            is_const: false,
            is_assigned: false,
            is_reference: false,
            is_unsigned: false,
            is_private: false,
        }
    }

    pub fn default_for(type_tag: TypeTag) -> Self {
        let value = match &type_tag {
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Int(_) => Value::Int(0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::Double => Value::Double(0.0),
            TypeTag::Quad => Value::Quad(0.0),
            TypeTag::Char => Value::Char(0),
            TypeTag::String => Value::Str(Rc::new(String::new())),
            TypeTag::Pointer(_) => Value::Pointer(crate::value::PointerValue::Null),
            _ => Value::Void,
        };
        Variable::new("", value, type_tag)
    }
}

/// A live binding: `Rc<RefCell<Variable>>`. Pointers-to-variables
/// (spec.md §9's `Raw(ReferentId)`) are just clones of this handle —
/// Rust's `Rc` *is* the arena-index scheme the spec asks for, and it
/// is the same "abstract over memory management" idiom the teacher
/// spells out as `type Node<T> = Rc<T>` in `ast.rs`.
pub type VarRef = Rc<RefCell<Variable>>;

pub fn var_ref(v: Variable) -> VarRef {
    Rc::new(RefCell::new(v))
}

type Map = HashMap<String, VarRef>;

/// One lexical scope frame, chained to its parent. Mirrors
/// `env::Env<T>` field-for-field.
pub struct Env {
    vars: RefCell<Map>,
    functions: RefCell<HashMap<String, VarRef>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    fn new(parent: Option<Rc<Env>>) -> Env {
        Env { vars: RefCell::new(Map::new()), functions: RefCell::new(HashMap::new()), parent }
    }

    pub fn root() -> Rc<Env> {
        Rc::new(Self::new(None))
    }

    pub fn chain(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Self::new(Some(parent.clone())))
    }

    /// Walk top-down then fall through to the parent, terminating at
    /// the single global scope (spec.md §3.5).
    pub fn get(&self, key: &str) -> Option<VarRef> {
        if let Some(v) = self.vars.borrow().get(key) {
            Some(v.clone())
        } else if let Some(parent) = &self.parent {
            parent.get(key)
        } else {
            None
        }
    }

    /// Find a binding and whether it lives in this exact frame (used
    /// by assignment to update in place rather than shadow).
    pub fn get_local(&self, key: &str) -> Option<VarRef> {
        self.vars.borrow().get(key).cloned()
    }

    pub fn define(&self, key: &str, value: VarRef) {
        self.vars.borrow_mut().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        self.vars.borrow_mut().remove(key);
    }

    pub fn define_function_pointer(&self, key: &str, value: VarRef) {
        self.functions.borrow_mut().insert(key.to_string(), value);
    }

    pub fn get_function_pointer(&self, key: &str) -> Option<VarRef> {
        if let Some(v) = self.functions.borrow().get(key) {
            Some(v.clone())
        } else if let Some(parent) = &self.parent {
            parent.get_function_pointer(key)
        } else {
            None
        }
    }

    /// All names currently bound directly in this frame (not parents).
    /// Used by the Call Dispatcher's self-writeback pass to iterate
    /// every `self.*` shadow entry at frame exit.
    pub fn local_names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env").field("names", &self.local_names()).finish()
    }
}

/// The Scope Stack (C2): a LIFO of `Env` frames rooted at one global
/// scope. `push`/`pop` chain/unchain frames; `find` walks top-down
/// then falls through to global.
pub struct ScopeStack {
    global: Rc<Env>,
    frames: Vec<Rc<Env>>,
    temp_counter: RefCell<u64>,
}

impl ScopeStack {
    pub fn new() -> Self {
        let global = Env::root();
        ScopeStack { frames: vec![global.clone()], global, temp_counter: RefCell::new(0) }
    }

    pub fn global(&self) -> &Rc<Env> {
        &self.global
    }

    pub fn current(&self) -> &Rc<Env> {
        self.frames.last().expect("scope stack must never be empty")
    }

    pub fn push(&mut self) {
        let chained = Env::chain(self.current());
        self.frames.push(chained);
    }

    /// Pop the current frame. Popping the global (bottom) frame is a
    /// programming error in the dispatcher/executor and panics, since
    /// it would violate the "scope pop is a guaranteed, unconditional
    /// release" contract from spec.md §4.7/§5.
    pub fn pop(&mut self) {
        if self.frames.len() <= 1 {
            panic!("cannot pop the global scope");
        }
        self.frames.pop();
    }

    pub fn find(&self, name: &str) -> Option<VarRef> {
        self.current().get(name)
    }

    pub fn find_local(&self, name: &str) -> Option<VarRef> {
        self.current().get_local(name)
    }

    pub fn insert(&self, name: &str, var: Variable) -> VarRef {
        let r = var_ref(var);
        self.current().define(name, r.clone());
        r
    }

    pub fn insert_global(&self, name: &str, var: Variable) -> VarRef {
        let r = var_ref(var);
        self.global.define(name, r.clone());
        r
    }

    pub fn insert_ref(&self, name: &str, var: VarRef) {
        self.current().define(name, var);
    }

    pub fn remove(&self, name: &str) {
        self.current().remove(name);
    }

    pub fn define_function_pointer(&self, name: &str, target: VarRef) {
        self.current().define_function_pointer(name, target);
    }

    pub fn find_function_pointer(&self, name: &str) -> Option<VarRef> {
        self.current().get_function_pointer(name)
    }

    /// Synthesize a guaranteed-unique temp name, e.g.
    /// `__chain_receiver_3` or `__temp_array_7` (spec.md §3.5).
    pub fn add_temp(&self, prefix: &str, var: Variable) -> (String, VarRef) {
        let mut counter = self.temp_counter.borrow_mut();
        let name = format!("{}_{}", prefix, *counter);
        *counter += 1;
        drop(counter);
        let r = var_ref(var);
        self.current().define(&name, r.clone());
        (name, r)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `"<parent>.<member>"` direct-access shadow name
/// (spec.md §3.3 I1, §4.4 Struct Engine).
pub fn shadow_name(parent: &str, member: &str) -> String {
    format!("{}.{}", parent, member)
}

pub fn int_variable(name: &str, v: i64, width: IntWidth, unsigned: bool) -> Variable {
    let mut var = Variable::new(name, Value::Int(v), TypeTag::Int(width));
    var.is_unsigned = unsigned;
    var
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_up_then_global() {
        let mut stack = ScopeStack::new();
        stack.insert_global("g", Variable::new("g", Value::Int(1), TypeTag::Int(IntWidth::Int)));
        stack.push();
        stack.insert("x", Variable::new("x", Value::Int(2), TypeTag::Int(IntWidth::Int)));
        assert!(stack.find("x").is_some());
        assert!(stack.find("g").is_some());
        stack.pop();
        assert!(stack.find("x").is_none());
        assert!(stack.find("g").is_some());
    }

    #[test]
    fn shadowing_prefers_innermost() {
        let mut stack = ScopeStack::new();
        stack.insert_global("x", Variable::new("x", Value::Int(1), TypeTag::Int(IntWidth::Int)));
        stack.push();
        stack.insert("x", Variable::new("x", Value::Int(2), TypeTag::Int(IntWidth::Int)));
        let found = stack.find("x").unwrap();
        assert_eq!(found.borrow().value.as_i64(), Some(2));
    }

    #[test]
    fn temp_names_are_unique() {
        let stack = ScopeStack::new();
        let (n1, _) = stack.add_temp("__temp_array", Variable::default_for(TypeTag::Int(IntWidth::Int)));
        let (n2, _) = stack.add_temp("__temp_array", Variable::default_for(TypeTag::Int(IntWidth::Int)));
        assert_ne!(n1, n2);
    }

    #[test]
    #[should_panic]
    fn cannot_pop_global() {
        let mut stack = ScopeStack::new();
        stack.pop();
    }

    #[test]
    fn shadow_name_format() {
        assert_eq!(shadow_name("p", "x"), "p.x");
        assert_eq!(shadow_name("a", "b.c"), "a.b.c");
    }
}
