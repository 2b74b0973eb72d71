// Cb execution core: Struct Engine (C4, spec.md §4.4) plus the
// tagged-union value model it shares a representation with (§3.1,
// §3.3). No teacher counterpart exists in `udashboard` (its `Map`
// value is a plain, unordered hash map); this is built from spec.md's
// description directly, keeping the definition-table-plus-instance
// split the teacher uses for `config.rs`'s struct-of-fields records.

use std::collections::HashMap;

use crate::error::{CbError, SourceSpan};
use crate::scope::{shadow_name, var_ref, Variable, VarRef};
use crate::value::{TypeTag, Value};

/// One member in a `StructDefinition` (spec.md §3.4).
#[derive(Clone, Debug)]
pub struct MemberDef {
    pub name: String,
    pub type_tag: TypeTag,
    pub is_pointer: bool,
    pub pointer_depth: u8,
    pub is_reference: bool,
    pub is_unsigned: bool,
    pub is_private: bool,
}

/// An ordered member list plus the struct's own name (spec.md §3.4).
#[derive(Clone, Debug)]
pub struct StructDefinition {
    pub name: String,
    pub members: Vec<MemberDef>,
}

/// The global struct-definition registry, keyed by resolved
/// (typedef-stripped) name, with the DFS recursion validator from
/// spec.md §4.4.
#[derive(Default)]
pub struct StructRegistry {
    defs: HashMap<String, StructDefinition>,
}

impl StructRegistry {
    pub fn new() -> Self {
        StructRegistry::default()
    }

    pub fn get(&self, name: &str) -> Option<&StructDefinition> {
        self.defs.get(name)
    }

    /// Register `def`, rejecting it if any value member (not pointer
    /// member) forms a cycle back to a struct already on the current
    /// DFS path. A struct may contain a pointer to itself but not a
    /// value member of itself.
    pub fn register(&mut self, def: StructDefinition) -> Result<(), CbError> {
        let mut path = vec![def.name.clone()];
        self.check_recursion(&def, &mut path)?;
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    fn check_recursion(&self, def: &StructDefinition, path: &mut Vec<String>) -> Result<(), CbError> {
        for member in &def.members {
            if member.is_pointer {
                continue;
            }
            if let TypeTag::Struct(member_struct) = &member.type_tag {
                if path.contains(member_struct) {
                    return Err(CbError::runtime(format!(
                        "struct '{}' recursively contains itself by value through member '{}'",
                        def.name, member.name
                    )));
                }
                if let Some(child) = self.defs.get(member_struct) {
                    path.push(member_struct.clone());
                    self.check_recursion(child, path)?;
                    path.pop();
                } else if member_struct == &def.name {
                    return Err(CbError::runtime(format!(
                        "struct '{}' recursively contains itself by value through member '{}'",
                        def.name, member.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A materialized struct aggregate (spec.md §3.3's `struct_members`).
/// Order is preserved to match declaration order, the way the
/// teacher's `config.rs` keeps field order in its `Vec`-backed
/// records.
#[derive(Clone, Debug)]
pub struct StructInstance {
    pub type_name: String,
    pub members: Vec<(String, VarRef)>,
}

impl StructInstance {
    pub fn get(&self, name: &str) -> Option<&VarRef> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_private(&self, def: &StructDefinition, name: &str) -> bool {
        def.members.iter().find(|m| m.name == name).map(|m| m.is_private).unwrap_or(false)
    }

    /// Allocate a fresh `Rc<RefCell<Variable>>` per member, recursing
    /// into nested structs and re-homing array storage, so the result
    /// shares no mutable state with `self` (spec.md §4.7 by-value
    /// struct copy). The derived `Clone` only copies the `VarRef`
    /// handles, which is what `call_method`'s `self` aliasing wants —
    /// this is the other half, for assignment and by-value params.
    pub fn deep_clone(&self) -> StructInstance {
        let members = self
            .members
            .iter()
            .map(|(name, slot)| {
                let var = slot.borrow();
                let mut copy = var.clone();
                copy.value = deep_clone_value(&var.value);
                (name.clone(), var_ref(copy))
            })
            .collect();
        StructInstance { type_name: self.type_name.clone(), members }
    }
}

/// Deep-copy the parts of `Value` that hide shared mutable state
/// behind an `Rc` (structs, arrays); everything else is already a
/// value type under `Clone`.
fn deep_clone_value(value: &Value) -> Value {
    match value {
        Value::Struct(inst) => Value::Struct(inst.deep_clone()),
        Value::Array(arr) => Value::Array(std::rc::Rc::new(std::cell::RefCell::new(arr.borrow().clone()))),
        Value::Union(u) => Value::Union(UnionInstance { type_name: u.type_name.clone(), value: Box::new(deep_clone_value(&u.value)) }),
        other => other.clone(),
    }
}

/// Synthesize the wrapping struct spec.md §4.7 case 5 calls for when a
/// non-struct value is bound to an interface-typed slot: a single
/// `__value` member, typed under the primitive's own textual type name
/// so method dispatch still finds an `impl <primitive-type> for
/// <interface>` block via the ordinary struct-name lookup.
pub fn wrap_primitive(value: Value) -> StructInstance {
    let type_name = value.type_of().to_string();
    let tag = value.type_of();
    let mut var = Variable::new("__value", value, tag);
    var.is_assigned = true;
    StructInstance { type_name, members: vec![("__value".to_string(), var_ref(var))] }
}

/// Create a default-initialized instance for `def`, materializing a
/// direct-access shadow `"<binding_name>.<member>"` for every member
/// (and recursively for nested struct members) in the given scope
/// (spec.md §4.4 "Instance creation").
pub fn instantiate(
    registry: &StructRegistry,
    def_name: &str,
    binding_name: &str,
    install_shadow: &mut impl FnMut(&str, VarRef),
) -> Result<StructInstance, CbError> {
    let def = registry
        .get(def_name)
        .ok_or_else(|| CbError::undefined(def_name, None))?
        .clone();
    let mut members = Vec::with_capacity(def.members.len());
    for m in &def.members {
        let member_path = shadow_name(binding_name, &m.name);
        let child_value = if let TypeTag::Struct(child_name) = &m.type_tag {
            if !m.is_pointer {
                let child = instantiate(registry, child_name, &member_path, install_shadow)?;
                Value::Struct(child)
            } else {
                Value::Pointer(crate::value::PointerValue::Null)
            }
        } else if let TypeTag::Array(elem, dims) = &m.type_tag {
            Value::Array(crate::array::ArrayStorage::new_default(elem.as_ref().clone(), dims.clone(), m.is_unsigned)?)
        } else {
            Variable::default_for(m.type_tag.clone()).value
        };
        let mut var = Variable::new(m.name.clone(), child_value, m.type_tag.clone());
        var.is_unsigned = m.is_unsigned;
        var.is_reference = m.is_reference;
        var.is_private = m.is_private;
        var.type_name = m.type_tag.named().map(str::to_string);
        let var_ref = var_ref(var);
        install_shadow(&member_path, var_ref.clone());
        members.push((m.name.clone(), var_ref));
    }
    Ok(StructInstance { type_name: def_name.to_string(), members })
}

/// `sync_struct_from_shadows`: rebuild `struct_members[m]` from
/// `"name.m"` shadows (spec.md §4.4).
pub fn sync_struct_from_shadows(
    instance: &mut StructInstance,
    binding_name: &str,
    lookup_shadow: &impl Fn(&str) -> Option<VarRef>,
) {
    for (member_name, slot) in instance.members.iter_mut() {
        let path = shadow_name(binding_name, member_name);
        if let Some(shadow) = lookup_shadow(&path) {
            *slot = shadow;
        }
    }
}

/// `sync_shadows_from_struct`: the inverse — rebuild every
/// `"name.m"` shadow to alias `struct_members[m]` (spec.md §4.4).
pub fn sync_shadows_from_struct(
    instance: &StructInstance,
    binding_name: &str,
    install_shadow: &mut impl FnMut(&str, VarRef),
) {
    for (member_name, slot) in &instance.members {
        let path = shadow_name(binding_name, member_name);
        install_shadow(&path, slot.clone());
    }
}

/// Privacy check (spec.md §4.4 "Member access rules"): a private
/// member is reachable only from within a method of that struct's
/// `impl` (i.e. the current impl-context stack names this struct).
pub fn check_privacy(
    def: &StructDefinition,
    instance: &StructInstance,
    member: &str,
    current_impl_struct: Option<&str>,
    span: Option<SourceSpan>,
) -> Result<(), CbError> {
    if instance.is_private(def, member) && current_impl_struct != Some(def.name.as_str()) {
        return Err(CbError::PrivateAccess {
            type_name: def.name.clone(),
            member: member.to_string(),
            span,
        });
    }
    Ok(())
}

/// A tagged-union type's closed allowed-value set (spec.md §3.1, §4.6
/// "Union assignment").
#[derive(Clone, Debug)]
pub struct UnionDefinition {
    pub name: String,
    pub allowed: Vec<Value>,
}

#[derive(Default)]
pub struct UnionRegistry {
    defs: HashMap<String, UnionDefinition>,
}

impl UnionRegistry {
    pub fn new() -> Self {
        UnionRegistry::default()
    }

    pub fn register(&mut self, def: UnionDefinition) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&UnionDefinition> {
        self.defs.get(name)
    }
}

#[derive(Clone, Debug)]
pub struct UnionInstance {
    pub type_name: String,
    pub value: Box<Value>,
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Quad(x), Value::Quad(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => false,
    }
}

/// Validate (and construct) a union assignment: the value must equal
/// one of the union's allowed members (spec.md §4.6).
pub fn assign_union(
    registry: &UnionRegistry,
    union_name: &str,
    value: Value,
    span: Option<SourceSpan>,
) -> Result<UnionInstance, CbError> {
    let def = registry
        .get(union_name)
        .ok_or_else(|| CbError::undefined(union_name, span.clone()))?;
    if def.allowed.iter().any(|candidate| values_equal(candidate, &value)) {
        Ok(UnionInstance { type_name: union_name.to_string(), value: Box::new(value) })
    } else {
        Err(CbError::UnionValueRejected { union_name: union_name.to_string(), span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IntWidth;
    use std::collections::HashMap as Map;

    fn member(name: &str, tag: TypeTag) -> MemberDef {
        MemberDef {
            name: name.to_string(),
            type_tag: tag,
            is_pointer: false,
            pointer_depth: 0,
            is_reference: false,
            is_unsigned: false,
            is_private: false,
        }
    }

    #[test]
    fn self_pointer_member_is_allowed() {
        let mut reg = StructRegistry::new();
        let def = StructDefinition {
            name: "Node".to_string(),
            members: vec![{
                let mut m = member("next", TypeTag::Struct("Node".to_string()));
                m.is_pointer = true;
                m
            }],
        };
        assert!(reg.register(def).is_ok());
    }

    #[test]
    fn self_value_member_is_rejected() {
        let mut reg = StructRegistry::new();
        let def = StructDefinition {
            name: "Node".to_string(),
            members: vec![member("next", TypeTag::Struct("Node".to_string()))],
        };
        assert!(reg.register(def).is_err());
    }

    #[test]
    fn instantiate_creates_shadows_for_every_member() {
        let mut reg = StructRegistry::new();
        reg.register(StructDefinition {
            name: "P".to_string(),
            members: vec![member("x", TypeTag::Int(IntWidth::Int))],
        })
        .unwrap();
        let mut shadows: Map<String, VarRef> = Map::new();
        let inst = instantiate(&reg, "P", "p", &mut |n, v| {
            shadows.insert(n.to_string(), v);
        })
        .unwrap();
        assert!(shadows.contains_key("p.x"));
        assert_eq!(inst.get("x").unwrap().borrow().value.as_i64(), Some(0));
    }

    #[test]
    fn nested_struct_members_materialize_dotted_shadows() {
        let mut reg = StructRegistry::new();
        reg.register(StructDefinition {
            name: "Inner".to_string(),
            members: vec![member("v", TypeTag::Int(IntWidth::Int))],
        })
        .unwrap();
        reg.register(StructDefinition {
            name: "Outer".to_string(),
            members: vec![member("inner", TypeTag::Struct("Inner".to_string()))],
        })
        .unwrap();
        let mut shadows: Map<String, VarRef> = Map::new();
        instantiate(&reg, "Outer", "o", &mut |n, v| {
            shadows.insert(n.to_string(), v);
        })
        .unwrap();
        assert!(shadows.contains_key("o.inner.v"));
    }

    #[test]
    fn union_rejects_value_outside_allowed_set() {
        let mut reg = UnionRegistry::new();
        reg.register(UnionDefinition { name: "U".to_string(), allowed: vec![Value::Int(1), Value::Int(2)] });
        assert!(assign_union(&reg, "U", Value::Int(1), None).is_ok());
        assert!(assign_union(&reg, "U", Value::Int(3), None).is_err());
    }

    #[test]
    fn privacy_blocks_outside_access() {
        let def = StructDefinition {
            name: "P".to_string(),
            members: vec![{
                let mut m = member("secret", TypeTag::Int(IntWidth::Int));
                m.is_private = true;
                m
            }],
        };
        let inst = StructInstance {
            type_name: "P".to_string(),
            members: vec![("secret".to_string(), var_ref(Variable::default_for(TypeTag::Int(IntWidth::Int))))],
        };
        assert!(check_privacy(&def, &inst, "secret", None, None).is_err());
        assert!(check_privacy(&def, &inst, "secret", Some("P"), None).is_ok());
    }
}
