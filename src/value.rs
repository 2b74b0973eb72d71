// Cb execution core: Value & Type Model (C1).
//
// Mirrors the shape of the teacher's `vm::Value`/`vm::TypeTag` plus its
// `operator!` macro-generated arithmetic, but widened to Cb's numeric
// widths and struct/array/pointer payloads, and with the pointer value
// represented as the explicit sum type spec.md §9 asks for instead of
// a tagged integer.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::array::ArrayRef;
use crate::error::{CbError, SourceSpan};
use crate::future_cell::FutureRef;
use crate::scope::VarRef;
use crate::struct_engine::{wrap_primitive, StructInstance, UnionInstance};

thread_local! {
    /// Mirrors `InterpreterConfig::warn_on_unsigned_clamp`; set once at
    /// `Interpreter::new` so `coerce_for_storage` (a pure `Value`
    /// method with no interpreter handle) can still honor it.
    static WARN_ON_UNSIGNED_CLAMP: Cell<bool> = Cell::new(false);
}

pub fn set_warn_on_unsigned_clamp(enabled: bool) {
    WARN_ON_UNSIGNED_CLAMP.with(|c| c.set(enabled));
}

/// Integer storage width. `Char` and `Bool` are not spelled here: they
/// get their own `Value`/`TypeTag` variants because their write
/// semantics (wrap-to-byte, normalize-to-0-or-1) differ from a plain
/// integer's.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    Tiny,  // i8
    Short, // i16
    Int,   // i32
    Long,  // i64
}

impl IntWidth {
    /// Truncate `v` to this width, as if stored into a C-style integer
    /// of that width then sign-extended back to i64.
    pub fn truncate(self, v: i64) -> i64 {
        match self {
            IntWidth::Tiny => v as i8 as i64,
            IntWidth::Short => v as i16 as i64,
            IntWidth::Int => v as i32 as i64,
            IntWidth::Long => v,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntWidth::Tiny => "tiny",
            IntWidth::Short => "short",
            IntWidth::Int => "int",
            IntWidth::Long => "long",
        }
    }
}

/// The closed set of type tags from spec.md §3.1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypeTag {
    Void,
    Bool,
    Int(IntWidth),
    Float,
    Double,
    Quad,
    Char,
    String,
    Struct(String),
    Interface(String),
    Union(String),
    Pointer(Box<TypeTag>),
    FunctionPointer,
    Array(Box<TypeTag>, Vec<usize>),
    Unknown,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Void => write!(f, "void"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int(w) => write!(f, "{}", w.name()),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Double => write!(f, "double"),
            TypeTag::Quad => write!(f, "quad"),
            TypeTag::Char => write!(f, "char"),
            TypeTag::String => write!(f, "string"),
            TypeTag::Struct(n) => write!(f, "{}", n),
            TypeTag::Interface(n) => write!(f, "{}", n),
            TypeTag::Union(n) => write!(f, "{}", n),
            TypeTag::Pointer(t) => write!(f, "{}*", t),
            TypeTag::FunctionPointer => write!(f, "fn*"),
            TypeTag::Array(elem, dims) => {
                write!(f, "{}", elem)?;
                for d in dims {
                    write!(f, "[{}]", d)?;
                }
                Ok(())
            }
            TypeTag::Unknown => write!(f, "?"),
        }
    }
}

impl TypeTag {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeTag::Int(_) | TypeTag::Float | TypeTag::Double | TypeTag::Quad | TypeTag::Char
        )
    }

    /// The struct/interface/union name this tag resolves to, if any.
    pub fn named(&self) -> Option<&str> {
        match self {
            TypeTag::Struct(n) | TypeTag::Interface(n) | TypeTag::Union(n) => Some(n.as_str()),
            _ => None,
        }
    }
}

/// A resolved, identity-bearing pointer referent (spec.md §9: an
/// explicit sum replacing the fat-pointer-high-bit trick).
#[derive(Clone, Debug)]
pub enum PointerValue {
    Null,
    /// Address of a live Variable binding.
    Raw(VarRef),
    /// Address of richer pointer metadata (e.g. an interior pointer
    /// into an array element or struct member) that knows how to
    /// read/write through itself.
    Fat(Rc<PointerMetadata>),
}

impl PointerValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PointerValue::Null)
    }
}

/// Metadata backing a "fat" pointer: a pointer into a sub-part of a
/// variable (an array element, or a struct member) rather than at the
/// variable itself.
#[derive(Debug)]
pub enum PointerMetadata {
    ArrayElement { array: VarRef, indices: Vec<usize> },
    StructMember { owner: VarRef, member: String },
}

/// A resolved function-pointer value: the function's name plus, for
/// methods bound via `&self.method`, the bound receiver.
#[derive(Clone, Debug)]
pub struct FunctionPointerValue {
    pub function_name: String,
}

/// The `Value` sum type (C1). Deliberately an idiomatic Rust enum
/// rather than a struct of concurrently-live payload slots: each
/// variant carries exactly the payload it needs, so storing a Double
/// and reading it back as a Double is bit-identical by construction
/// (P6) without needing a union-emulation trick.
#[derive(Clone, Debug)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Quad(f64),
    Char(u8),
    Str(Rc<String>),
    Struct(StructInstance),
    Union(UnionInstance),
    Array(ArrayRef),
    Pointer(PointerValue),
    FunctionPointer(FunctionPointerValue),
    /// A handle to an in-flight async result (spec.md §4.10). Not a
    /// member of the closed `TypeTag` set — a future is a transient
    /// call result, never a declared variable type.
    Future(FutureRef),
}

impl Value {
    pub fn type_of(&self) -> TypeTag {
        match self {
            Value::Void => TypeTag::Void,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int(IntWidth::Int),
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::Quad(_) => TypeTag::Quad,
            Value::Char(_) => TypeTag::Char,
            Value::Str(_) => TypeTag::String,
            Value::Struct(s) => TypeTag::Struct(s.type_name.clone()),
            Value::Union(u) => TypeTag::Union(u.type_name.clone()),
            Value::Array(a) => TypeTag::Array(Box::new(a.borrow().element_tag.clone()), a.borrow().dimensions.clone()),
            Value::Pointer(_) => TypeTag::Pointer(Box::new(TypeTag::Unknown)),
            Value::FunctionPointer(_) => TypeTag::FunctionPointer,
            Value::Future(_) => TypeTag::Unknown,
        }
    }

    /// Width-preserving read as a plain i64, truncating toward zero
    /// per spec.md §4.2 ("reading as Int truncates toward zero").
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Char(c) => Some(*c as i64),
            Value::Float(f) => Some(*f as i64),
            Value::Double(d) => Some(*d as i64),
            Value::Quad(d) => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Char(c) => Some(*c as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(d) => Some(*d),
            Value::Quad(d) => Some(*d),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// Formats the value the way `print` does: used by the Statement
    /// Executor and by the `hex()` builtin's error paths.
    pub fn format(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Quad(v) => v.to_string(),
            Value::Char(c) => (*c as char).to_string(),
            Value::Str(s) => s.as_str().to_string(),
            Value::Struct(s) => format!("<struct {}>", s.type_name),
            Value::Union(u) => format!("<union {}>", u.type_name),
            Value::Array(a) => format!("<array[{}]>", a.borrow().len()),
            Value::Pointer(PointerValue::Null) => "0x0".to_string(),
            Value::Pointer(_) => "<pointer>".to_string(),
            Value::FunctionPointer(f) => format!("<fn {}>", f.function_name),
            Value::Future(_) => "<future>".to_string(),
        }
    }

    /// Normalize a freshly-computed numeric value onto the declared
    /// type/unsigned policy of the slot it's about to be written
    /// into. This is where the unsigned clamp (§4.2, P7) and bool
    /// normalize-to-0/1 happen; it is applied at storage, never at
    /// expression evaluation, per spec.md §4.2.
    pub fn coerce_for_storage(
        self,
        tag: &TypeTag,
        unsigned: bool,
        span: Option<SourceSpan>,
    ) -> Result<Value, CbError> {
        let clamp = |v: i64| -> i64 {
            if unsigned && v < 0 {
                if WARN_ON_UNSIGNED_CLAMP.with(|c| c.get()) {
                    log::warn!(
                        "negative value {} written to unsigned slot; clamped to 0{}",
                        v,
                        span.as_ref().map(|s| format!(" at {}", s)).unwrap_or_default()
                    );
                }
                0
            } else {
                v
            }
        };

        match tag {
            TypeTag::Bool => Ok(Value::Bool(self.as_i64().unwrap_or(0) != 0)),
            TypeTag::Int(w) => {
                let raw = self
                    .as_i64()
                    .ok_or_else(|| CbError::type_mismatch(tag.clone(), self.type_of(), span.clone()))?;
                Ok(Value::Int(w.truncate(clamp(raw))))
            }
            TypeTag::Char => {
                let raw = self
                    .as_i64()
                    .ok_or_else(|| CbError::type_mismatch(tag.clone(), self.type_of(), span.clone()))?;
                Ok(Value::Char(clamp(raw) as u8))
            }
            TypeTag::Float => {
                let raw = self
                    .as_f64()
                    .ok_or_else(|| CbError::type_mismatch(tag.clone(), self.type_of(), span))?;
                let raw = if unsigned && raw < 0.0 {
                    if WARN_ON_UNSIGNED_CLAMP.with(|c| c.get()) {
                        log::warn!("negative float written to unsigned slot; clamped to 0");
                    }
                    0.0
                } else {
                    raw
                };
                Ok(Value::Float(raw as f32))
            }
            TypeTag::Double | TypeTag::Quad => {
                let raw = self
                    .as_f64()
                    .ok_or_else(|| CbError::type_mismatch(tag.clone(), self.type_of(), span))?;
                let raw = if unsigned && raw < 0.0 {
                    if WARN_ON_UNSIGNED_CLAMP.with(|c| c.get()) {
                        log::warn!("negative double written to unsigned slot; clamped to 0");
                    }
                    0.0
                } else {
                    raw
                };
                if matches!(tag, TypeTag::Quad) {
                    Ok(Value::Quad(raw))
                } else {
                    Ok(Value::Double(raw))
                }
            }
            TypeTag::String => match self {
                v @ Value::Str(_) => Ok(v),
                other => Ok(Value::Str(Rc::new(other.format()))),
            },
            // By-value struct storage (assignment, by-value parameters,
            // struct-member writes) must not alias the source's member
            // cells (spec.md §4.7 bind-params case).
            TypeTag::Struct(_) => match self {
                Value::Struct(inst) => Ok(Value::Struct(inst.deep_clone())),
                // A pointer-to-struct member still carries the struct's
                // own `TypeTag::Struct` (pointer-ness lives on
                // `MemberDef::is_pointer`, not the tag); let a pointer
                // value through unchanged.
                v @ Value::Pointer(_) => Ok(v),
                other => Err(CbError::type_mismatch(tag.clone(), other.type_of(), span)),
            },
            // Interface slot: a struct argument is deep-copied like any
            // other by-value struct; a primitive argument is wrapped in
            // a synthetic single-member struct named after its own
            // type, so method dispatch finds an `impl <type> for
            // <interface>` block (spec.md §4.7 case 5).
            TypeTag::Interface(_) => match self {
                Value::Struct(inst) => Ok(Value::Struct(inst.deep_clone())),
                other => Ok(Value::Struct(wrap_primitive(other))),
            },
            _ => Ok(self),
        }
    }
}

/// A value paired with its inferred type, threaded through the
/// Expression Evaluator so width-aware arithmetic can pick a
/// promotion rule (spec.md §4.5).
#[derive(Clone, Debug)]
pub struct TypedValue {
    pub value: Value,
    pub type_tag: TypeTag,
    pub type_name: Option<String>,
    pub unsigned: bool,
}

impl TypedValue {
    pub fn new(value: Value, type_tag: TypeTag) -> Self {
        TypedValue { value, type_tag, type_name: None, unsigned: false }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    pub fn unsigned(mut self, u: bool) -> Self {
        self.unsigned = u;
        self
    }

    pub fn void() -> Self {
        TypedValue::new(Value::Void, TypeTag::Void)
    }

    pub fn bool(b: bool) -> Self {
        TypedValue::new(Value::Bool(b), TypeTag::Bool)
    }

    pub fn int(i: i64) -> Self {
        TypedValue::new(Value::Int(i), TypeTag::Int(IntWidth::Int))
    }

    pub fn truthy(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Char(c) => *c != 0,
            Value::Float(f) => *f != 0.0,
            Value::Double(d) => *d != 0.0,
            Value::Quad(d) => *d != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Pointer(p) => !p.is_null(),
            _ => true,
        }
    }
}

/// Read through a pointer, following `Fat` metadata down to the
/// actual storage slot (spec.md §4.6 "Pointer dereference").
pub fn read_through_pointer(ptr: &PointerValue, span: Option<SourceSpan>) -> Result<TypedValue, CbError> {
    match ptr {
        PointerValue::Null => Err(CbError::NullDereference { span }),
        PointerValue::Raw(var) => {
            let v = var.borrow();
            Ok(TypedValue::new(v.value.clone(), v.type_tag.clone())
                .unsigned(v.is_unsigned)
                .with_name(v.type_name.clone().unwrap_or_default()))
        }
        PointerValue::Fat(meta) => match meta.as_ref() {
            PointerMetadata::ArrayElement { array, indices } => match &array.borrow().value {
                Value::Array(a) => a.borrow().get(indices),
                other => Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), span)),
            },
            PointerMetadata::StructMember { owner, member } => match &owner.borrow().value {
                Value::Struct(inst) => {
                    let slot = inst.get(member).ok_or_else(|| CbError::undefined(member, span.clone()))?;
                    let v = slot.borrow();
                    Ok(TypedValue::new(v.value.clone(), v.type_tag.clone()).unsigned(v.is_unsigned))
                }
                other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), span)),
            },
        },
    }
}

/// Write through a pointer, applying the same storage-time coercion
/// as a plain variable assignment (spec.md §4.2, §4.6).
pub fn write_through_pointer(ptr: &PointerValue, value: TypedValue, span: Option<SourceSpan>) -> Result<(), CbError> {
    match ptr {
        PointerValue::Null => Err(CbError::NullDereference { span }),
        PointerValue::Raw(var) => {
            let mut v = var.borrow_mut();
            if v.is_const && v.is_assigned {
                return Err(CbError::ConstReassign { name: v.name.clone(), span });
            }
            let tag = v.type_tag.clone();
            let unsigned = v.is_unsigned;
            v.value = value.value.coerce_for_storage(&tag, unsigned, span)?;
            v.is_assigned = true;
            Ok(())
        }
        PointerValue::Fat(meta) => match meta.as_ref() {
            PointerMetadata::ArrayElement { array, indices } => match &array.borrow().value {
                Value::Array(a) => a.borrow_mut().set(indices, value, span),
                other => Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), span)),
            },
            PointerMetadata::StructMember { owner, member } => match &owner.borrow().value {
                Value::Struct(inst) => {
                    let slot = inst.get(member).ok_or_else(|| CbError::undefined(member, span.clone()))?;
                    let mut v = slot.borrow_mut();
                    let tag = v.type_tag.clone();
                    let unsigned = v.is_unsigned;
                    v.value = value.value.coerce_for_storage(&tag, unsigned, span)?;
                    v.is_assigned = true;
                    Ok(())
                }
                other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), span)),
            },
        },
    }
}

/// `hex(n)` builtin (spec.md §4.2): strips a fat-pointer tag if
/// present (never the case here, since pointers are a sum type, not a
/// tagged integer — kept for signature parity with the source
/// language) then formats as `0x` + lower-case hex.
pub fn hex(n: i64) -> String {
    format!("0x{:x}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(v: Value) -> TypedValue {
        let t = v.type_of();
        TypedValue::new(v, t)
    }

    #[test]
    fn width_round_trip_double() {
        // P6: storing a Double and reading it back at Double is
        // bit-identical.
        let v = Value::Double(1.5);
        let stored = v.clone().coerce_for_storage(&TypeTag::Double, false, None).unwrap();
        match stored {
            Value::Double(d) => assert_eq!(d.to_bits(), 1.5f64.to_bits()),
            _ => panic!("expected Double"),
        }
    }

    #[test]
    fn unsigned_clamp_negative_to_zero() {
        // P7: writing -k then reading returns 0, writing 0 returns 0.
        let v = Value::Int(-2).coerce_for_storage(&TypeTag::Int(IntWidth::Int), true, None).unwrap();
        assert_eq!(v.as_i64(), Some(0));
        let v = Value::Int(0).coerce_for_storage(&TypeTag::Int(IntWidth::Int), true, None).unwrap();
        assert_eq!(v.as_i64(), Some(0));
    }

    #[test]
    fn bool_normalizes_on_write() {
        let v = Value::Int(5).coerce_for_storage(&TypeTag::Bool, false, None).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn hex_formats_lowercase() {
        assert_eq!(hex(255), "0xff");
        assert_eq!(hex(0), "0x0");
    }

    #[test]
    fn truthiness() {
        assert!(tv(Value::Int(1)).truthy());
        assert!(!tv(Value::Int(0)).truthy());
        assert!(!tv(Value::Str(Rc::new(String::new()))).truthy());
    }

    #[test]
    fn int_width_truncates() {
        assert_eq!(IntWidth::Tiny.truncate(300), 300i32 as i8 as i64);
        assert_eq!(IntWidth::Short.truncate(70000), 70000i32 as i16 as i64);
        assert_eq!(IntWidth::Long.truncate(i64::MAX), i64::MAX);
    }
}
