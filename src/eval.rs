// Cb execution core: Expression Evaluator (C5, spec.md §4.2, §4.5, §4.6).
//
// No teacher counterpart evaluates structs/pointers/arrays, but the
// walk itself — recursive descent over an `Expr` tree producing a
// `Value`, with a `match` per variant — is exactly the teacher's own
// `vm::eval` shape, widened to Cb's operand types and to the
// width-aware numeric promotion spec.md §4.5 calls for.

use std::rc::Rc;

use crate::array::ArrayStorage;
use crate::ast::{BinOp, Expr, UnOp};
use crate::error::CbError;
use crate::interpreter::Interpreter;
use crate::scope::shadow_name;
use crate::value::{
    read_through_pointer, FunctionPointerValue, IntWidth, PointerMetadata, PointerValue, TypeTag, TypedValue, Value,
};

/// Pure evaluation of the literal expressions a union's allowed-value
/// list is restricted to (spec.md §3.1). No interpreter state needed:
/// these are always literal, never `Id`/`Call`/etc.
pub fn eval_const_literal(expr: &Expr) -> Result<Value, CbError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Double(d) => Ok(Value::Double(*d)),
        Expr::Char(c) => Ok(Value::Char(*c)),
        Expr::Str(s) => Ok(Value::Str(Rc::new(s.clone()))),
        other => Err(CbError::runtime(format!("union literal must be a constant, got {:?}", other))),
    }
}

/// Numeric promotion rank (spec.md §4.5): wider wins; `Char`/`Bool`
/// sit below `Int`.
fn numeric_rank(tag: &TypeTag) -> u8 {
    match tag {
        TypeTag::Bool | TypeTag::Char => 0,
        TypeTag::Int(IntWidth::Tiny) => 1,
        TypeTag::Int(IntWidth::Short) => 2,
        TypeTag::Int(IntWidth::Int) => 3,
        TypeTag::Int(IntWidth::Long) => 4,
        TypeTag::Float => 5,
        TypeTag::Double => 6,
        TypeTag::Quad => 7,
        _ => 3,
    }
}

fn is_float_like(tag: &TypeTag) -> bool {
    matches!(tag, TypeTag::Float | TypeTag::Double | TypeTag::Quad)
}

fn promoted_tag(a: &TypeTag, b: &TypeTag) -> TypeTag {
    if numeric_rank(a) >= numeric_rank(b) {
        if matches!(a, TypeTag::Bool | TypeTag::Char) {
            TypeTag::Int(IntWidth::Int)
        } else {
            a.clone()
        }
    } else if matches!(b, TypeTag::Bool | TypeTag::Char) {
        TypeTag::Int(IntWidth::Int)
    } else {
        b.clone()
    }
}

fn make_numeric(tag: &TypeTag, f: f64, i: i64) -> Value {
    match tag {
        TypeTag::Float => Value::Float(f as f32),
        TypeTag::Double => Value::Double(f),
        TypeTag::Quad => Value::Quad(f),
        TypeTag::Int(w) => Value::Int(w.truncate(i)),
        TypeTag::Bool => Value::Bool(i != 0),
        TypeTag::Char => Value::Char(i as u8),
        _ => Value::Int(i),
    }
}

pub fn eval_expr(interp: &mut Interpreter, expr: &Expr) -> Result<TypedValue, CbError> {
    match expr {
        Expr::Void => Ok(TypedValue::void()),
        Expr::Bool(b) => Ok(TypedValue::bool(*b)),
        Expr::Int(i) => Ok(TypedValue::int(*i)),
        Expr::Float(f) => Ok(TypedValue::new(Value::Float(*f), TypeTag::Float)),
        Expr::Double(d) => Ok(TypedValue::new(Value::Double(*d), TypeTag::Double)),
        Expr::Char(c) => Ok(TypedValue::new(Value::Char(*c), TypeTag::Char)),
        Expr::Str(s) => Ok(TypedValue::new(Value::Str(Rc::new(s.clone())), TypeTag::String)),

        Expr::Id(name) => {
            if let Some(var) = interp.scope.find(name) {
                let v = var.borrow();
                Ok(TypedValue::new(v.value.clone(), v.type_tag.clone())
                    .unsigned(v.is_unsigned)
                    .with_name(v.type_name.clone().unwrap_or_default()))
            } else if interp.scope.find_function_pointer(name).is_some() || interp.defs.functions.contains_key(name) {
                Ok(TypedValue::new(
                    Value::FunctionPointer(FunctionPointerValue { function_name: name.clone() }),
                    TypeTag::FunctionPointer,
                ))
            } else {
                Err(CbError::undefined(name, None))
            }
        }

        Expr::Member(receiver, member) => {
            let recv = eval_expr(interp, receiver)?;
            member_read(interp, &recv, member)
        }

        Expr::Arrow(ptr_expr, member) => {
            let ptr = eval_expr(interp, ptr_expr)?;
            match ptr.value {
                Value::Pointer(p) => {
                    let pointee = read_through_pointer(&p, None)?;
                    member_read(interp, &pointee, member)
                }
                other => Err(CbError::type_mismatch(TypeTag::Pointer(Box::new(TypeTag::Unknown)), other.type_of(), None)),
            }
        }

        Expr::Deref(inner) => {
            let v = eval_expr(interp, inner)?;
            match v.value {
                Value::Pointer(p) => read_through_pointer(&p, None),
                other => Err(CbError::type_mismatch(TypeTag::Pointer(Box::new(TypeTag::Unknown)), other.type_of(), None)),
            }
        }

        Expr::AddrOf(name) => {
            let var = interp.scope.find(name).ok_or_else(|| CbError::undefined(name, None))?;
            let tag = var.borrow().type_tag.clone();
            Ok(TypedValue::new(Value::Pointer(PointerValue::Raw(var)), TypeTag::Pointer(Box::new(tag))))
        }

        Expr::Index(base, index_exprs) => {
            let base_val = eval_expr(interp, base)?;
            let indices = eval_indices(interp, index_exprs)?;
            match base_val.value {
                Value::Array(arr) => arr.borrow().get(&indices),
                Value::Pointer(PointerValue::Raw(var)) => {
                    let v = var.borrow();
                    match &v.value {
                        Value::Array(arr) => arr.borrow().get(&indices),
                        other => Err(CbError::type_mismatch(
                            TypeTag::Array(Box::new(TypeTag::Unknown), vec![]),
                            other.type_of(),
                            None,
                        )),
                    }
                }
                other => Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), None)),
            }
        }

        Expr::Unary(op, inner) => {
            let v = eval_expr(interp, inner)?;
            match op {
                UnOp::Not => Ok(TypedValue::bool(!v.truthy())),
                UnOp::Neg => numeric_unary(&v, |f| -f, |i| -i),
                UnOp::Abs => numeric_unary(&v, |f| f.abs(), |i| i.abs()),
            }
        }

        Expr::Binary(op, lhs, rhs) => eval_binary(interp, *op, lhs, rhs),

        Expr::Ternary(cond, then_e, else_e) => {
            let c = eval_expr(interp, cond)?;
            if c.truthy() {
                eval_expr(interp, then_e)
            } else {
                eval_expr(interp, else_e)
            }
        }

        Expr::Call(call) => crate::dispatch::dispatch_call(interp, call),

        Expr::ArrayLiteral(items) => {
            let mut flat = Vec::with_capacity(items.len());
            let mut elem_tag: Option<TypeTag> = None;
            for it in items {
                let v = eval_expr(interp, it)?;
                if elem_tag.is_none() {
                    elem_tag = Some(v.type_tag.clone());
                }
                flat.push(v);
            }
            let tag = elem_tag.unwrap_or(TypeTag::Int(IntWidth::Int));
            let arr = ArrayStorage::from_literal(tag, &[], flat, &[items.len()], false)?;
            Ok(TypedValue::new(Value::Array(arr), TypeTag::Array(Box::new(TypeTag::Unknown), vec![items.len()])))
        }

        Expr::Await(inner) => {
            let v = eval_expr(interp, inner)?;
            match v.value {
                Value::Future(cell) => {
                    // Run the event loop with a readiness predicate
                    // scoped to this one cell (spec.md §4.10): other
                    // scheduled work keeps draining cooperatively while
                    // we wait, exactly like `sleep`'s yield loop.
                    while !cell.borrow().is_ready() {
                        match interp.event_loop.pop_ready() {
                            Some(crate::event_loop::ScheduledTask::Sleep { result }) => {
                                crate::event_loop::resolve_sleep(&result)?;
                            }
                            Some(crate::event_loop::ScheduledTask::Call { function_name, args, result }) => {
                                crate::dispatch::run_spawned(interp, &function_name, args, &result)?;
                            }
                            None => std::thread::sleep(interp.event_loop.granularity()),
                        }
                    }
                    let resolved = cell.borrow().get()?;
                    let tag = resolved.type_of();
                    Ok(TypedValue::new(resolved, tag))
                }
                other => Err(CbError::type_mismatch(TypeTag::Unknown, other.type_of(), None)),
            }
        }
    }
}

fn numeric_unary(v: &TypedValue, ffun: impl Fn(f64) -> f64, ifun: impl Fn(i64) -> i64) -> Result<TypedValue, CbError> {
    if is_float_like(&v.type_tag) {
        let f = v.value.as_f64().ok_or_else(|| CbError::type_mismatch(TypeTag::Double, v.type_tag.clone(), None))?;
        Ok(TypedValue::new(make_numeric(&v.type_tag, ffun(f), 0), v.type_tag.clone()))
    } else {
        let i = v.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), v.type_tag.clone(), None))?;
        Ok(TypedValue::new(make_numeric(&v.type_tag, 0.0, ifun(i)), v.type_tag.clone()))
    }
}

pub fn eval_indices(interp: &mut Interpreter, index_exprs: &[Expr]) -> Result<Vec<usize>, CbError> {
    let mut out = Vec::with_capacity(index_exprs.len());
    for e in index_exprs {
        let v = eval_expr(interp, e)?;
        let i = v.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), v.type_tag, None))?;
        if i < 0 {
            return Err(CbError::ArrayOutOfBounds { index: i, size: 0, span: None });
        }
        out.push(i as usize);
    }
    Ok(out)
}

fn member_read(interp: &Interpreter, recv: &TypedValue, member: &str) -> Result<TypedValue, CbError> {
    match &recv.value {
        Value::Struct(inst) => {
            if let Some(def) = interp.defs.structs.get(&inst.type_name) {
                crate::struct_engine::check_privacy(def, inst, member, interp.current_impl_struct(), None)?;
            }
            let slot = inst.get(member).ok_or_else(|| CbError::undefined(shadow_name(&inst.type_name, member), None))?;
            let v = slot.borrow();
            Ok(TypedValue::new(v.value.clone(), v.type_tag.clone()).unsigned(v.is_unsigned))
        }
        other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
    }
}

/// Resolve `&expr` / assignment-target addressing for places that
/// aren't a bare name: struct members and array elements become a
/// `Fat` pointer (spec.md §9), since their storage has no standalone
/// `VarRef` of its own.
pub fn resolve_pointer_to(interp: &mut Interpreter, expr: &Expr) -> Result<PointerValue, CbError> {
    match expr {
        Expr::Id(name) => {
            let var = interp.scope.find(name).ok_or_else(|| CbError::undefined(name, None))?;
            Ok(PointerValue::Raw(var))
        }
        Expr::Member(recv, member) => {
            let recv_val = eval_expr(interp, recv)?;
            match recv_val.value {
                Value::Struct(inst) => {
                    if let Some(shadow) = interp.scope.find(&shadow_name(&struct_binding_name(recv), member)) {
                        return Ok(PointerValue::Raw(shadow));
                    }
                    let owner = crate::scope::var_ref(crate::scope::Variable::new("", Value::Struct(inst), TypeTag::Unknown));
                    Ok(PointerValue::Fat(Rc::new(PointerMetadata::StructMember { owner, member: member.clone() })))
                }
                other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
            }
        }
        Expr::Index(base, index_exprs) => {
            let base_val = eval_expr(interp, base)?;
            let indices = eval_indices(interp, index_exprs)?;
            match base_val.value {
                Value::Array(arr) => Ok(PointerValue::Fat(Rc::new(PointerMetadata::ArrayElement {
                    array: crate::scope::var_ref(crate::scope::Variable::new("", Value::Array(arr), TypeTag::Unknown)),
                    indices,
                }))),
                other => Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), None)),
            }
        }
        Expr::Deref(inner) => {
            let v = eval_expr(interp, inner)?;
            match v.value {
                Value::Pointer(p) => Ok(p),
                other => Err(CbError::type_mismatch(TypeTag::Pointer(Box::new(TypeTag::Unknown)), other.type_of(), None)),
            }
        }
        other => Err(CbError::runtime(format!("cannot take the address of {:?}", other))),
    }
}

fn struct_binding_name(expr: &Expr) -> String {
    match expr {
        Expr::Id(n) => n.clone(),
        _ => String::new(),
    }
}

fn eval_binary(interp: &mut Interpreter, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<TypedValue, CbError> {
    let l = eval_expr(interp, lhs)?;
    let r = eval_expr(interp, rhs)?;

    if matches!(op, BinOp::Add) && (matches!(l.type_tag, TypeTag::String) || matches!(r.type_tag, TypeTag::String)) {
        return Ok(TypedValue::new(Value::Str(Rc::new(format!("{}{}", l.value.format(), r.value.format()))), TypeTag::String));
    }

    match op {
        BinOp::Eq => return Ok(TypedValue::bool(compare_equal(&l.value, &r.value))),
        BinOp::Neq => return Ok(TypedValue::bool(!compare_equal(&l.value, &r.value))),
        BinOp::LogicalAnd => return Ok(TypedValue::bool(l.truthy() && r.truthy())),
        BinOp::LogicalOr => return Ok(TypedValue::bool(l.truthy() || r.truthy())),
        _ => {}
    }

    let result_tag = promoted_tag(&l.type_tag, &r.type_tag);

    if matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte) {
        let ord = if is_float_like(&result_tag) {
            let a = l.value.as_f64().ok_or_else(|| CbError::type_mismatch(TypeTag::Double, l.type_tag.clone(), None))?;
            let b = r.value.as_f64().ok_or_else(|| CbError::type_mismatch(TypeTag::Double, r.type_tag.clone(), None))?;
            a.partial_cmp(&b)
        } else {
            let a = l.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), l.type_tag.clone(), None))?;
            let b = r.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), r.type_tag.clone(), None))?;
            a.partial_cmp(&b)
        };
        let ord = ord.ok_or_else(|| CbError::runtime("comparison between non-comparable values"))?;
        let b = match op {
            BinOp::Lt => ord.is_lt(),
            BinOp::Gt => ord.is_gt(),
            BinOp::Lte => ord.is_le(),
            BinOp::Gte => ord.is_ge(),
            _ => unreachable!(),
        };
        return Ok(TypedValue::bool(b));
    }

    if matches!(op, BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr | BinOp::Mod) {
        let a = l.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), l.type_tag.clone(), None))?;
        let b = r.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), r.type_tag.clone(), None))?;
        let i = match op {
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => a.wrapping_shr(b as u32),
            BinOp::Mod => {
                if b == 0 {
                    return Err(CbError::DivisionByZero { span: None });
                }
                a % b
            }
            _ => unreachable!(),
        };
        return Ok(TypedValue::new(make_numeric(&result_tag, 0.0, i), result_tag));
    }

    if is_float_like(&result_tag) {
        let a = l.value.as_f64().ok_or_else(|| CbError::type_mismatch(TypeTag::Double, l.type_tag.clone(), None))?;
        let b = r.value.as_f64().ok_or_else(|| CbError::type_mismatch(TypeTag::Double, r.type_tag.clone(), None))?;
        let f = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(CbError::DivisionByZero { span: None });
                }
                a / b
            }
            BinOp::Pow => a.powf(b),
            _ => unreachable!(),
        };
        Ok(TypedValue::new(make_numeric(&result_tag, f, 0), result_tag))
    } else {
        let a = l.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), l.type_tag.clone(), None))?;
        let b = r.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(IntWidth::Int), r.type_tag.clone(), None))?;
        let i = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(CbError::DivisionByZero { span: None });
                }
                a.wrapping_div(b)
            }
            BinOp::Pow => (a as f64).powf(b as f64) as i64,
            _ => unreachable!(),
        };
        Ok(TypedValue::new(make_numeric(&result_tag, 0.0, i), result_tag))
    }
}

fn compare_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Pointer(PointerValue::Null), Value::Pointer(PointerValue::Null)) => true,
        (Value::Pointer(PointerValue::Null), _) | (_, Value::Pointer(PointerValue::Null)) => false,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}
