// Cb execution core: Statement Executor (C6, spec.md §4.1, §4.3, §4.4,
// §4.6).
//
// Same shape as the teacher's statement-walking `match` in `vm.rs`
// (one arm per `Statement` variant, propagating a control-flow signal
// up through blocks), widened to Cb's declaration/assignment surfaces
// and the struct shadow-sync calls spec.md §4.4 requires around every
// struct-touching assignment.

use std::rc::Rc;

use crate::ast::{AssignTarget, Expr, Statement, VarDecl};
use crate::array::ArrayStorage;
use crate::error::CbError;
use crate::eval::{eval_expr, eval_indices, resolve_pointer_to};
use crate::interpreter::Interpreter;
use crate::scope::{shadow_name, Variable};
use crate::struct_engine::{self, assign_union};
use crate::value::{write_through_pointer, PointerValue, TypeTag, TypedValue, Value};

/// Signal threaded up out of a statement sequence: either execution
/// fell through normally, or a `return` unwound the current function
/// body (spec.md §4.1 "Control flow").
pub enum Flow {
    Normal,
    Return(TypedValue),
}

pub fn exec_block(interp: &mut Interpreter, stmts: &[Statement]) -> Result<Flow, CbError> {
    for s in stmts {
        match exec_stmt(interp, s)? {
            Flow::Normal => {}
            ret @ Flow::Return(_) => return Ok(ret),
        }
    }
    Ok(Flow::Normal)
}

pub fn exec_stmt(interp: &mut Interpreter, stmt: &Statement) -> Result<Flow, CbError> {
    match stmt {
        Statement::VarDecl(decl) => {
            exec_var_decl(interp, decl)?;
            Ok(Flow::Normal)
        }

        Statement::Assign(target, expr) => {
            let value = eval_expr(interp, expr)?;
            exec_assign(interp, target, value)?;
            Ok(Flow::Normal)
        }

        Statement::ExprStmt(expr) => {
            eval_expr(interp, expr)?;
            Ok(Flow::Normal)
        }

        Statement::If(cond, then_branch, else_branch) => {
            let c = eval_expr(interp, cond)?;
            interp.scope.push();
            let result = if c.truthy() { exec_block(interp, then_branch) } else { exec_block(interp, else_branch) };
            interp.scope.pop();
            result
        }

        Statement::While(cond, body) => {
            loop {
                let c = eval_expr(interp, cond)?;
                if !c.truthy() {
                    break;
                }
                interp.scope.push();
                let flow = exec_block(interp, body);
                interp.scope.pop();
                if let Flow::Return(v) = flow? {
                    return Ok(Flow::Return(v));
                }
            }
            Ok(Flow::Normal)
        }

        Statement::For(init, cond, step, body) => {
            interp.scope.push();
            let result = (|| -> Result<Flow, CbError> {
                if let Some(init) = init {
                    exec_stmt(interp, init)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !eval_expr(interp, cond)?.truthy() {
                            break;
                        }
                    }
                    interp.scope.push();
                    let flow = exec_block(interp, body);
                    interp.scope.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                    if let Some(step) = step {
                        exec_stmt(interp, step)?;
                    }
                }
                Ok(Flow::Normal)
            })();
            interp.scope.pop();
            result
        }

        Statement::Return(expr) => {
            let v = match expr {
                Some(e) => eval_expr(interp, e)?,
                None => TypedValue::void(),
            };
            Ok(Flow::Return(v))
        }

        Statement::Block(stmts) => {
            interp.scope.push();
            let result = exec_block(interp, stmts);
            interp.scope.pop();
            result
        }

        Statement::Print(exprs) => {
            let mut out = String::new();
            for e in exprs {
                let v = eval_expr(interp, e)?;
                out.push_str(&v.value.format());
            }
            out.push('\n');
            interp.sink.print(&out);
            Ok(Flow::Normal)
        }

        Statement::Spawn(call_expr) => {
            exec_spawn(interp, call_expr)?;
            Ok(Flow::Normal)
        }

        Statement::Sleep(duration_expr) => {
            exec_sleep(interp, duration_expr)?;
            Ok(Flow::Normal)
        }
    }
}

fn exec_spawn(interp: &mut Interpreter, call_expr: &Expr) -> Result<(), CbError> {
    if let Expr::Call(call) = call_expr {
        let mut args = Vec::with_capacity(call.args.len());
        for a in &call.args {
            args.push(eval_expr(interp, a)?);
        }
        let cell = crate::future_cell::FutureCell::new(TypeTag::Void);
        interp.event_loop.schedule(crate::event_loop::ScheduledTask::Call {
            function_name: call.name.clone(),
            args,
            result: cell,
        })?;
        Ok(())
    } else {
        Err(CbError::runtime("spawn requires a function call expression"))
    }
}

/// Block the calling function until `duration_expr` milliseconds have
/// passed, but keep draining any other ready tasks in the meantime —
/// a `sleep` yields to the rest of the cooperative loop rather than
/// freezing it (spec.md §4.8, §4.9).
fn exec_sleep(interp: &mut Interpreter, duration_expr: &Expr) -> Result<(), CbError> {
    let ms = eval_expr(interp, duration_expr)?
        .value
        .as_i64()
        .ok_or_else(|| CbError::type_mismatch(TypeTag::Int(crate::value::IntWidth::Int), TypeTag::Unknown, None))?;
    let cell = crate::future_cell::FutureCell::new(TypeTag::Void);
    interp
        .event_loop
        .schedule_after(std::time::Duration::from_millis(ms.max(0) as u64), crate::event_loop::ScheduledTask::Sleep { result: cell.clone() })?;

    while !cell.borrow().is_ready() {
        match interp.event_loop.pop_ready() {
            Some(crate::event_loop::ScheduledTask::Sleep { result }) => crate::event_loop::resolve_sleep(&result)?,
            Some(crate::event_loop::ScheduledTask::Call { function_name, args, result }) => {
                crate::dispatch::run_spawned(interp, &function_name, args, &result)?;
            }
            None => std::thread::sleep(interp.event_loop.granularity()),
        }
    }
    Ok(())
}

fn exec_var_decl(interp: &mut Interpreter, decl: &VarDecl) -> Result<(), CbError> {
    if !decl.array_dimensions.is_empty() || matches!(decl.init, Some(Expr::ArrayLiteral(_))) {
        return exec_array_decl(interp, decl);
    }

    if let TypeTag::Struct(struct_name) = &decl.type_tag {
        let struct_name = struct_name.clone();
        let mut var = {
            let mut install = |path: &str, v: crate::scope::VarRef| interp.scope.insert_ref(path, v);
            let inst = struct_engine::instantiate(&interp.defs.structs, &struct_name, &decl.name, &mut install)?;
            Variable::new(decl.name.clone(), Value::Struct(inst), decl.type_tag.clone())
        };
        var.type_name = Some(struct_name);
        var.is_const = decl.is_const;
        var.is_reference = decl.is_reference;
        var.is_assigned = decl.init.is_some();
        interp.scope.insert(&decl.name, var);
        if let Some(init) = &decl.init {
            let value = eval_expr(interp, init)?;
            assign_to_name(interp, &decl.name, value)?;
        }
        return Ok(());
    }

    if let TypeTag::Interface(iface_name) = &decl.type_tag {
        let mut var = match &decl.init {
            Some(init) => {
                let v = eval_expr(interp, init)?;
                let coerced = v.value.coerce_for_storage(&decl.type_tag, decl.is_unsigned, None)?;
                let mut var = Variable::new(decl.name.clone(), coerced, decl.type_tag.clone());
                var.is_assigned = true;
                var
            }
            // No concrete type to default-construct against — an
            // interface only gets a shape once a value (struct or
            // wrapped primitive) is actually assigned into it
            // (spec.md §4.7 case 5).
            None => Variable::new(decl.name.clone(), Value::Void, decl.type_tag.clone()),
        };
        var.is_const = decl.is_const;
        var.is_reference = decl.is_reference;
        var.type_name = Some(iface_name.clone());
        let stored = interp.scope.insert(&decl.name, var);
        if let Value::Struct(inst) = &stored.borrow().value {
            let mut install = |path: &str, vr: crate::scope::VarRef| interp.scope.insert_ref(path, vr);
            struct_engine::sync_shadows_from_struct(inst, &decl.name, &mut install);
        }
        return Ok(());
    }

    if let TypeTag::Union(union_name) = &decl.type_tag {
        let init = decl
            .init
            .as_ref()
            .ok_or_else(|| CbError::runtime(format!("union variable '{}' must be initialized", decl.name)))?;
        let v = eval_expr(interp, init)?;
        let inst = assign_union(&interp.defs.unions, union_name, v.value, None)?;
        let mut var = Variable::new(decl.name.clone(), Value::Union(inst), decl.type_tag.clone());
        var.type_name = Some(union_name.clone());
        var.is_const = decl.is_const;
        var.is_assigned = true;
        interp.scope.insert(&decl.name, var);
        return Ok(());
    }

    let mut var = match &decl.init {
        Some(init) => {
            let v = eval_expr(interp, init)?;
            let coerced = v.value.coerce_for_storage(&decl.type_tag, decl.is_unsigned, None)?;
            let mut var = Variable::new(decl.name.clone(), coerced, decl.type_tag.clone());
            var.is_assigned = true;
            var
        }
        None => Variable::default_for(decl.type_tag.clone()),
    };
    var.name = decl.name.clone();
    var.is_const = decl.is_const;
    var.is_unsigned = decl.is_unsigned;
    var.is_reference = decl.is_reference;
    var.type_name = decl.type_name.clone();
    interp.scope.insert(&decl.name, var);
    Ok(())
}

fn exec_array_decl(interp: &mut Interpreter, decl: &VarDecl) -> Result<(), CbError> {
    let elem_tag = decl.type_tag.clone();
    let arr = match &decl.init {
        Some(Expr::ArrayLiteral(items)) => {
            let mut flat = Vec::with_capacity(items.len());
            for it in items {
                flat.push(eval_expr(interp, it)?);
            }
            ArrayStorage::from_literal(elem_tag, &decl.array_dimensions, flat, &[items.len()], decl.is_unsigned)?
        }
        Some(other) => {
            let v = eval_expr(interp, other)?;
            match v.value {
                Value::Array(a) => a,
                _ => return Err(CbError::runtime(format!("'{}' initializer is not an array", decl.name))),
            }
        }
        None => ArrayStorage::new_default(elem_tag, decl.array_dimensions.clone(), decl.is_unsigned)?,
    };
    let mut var = Variable::new(decl.name.clone(), Value::Array(arr), decl.type_tag.clone());
    var.is_const = decl.is_const;
    var.is_assigned = true;
    interp.scope.insert(&decl.name, var);
    Ok(())
}

/// Assign into a plain name binding. Struct and interface targets both
/// route through `coerce_for_storage` (deep-copying a struct RHS,
/// wrapping a primitive RHS for an interface target) so `a = b;` never
/// aliases `b`'s member storage, then re-syncs the `"name.member"`
/// direct-access shadows from whatever landed in the slot — needed for
/// plain structs and for an interface variable that now holds one.
fn assign_to_name(interp: &mut Interpreter, name: &str, value: TypedValue) -> Result<(), CbError> {
    let var = interp.scope.find(name).ok_or_else(|| CbError::undefined(name, None))?;
    let (tag, unsigned) = {
        let v = var.borrow();
        if v.is_const && v.is_assigned {
            return Err(CbError::ConstReassign { name: name.to_string(), span: None });
        }
        (v.type_tag.clone(), v.is_unsigned)
    };
    let coerced = value.value.coerce_for_storage(&tag, unsigned, None)?;
    {
        let mut v = var.borrow_mut();
        v.value = coerced;
        v.is_assigned = true;
    }
    if let Value::Struct(inst) = &var.borrow().value {
        let mut install = |path: &str, vr: crate::scope::VarRef| interp.scope.insert_ref(path, vr);
        struct_engine::sync_shadows_from_struct(inst, name, &mut install);
    }
    Ok(())
}

fn exec_assign(interp: &mut Interpreter, target: &AssignTarget, value: TypedValue) -> Result<(), CbError> {
    match target {
        AssignTarget::Name(name) => assign_to_name(interp, name, value),

        AssignTarget::Deref(ptr_expr) => {
            let ptr = eval_expr(interp, ptr_expr)?;
            match ptr.value {
                Value::Pointer(p) => write_through_pointer(&p, value, None),
                other => Err(CbError::type_mismatch(TypeTag::Pointer(Box::new(TypeTag::Unknown)), other.type_of(), None)),
            }
        }

        AssignTarget::Index(base_expr, index_exprs) => {
            let base = eval_expr(interp, base_expr)?;
            let indices = eval_indices(interp, index_exprs)?;
            match base.value {
                Value::Array(arr) => arr.borrow_mut().set(&indices, value, None),
                other => Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), None)),
            }
        }

        AssignTarget::Member(base_expr, member) => {
            let base = eval_expr(interp, base_expr)?;
            match base.value {
                Value::Struct(inst) => {
                    let binding = struct_binding_name(base_expr);
                    if let Some(def) = interp.defs.structs.get(&inst.type_name) {
                        struct_engine::check_privacy(def, &inst, member, interp.current_impl_struct(), None)?;
                    }
                    let slot = inst.get(member).ok_or_else(|| CbError::undefined(shadow_name(&binding, member), None))?;
                    let mut v = slot.borrow_mut();
                    let tag = v.type_tag.clone();
                    let unsigned = v.is_unsigned;
                    v.value = value.value.coerce_for_storage(&tag, unsigned, None)?;
                    v.is_assigned = true;
                    Ok(())
                }
                other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
            }
        }

        AssignTarget::MemberIndex(base_expr, member, index_exprs) => {
            let base = eval_expr(interp, base_expr)?;
            let indices = eval_indices(interp, index_exprs)?;
            match base.value {
                Value::Struct(inst) => {
                    let slot = inst.get(member).ok_or_else(|| CbError::undefined(member, None))?;
                    let arr = match &slot.borrow().value {
                        Value::Array(a) => a.clone(),
                        other => return Err(CbError::type_mismatch(TypeTag::Array(Box::new(TypeTag::Unknown), vec![]), other.type_of(), None)),
                    };
                    let result = arr.borrow_mut().set(&indices, value, None);
                    result
                }
                other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
            }
        }

        AssignTarget::Arrow(ptr_expr, member) => {
            let ptr_val = resolve_pointer_to(interp, &Expr::Deref(Rc::new(ptr_expr.clone())))?;
            write_arrow_member(interp, &ptr_val, member, value)
        }
    }
}

fn write_arrow_member(interp: &mut Interpreter, ptr: &PointerValue, member: &str, value: TypedValue) -> Result<(), CbError> {
    let owner = match ptr {
        PointerValue::Raw(var) => var.clone(),
        PointerValue::Null => return Err(CbError::NullDereference { span: None }),
        PointerValue::Fat(_) => return Err(CbError::runtime("member assignment through a fat pointer is not supported")),
    };
    let inst = match &owner.borrow().value {
        Value::Struct(inst) => inst.clone(),
        other => return Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
    };
    if let Some(def) = interp.defs.structs.get(&inst.type_name) {
        struct_engine::check_privacy(def, &inst, member, interp.current_impl_struct(), None)?;
    }
    let slot = inst.get(member).ok_or_else(|| CbError::undefined(member, None))?;
    let mut v = slot.borrow_mut();
    let tag = v.type_tag.clone();
    let unsigned = v.is_unsigned;
    v.value = value.value.coerce_for_storage(&tag, unsigned, None)?;
    v.is_assigned = true;
    Ok(())
}

fn struct_binding_name(expr: &Expr) -> String {
    match expr {
        Expr::Id(n) => n.clone(),
        Expr::Member(base, m) => shadow_name(&struct_binding_name(base), m),
        _ => String::new(),
    }
}
