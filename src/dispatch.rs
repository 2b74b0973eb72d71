// Cb execution core: Call Dispatcher (C7, spec.md §4.7).
//
// The teacher has no method/receiver concept (`udashboard` only calls
// free functions), so the overall state-machine shape here is new,
// but each step reuses a teacher idiom: `ENTER_FRAME`/`LEAVE_FRAME`
// is the teacher's own push/pop-scope-around-a-call pattern, and
// parameter binding mirrors how it zips `params` against evaluated
// `args` before running a function body.
//
// CLASSIFY -> RESOLVE_CALLEE -> BIND_PARAMS -> ENTER_FRAME ->
// SETUP_SELF -> ENTER_IMPL_CTX -> EXECUTE_BODY -> WRITEBACK_SELF ->
// COPYBACK_REFERENCES -> EXIT_IMPL_CTX -> LEAVE_FRAME.

use std::rc::Rc;

use crate::ast::{CallExpr, Expr, FunctionDef, Param};
use crate::error::CbError;
use crate::eval::{eval_expr, resolve_pointer_to};
use crate::exec::{exec_block, Flow};
use crate::interpreter::Interpreter;
use crate::scope::{var_ref, Variable};
use crate::struct_engine::{self, StructInstance};
use crate::value::{hex, PointerValue, TypeTag, TypedValue, Value};

/// What a call's receiver resolved to (spec.md §4.7 "Classify").
enum Receiver {
    /// No receiver: a free function or Form-2 function-pointer call.
    None,
    /// A struct value reached directly (by a named binding or a
    /// chained call's temporary) — writeback targets the binding's
    /// own `VarRef` if one exists.
    Direct { instance: StructInstance, write_back: Option<crate::scope::VarRef> },
    /// A struct reached through a pointer — writeback targets the
    /// pointee directly, so mutations are always visible to the
    /// caller.
    Pointer { instance: StructInstance, pointee: crate::scope::VarRef },
    /// The callee is itself a function pointer value (spec.md §4.7
    /// "chain produces a callable rather than a receiver").
    FunctionValue(String),
}

pub fn dispatch_call(interp: &mut Interpreter, call: &CallExpr) -> Result<TypedValue, CbError> {
    if call.receiver.is_none() {
        if let Some(builtin) = try_builtin(interp, call)? {
            return Ok(builtin);
        }
        if let Some(func) = interp.defs.functions.get(&call.name).cloned() {
            if func.is_async {
                return dispatch_async_call(interp, &func, &call.args);
            }
        }
    }

    let receiver = classify(interp, call)?;

    match receiver {
        Receiver::None => call_free_function(interp, &call.name, &call.args),
        Receiver::FunctionValue(target) => call_free_function(interp, &target, &call.args),
        Receiver::Direct { instance, write_back } => {
            call_method(interp, instance, write_back, &call.name, &call.args)
        }
        Receiver::Pointer { instance, pointee } => {
            call_method(interp, instance, Some(pointee), &call.name, &call.args)
        }
    }
}

fn classify(interp: &mut Interpreter, call: &CallExpr) -> Result<Receiver, CbError> {
    let Some(receiver_expr) = &call.receiver else {
        return Ok(Receiver::None);
    };

    if let Expr::Id(name) = receiver_expr.as_ref() {
        if let Some(var) = interp.scope.find(name) {
            let is_struct = matches!(var.borrow().type_tag, TypeTag::Struct(_) | TypeTag::Interface(_));
            if is_struct {
                let instance = match &var.borrow().value {
                    Value::Struct(inst) => inst.clone(),
                    _ => return Err(CbError::runtime(format!("'{}' has no struct value to dispatch on", name))),
                };
                return Ok(Receiver::Direct { instance, write_back: Some(var) });
            }
        }
    }

    let recv = eval_expr(interp, receiver_expr)?;
    match recv.value {
        Value::Struct(instance) => Ok(Receiver::Direct { instance, write_back: None }),
        Value::Pointer(p) => {
            let pointee = pointer_target(&p)?;
            let instance = match &pointee.borrow().value {
                Value::Struct(inst) => inst.clone(),
                other => return Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
            };
            Ok(Receiver::Pointer { instance, pointee })
        }
        Value::FunctionPointer(fp) => Ok(Receiver::FunctionValue(fp.function_name)),
        other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
    }
}

fn pointer_target(p: &PointerValue) -> Result<crate::scope::VarRef, CbError> {
    match p {
        PointerValue::Raw(var) => Ok(var.clone()),
        PointerValue::Null => Err(CbError::NullDereference { span: None }),
        PointerValue::Fat(meta) => match meta.as_ref() {
            crate::value::PointerMetadata::StructMember { owner, member } => {
                let v = owner.borrow();
                match &v.value {
                    Value::Struct(inst) => inst.get(member).cloned().ok_or_else(|| CbError::undefined(member, None)),
                    other => Err(CbError::type_mismatch(TypeTag::Struct(String::new()), other.type_of(), None)),
                }
            }
            crate::value::PointerMetadata::ArrayElement { .. } => {
                Err(CbError::runtime("cannot call a method through a pointer to an array element"))
            }
        },
    }
}

fn call_method(
    interp: &mut Interpreter,
    mut instance: StructInstance,
    write_back: Option<crate::scope::VarRef>,
    name: &str,
    arg_exprs: &[Expr],
) -> Result<TypedValue, CbError> {
    let struct_name = instance.type_name.clone();
    let method = interp
        .defs
        .find_method(&struct_name, name)
        .cloned()
        .ok_or_else(|| CbError::undefined(format!("{}::{}", struct_name, name), None))?;

    let bound_args = bind_args(interp, &method.func.params, arg_exprs)?;

    interp.scope.push();
    let self_var = {
        let mut var = Variable::new("self", Value::Struct(instance.clone()), TypeTag::Struct(struct_name.clone()));
        var.type_name = Some(struct_name.clone());
        var.is_reference = method.receiver_is_pointer;
        var_ref(var)
    };
    interp.scope.insert_ref("self", self_var.clone());
    {
        let mut install = |path: &str, v: crate::scope::VarRef| interp.scope.insert_ref(path, v);
        struct_engine::sync_shadows_from_struct(&instance, "self", &mut install);
    }
    bind_params(interp, &method.func.params, bound_args)?;

    interp.impl_stack.push(struct_name.clone());
    let flow = exec_block(interp, &method.func.body);
    interp.impl_stack.pop();

    if let Value::Struct(final_instance) = &self_var.borrow().value {
        instance = final_instance.clone();
    }
    interp.scope.pop();

    if let Some(target) = write_back {
        let mut v = target.borrow_mut();
        v.value = Value::Struct(instance);
    }

    flow_to_value(flow?)
}

fn call_free_function(interp: &mut Interpreter, name: &str, arg_exprs: &[Expr]) -> Result<TypedValue, CbError> {
    let func = interp
        .defs
        .functions
        .get(name)
        .cloned()
        .or_else(|| {
            interp
                .scope
                .find(name)
                .and_then(|v| match &v.borrow().value {
                    Value::FunctionPointer(fp) => interp.defs.functions.get(&fp.function_name).cloned(),
                    _ => None,
                })
        })
        .ok_or_else(|| CbError::undefined(name, None))?;

    let bound_args = bind_args(interp, &func.params, arg_exprs)?;
    interp.scope.push();
    bind_params(interp, &func.params, bound_args)?;
    let flow = exec_block(interp, &func.body);
    interp.scope.pop();
    flow_to_value(flow?)
}

/// Calling an `async` function (spec.md §4.10) doesn't run its body
/// inline: the arguments are evaluated against the caller's scope
/// right away (same as any other call, spec.md §4.7), then the call is
/// handed to the event loop as a `ScheduledTask::Call` and the caller
/// gets back a `Value::Future` for `await` to drain later. This is the
/// counterpart to the `spawn` statement's fire-and-forget scheduling
/// (`exec_spawn`), except the future handle survives as this call's
/// return value instead of being discarded.
fn dispatch_async_call(interp: &mut Interpreter, func: &Rc<FunctionDef>, arg_exprs: &[Expr]) -> Result<TypedValue, CbError> {
    let mut args = Vec::with_capacity(arg_exprs.len());
    for e in arg_exprs {
        args.push(eval_expr(interp, e)?);
    }
    let cell = crate::future_cell::FutureCell::new(func.return_type.clone());
    interp.event_loop.schedule(crate::event_loop::ScheduledTask::Call {
        function_name: func.name.clone(),
        args,
        result: cell.clone(),
    })?;
    Ok(TypedValue::new(Value::Future(cell), TypeTag::Unknown))
}

fn flow_to_value(flow: Flow) -> Result<TypedValue, CbError> {
    match flow {
        Flow::Return(v) => Ok(v),
        Flow::Normal => Ok(TypedValue::void()),
    }
}

/// One argument as evaluated before the callee's frame exists: either
/// a value to copy in, or (for a reference param bound to an
/// addressable expression) the caller's own `VarRef` to alias.
enum BoundArg {
    Value(TypedValue),
    Alias(crate::scope::VarRef),
}

/// Evaluate every argument in the *caller's* scope (spec.md §4.7
/// "Bind params" runs before `ENTER_FRAME` so argument expressions
/// never see the callee's locals).
fn bind_args(interp: &mut Interpreter, params: &[Param], arg_exprs: &[Expr]) -> Result<Vec<BoundArg>, CbError> {
    if params.len() != arg_exprs.len() {
        return Err(CbError::ArgumentCount { expected: params.len(), got: arg_exprs.len(), span: None });
    }
    let mut out = Vec::with_capacity(arg_exprs.len());
    for (param, expr) in params.iter().zip(arg_exprs) {
        if param.is_reference {
            if let Ok(ptr) = resolve_pointer_to(interp, expr) {
                if let PointerValue::Raw(var) = ptr {
                    out.push(BoundArg::Alias(var));
                    continue;
                }
            }
        }
        out.push(BoundArg::Value(eval_expr(interp, expr)?));
    }
    Ok(out)
}

/// Install each bound argument into the now-current (callee) frame
/// (spec.md §4.7 "Bind params", all 7 cases: by-value scalar, by-value
/// struct/array, by-reference scalar/struct/array, function pointer,
/// unsigned-coerced scalar, interface parameter). A by-value struct or
/// interface argument routes through `coerce_for_storage`, which
/// deep-copies a struct argument and wraps a primitive argument bound
/// to an interface param in a synthetic `__value` struct (spec.md
/// §4.7 case 5) — either way the callee gets its own member storage,
/// never an alias of the caller's.
fn bind_params(interp: &mut Interpreter, params: &[Param], args: Vec<BoundArg>) -> Result<(), CbError> {
    for (param, arg) in params.iter().zip(args) {
        match arg {
            BoundArg::Alias(var) => {
                if let Value::Struct(inst) = &var.borrow().value {
                    let mut install = |path: &str, v: crate::scope::VarRef| interp.scope.insert_ref(path, v);
                    struct_engine::sync_shadows_from_struct(inst, &param.name, &mut install);
                }
                interp.scope.insert_ref(&param.name, var);
            }
            BoundArg::Value(value) => {
                if matches!(value.value, Value::FunctionPointer(_)) {
                    let mut var = Variable::new(param.name.clone(), value.value, TypeTag::FunctionPointer);
                    var.is_assigned = true;
                    interp.scope.insert(&param.name, var);
                    continue;
                }
                let coerced = value.value.coerce_for_storage(&param.type_tag, param.is_unsigned, None)?;
                if let Value::Struct(inst) = &coerced {
                    let mut install = |path: &str, v: crate::scope::VarRef| interp.scope.insert_ref(path, v);
                    struct_engine::sync_shadows_from_struct(inst, &param.name, &mut install);
                }
                let mut var = Variable::new(param.name.clone(), coerced, param.type_tag.clone());
                var.is_unsigned = param.is_unsigned;
                var.type_name = param.type_name.clone();
                var.is_assigned = true;
                interp.scope.insert(&param.name, var);
            }
        }
    }
    Ok(())
}

/// Builtins that aren't ordinary user functions: `hex()` (spec.md
/// §4.2) and `await` is a unary operator, not a call, so it's handled
/// in `eval.rs` directly.
fn try_builtin(interp: &mut Interpreter, call: &CallExpr) -> Result<Option<TypedValue>, CbError> {
    if call.name == "hex" {
        if call.args.len() != 1 {
            return Err(CbError::ArgumentCount { expected: 1, got: call.args.len(), span: None });
        }
        let v = eval_expr(interp, &call.args[0])?;
        let i = v.value.as_i64().ok_or_else(|| CbError::type_mismatch(TypeTag::Int(crate::value::IntWidth::Long), v.type_tag, None))?;
        return Ok(Some(TypedValue::new(Value::Str(Rc::new(hex(i))), TypeTag::String)));
    }
    Ok(None)
}

/// Called by the event loop's executor for a `spawn`ed function
/// (spec.md §4.10): runs the body to completion synchronously (this
/// core has no preemption) and resolves the future with the result.
pub fn run_spawned(
    interp: &mut Interpreter,
    function_name: &str,
    args: Vec<TypedValue>,
    result: &crate::future_cell::FutureRef,
) -> Result<(), CbError> {
    let func: Rc<FunctionDef> = interp
        .defs
        .functions
        .get(function_name)
        .cloned()
        .ok_or_else(|| CbError::undefined(function_name, None))?;
    if func.params.len() != args.len() {
        return Err(CbError::ArgumentCount { expected: func.params.len(), got: args.len(), span: None });
    }
    interp.scope.push();
    for (param, value) in func.params.iter().zip(args) {
        let coerced = value.value.coerce_for_storage(&param.type_tag, param.is_unsigned, None)?;
        if let Value::Struct(inst) = &coerced {
            let mut install = |path: &str, v: crate::scope::VarRef| interp.scope.insert_ref(path, v);
            struct_engine::sync_shadows_from_struct(inst, &param.name, &mut install);
        }
        let mut var = Variable::new(param.name.clone(), coerced, param.type_tag.clone());
        var.is_assigned = true;
        interp.scope.insert(&param.name, var);
    }
    let flow = exec_block(interp, &func.body);
    interp.scope.pop();
    let value = flow_to_value(flow?)?;
    result.borrow_mut().set(value.value)
}
