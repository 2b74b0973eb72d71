// End-to-end scenarios built directly against the `ast` types, since
// this core has no parser of its own (spec.md §6 "Input"): whatever
// front end produces a `Program` is out of scope here, so the test
// inputs are the `Program` values a front end would have produced.

use std::rc::Rc;

use cb_core::ast::*;
use cb_core::config::InterpreterConfig;
use cb_core::interpreter::{CapturingSink, Interpreter};
use cb_core::value::{IntWidth, TypeTag};

fn member_decl(name: &str, type_tag: TypeTag) -> StructMemberDecl {
    StructMemberDecl { name: name.to_string(), type_tag, is_pointer: false, pointer_depth: 0, is_reference: false, is_unsigned: false, is_private: false }
}

fn param(name: &str, type_tag: TypeTag) -> Param {
    Param { name: name.to_string(), type_tag, type_name: None, is_reference: false, is_unsigned: false }
}

fn run_main(program: Program) -> (i32, Vec<String>) {
    let sink = CapturingSink::default();
    let lines_handle = sink.lines.clone();
    let code = Interpreter::run(&program, Box::new(sink), InterpreterConfig::default()).expect("interpreter should not error internally");
    let lines = lines_handle.borrow().clone();
    (code, lines)
}

/// Scenario: a method with a pointer receiver mutates the struct it
/// points at, and the caller observes the mutation afterward.
#[test]
fn method_writeback_via_pointer_receiver() {
    let struct_decl = StructDecl { name: "Counter".into(), members: vec![member_decl("value", TypeTag::Int(IntWidth::Int))] };

    let increment = MethodDef {
        func: FunctionDef {
            name: "increment".into(),
            params: vec![],
            return_type: TypeTag::Void,
            is_async: false,
            body: vec![Statement::Assign(
                AssignTarget::Member(Expr::Id("self".into()), "value".into()),
                Expr::Binary(BinOp::Add, Rc::new(Expr::Member(Rc::new(Expr::Id("self".into())), "value".into())), Rc::new(Expr::Int(1))),
            )],
        },
        receiver_is_pointer: true,
    };

    let impl_block = ImplBlock { struct_name: "Counter".into(), interface_name: None, methods: vec![increment] };

    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "c".into(),
            type_tag: TypeTag::Struct("Counter".into()),
            type_name: Some("Counter".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        }),
        Statement::VarDecl(VarDecl {
            name: "p".into(),
            type_tag: TypeTag::Pointer(Box::new(TypeTag::Struct("Counter".into()))),
            type_name: None,
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: Some(Expr::AddrOf("c".into())),
        }),
        Statement::ExprStmt(Expr::Call(CallExpr { receiver: Some(Rc::new(Expr::Id("p".into()))), name: "increment".into(), args: vec![] })),
        Statement::Print(vec![Expr::Member(Rc::new(Expr::Id("c".into())), "value".into())]),
    ];

    let program = Program { structs: vec![struct_decl], impls: vec![impl_block], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["1\n"]);
}

/// Scenario: chained method calls on a struct returned by value still
/// mutate the original binding, since members alias through shared
/// storage regardless of how many temporaries the chain passes
/// through.
#[test]
fn chained_method_calls_on_return_by_value_struct() {
    let struct_decl = StructDecl { name: "Builder".into(), members: vec![member_decl("n", TypeTag::Int(IntWidth::Int))] };

    let add = MethodDef {
        func: FunctionDef {
            name: "add".into(),
            params: vec![param("k", TypeTag::Int(IntWidth::Int))],
            return_type: TypeTag::Struct("Builder".into()),
            is_async: false,
            body: vec![
                Statement::Assign(
                    AssignTarget::Member(Expr::Id("self".into()), "n".into()),
                    Expr::Binary(BinOp::Add, Rc::new(Expr::Member(Rc::new(Expr::Id("self".into())), "n".into())), Rc::new(Expr::Id("k".into()))),
                ),
                Statement::Return(Some(Expr::Id("self".into()))),
            ],
        },
        receiver_is_pointer: false,
    };

    let impl_block = ImplBlock { struct_name: "Builder".into(), interface_name: None, methods: vec![add] };

    let first_call = Expr::Call(CallExpr { receiver: Some(Rc::new(Expr::Id("b".into()))), name: "add".into(), args: vec![Expr::Int(2)] });
    let second_call = Expr::Call(CallExpr { receiver: Some(Rc::new(first_call)), name: "add".into(), args: vec![Expr::Int(3)] });

    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "b".into(),
            type_tag: TypeTag::Struct("Builder".into()),
            type_name: Some("Builder".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        }),
        Statement::Print(vec![Expr::Member(Rc::new(second_call), "n".into())]),
    ];

    let program = Program { structs: vec![struct_decl], impls: vec![impl_block], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["5\n"]);
}

/// Scenario: a 2-D array living inside a struct member is addressed
/// and assigned through `g.cells[i][j]`, exercising the struct/array
/// engines together.
#[test]
fn two_d_array_assignment_through_struct_member() {
    let struct_decl = StructDecl {
        name: "Grid".into(),
        members: vec![member_decl("cells", TypeTag::Array(Box::new(TypeTag::Int(IntWidth::Int)), vec![2, 2]))],
    };

    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "g".into(),
            type_tag: TypeTag::Struct("Grid".into()),
            type_name: Some("Grid".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        }),
        Statement::Assign(AssignTarget::MemberIndex(Expr::Id("g".into()), "cells".into(), vec![Expr::Int(0), Expr::Int(1)]), Expr::Int(9)),
        Statement::Print(vec![Expr::Index(Rc::new(Expr::Member(Rc::new(Expr::Id("g".into())), "cells".into())), vec![Expr::Int(0), Expr::Int(1)])]),
    ];

    let program = Program { structs: vec![struct_decl], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["9\n"]);
}

/// Scenario: writing a negative literal into an unsigned array slot
/// clamps to zero at storage time (spec.md P7), not at evaluation.
#[test]
fn unsigned_array_clamp_on_write() {
    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "arr".into(),
            type_tag: TypeTag::Int(IntWidth::Int),
            type_name: None,
            is_const: false,
            is_unsigned: true,
            is_reference: false,
            array_dimensions: vec![3],
            init: None,
        }),
        Statement::Assign(AssignTarget::Index(Expr::Id("arr".into()), vec![Expr::Int(0)]), Expr::Int(-5)),
        Statement::Print(vec![Expr::Index(Rc::new(Expr::Id("arr".into())), vec![Expr::Int(0)])]),
    ];

    let program = Program { main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["0\n"]);
}

/// Scenario: reassigning a `const` binding is a fatal, stably-coded
/// error (spec.md §7), not a silent no-op.
#[test]
fn const_reassignment_is_fatal() {
    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "x".into(),
            type_tag: TypeTag::Int(IntWidth::Int),
            type_name: None,
            is_const: true,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: Some(Expr::Int(5)),
        }),
        Statement::Assign(AssignTarget::Name("x".into()), Expr::Int(6)),
    ];

    let program = Program { main, ..Default::default() };
    let (code, _lines) = run_main(program);
    assert_eq!(code, cb_core::error::CbError::ConstReassign { name: "x".into(), span: None }.exit_code());
    assert_ne!(code, 0);
}

/// Scenario: a `spawn`ed function's result is only observable once the
/// event loop has run it, and the one-shot future rejects a second
/// read-before-ready the same way it rejects reading too early.
#[test]
fn spawn_then_drain_resolves_the_future() {
    use cb_core::config::InterpreterConfig;
    use cb_core::dispatch::run_spawned;
    use cb_core::future_cell::FutureCell;
    use cb_core::interpreter::{Definitions, StdoutSink};
    use cb_core::struct_engine::{StructRegistry, UnionRegistry};
    use cb_core::value::TypedValue;
    use std::collections::HashMap;

    let compute = FunctionDef {
        name: "compute".into(),
        params: vec![param("x", TypeTag::Int(IntWidth::Int))],
        return_type: TypeTag::Int(IntWidth::Int),
        is_async: true,
        body: vec![Statement::Return(Some(Expr::Binary(BinOp::Mul, Rc::new(Expr::Id("x".into())), Rc::new(Expr::Int(2)))))],
    };

    let mut functions = HashMap::new();
    functions.insert("compute".to_string(), Rc::new(compute));
    let defs = Definitions {
        functions,
        methods: HashMap::new(),
        interfaces: HashMap::new(),
        typedefs: HashMap::new(),
        structs: StructRegistry::new(),
        unions: UnionRegistry::new(),
    };

    let mut interp = Interpreter::new(defs, Box::new(StdoutSink), InterpreterConfig::default());
    let cell = FutureCell::new(TypeTag::Int(IntWidth::Int));
    assert!(cell.borrow().get().is_err());

    run_spawned(&mut interp, "compute", vec![TypedValue::int(21)], &cell).unwrap();

    assert!(cell.borrow().is_ready());
    assert_eq!(cell.borrow().get().unwrap().as_i64(), Some(42));
}

/// Scenario: a primitive argument bound to an interface-typed parameter
/// is wrapped in a synthetic struct named after its own type, so a
/// method defined via `impl int for Speaker` is still reachable off
/// the parameter (spec.md §4.7 case 5).
#[test]
fn interface_param_wraps_a_primitive_argument() {
    let speak = MethodDef {
        func: FunctionDef {
            name: "speak".into(),
            params: vec![],
            return_type: TypeTag::Int(IntWidth::Int),
            is_async: false,
            body: vec![Statement::Return(Some(Expr::Member(Rc::new(Expr::Id("self".into())), "__value".into())))],
        },
        receiver_is_pointer: false,
    };
    let impl_block = ImplBlock { struct_name: "int".into(), interface_name: Some("Speaker".into()), methods: vec![speak] };
    let interface = InterfaceDef { name: "Speaker".into(), compatible_types: vec!["int".into()], method_names: vec!["speak".into()] };

    let announce = FunctionDef {
        name: "announce".into(),
        params: vec![Param { name: "s".into(), type_tag: TypeTag::Interface("Speaker".into()), type_name: Some("Speaker".into()), is_reference: false, is_unsigned: false }],
        return_type: TypeTag::Int(IntWidth::Int),
        is_async: false,
        body: vec![Statement::Return(Some(Expr::Call(CallExpr {
            receiver: Some(Rc::new(Expr::Id("s".into()))),
            name: "speak".into(),
            args: vec![],
        })))],
    };

    let main = vec![Statement::Print(vec![Expr::Call(CallExpr { receiver: None, name: "announce".into(), args: vec![Expr::Int(7)] })])];

    let program = Program { interfaces: vec![interface], functions: vec![announce], impls: vec![impl_block], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["7\n"]);
}

/// Scenario: `a = b;` copies a struct's member storage rather than
/// aliasing it, so mutating `b` afterward leaves `a` untouched (spec.md
/// §4.7 by-value struct copy).
#[test]
fn struct_assignment_does_not_alias_source() {
    let struct_decl = StructDecl { name: "Point".into(), members: vec![member_decl("x", TypeTag::Int(IntWidth::Int))] };

    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "a".into(),
            type_tag: TypeTag::Struct("Point".into()),
            type_name: Some("Point".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        }),
        Statement::Assign(AssignTarget::Member(Expr::Id("a".into()), "x".into()), Expr::Int(1)),
        Statement::VarDecl(VarDecl {
            name: "b".into(),
            type_tag: TypeTag::Struct("Point".into()),
            type_name: Some("Point".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: Some(Expr::Id("a".into())),
        }),
        Statement::Assign(AssignTarget::Member(Expr::Id("b".into()), "x".into()), Expr::Int(99)),
        Statement::Print(vec![Expr::Member(Rc::new(Expr::Id("a".into())), "x".into())]),
    ];

    let program = Program { structs: vec![struct_decl], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["1\n"]);
}

/// Scenario: a struct passed by value to an ordinary function gets its
/// own member storage, so mutating it inside the callee is invisible
/// to the caller (spec.md §4.7 bind-params, by-value struct case).
#[test]
fn by_value_struct_param_does_not_alias_caller() {
    let struct_decl = StructDecl { name: "Point".into(), members: vec![member_decl("x", TypeTag::Int(IntWidth::Int))] };

    let mutate = FunctionDef {
        name: "mutate".into(),
        params: vec![param("p", TypeTag::Struct("Point".into()))],
        return_type: TypeTag::Void,
        is_async: false,
        body: vec![Statement::Assign(AssignTarget::Member(Expr::Id("p".into()), "x".into()), Expr::Int(99))],
    };

    let main = vec![
        Statement::VarDecl(VarDecl {
            name: "a".into(),
            type_tag: TypeTag::Struct("Point".into()),
            type_name: Some("Point".into()),
            is_const: false,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        }),
        Statement::Assign(AssignTarget::Member(Expr::Id("a".into()), "x".into()), Expr::Int(1)),
        Statement::ExprStmt(Expr::Call(CallExpr { receiver: None, name: "mutate".into(), args: vec![Expr::Id("a".into())] })),
        Statement::Print(vec![Expr::Member(Rc::new(Expr::Id("a".into())), "x".into())]),
    ];

    let program = Program { structs: vec![struct_decl], functions: vec![mutate], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["1\n"]);
}

/// Scenario: `await` on an async call's future actually drains the
/// event loop until the result lands, rather than passing the future
/// handle straight through (spec.md §4.10 scenario 5).
#[test]
fn await_expression_drains_the_event_loop_for_its_result() {
    let compute = FunctionDef {
        name: "compute".into(),
        params: vec![],
        return_type: TypeTag::Int(IntWidth::Int),
        is_async: true,
        body: vec![Statement::Sleep(Expr::Int(10)), Statement::Return(Some(Expr::Int(42)))],
    };

    let main = vec![Statement::Print(vec![Expr::Await(Rc::new(Expr::Call(CallExpr { receiver: None, name: "compute".into(), args: vec![] })))])];

    let program = Program { functions: vec![compute], main, ..Default::default() };
    let (code, lines) = run_main(program);
    assert_eq!(code, 0);
    assert_eq!(lines, vec!["42\n"]);
}
