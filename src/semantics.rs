// Cb execution core: pre-execution semantic warnings (supplemented
// from `original_source/src/backend/interpreter/semantic_analyzer.h`,
// whose `analyze()` pre-pass runs before `main` and only ever warns —
// it never blocks execution, unlike the core's fatal error taxonomy).
//
// Grounded on the teacher's `typechecker.rs`: a read-only walk over
// the AST returning user-facing strings rather than a `Result`.

use crate::ast::{FunctionDef, Program, Statement, VarDecl};

pub fn analyze(program: &Program) -> Vec<String> {
    let mut warnings = Vec::new();
    for f in &program.functions {
        check_function(f, &mut warnings);
    }
    for impl_block in &program.impls {
        for m in &impl_block.methods {
            check_function(&m.func, &mut warnings);
        }
    }
    check_block(&program.main, "main", &mut warnings);
    warnings
}

fn check_function(f: &FunctionDef, warnings: &mut Vec<String>) {
    check_block(&f.body, &f.name, warnings);
}

fn check_block(stmts: &[Statement], ctx: &str, warnings: &mut Vec<String>) {
    let mut seen_return = false;
    for stmt in stmts {
        if seen_return {
            warnings.push(format!("unreachable code after return in '{}'", ctx));
            break;
        }
        match stmt {
            Statement::VarDecl(decl) => check_decl(decl, ctx, warnings),
            Statement::Return(_) => seen_return = true,
            Statement::If(_, then_b, else_b) => {
                check_block(then_b, ctx, warnings);
                check_block(else_b, ctx, warnings);
            }
            Statement::While(_, body) => check_block(body, ctx, warnings),
            Statement::For(init, _, step, body) => {
                if let Some(init) = init {
                    check_block(std::slice::from_ref(init.as_ref()), ctx, warnings);
                }
                if let Some(step) = step {
                    check_block(std::slice::from_ref(step.as_ref()), ctx, warnings);
                }
                check_block(body, ctx, warnings);
            }
            Statement::Block(inner) => check_block(inner, ctx, warnings),
            _ => {}
        }
    }
}

fn check_decl(decl: &VarDecl, ctx: &str, warnings: &mut Vec<String>) {
    if decl.is_const && decl.init.is_none() {
        warnings.push(format!("const '{}' declared without an initializer in '{}'", decl.name, ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Param};
    use crate::value::{IntWidth, TypeTag};

    fn func(name: &str, body: Vec<Statement>) -> FunctionDef {
        FunctionDef { name: name.to_string(), params: Vec::<Param>::new(), return_type: TypeTag::Void, is_async: false, body }
    }

    #[test]
    fn flags_uninitialized_const() {
        let decl = VarDecl {
            name: "x".into(),
            type_tag: TypeTag::Int(IntWidth::Int),
            type_name: None,
            is_const: true,
            is_unsigned: false,
            is_reference: false,
            array_dimensions: vec![],
            init: None,
        };
        let program = Program { functions: vec![func("f", vec![Statement::VarDecl(decl)])], ..Default::default() };
        let warnings = analyze(&program);
        assert!(warnings.iter().any(|w| w.contains("const 'x'")));
    }

    #[test]
    fn flags_unreachable_after_return() {
        let program = Program {
            functions: vec![func(
                "f",
                vec![Statement::Return(Some(Expr::Int(1))), Statement::ExprStmt(Expr::Int(2))],
            )],
            ..Default::default()
        };
        let warnings = analyze(&program);
        assert!(warnings.iter().any(|w| w.contains("unreachable")));
    }

    #[test]
    fn clean_function_has_no_warnings() {
        let program = Program { functions: vec![func("f", vec![Statement::Return(None)])], ..Default::default() };
        assert!(analyze(&program).is_empty());
    }
}
