// Cb execution core: top-level driver (spec.md §6 "Input/Output").
//
// Wires every engine (scope, struct, union, array, event loop) behind
// one `Interpreter`, the way the teacher's `vm::Machine` owns its
// `Env`, `output::Sink`, and `config::Config` and drives `run()` to
// completion. `PrintSink` mirrors the teacher's `output::Sink` trait:
// the core never writes to stdout directly, so a host can capture
// output in tests or a GUI.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{FunctionDef, ImplBlock, InterfaceDef, MethodDef, Program, StructDecl, UnionDecl};
use crate::config::InterpreterConfig;
use crate::error::CbError;
use crate::event_loop::EventLoop;
use crate::scope::ScopeStack;
use crate::semantics;
use crate::struct_engine::{MemberDef, StructDefinition, StructRegistry, UnionDefinition, UnionRegistry};
use crate::value::TypeTag;

/// Host-provided output sink (spec.md §6). The default writes to
/// stdout via `print!`; tests typically capture into a `Vec<String>`.
pub trait PrintSink {
    fn print(&mut self, text: &str);
}

pub struct StdoutSink;

impl PrintSink for StdoutSink {
    fn print(&mut self, text: &str) {
        print!("{}", text);
    }
}

/// A sink that records every `print` into a shared buffer a test (or
/// an embedding host) keeps its own handle to, since the sink itself
/// is consumed by `Interpreter::new`.
#[derive(Clone, Default)]
pub struct CapturingSink {
    pub lines: Rc<RefCell<Vec<String>>>,
}

impl PrintSink for CapturingSink {
    fn print(&mut self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}

/// All definition tables a running program needs, built once from the
/// input `Program` before `main` executes (spec.md §6).
pub struct Definitions {
    pub functions: HashMap<String, Rc<FunctionDef>>,
    pub methods: HashMap<(String, String), Rc<MethodDef>>,
    pub interfaces: HashMap<String, InterfaceDef>,
    pub typedefs: HashMap<String, TypeTag>,
    pub structs: StructRegistry,
    pub unions: UnionRegistry,
}

impl Definitions {
    /// Method resolution for a struct value: exact struct name first,
    /// falling through to any interface `impl` whose `compatible_types`
    /// names this struct (spec.md §4.7 "Classify" / "Interface").
    pub fn find_method(&self, struct_name: &str, method_name: &str) -> Option<&Rc<MethodDef>> {
        if let Some(m) = self.methods.get(&(struct_name.to_string(), method_name.to_string())) {
            return Some(m);
        }
        for iface in self.interfaces.values() {
            if iface.compatible_types.iter().any(|t| t == struct_name) && iface.method_names.contains(&method_name.to_string())
            {
                if let Some(m) = self.methods.get(&(struct_name.to_string(), method_name.to_string())) {
                    return Some(m);
                }
            }
        }
        None
    }
}

fn build_struct_def(decl: &StructDecl) -> StructDefinition {
    StructDefinition {
        name: decl.name.clone(),
        members: decl
            .members
            .iter()
            .map(|m| MemberDef {
                name: m.name.clone(),
                type_tag: m.type_tag.clone(),
                is_pointer: m.is_pointer,
                pointer_depth: m.pointer_depth,
                is_reference: m.is_reference,
                is_unsigned: m.is_unsigned,
                is_private: m.is_private,
            })
            .collect(),
    }
}

fn build_union_def(decl: &UnionDecl, eval_literal: impl Fn(&crate::ast::Expr) -> Result<crate::value::Value, CbError>) -> Result<UnionDefinition, CbError> {
    let mut allowed = Vec::with_capacity(decl.allowed_literals.len());
    for lit in &decl.allowed_literals {
        allowed.push(eval_literal(lit)?);
    }
    Ok(UnionDefinition { name: decl.name.clone(), allowed })
}

pub fn build_definitions(program: &Program) -> Result<Definitions, CbError> {
    let mut structs = StructRegistry::new();
    for decl in &program.structs {
        structs.register(build_struct_def(decl))?;
    }

    let mut unions = UnionRegistry::new();
    for decl in &program.unions {
        let def = build_union_def(decl, crate::eval::eval_const_literal)?;
        unions.register(def);
    }

    let mut typedefs = HashMap::new();
    for (name, tag) in &program.typedefs {
        typedefs.insert(name.clone(), tag.clone());
    }

    let mut interfaces = HashMap::new();
    for iface in &program.interfaces {
        interfaces.insert(iface.name.clone(), iface.clone());
    }

    let mut functions = HashMap::new();
    for f in &program.functions {
        functions.insert(f.name.clone(), Rc::new(f.clone()));
    }

    let mut methods = HashMap::new();
    for impl_block in &program.impls {
        for m in &impl_block.methods {
            methods.insert((impl_block.struct_name.clone(), m.func.name.clone()), Rc::new(m.clone()));
        }
    }
    let _: &[ImplBlock] = &program.impls;

    Ok(Definitions { functions, methods, interfaces, typedefs, structs, unions })
}

/// Everything one `main()` run threads through eval/exec/dispatch.
pub struct Interpreter {
    pub scope: ScopeStack,
    pub defs: Definitions,
    pub event_loop: EventLoop,
    pub impl_stack: Vec<String>,
    pub sink: Box<dyn PrintSink>,
    pub config: InterpreterConfig,
}

impl Interpreter {
    pub fn new(defs: Definitions, sink: Box<dyn PrintSink>, config: InterpreterConfig) -> Self {
        crate::value::set_warn_on_unsigned_clamp(config.warn_on_unsigned_clamp);
        let event_loop = EventLoop::with_config(config.max_scheduled_tasks, config.timer_granularity_ms);
        Interpreter { scope: ScopeStack::new(), defs, event_loop, impl_stack: Vec::new(), sink, config }
    }

    pub fn current_impl_struct(&self) -> Option<&str> {
        self.impl_stack.last().map(String::as_str)
    }

    /// Entry point (spec.md §6): run semantic warnings, then `main`,
    /// then drain the event loop for any spawned async work, returning
    /// the process exit code.
    pub fn run(program: &Program, sink: Box<dyn PrintSink>, config: InterpreterConfig) -> Result<i32, CbError> {
        let defs = build_definitions(program)?;
        for warning in semantics::analyze(program) {
            log::warn!("{}", warning);
        }
        let mut interp = Interpreter::new(defs, sink, config);
        let result = crate::exec::exec_block(&mut interp, &program.main);
        match result {
            Ok(_) => {
                drain_event_loop(&mut interp)?;
                Ok(0)
            }
            Err(e) => {
                log::error!("{}", e);
                Ok(e.exit_code())
            }
        }
    }
}

/// Drain every `spawn`/`sleep` task queued by `main` (spec.md §4.8
/// `run`). Pops one ready task at a time so the executor (which needs
/// `&mut interp` itself) never re-borrows `interp.event_loop`.
fn drain_event_loop(interp: &mut Interpreter) -> Result<(), CbError> {
    loop {
        match interp.event_loop.pop_ready() {
            Some(crate::event_loop::ScheduledTask::Call { function_name, args, result }) => {
                crate::dispatch::run_spawned(interp, &function_name, args, &result)?;
            }
            Some(crate::event_loop::ScheduledTask::Sleep { result }) => {
                crate::event_loop::resolve_sleep(&result)?;
            }
            None => {
                if !interp.event_loop.has_pending_timers() {
                    break;
                }
                std::thread::sleep(interp.event_loop.granularity());
            }
        }
    }
    Ok(())
}
