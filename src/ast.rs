// Cb execution core: input AST (§6 "Input").
//
// The core consumes a fully-built AST from an external parser; this
// module is the shape of that AST as the core sees it. Grounded on
// the teacher's `ast.rs`: the `Node`/`Seq` aliases abstracting over
// memory management, and the `BinOp`/`UnOp`/`Expr`/`Statement` enum
// shapes, widened from the dashboard language's arithmetic-only
// surface to Cb's structs/interfaces/arrays/pointers/methods.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::value::TypeTag;

pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<T>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
    Abs,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    /// `None` for a free function call or a Form-2 function-pointer
    /// call; `Some(receiver)` for a method call (spec.md §4.7
    /// "Classify").
    pub receiver: Option<Node<Expr>>,
    pub name: String,
    pub args: Seq<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Void,
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Char(u8),
    Str(String),
    Id(String),
    /// `o.m`
    Member(Node<Expr>, String),
    /// `p->m`, sugar for `(*p).m` (spec.md §4.6).
    Arrow(Node<Expr>, String),
    /// `*p`
    Deref(Node<Expr>),
    /// `&name`
    AddrOf(String),
    /// `a[i0][i1]...`
    Index(Node<Expr>, Seq<Expr>),
    Unary(UnOp, Node<Expr>),
    Binary(BinOp, Node<Expr>, Node<Expr>),
    /// `cond ? then : else`
    Ternary(Node<Expr>, Node<Expr>, Node<Expr>),
    Call(CallExpr),
    ArrayLiteral(Seq<Expr>),
    Await(Node<Expr>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(String),
    Deref(Expr),
    Index(Expr, Seq<Expr>),
    Member(Expr, String),
    MemberIndex(Expr, String, Seq<Expr>),
    Arrow(Expr, String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub type_tag: TypeTag,
    pub type_name: Option<String>,
    pub is_const: bool,
    pub is_unsigned: bool,
    pub is_reference: bool,
    /// Declared dimensions for an array decl; empty means "unsized,
    /// infer from initializer" (spec.md §4.3).
    pub array_dimensions: Seq<usize>,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    VarDecl(VarDecl),
    Assign(AssignTarget, Expr),
    ExprStmt(Expr),
    If(Expr, Seq<Statement>, Seq<Statement>),
    While(Expr, Seq<Statement>),
    For(Option<Box<Statement>>, Option<Expr>, Option<Box<Statement>>, Seq<Statement>),
    Return(Option<Expr>),
    Block(Seq<Statement>),
    Print(Seq<Expr>),
    Spawn(Expr),
    Sleep(Expr),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_tag: TypeTag,
    pub type_name: Option<String>,
    pub is_reference: bool,
    pub is_unsigned: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Seq<Param>,
    pub return_type: TypeTag,
    pub is_async: bool,
    pub body: Seq<Statement>,
}

/// A method: a `FunctionDef` plus the receiver's declared shape. The
/// receiver itself is not a `Param` — it is installed as `self` by
/// the Call Dispatcher (spec.md §4.7 "Self setup"), never bound like
/// an ordinary parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub func: FunctionDef,
    pub receiver_is_pointer: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplBlock {
    pub struct_name: String,
    pub interface_name: Option<String>,
    pub methods: Seq<MethodDef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    /// Struct or primitive type names whose `impl` may satisfy this
    /// interface (spec.md §9 "Interface holding primitives").
    pub compatible_types: Seq<String>,
    pub method_names: Seq<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructMemberDecl {
    pub name: String,
    pub type_tag: TypeTag,
    pub is_pointer: bool,
    pub pointer_depth: u8,
    pub is_reference: bool,
    pub is_unsigned: bool,
    pub is_private: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub members: Seq<StructMemberDecl>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnionDecl {
    pub name: String,
    pub allowed_literals: Seq<Expr>,
}

/// The whole program as handed to the core: every user-defined
/// struct/interface/typedef/union/function/impl plus the top-level
/// statement list (spec.md §6 "Input").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Program {
    pub structs: Seq<StructDecl>,
    pub unions: Seq<UnionDecl>,
    pub interfaces: Seq<InterfaceDef>,
    pub typedefs: Seq<(String, TypeTag)>,
    pub functions: Seq<FunctionDef>,
    pub impls: Seq<ImplBlock>,
    pub main: Seq<Statement>,
}
