// Cb execution core: Error Taxonomy (C9, spec.md §7).
//
// The teacher hand-rolls a plain `Error` enum in `vm.rs` with no
// `Display`/`source` impl (callers match on it directly). This crate
// keeps the same flat, closed taxonomy shape but derives `Display`
// (and thus `std::error::Error`) via `thiserror`, the way sibling
// interpreter crates in the retrieval pack do (see DESIGN.md).

use thiserror::Error;

use crate::value::TypeTag;

/// Source location for the one-line-plus-caret diagnostic format
/// spec.md §7 describes. The core does not produce these itself (it
/// has no lexer); they are attached by callers that have line/column
/// information from the AST nodes they're evaluating.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub source_line: Option<String>,
}

impl SourceSpan {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourceSpan { file: file.into(), line, column, source_line: None }
    }

    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    /// One-line-plus-caret rendering per spec.md §7: file, line,
    /// column, offending source line, and a caret under the column.
    pub fn render(&self) -> String {
        let mut out = format!("{}:{}:{}", self.file, self.line, self.column);
        if let Some(src) = &self.source_line {
            out.push('\n');
            out.push_str(src);
            out.push('\n');
            out.push_str(&" ".repeat(self.column.saturating_sub(1) as usize));
            out.push('^');
        }
        out
    }
}

impl std::fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The stable error taxonomy from spec.md §7's table. `RuntimeError`
/// is the catch-all for host-raised conditions; every other variant
/// carries the context needed to render the one-line summary.
#[derive(Debug, Error)]
pub enum CbError {
    #[error("division by zero{}", fmt_at(.span))]
    DivisionByZero { span: Option<SourceSpan> },

    #[error("array index {index} out of bounds (size {size}){}", fmt_at(.span))]
    ArrayOutOfBounds { index: i64, size: usize, span: Option<SourceSpan> },

    #[error("null pointer dereference{}", fmt_at(.span))]
    NullDereference { span: Option<SourceSpan> },

    #[error("type mismatch: expected {expected}, got {got}{}", fmt_at(.span))]
    TypeMismatch { expected: TypeTag, got: TypeTag, span: Option<SourceSpan> },

    #[error("undefined symbol '{name}'{}", fmt_at(.span))]
    UndefinedSymbol { name: String, span: Option<SourceSpan> },

    #[error("wrong number of arguments: expected {expected}, got {got}{}", fmt_at(.span))]
    ArgumentCount { expected: usize, got: usize, span: Option<SourceSpan> },

    #[error("cannot reassign const '{name}'{}", fmt_at(.span))]
    ConstReassign { name: String, span: Option<SourceSpan> },

    #[error("private member '{member}' of '{type_name}' is not accessible here{}", fmt_at(.span))]
    PrivateAccess { type_name: String, member: String, span: Option<SourceSpan> },

    #[error("value is not a member of union '{union_name}'{}", fmt_at(.span))]
    UnionValueRejected { union_name: String, span: Option<SourceSpan> },

    #[error("future read before it was ready{}", fmt_at(.span))]
    FutureNotReady { span: Option<SourceSpan> },

    #[error("array literal shape mismatch: expected {expected:?}, got {got:?}{}", fmt_at(.span))]
    ArrayShape { expected: Vec<usize>, got: Vec<usize>, span: Option<SourceSpan> },

    #[error("runtime error: {message}{}", fmt_at(.span))]
    RuntimeError { message: String, span: Option<SourceSpan> },

    #[error("event loop exceeded its scheduled-task limit ({limit}); program treated as stalled{}", fmt_at(.span))]
    TaskQueueOverflow { limit: u64, span: Option<SourceSpan> },
}

fn fmt_at(span: &Option<SourceSpan>) -> String {
    match span {
        Some(s) => format!("\n{}", s.render()),
        None => String::new(),
    }
}

impl CbError {
    pub fn type_mismatch(expected: TypeTag, got: TypeTag, span: Option<SourceSpan>) -> Self {
        CbError::TypeMismatch { expected, got, span }
    }

    pub fn undefined(name: impl Into<String>, span: Option<SourceSpan>) -> Self {
        CbError::UndefinedSymbol { name: name.into(), span }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        CbError::RuntimeError { message: message.into(), span: None }
    }

    /// Exit-code mapping for §6's "non-zero, stable per error kind."
    pub fn exit_code(&self) -> i32 {
        match self {
            CbError::DivisionByZero { .. } => 10,
            CbError::ArrayOutOfBounds { .. } => 11,
            CbError::NullDereference { .. } => 12,
            CbError::TypeMismatch { .. } => 13,
            CbError::UndefinedSymbol { .. } => 14,
            CbError::ArgumentCount { .. } => 15,
            CbError::ConstReassign { .. } => 16,
            CbError::PrivateAccess { .. } => 17,
            CbError::UnionValueRejected { .. } => 18,
            CbError::FutureNotReady { .. } => 19,
            CbError::ArrayShape { .. } => 20,
            CbError::TaskQueueOverflow { .. } => 21,
            CbError::RuntimeError { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_render_points_at_column() {
        let span = SourceSpan::new("f.cb", 3, 5).with_source_line("  x = y + 1;");
        let rendered = span.render();
        assert!(rendered.contains("f.cb:3:5"));
        assert!(rendered.ends_with('^'));
    }

    #[test]
    fn exit_codes_are_stable_and_nonzero() {
        let e1 = CbError::DivisionByZero { span: None };
        let e2 = CbError::ConstReassign { name: "x".into(), span: None };
        assert_ne!(e1.exit_code(), 0);
        assert_ne!(e2.exit_code(), 0);
        assert_ne!(e1.exit_code(), e2.exit_code());
    }

    #[test]
    fn display_names_the_offending_symbol() {
        let e = CbError::undefined("frobnicate", None);
        assert!(format!("{}", e).contains("frobnicate"));
    }
}
