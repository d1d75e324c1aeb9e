//! Shared error taxonomy for both evaluators.

use derive_more::Display;

/// A fatal evaluation error, surfaced to the caller and never retried.
///
/// Malformed-interval construction and unrecognized AST nodes are *not*
/// here: the former is an internal invariant violation (it panics), and
/// the latter is ruled out by exhaustive matching on the syntax enums.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum EvalError {
    /// A variable was referenced that is not in the state.
    #[display(fmt = "unknown variable `{}`", _0)]
    UnknownVariable(String),

    /// An assignment targeted a variable that was never declared in the
    /// initial state.
    #[display(fmt = "assignment to undeclared variable `{}`", _0)]
    UndeclaredAssignment(String),

    /// Concrete `/` or `%` with a zero divisor.
    #[display(fmt = "division by zero")]
    DivisionByZero,
}

impl std::error::Error for EvalError {}
