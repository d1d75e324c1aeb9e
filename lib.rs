//! Concrete and abstract semantics for the While+ language.
//!
//! The crate consumes a fully constructed AST (the lexer/parser is an
//! external collaborator) and evaluates it two ways: an exact
//! denotational interpreter over integer states, and a sound abstract
//! interpreter over an interval domain with widening, narrowing, and
//! backward guard refinement.

pub mod commons;
pub mod semantics;
pub mod syntax;
