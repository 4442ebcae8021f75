//! Predicate compiler, evaluator, and compiled-program cache.
//!
//! Policy expressions are boolean predicates over a fixed variable
//! environment bound from the decision request: `subject` and `metadata`
//! (dynamic maps), and the `resource`, `action`, `protocol`, `platform`, and
//! `cloud` strings. An expression is parsed into an explicit AST, type-checked
//! against that environment, and wrapped as a [`Program`] that a tree walk
//! evaluates to a boolean against JSON bindings.
//!
//! Compilation failures are [`ExprError`] and reject the policy at write
//! time; runtime failures are [`EvalError`] and are routed through the
//! engine's fail policy.

pub mod ast;
mod cache;
mod check;
mod error;
mod lexer;
mod parser;
mod program;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use cache::ProgramCache;
pub use check::{check, Type};
pub use error::{EvalError, ExprError};
pub use parser::parse;
pub use program::{compile, validate, Program};
