use thiserror::Error;

use crate::modules::llm::LlmError;
use crate::modules::solvers::SolverError;

/// Failures that abort a single path. The driver records the message on the
/// execution and keeps exploring the remaining paths.
#[derive(Debug, Error)]
pub enum SymError {
  #[error("sort mismatch: {0}")]
  Sort(String),
  #[error("variable {0} has no symbolic value")]
  Unbound(String),
  #[error("cannot resolve call to {0}")]
  UnresolvedCall(String),
  #[error("unexpected operand shape: {0}")]
  Malformed(String),
  #[error(transparent)]
  Solver(#[from] SolverError),
}

/// Failures of a whole `run()`; callers treat them as "skip this rule".
#[derive(Debug, Error)]
pub enum VerifyError {
  #[error("function {function} not found in contract {contract}")]
  FnNotFound { contract: String, function: String },
  #[error("anchor function {anchor} does not identify a state variable of contract {contract}")]
  StateVarAnchorFnNotFound { contract: String, anchor: String },
  #[error("no compilation unit attached to the verifier")]
  CompilationUnitNotSet,
  #[error("contract {0} not found")]
  ContractNotFound(String),
  #[error("event {event} is not declared in contract {contract}")]
  EventNotFound { contract: String, event: String },
  #[error("not yet supported: {0}")]
  Unsupported(String),
  #[error("invalid selector: {0}")]
  InvalidSelector(String),
  #[error("no source excerpt for {target} in contract {contract}")]
  MissingSource { contract: String, target: String },
  #[error("unknown verify operation: {0}")]
  UnknownVerifyType(String),
  #[error(transparent)]
  Sym(#[from] SymError),
  #[error(transparent)]
  Solver(#[from] SolverError),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Llm(#[from] LlmError),
}
