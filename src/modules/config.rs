use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::modules::ir::IrError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Executable started as `<command> -in -smt2`.
  pub command: String,
  /// Per-query timeout handed to z3 (`-t:`); a timed out query answers `unknown`.
  pub timeout_ms: Option<u64>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    SolverConfig { command: "z3".to_string(), timeout_ms: Some(10_000) }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  /// OpenAI-compatible chat-completions endpoint.
  pub endpoint: String,
  pub model: String,
  /// Environment variable holding the API key.
  pub api_key_env: String,
  pub timeout_secs: u64,
}

impl Default for LlmConfig {
  fn default() -> Self {
    LlmConfig {
      endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
      model: "gpt-4o".to_string(),
      api_key_env: "OPENAI_API_KEY".to_string(),
      timeout_secs: 120,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
  /// Traversals of one loop head per path before the continue edge is dropped.
  pub loop_bound: usize,
  /// Representative lengths of array parameters for throw checks.
  pub throw_array_lengths: Vec<usize>,
  /// Representative lengths of array parameters for every other check.
  pub array_lengths: Vec<usize>,
  /// Total interpreter steps per run.
  pub max_steps: usize,
  /// Execution contexts created per run, forks included.
  pub max_paths: usize,
  /// Wall-clock budget per run, in milliseconds.
  pub time_budget_ms: Option<u64>,
  pub solver: SolverConfig,
  /// Mappings keyed by owner that read as empty for the zero address.
  pub msg_sender_keyed_vars: Vec<String>,
  /// Approval mappings that never hold the caller itself.
  pub approval_vars: Vec<String>,
  pub llm: Option<LlmConfig>,
}

impl Default for VerifierConfig {
  fn default() -> Self {
    VerifierConfig {
      loop_bound: 2,
      throw_array_lengths: vec![1, 2],
      array_lengths: vec![0, 1, 2],
      max_steps: 20_000,
      max_paths: 1_024,
      time_budget_ms: Some(300_000),
      solver: SolverConfig::default(),
      msg_sender_keyed_vars: vec!["_operatorApprovals".to_string()],
      approval_vars: vec!["_tokenApprovals".to_string()],
      llm: None,
    }
  }
}

impl VerifierConfig {
  pub fn load(path: &Path) -> Result<Self, IrError> {
    let text =
      fs::read_to_string(path).map_err(|source| IrError::Io { path: path.display().to_string(), source })?;
    Ok(serde_json::from_str(&text)?)
  }

  pub fn time_budget(&self) -> Option<Duration> {
    self.time_budget_ms.map(Duration::from_millis)
  }
}
