use std::env;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::modules::config::{LlmConfig, VerifierConfig};
use crate::modules::error::VerifyError;
use crate::modules::ir::Program;
use crate::modules::verifier::{SymbolicVerifier, Target, Verifier};
use crate::modules::verify::VerifyOperation;

#[derive(Debug, Error)]
pub enum LlmError {
  #[error("environment variable {0} holding the API key is not set")]
  MissingKey(String),
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("completion has no choices")]
  EmptyCompletion,
  #[error("answer is neither YES nor NO: {0:?}")]
  Inconclusive(String),
}

/// Chat-completion backend.
pub trait LlmClient {
  fn ask(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
  #[serde(default)]
  content: String,
}

/// Blocking client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiClient {
  client: reqwest::blocking::Client,
  config: LlmConfig,
  api_key: String,
}

impl OpenAiClient {
  pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
    let api_key = env::var(&config.api_key_env).map_err(|_| LlmError::MissingKey(config.api_key_env.clone()))?;
    let client = reqwest::blocking::Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
    Ok(OpenAiClient { client, config, api_key })
  }
}

impl LlmClient for OpenAiClient {
  fn ask(&self, prompt: &str) -> Result<String, LlmError> {
    let body = json!({
      "model": self.config.model,
      "temperature": 0,
      "n": 1,
      "messages": [ChatMessage { role: "user", content: prompt }],
    });
    debug!("[llm] POST {} ({} prompt bytes)", self.config.endpoint, prompt.len());
    let response: ChatResponse =
      self.client.post(&self.config.endpoint).bearer_auth(&self.api_key).json(&body).send()?.error_for_status()?.json()?;
    response.choices.into_iter().next().map(|c| c.message.content).ok_or(LlmError::EmptyCompletion)
  }
}

/// Reads a YES/NO answer: `Some(true)` means the model reports a violation.
/// Only whole words count; the first one wins.
pub fn parse_verdict(answer: &str) -> Option<bool> {
  let verdict = Regex::new(r"(?i)\b(yes|no)\b").ok()?;
  verdict.captures(answer).map(|c| c[1].eq_ignore_ascii_case("yes"))
}

/// Asks a language model whether the function's source violates the check,
/// handing it the negated property the symbolic driver would solve for.
pub struct LlmVerifier<'p, C: LlmClient> {
  program: Option<&'p Program>,
  config: VerifierConfig,
  client: C,
}

impl<'p, C: LlmClient> LlmVerifier<'p, C> {
  pub fn new(config: VerifierConfig, client: C) -> Self {
    LlmVerifier { program: None, config, client }
  }

  pub fn with_program(mut self, program: &'p Program) -> Self {
    self.program = Some(program);
    self
  }

  pub fn prompt(&self, contract: &str, target: &Target, op: &VerifyOperation) -> Result<Option<String>, VerifyError> {
    let program = self.program.ok_or(VerifyError::CompilationUnitNotSet)?;
    // prepare() never queries the solver.
    let mut symbolic = SymbolicVerifier::new(self.config.clone()).with_program(program);
    let prepared = symbolic.prepare(contract, target, op)?;
    let function = program.function(prepared.entry);
    let source = match &function.source {
      Some(s) => s,
      None => return Ok(None),
    };
    let mut prompt = format!(
      "By given the following solidity code for \"{}\" in contract {}:\"\"\"\n{}\n\"\"\"\n",
      function.name, contract, source
    );
    prompt.push_str(&format!("Check if the code violated the rule {}", serde_json::to_string(op)?));
    if let Some(buggy) = prepared.buggy() {
      prompt.push_str(&format!(", which is violated exactly when the following holds on some path: {}", buggy));
    }
    prompt.push_str(". Return in \"YES\" or \"NO\".\n");
    Ok(Some(prompt))
  }
}

impl<'p, C: LlmClient> Verifier for LlmVerifier<'p, C> {
  fn run(&mut self, contract: &str, target: &Target, op: &VerifyOperation) -> Result<bool, VerifyError> {
    let prompt = match self.prompt(contract, target, op)? {
      Some(p) => p,
      None => {
        return Err(VerifyError::MissingSource { contract: contract.to_string(), target: format!("{:?}", target) })
      }
    };
    let answer = self.client.ask(&prompt)?;
    match parse_verdict(&answer) {
      Some(violated) => {
        info!("[llm] {} on {:?} -> {}", op.kind(), target, if violated { "violation" } else { "ok" });
        Ok(!violated)
      }
      None => {
        warn!("[llm] unreadable answer on {:?} in {}", target, contract);
        Err(LlmError::Inconclusive(answer).into())
      }
    }
  }
}
