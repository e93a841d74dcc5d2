use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use log::{debug, warn};
use num_bigint::BigInt;
use thiserror::Error;

use crate::modules::smt::assert_terms;
use crate::modules::term::Term;

const END_MARKER: &str = "ercsym-query-done";

#[derive(Debug, Error)]
pub enum SolverError {
  #[error("failed to start solver `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },
  #[error("solver i/o failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("solver reported an error: {0}")]
  Reported(String),
  #[error("symbol {0} is used with two different sorts")]
  SortClash(String),
  #[error("solver closed its output unexpectedly")]
  Closed,
  #[error("unexpected solver answer: {0}")]
  Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
  Sat,
  Unsat,
  Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValue {
  Int(BigInt),
  Bool(bool),
  Other(String),
}

/// Values of the terms requested alongside a satisfiable query.
#[derive(Debug, Clone, Default)]
pub struct Model {
  values: Vec<(Term, ModelValue)>,
}

impl Model {
  pub fn new(values: Vec<(Term, ModelValue)>) -> Self {
    Model { values }
  }

  pub fn get(&self, term: &Term) -> Option<&ModelValue> {
    self.values.iter().find(|(t, _)| t == term).map(|(_, v)| v)
  }

  pub fn int(&self, term: &Term) -> Option<BigInt> {
    match self.get(term)? {
      ModelValue::Int(i) => Some(i.clone()),
      _ => None,
    }
  }
}

/// Constraint-solving backend. Implementations see the full assertion list of
/// every query; they own no path state.
pub trait Solver {
  fn check_sat(&mut self, assertions: &[&Term]) -> Result<SatResult, SolverError>;

  /// Model values for `terms` when `assertions` are satisfiable.
  fn model(&mut self, assertions: &[&Term], terms: &[Term]) -> Result<Option<Model>, SolverError>;
}

/// Whether `command` starts and answers `-version`.
pub fn z3_available(command: &str) -> bool {
  Command::new(command)
    .arg("-version")
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status()
    .map(|s| s.success())
    .unwrap_or(false)
}

struct SolverInstance {
  process: Child,
  stdin: BufWriter<ChildStdin>,
  stdout: BufReader<ChildStdout>,
}

/// An interactive `z3 -in` child process. Every query runs inside its own
/// `push`/`pop` scope so declarations never leak between queries.
pub struct Z3Process {
  command: String,
  timeout_ms: Option<u64>,
  instance: Option<SolverInstance>,
  cache: HashMap<String, SatResult>,
  queries: usize,
}

impl Z3Process {
  pub fn new(command: &str, timeout_ms: Option<u64>) -> Self {
    Z3Process { command: command.to_string(), timeout_ms, instance: None, cache: HashMap::new(), queries: 0 }
  }

  pub fn queries(&self) -> usize {
    self.queries
  }

  fn spawn(&self) -> Result<SolverInstance, SolverError> {
    let mut cmd = Command::new(&self.command);
    cmd.args(["-in", "-smt2"]);
    if let Some(ms) = self.timeout_ms {
      cmd.arg(format!("-t:{}", ms));
    }
    let mut process = cmd
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|source| SolverError::Spawn { command: self.command.clone(), source })?;
    let stdin = process.stdin.take().ok_or(SolverError::Closed)?;
    let stdout = process.stdout.take().ok_or(SolverError::Closed)?;
    let mut instance = SolverInstance { process, stdin: BufWriter::new(stdin), stdout: BufReader::new(stdout) };
    writeln!(instance.stdin, "(set-option :produce-models true)")?;
    Ok(instance)
  }

  /// Sends one script and returns every output line up to the end marker.
  fn exchange(&mut self, script: &str) -> Result<Vec<String>, SolverError> {
    if self.instance.is_none() {
      self.instance = Some(self.spawn()?);
    }
    let inst = self.instance.as_mut().ok_or(SolverError::Closed)?;
    inst.stdin.write_all(script.as_bytes())?;
    writeln!(inst.stdin, "(echo \"{}\")", END_MARKER)?;
    inst.stdin.flush()?;

    let mut lines = vec![];
    loop {
      let mut line = String::new();
      if inst.stdout.read_line(&mut line)? == 0 {
        self.instance = None;
        return Err(SolverError::Closed);
      }
      let line = line.trim().to_string();
      if line == END_MARKER {
        break;
      }
      if !line.is_empty() {
        lines.push(line);
      }
    }
    self.queries += 1;
    Ok(lines)
  }

  fn query(&mut self, assertions: &[&Term], terms: &[Term]) -> Result<(SatResult, Vec<String>), SolverError> {
    let smt2 = assert_terms(assertions, terms)?;
    let mut script = format!("(push 1)\n{}(check-sat)\n", smt2);
    if !terms.is_empty() {
      let wanted: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
      script += &format!("(get-value ({}))\n", wanted.join(" "));
    }
    script += "(pop 1)\n";

    let lines = self.exchange(&script)?;
    let mut result = None;
    let mut rest = vec![];
    for line in lines {
      if result.is_none() {
        match line.as_str() {
          "sat" => result = Some(SatResult::Sat),
          "unsat" => result = Some(SatResult::Unsat),
          "unknown" => result = Some(SatResult::Unknown),
          l if l.starts_with("(error") => return Err(SolverError::Reported(l.to_string())),
          l => return Err(SolverError::Unexpected(l.to_string())),
        }
      } else {
        rest.push(line);
      }
    }
    let result = result.ok_or_else(|| SolverError::Unexpected("no check-sat answer".into()))?;
    debug!("[solver] query #{} over {} assertions: {:?}", self.queries, assertions.len(), result);
    Ok((result, rest))
  }
}

impl Solver for Z3Process {
  fn check_sat(&mut self, assertions: &[&Term]) -> Result<SatResult, SolverError> {
    let key: String = assertions.iter().map(|t| t.to_string()).collect::<Vec<_>>().join("\n");
    if let Some(hit) = self.cache.get(&key) {
      return Ok(*hit);
    }
    let (result, _) = self.query(assertions, &[])?;
    self.cache.insert(key, result);
    Ok(result)
  }

  fn model(&mut self, assertions: &[&Term], terms: &[Term]) -> Result<Option<Model>, SolverError> {
    let (result, rest) = self.query(assertions, terms)?;
    if result != SatResult::Sat {
      return Ok(None);
    }
    let text = rest.join(" ");
    let parsed = parse_sexp(&text).ok_or_else(|| SolverError::Unexpected(text.clone()))?;
    let pairs = match parsed {
      Sexp::List(items) => items,
      _ => return Err(SolverError::Unexpected(text)),
    };
    let mut values = vec![];
    for (term, pair) in terms.iter().zip(pairs) {
      match pair {
        Sexp::List(mut kv) if kv.len() == 2 => {
          let value = kv.remove(1);
          values.push((term.clone(), model_value(&value)));
        }
        other => warn!("[solver] unexpected get-value entry {:?}", other),
      }
    }
    Ok(Some(Model::new(values)))
  }
}

impl Drop for Z3Process {
  fn drop(&mut self) {
    if let Some(mut inst) = self.instance.take() {
      let _ = writeln!(inst.stdin, "(exit)");
      let _ = inst.stdin.flush();
      if inst.process.wait().is_err() {
        let _ = inst.process.kill();
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sexp {
  Atom(String),
  List(Vec<Sexp>),
}

fn tokenize(text: &str) -> Vec<String> {
  let mut tokens = vec![];
  let mut chars = text.chars().peekable();
  while let Some(&c) = chars.peek() {
    match c {
      '(' | ')' => {
        tokens.push(c.to_string());
        chars.next();
      }
      '|' => {
        let mut tok = String::from('|');
        chars.next();
        for ch in chars.by_ref() {
          tok.push(ch);
          if ch == '|' {
            break;
          }
        }
        tokens.push(tok);
      }
      c if c.is_whitespace() => {
        chars.next();
      }
      _ => {
        let mut tok = String::new();
        while let Some(&ch) = chars.peek() {
          if ch == '(' || ch == ')' || ch.is_whitespace() {
            break;
          }
          tok.push(ch);
          chars.next();
        }
        tokens.push(tok);
      }
    }
  }
  tokens
}

fn parse_sexp(text: &str) -> Option<Sexp> {
  let tokens = tokenize(text);
  let mut stack: Vec<Vec<Sexp>> = vec![];
  let mut done = None;
  for tok in tokens {
    match tok.as_str() {
      "(" => stack.push(vec![]),
      ")" => {
        let list = Sexp::List(stack.pop()?);
        match stack.last_mut() {
          Some(parent) => parent.push(list),
          None => done = Some(list),
        }
      }
      _ => match stack.last_mut() {
        Some(parent) => parent.push(Sexp::Atom(tok)),
        None => done = Some(Sexp::Atom(tok)),
      },
    }
  }
  done
}

fn model_value(value: &Sexp) -> ModelValue {
  match value {
    Sexp::Atom(a) if a == "true" => ModelValue::Bool(true),
    Sexp::Atom(a) if a == "false" => ModelValue::Bool(false),
    Sexp::Atom(a) => match BigInt::parse_bytes(a.as_bytes(), 10) {
      Some(i) => ModelValue::Int(i),
      None => ModelValue::Other(a.clone()),
    },
    Sexp::List(items) => match items.as_slice() {
      [Sexp::Atom(minus), Sexp::Atom(n)] if minus == "-" => match BigInt::parse_bytes(n.as_bytes(), 10) {
        Some(i) => ModelValue::Int(-i),
        None => ModelValue::Other(format!("(- {})", n)),
      },
      _ => ModelValue::Other(format!("{:?}", items)),
    },
  }
}
