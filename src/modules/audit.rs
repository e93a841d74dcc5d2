use std::collections::BTreeSet;

use crossbeam::channel;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::modules::config::VerifierConfig;
use crate::modules::error::VerifyError;
use crate::modules::ir::{Contract, FnId, Function, Program, StateVariable};
use crate::modules::llm::{LlmVerifier, OpenAiClient};
use crate::modules::rule::{ErcDocument, Rule, RuleKind, Signature};
use crate::modules::soltype::SolType;
use crate::modules::verifier::{SymbolicVerifier, Target, Verifier};
use crate::modules::verify::VerifyOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  High,
  Medium,
  Low,
}

impl Severity {
  pub fn of(kind: RuleKind) -> Severity {
    match kind {
      RuleKind::Throw | RuleKind::Call | RuleKind::Assign => Severity::High,
      RuleKind::Interface => Severity::Low,
      _ => Severity::Medium,
    }
  }
}

/// One rule a contract fails.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
  pub erc: String,
  pub rule_id: usize,
  pub kind: RuleKind,
  pub rule: String,
  pub contract: String,
  pub interface: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub function: Option<String>,
  pub severity: Severity,
  pub tags: BTreeSet<String>,
}

/// One `(rule, function)` check.
#[derive(Debug, Clone)]
pub struct Job<'r> {
  pub rule_id: usize,
  pub rule: &'r Rule,
  pub op: VerifyOperation,
  pub target: Target,
  pub function: String,
}

pub type VerifierFactory<'p> = dyn Fn(&'p Program) -> Result<Box<dyn Verifier + 'p>, VerifyError> + Sync + 'p;

/// Checks one contract of a program against an ERC rule document.
pub struct Auditor<'p> {
  program: &'p Program,
  factory: Box<VerifierFactory<'p>>,
  only_function: Option<String>,
}

impl<'p> Auditor<'p> {
  pub fn new(program: &'p Program, config: VerifierConfig, use_llm: bool) -> Self {
    let factory = move |program: &'p Program| -> Result<Box<dyn Verifier + 'p>, VerifyError> {
      if use_llm {
        let client = OpenAiClient::new(config.llm.clone().unwrap_or_default())?;
        return Ok(Box::new(LlmVerifier::new(config.clone(), client).with_program(program)));
      }
      Ok(Box::new(SymbolicVerifier::new(config.clone()).with_program(program)))
    };
    Auditor { program, factory: Box::new(factory), only_function: None }
  }

  /// Replaces how each worker builds its verifier.
  pub fn with_factory<F>(mut self, factory: F) -> Self
  where
    F: Fn(&'p Program) -> Result<Box<dyn Verifier + 'p>, VerifyError> + Sync + 'p,
  {
    self.factory = Box::new(factory);
    self
  }

  /// Restricts symbolic rules to functions named `name`.
  pub fn only_function(mut self, name: Option<String>) -> Self {
    self.only_function = name;
    self
  }

  fn contract(&self, name: &str) -> Result<(usize, &'p Contract), VerifyError> {
    let idx = self.program.contract_index(name).ok_or_else(|| VerifyError::ContractNotFound(name.into()))?;
    Ok((idx, &self.program.contracts[idx]))
  }

  /// Function, parameter, return and event declarations the document mandates.
  pub fn interface_violations(&self, contract: &str, doc: &ErcDocument) -> Result<Vec<Violation>, VerifyError> {
    let (_, c) = self.contract(contract)?;
    let mut violations = vec![];
    let violation = |rule_id: usize, def: &str, tag: &str| Violation {
      erc: doc.name.clone(),
      rule_id,
      kind: RuleKind::Interface,
      rule: def.to_string(),
      contract: c.name.clone(),
      interface: def.to_string(),
      function: None,
      severity: Severity::Low,
      tags: BTreeSet::from([tag.to_string()]),
    };

    for (rule_id, def) in doc.functions.iter().enumerate() {
      let sig = match Signature::parse(&def.def) {
        Ok(sig) => sig,
        Err(e) => {
          warn!("[audit] skipping interface {}: {}", def.def, e);
          continue;
        }
      };
      let candidates: Vec<&Function> = c.functions.iter().filter(|f| f.name == sig.name && !f.is_constructor).collect();
      if candidates.is_empty() {
        let getter = c.state_variable(&sig.name).map(|(_, sv)| sv).filter(|sv| sv.visibility.is_entry_point());
        if !getter.map_or(false, |sv| getter_matches(sv, &sig)) {
          violations.push(violation(rule_id, &def.def, "no_function"));
        }
        continue;
      }
      let matching = candidates.into_iter().find(|f| {
        let params: Vec<&SolType> = f.params.iter().map(|p| &p.ty).collect();
        params == sig.param_types()
      });
      match matching {
        None => violations.push(violation(rule_id, &def.def, "incorrect_param")),
        Some(f) if !sig.returns.is_empty() && f.returns != sig.returns => {
          violations.push(violation(rule_id, &def.def, "incorrect_return"))
        }
        Some(_) => {}
      }
    }

    for (rule_id, def) in doc.events.iter().enumerate() {
      let sig = match Signature::parse(&def.def) {
        Ok(sig) => sig,
        Err(e) => {
          warn!("[audit] skipping event interface {}: {}", def.def, e);
          continue;
        }
      };
      let declared = c.event(&sig.name).map_or(false, |(_, decl)| {
        decl.params.len() == sig.params.len()
          && decl.params.iter().zip(&sig.params).all(|(d, s)| d.ty == s.ty && d.indexed == s.indexed)
      });
      if !declared {
        violations.push(violation(rule_id, &def.def, "event"));
      }
    }
    Ok(violations)
  }

  /// Expands the document's symbolic rules into per-function checks.
  pub fn plan<'r>(&self, contract: &str, doc: &'r ErcDocument) -> Result<Vec<Job<'r>>, VerifyError> {
    let (contract_idx, c) = self.contract(contract)?;
    let mut jobs = vec![];
    for (rule_id, rule) in doc.rules.iter().enumerate() {
      if rule.kind == RuleKind::Interface {
        continue;
      }
      let op = match rule.verify_operation() {
        None => {
          debug!("[audit] rule {} has no symbolic form", rule_id);
          continue;
        }
        Some(Err(e)) => {
          warn!("[audit] rule {} cannot be decoded: {}", rule_id, e);
          continue;
        }
        Some(Ok(op)) => op,
      };

      if rule.interface.trim_start().starts_with("function") {
        let sig = match rule.signature() {
          Ok(sig) => sig,
          Err(e) => {
            warn!("[audit] rule {} has a malformed interface: {}", rule_id, e);
            continue;
          }
        };
        if self.only_function.as_ref().map_or(false, |only| *only != sig.name) {
          continue;
        }
        let target = Target::Named { name: sig.name.clone(), arity: Some(sig.params.len()) };
        jobs.push(Job { rule_id, rule, op, target, function: rule.interface.clone() });
        continue;
      }

      // Contract-wide rules run on every public state-changing function.
      let gating_event = match (&op, rule.kind) {
        (VerifyOperation::StateAssignVerify(v), RuleKind::Assign) => v.event.clone(),
        _ => None,
      };
      for (function, f) in c.functions.iter().enumerate() {
        let id = FnId { contract: contract_idx, function };
        if f.is_constructor || !f.visibility.is_entry_point() || !f.is_state_mutating() {
          continue;
        }
        if self.only_function.as_ref().map_or(false, |only| *only != f.name) {
          continue;
        }
        if self.program.state_variables_written(id).is_empty() {
          continue;
        }
        if let Some(event) = &gating_event {
          if !self.program.events_emitted(id).contains(event) {
            continue;
          }
        }
        jobs.push(Job { rule_id, rule, op: op.clone(), target: Target::Function(id), function: function_signature(f) });
      }
    }
    Ok(jobs)
  }

  fn check(&self, verifier: &mut dyn Verifier, contract: &str, doc: &ErcDocument, job: &Job) -> Option<Violation> {
    match verifier.run(contract, &job.target, &job.op) {
      Ok(true) => None,
      Ok(false) => Some(Violation {
        erc: doc.name.clone(),
        rule_id: job.rule_id,
        kind: job.rule.kind,
        rule: job.rule.rule.clone(),
        contract: contract.to_string(),
        interface: job.rule.interface.clone(),
        function: Some(job.function.clone()),
        severity: Severity::of(job.rule.kind),
        tags: BTreeSet::from(["function".to_string()]),
      }),
      Err(e @ VerifyError::FnNotFound { .. })
      | Err(e @ VerifyError::StateVarAnchorFnNotFound { .. })
      | Err(e @ VerifyError::MissingSource { .. }) => {
        debug!("[audit] rule {} skipped for {}: {}", job.rule_id, job.function, e);
        None
      }
      Err(e) => {
        warn!("[audit] rule {} failed on {}: {}", job.rule_id, job.function, e);
        None
      }
    }
  }

  /// Runs every check of `doc` on one thread.
  pub fn audit(&self, contract: &str, doc: &ErcDocument) -> Result<Vec<Violation>, VerifyError> {
    let mut violations = self.interface_violations(contract, doc)?;
    let jobs = self.plan(contract, doc)?;
    info!("[audit] {} checks on {}", jobs.len(), contract);
    let mut verifier = (self.factory)(self.program)?;
    for job in &jobs {
      violations.extend(self.check(verifier.as_mut(), contract, doc, job));
    }
    violations.sort();
    Ok(violations)
  }

  /// Same as `audit`, with checks spread over `workers` threads (all cores
  /// when `None`). Every worker owns its verifier and solver.
  pub fn audit_parallel(
    &self,
    contract: &str,
    doc: &ErcDocument,
    workers: Option<usize>,
  ) -> Result<Vec<Violation>, VerifyError> {
    let mut violations = self.interface_violations(contract, doc)?;
    let jobs = self.plan(contract, doc)?;
    let workers = workers.unwrap_or_else(num_cpus::get).clamp(1, jobs.len().max(1));
    info!("[audit] {} checks on {} over {} workers", jobs.len(), contract, workers);

    let (job_tx, job_rx) = channel::unbounded::<&Job>();
    let (found_tx, found_rx) = channel::unbounded::<Violation>();
    for job in &jobs {
      // The receiver outlives this loop, so sending cannot fail.
      let _ = job_tx.send(job);
    }
    drop(job_tx);

    let scoped = crossbeam::thread::scope(|scope| {
      for worker in 0..workers {
        let job_rx = job_rx.clone();
        let found_tx = found_tx.clone();
        scope.spawn(move |_| {
          let mut verifier = match (self.factory)(self.program) {
            Ok(v) => v,
            Err(e) => {
              error!("[audit] worker {} cannot build a verifier: {}", worker, e);
              return;
            }
          };
          for job in job_rx.iter() {
            if let Some(v) = self.check(verifier.as_mut(), contract, doc, job) {
              let _ = found_tx.send(v);
            }
          }
        });
      }
    });
    drop(found_tx);
    if scoped.is_err() {
      error!("[audit] a worker panicked, results may be incomplete");
    }

    violations.extend(found_rx.iter());
    violations.sort();
    Ok(violations)
  }
}

/// `name(type,type)` of a contract function.
pub fn function_signature(f: &Function) -> String {
  let params: Vec<String> = f.params.iter().map(|p| p.ty.to_string()).collect();
  format!("{}({})", f.name, params.join(","))
}

/// Whether the auto-generated getter of `sv` has the interface's shape.
fn getter_matches(sv: &StateVariable, sig: &Signature) -> bool {
  let mut params = vec![];
  let mut ty = &sv.ty;
  loop {
    match ty {
      SolType::Mapping(key, value) => {
        params.push(key.as_ref().clone());
        ty = value;
      }
      SolType::Array(elem, _) => {
        params.push(SolType::uint256());
        ty = elem;
      }
      _ => break,
    }
  }
  let declared: Vec<SolType> = sig.params.iter().map(|p| p.ty.clone()).collect();
  params == declared && (sig.returns.is_empty() || sig.returns == vec![ty.clone()])
}
