use std::time::Instant;

use log::{debug, info, warn};
use num_traits::ToPrimitive;

use crate::modules::config::VerifierConfig;
use crate::modules::error::{SymError, VerifyError};
use crate::modules::execution::{ExecStatus, Execution, ReturnSlot, Tracking};
use crate::modules::fact::Fact;
use crate::modules::ir::{FnId, Program, Variable};
use crate::modules::keccak::empty_code_hash;
use crate::modules::resolve::{ResolveOptions, Resolver};
use crate::modules::selector::{ChangeType, Condition, Selector};
use crate::modules::solvers::{SatResult, Solver, SolverError, Z3Process};
use crate::modules::stepper::{Interpreter, Successor};
use crate::modules::term::{Sort, Term, Value};
use crate::modules::verify::{
  CallVerify, EmitVerify, OrderTarget, OrderVerify, ReturnVerify, StateAssignVerify, ThrowOp, ThrowVerify,
  VerifyOperation,
};

/// Function a check runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Named { name: String, arity: Option<usize> },
  Function(FnId),
}

impl Target {
  pub fn named(name: &str) -> Self {
    Target::Named { name: name.to_string(), arity: None }
  }
}

/// Decides whether one function complies with one verify operation.
pub trait Verifier {
  /// `Ok(true)` when compliant, `Ok(false)` on a violation.
  fn run(&mut self, contract: &str, target: &Target, op: &VerifyOperation) -> Result<bool, VerifyError>;
}

/// Seeded contexts of a run, before any path is explored.
#[derive(Debug, Clone)]
pub struct Prepared {
  pub contract_idx: usize,
  pub entry: FnId,
  pub tracking: Tracking,
  pub contexts: Vec<Execution>,
  /// `(receiver, callee)` facts closed on paths that never made that call.
  pub expected_calls: Vec<(String, String)>,
  /// The check holds without exploring any path.
  pub vacuous: bool,
}

impl Prepared {
  pub fn buggy(&self) -> Option<&Term> {
    self.contexts.first().and_then(|c| c.buggy.as_ref())
  }
}

pub struct SymbolicVerifier<'p> {
  program: Option<&'p Program>,
  config: VerifierConfig,
  solver: Box<dyn Solver>,
  executions: Vec<Execution>,
}

impl<'p> SymbolicVerifier<'p> {
  pub fn new(config: VerifierConfig) -> Self {
    let solver = Box::new(Z3Process::new(&config.solver.command, config.solver.timeout_ms));
    SymbolicVerifier { program: None, config, solver, executions: vec![] }
  }

  pub fn with_program(mut self, program: &'p Program) -> Self {
    self.program = Some(program);
    self
  }

  pub fn with_solver(mut self, solver: Box<dyn Solver>) -> Self {
    self.solver = solver;
    self
  }

  pub fn config(&self) -> &VerifierConfig {
    &self.config
  }

  /// Every context of the latest run, forks included.
  pub fn executions(&self) -> &[Execution] {
    &self.executions
  }

  fn program(&self) -> Result<&'p Program, VerifyError> {
    self.program.ok_or(VerifyError::CompilationUnitNotSet)
  }

  fn resolve_target(&self, program: &Program, contract_idx: usize, target: &Target) -> Result<FnId, VerifyError> {
    let contract = &program.contracts[contract_idx];
    match target {
      Target::Function(id) if id.contract == contract_idx && id.function < contract.functions.len() => Ok(*id),
      Target::Function(id) => Err(VerifyError::FnNotFound {
        contract: contract.name.clone(),
        function: format!("#{}", id.function),
      }),
      Target::Named { name, arity } => contract
        .function_index(name, *arity)
        .map(|function| FnId { contract: contract_idx, function })
        .ok_or_else(|| VerifyError::FnNotFound { contract: contract.name.clone(), function: name.clone() }),
    }
  }

  fn sat(&mut self, ctx: &Execution, extra: &[Term]) -> Result<bool, SolverError> {
    let result = self.solver.check_sat(&ctx.constraints.with(extra))?;
    if result == SatResult::Unknown {
      warn!("[sym] solver answered unknown on path {}", ctx.id);
    }
    Ok(result == SatResult::Sat)
  }

  /// Seeds the execution contexts of a run: environment axioms, array-length
  /// partitions, tracking registrations, pre-conditions and buggy formulas.
  pub fn prepare(&mut self, contract: &str, target: &Target, op: &VerifyOperation) -> Result<Prepared, VerifyError> {
    let program = self.program()?;
    let contract_idx = program.contract_index(contract).ok_or_else(|| VerifyError::ContractNotFound(contract.into()))?;
    let entry = self.resolve_target(program, contract_idx, target)?;
    let function = program.function(entry);
    let c = &program.contracts[contract_idx];
    info!("[sym] run contract={} function={} check={}", contract, function.name, op.kind());

    let mut base = Execution::new(0, entry, function.entry, &function.name);
    base.prepare_essential_vars(program, entry);
    base.called_functions.insert(function.name.clone());
    let sender = base.get_sym(&Variable::msg_sender(), c).into_term()?;
    let this = base.get_sym(&Variable::this(), c).into_term()?;
    base.assert(Term::ne(sender.clone(), Term::zero())?);
    base.assert(Term::ne(sender, this.clone())?);
    base.assert(Term::ne(this, Term::zero())?);

    let lengths = match op {
      VerifyOperation::ThrowVerify(_) => self.config.throw_array_lengths.clone(),
      _ => self.config.array_lengths.clone(),
    };
    let array_params: Vec<usize> =
      function.params.iter().enumerate().filter(|(_, p)| p.ty.is_array()).map(|(i, _)| i).collect();
    let mut contexts = vec![];
    if array_params.is_empty() {
      contexts.push(base);
    } else {
      for (i, &len) in lengths.iter().enumerate() {
        let mut ctx = base.fork(i);
        ctx.array_length = Some(len);
        for &idx in &array_params {
          if let Some(param) = function.param_var(idx) {
            let arr = ctx.get_sym(&param, c).into_term()?;
            ctx.assert(Term::eq(arr.derived("length", Sort::Int), Term::int(len))?);
          }
        }
        contexts.push(ctx);
      }
      debug!("[sym] {} array-length partitions {:?}", contexts.len(), lengths);
    }

    let mut prepared = Prepared {
      contract_idx,
      entry,
      tracking: op.tracking(),
      contexts: vec![],
      expected_calls: vec![],
      vacuous: false,
    };
    for mut ctx in contexts {
      let mut resolver = Resolver::new(program, contract_idx, entry);
      let opts = ResolveOptions { index_at_arr: ctx.array_length.and_then(|n| n.checked_sub(1)), ..Default::default() };
      let vacuous = match op {
        VerifyOperation::ThrowVerify(v) => self.prepare_throw(&mut resolver, &mut ctx, v, opts)?,
        VerifyOperation::ReturnVerify(v) => self.prepare_return(&mut resolver, &mut ctx, v, opts)?,
        VerifyOperation::CallVerify(v) => {
          prepared.expected_calls = self.prepare_call(&mut resolver, &mut ctx, v, opts)?;
          false
        }
        VerifyOperation::EmitVerify(v) => self.prepare_emit(program, &mut resolver, &mut ctx, v, opts)?,
        VerifyOperation::StateAssignVerify(v) => self.prepare_assign(program, &mut resolver, &mut ctx, v)?,
        VerifyOperation::OrderVerify(v) => self.prepare_order(program, &mut resolver, &mut ctx, v)?,
      };
      if vacuous {
        prepared.vacuous = true;
        return Ok(prepared);
      }
      for t in resolver.unsigned_terms.drain(..) {
        ctx.assert(Term::ge(t, Term::zero())?);
      }
      ctx.ret_of_call_tracked.extend(resolver.ret_of_call.iter().cloned());
      prepared.contexts.push(ctx);
    }
    Ok(prepared)
  }

  fn prepare_throw(
    &self,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &ThrowVerify,
    opts: ResolveOptions,
  ) -> Result<bool, VerifyError> {
    if !matches!(v.cond, Condition::Comparison { .. } | Condition::Logic { .. }) {
      return Err(VerifyError::Unsupported(format!("throw condition {:?}", v.cond)));
    }
    let expr = resolver.condition(ctx, &v.cond, opts)?;
    ctx.stop_if_unsat.push(expr);
    for f in &resolver.ret_of_call {
      ctx.stop_if_unsat.push(Fact::FnCalled(f.clone()).term());
    }
    Ok(false)
  }

  fn prepare_return(
    &self,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &ReturnVerify,
    opts: ResolveOptions,
  ) -> Result<bool, VerifyError> {
    if let Some(cond) = &v.cond {
      let expr = resolver.condition(ctx, cond, opts)?;
      ctx.stop_if_unsat.push(expr);
    }
    Ok(false)
  }

  fn prepare_call(
    &self,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &CallVerify,
    opts: ResolveOptions,
  ) -> Result<Vec<(String, String)>, VerifyError> {
    if v.cond != "is_contract" {
      return Err(VerifyError::Unsupported(format!("call condition {}", v.cond)));
    }
    let on = resolver
      .selector(ctx, &v.on, opts)?
      .ok_or_else(|| VerifyError::InvalidSelector("call receiver is a none value".into()))?;
    let receiver = on.name_hint();
    let callees: Vec<&String> = std::iter::once(&v.callee).chain(v.alternative_callees.iter()).collect();
    let expected: Vec<(String, String)> = callees.iter().map(|f| (receiver.clone(), (*f).clone())).collect();
    let called =
      |(r, f): &(String, String)| Fact::Called { receiver: r.clone(), function: f.clone() };
    let expect = Term::or(expected.iter().map(|e| called(e).term()).collect());
    let not_expect = Term::and(expected.iter().map(|e| called(e).negated()).collect());

    let has_code = Term::gt(on.derived("code.length", Sort::Int), Term::zero())?;
    let codehash = on.derived("codehash", Sort::Int);
    let has_hash = Term::and(vec![
      Term::ne(codehash.clone(), Term::zero())?,
      Term::ne(codehash, Term::Int(empty_code_hash()))?,
    ]);
    let is_contract = Term::or(vec![has_code.clone(), has_hash.clone()]);
    ctx.assert(Term::implies(has_code.clone(), has_hash.clone()));
    ctx.assert(Term::implies(has_hash, has_code));
    ctx.stop_if_unsat.push(Term::ne(on, Term::zero())?);

    let mut buggy = vec![
      Term::and(vec![not_expect, is_contract.clone()]),
      Term::and(vec![expect.clone(), Term::not(is_contract.clone())]),
    ];
    for av in &v.arg_verifiers {
      ctx.call_args_tracked.entry(v.callee.clone()).or_default().insert(av.arg_index);
      let call_opts = ResolveOptions { fn_call: Some(&v.callee), ..opts };
      let arg = resolver
        .selector(ctx, &Selector::FnCallParam { index: av.arg_index }, call_opts)?
        .ok_or_else(|| VerifyError::InvalidSelector("call argument".into()))?;
      if let Some(value) = &av.value {
        if let Some(value) = resolver.selector(ctx, value, call_opts)? {
          buggy.push(Term::and(vec![expect.clone(), is_contract.clone(), Term::ne(arg.clone(), value)?]));
        }
      }
      if let Some(cond) = &av.cond {
        let cond = resolver.condition(ctx, cond, call_opts)?;
        buggy.push(Term::and(vec![expect.clone(), is_contract.clone(), Term::not(cond)]));
      }
    }
    ctx.buggy = Some(Term::or(buggy));
    Ok(expected)
  }

  fn prepare_emit(
    &self,
    program: &Program,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &EmitVerify,
    opts: ResolveOptions,
  ) -> Result<bool, VerifyError> {
    let contract = &program.contracts[ctx.entry.contract];
    if let Some(cond) = &v.cond {
      let expr = resolver.condition(ctx, cond, opts)?;
      ctx.stop_if_unsat.push(expr);
    }

    let events: Vec<&String> = std::iter::once(&v.event).chain(v.alternative_events.iter()).collect();
    for name in &events {
      match contract.event(name) {
        Some((id, _)) => {
          ctx.events_tracked.insert(id);
        }
        None => {
          debug!("[sym] {} never declares {}", contract.name, name);
          ctx.assert(Fact::Emitted((*name).clone()).negated());
        }
      }
    }
    let emitted_any = Term::or(events.iter().map(|e| Fact::Emitted((*e).clone()).term()).collect());
    let emitted_none = Term::and(events.iter().map(|e| Fact::Emitted((*e).clone()).negated()).collect());

    let mut shared = vec![];
    let sv_expr = match &v.sv_cond {
      None => Term::Bool(true),
      Some(sv_cond @ Condition::Written { value, change_type }) => {
        let (id, var) = resolver.state_variable(value)?;
        if !program.state_variables_written(ctx.entry).contains(&var.name) {
          debug!("[sym] {} never writes {}, nothing to check", contract.functions[ctx.entry.function].name, var.name);
          return Ok(true);
        }
        ctx.sv_tracked.insert(id);
        let sv_expr = resolver.condition(ctx, sv_cond, opts)?;

        if *change_type != ChangeType::Unspecified {
          let levels = var.ty.mapping_keys().len();
          if levels == 0 {
            return Err(VerifyError::Unsupported(format!("balance change on non-mapping {}", var.name)));
          }
          let sort = Sort::of(&var.ty);
          let mut post = Fact::PostExec { var: var.name.clone(), sort }.term();
          let mut pre = ctx.get_sym(&var, contract).into_term()?;
          for level in 0..levels {
            ctx.sv_key_levels.entry(id).or_default().insert(level);
            let key = Fact::WrittenKey { var: var.name.clone(), write: 1, level }.term();
            post = Term::select(post, key.clone())?;
            pre = Term::select(pre, key)?;
          }
          shared.push(match change_type {
            ChangeType::TokenCreation => Term::gt(post, pre)?,
            _ => Term::lt(post, pre)?,
          });
          shared.push(Term::eq(Fact::WrittenCount(var.name.clone()).term(), Term::int(1))?);
        }
        sv_expr
      }
      Some(other) => return Err(VerifyError::Unsupported(format!("state condition {:?}", other))),
    };
    let with_shared = |mut parts: Vec<Term>| {
      parts.extend(shared.iter().cloned());
      Term::and(parts)
    };

    let mut buggy = vec![with_shared(vec![sv_expr.clone(), emitted_none])];
    if v.error_if_no_sv_cond && v.sv_cond.is_some() {
      buggy.push(with_shared(vec![Term::not(sv_expr.clone()), emitted_any.clone()]));
      buggy.push(Term::not(sv_expr.clone()));
    }

    if !v.arg_verifiers.is_empty() {
      let (id, _) = contract
        .event(&v.event)
        .ok_or_else(|| VerifyError::EventNotFound { contract: contract.name.clone(), event: v.event.clone() })?;
      let event_opts = ResolveOptions { event: Some(&v.event), ..opts };
      for av in &v.arg_verifiers {
        ctx.event_args_tracked.entry(id).or_default().insert(av.arg_index);
        let arg = resolver
          .selector(ctx, &Selector::EventParam { index: av.arg_index }, event_opts)?
          .ok_or_else(|| VerifyError::InvalidSelector("event argument".into()))?;
        if let Some(value) = &av.value {
          if let Some(value) = resolver.selector(ctx, value, event_opts)? {
            let mismatch = Term::ne(arg.clone(), value)?;
            buggy.push(with_shared(vec![sv_expr.clone(), emitted_any.clone(), mismatch]));
          }
        }
        if let Some(cond) = &av.cond {
          let cond = resolver.condition(ctx, cond, event_opts)?;
          buggy.push(with_shared(vec![sv_expr.clone(), emitted_any.clone(), Term::not(cond)]));
        }
      }
    }
    ctx.buggy = Some(Term::or(buggy));
    Ok(false)
  }

  fn prepare_assign(
    &self,
    program: &Program,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &StateAssignVerify,
  ) -> Result<bool, VerifyError> {
    if v.op != "overwrite" {
      return Err(VerifyError::Unsupported(format!("state assignment op {}", v.op)));
    }
    let contract = &program.contracts[ctx.entry.contract];
    let (id, _) = resolver.state_variable(&v.state)?;
    ctx.sv_tracked.insert(id);
    if let Some(event) = &v.event {
      match contract.event(event) {
        Some((eid, decl)) => {
          ctx.events_tracked.insert(eid);
          ctx.event_args_tracked.insert(eid, (0..decl.params.len()).collect());
        }
        None => ctx.assert(Fact::Emitted(event.clone()).negated()),
      }
    }
    Ok(false)
  }

  fn prepare_order(
    &self,
    program: &Program,
    resolver: &mut Resolver,
    ctx: &mut Execution,
    v: &OrderVerify,
  ) -> Result<bool, VerifyError> {
    let contract = &program.contracts[ctx.entry.contract];
    match &v.target {
      OrderTarget::EventEmit { event, arg_idx } => {
        let (id, _) = contract
          .event(event)
          .ok_or_else(|| VerifyError::EventNotFound { contract: contract.name.clone(), event: event.clone() })?;
        ctx.events_tracked.insert(id);
        ctx.event_args_tracked.entry(id).or_default().insert(*arg_idx);
      }
      OrderTarget::Written { sv, arg_idx } => {
        let (id, _) = resolver.state_variable(sv)?;
        ctx.sv_tracked.insert(id);
        ctx.sv_key_levels.entry(id).or_default().insert(*arg_idx);
      }
    }
    Ok(false)
  }

  /// Runs the worklist until every context is terminal or a budget runs out.
  pub fn explore(&mut self, program: &Program, prepared: Prepared) -> Vec<Execution> {
    let config = self.config.clone();
    let interp = Interpreter::new(program, prepared.contract_idx, prepared.tracking, &config);
    let mut arena = prepared.contexts;
    let mut worklist: Vec<usize> = (0..arena.len()).collect();
    let mut next_id = arena.iter().map(|c| c.id).max().map_or(0, |m| m + 1);
    let started = Instant::now();
    let mut steps = 0;

    while let Some(idx) = worklist.pop() {
      let exhausted = if steps >= config.max_steps {
        Some(format!("{} steps", steps))
      } else if arena.len() > config.max_paths {
        Some(format!("{} paths", arena.len()))
      } else {
        config.time_budget().filter(|b| started.elapsed() > *b).map(|b| format!("{:?}", b))
      };
      if let Some(what) = exhausted {
        warn!("[sym] budget exhausted after {}, {} paths left unexplored", what, worklist.len() + 1);
        for i in std::iter::once(idx).chain(worklist.drain(..)) {
          arena[i].status = ExecStatus::Error(format!("budget exhausted: {}", what));
        }
        break;
      }
      steps += 1;

      match self.advance(&interp, &mut arena, idx, &mut next_id) {
        Ok(running) => worklist.extend(running),
        Err(e) => {
          warn!("[sym] path {} aborted: {}", arena[idx].id, e);
          arena[idx].status = ExecStatus::Error(e.to_string());
          arena[idx].location = None;
        }
      }
    }

    for ctx in &arena {
      debug!("[sym] path {} {:?} len={:?} steps={}", ctx.id, ctx.status, ctx.array_length, ctx.step);
    }
    arena
  }

  /// Steps one context and applies its successors. Returns the arena slots
  /// that are still running.
  fn advance(
    &mut self,
    interp: &Interpreter,
    arena: &mut Vec<Execution>,
    idx: usize,
    next_id: &mut usize,
  ) -> Result<Vec<usize>, SymError> {
    let successors = interp.step(&mut arena[idx])?;
    {
      let ctx = &arena[idx];
      if !ctx.stop_if_unsat.is_empty() && !self.feasible(ctx)? {
        debug!("[sym] path {} can no longer reach the checked condition", ctx.id);
        arena[idx].status = ExecStatus::Unsat;
        arena[idx].location = None;
        return Ok(vec![]);
      }
    }

    let mut slots = vec![idx];
    for _ in 1..successors.len() {
      let forked = arena[idx].fork(*next_id);
      debug!("[sym] forked path {} from {}", next_id, arena[idx].id);
      *next_id += 1;
      arena.push(forked);
      slots.push(arena.len() - 1);
    }

    let mut running = vec![];
    for (slot, successor) in slots.into_iter().zip(successors) {
      if self.apply(&mut arena[slot], successor)? {
        running.push(slot);
      }
    }
    Ok(running)
  }

  fn feasible(&mut self, ctx: &Execution) -> Result<bool, SolverError> {
    let result = self.solver.check_sat(&ctx.constraints.with(&ctx.stop_if_unsat))?;
    Ok(result != SatResult::Unsat)
  }

  fn apply(&mut self, ctx: &mut Execution, successor: Successor) -> Result<bool, SymError> {
    let edge = successor.constraint.is_some();
    if let Some(c) = successor.constraint {
      ctx.assert(c);
    }
    if successor.threw {
      ctx.status = ExecStatus::Threw;
      ctx.location = None;
      ctx.assert(Fact::Threw.term());
      return Ok(false);
    }
    match successor.next {
      None => {
        ctx.status = ExecStatus::Finished;
        ctx.location = None;
        ctx.assert(Fact::Threw.negated());
        Ok(false)
      }
      Some(next) => {
        if edge && !self.feasible(ctx)? {
          ctx.status = ExecStatus::Unsat;
          ctx.location = None;
          return Ok(false);
        }
        ctx.location = Some(next);
        Ok(true)
      }
    }
  }

  /// Closed-world completion of finished paths: every tracked fact that never
  /// happened on a path is asserted false there.
  fn complete(&mut self, program: &Program, prepared_calls: &[(String, String)], tracking: Tracking, contexts: &mut [Execution]) -> Result<(), SymError> {
    for ctx in contexts.iter_mut().filter(|c| c.status == ExecStatus::Finished) {
      let contract = &program.contracts[ctx.entry.contract];
      for id in ctx.sv_tracked.clone() {
        let sv = contract.state_var(id);
        if !ctx.sv_written.contains(&id) {
          ctx.assert(Fact::Written(sv.name.clone()).negated());
        }
        if tracking.sv_write_count {
          let count = ctx.sv_write_counts.get(&id).copied().unwrap_or(0);
          ctx.assert(Term::eq(Fact::WrittenCount(sv.name.clone()).term(), Term::int(count))?);
        }
        let var = Variable::state(&sv.name, sv.ty.clone());
        if let Value::Term(now) = ctx.get_sym(&var, contract) {
          let post = Fact::PostExec { var: sv.name.clone(), sort: Sort::of(&sv.ty) }.term();
          ctx.assert(Term::eq(post, now)?);
        }
      }
      for id in ctx.events_tracked.clone() {
        if !ctx.events_emitted.contains(&id) {
          ctx.assert(Fact::Emitted(contract.event_decl(id).name.clone()).negated());
        }
      }
      for (receiver, function) in prepared_calls {
        if !ctx.called_on.contains(&(receiver.clone(), function.clone())) {
          ctx.assert(Fact::Called { receiver: receiver.clone(), function: function.clone() }.negated());
        }
      }
      for f in ctx.ret_of_call_tracked.clone() {
        if !ctx.called_functions.contains(&f) {
          ctx.assert(Fact::FnCalled(f).negated());
        }
      }
      let unused: Vec<Variable> = ctx.used_in_check_tracked.difference(&ctx.used_in_check).cloned().collect();
      for var in unused {
        ctx.assert(Fact::UsedInCheck(ctx.symbol_base(&var)).negated());
      }
      for t in std::mem::take(&mut ctx.deferred) {
        ctx.assert(t);
      }
      if !ctx.stop_if_unsat.is_empty() && !self.feasible(ctx)? {
        ctx.status = ExecStatus::Unsat;
      }
    }
    Ok(())
  }

  fn judge(
    &mut self,
    program: &Program,
    prepared_entry: FnId,
    op: &VerifyOperation,
    contexts: &mut [Execution],
  ) -> Result<bool, VerifyError> {
    let contract_idx = prepared_entry.contract;
    match op {
      VerifyOperation::ThrowVerify(v) => {
        for ctx in contexts.iter() {
          match (v.op, &ctx.status) {
            (ThrowOp::Throw, ExecStatus::Finished) => {
              let buggy: Vec<Term> = match &ctx.buggy {
                Some(b) => vec![b.clone()],
                None => ctx.stop_if_unsat.clone(),
              };
              if self.sat(ctx, &buggy)? {
                info!("[sym] path {} finished but was expected to throw", ctx.id);
                return Ok(false);
              }
            }
            (ThrowOp::NotThrow, ExecStatus::Threw) => {
              let negated: Vec<Term> = ctx.stop_if_unsat.iter().cloned().map(Term::not).collect();
              if self.sat(ctx, &ctx.stop_if_unsat)? && !self.sat(ctx, &negated)? {
                info!("[sym] path {} threw but was expected not to", ctx.id);
                return Ok(false);
              }
            }
            _ => {}
          }
        }
        if v.op == ThrowOp::NotThrow && !contexts.iter().any(|c| c.status == ExecStatus::Finished) {
          info!("[sym] no path finishes");
          return Ok(false);
        }
        Ok(true)
      }
      VerifyOperation::EmitVerify(v) => {
        for ctx in contexts.iter().filter(|c| c.status == ExecStatus::Finished) {
          if let Some(within) = &v.within_call_fn {
            if !ctx.called_functions.contains(within) {
              continue;
            }
          }
          if let Some(buggy) = &ctx.buggy {
            if self.sat(ctx, std::slice::from_ref(buggy))? {
              info!("[sym] path {} misses the expected {} emission", ctx.id, v.event);
              return Ok(false);
            }
          }
        }
        Ok(true)
      }
      VerifyOperation::CallVerify(_) => {
        for ctx in contexts.iter().filter(|c| c.status == ExecStatus::Finished) {
          if let Some(buggy) = &ctx.buggy {
            if self.sat(ctx, std::slice::from_ref(buggy))? {
              info!("[sym] path {} violates the call check", ctx.id);
              return Ok(false);
            }
          }
        }
        Ok(true)
      }
      VerifyOperation::StateAssignVerify(v) => self.judge_assign(program, contract_idx, prepared_entry, v, contexts),
      VerifyOperation::ReturnVerify(v) => self.judge_return(program, contract_idx, prepared_entry, v, contexts),
      VerifyOperation::OrderVerify(v) => self.judge_order(program, contract_idx, prepared_entry, v, contexts),
    }
  }

  fn judge_assign(
    &mut self,
    program: &Program,
    contract_idx: usize,
    entry: FnId,
    v: &StateAssignVerify,
    contexts: &mut [Execution],
  ) -> Result<bool, VerifyError> {
    let opts = ResolveOptions { event: v.event.as_deref(), ..Default::default() };
    for ctx in contexts.iter_mut().filter(|c| c.status == ExecStatus::Finished) {
      let mut resolver = Resolver::new(program, contract_idx, entry);
      let state = resolver
        .selector(ctx, &v.state, opts)?
        .ok_or_else(|| VerifyError::InvalidSelector("state is a none value".into()))?;
      let expected = match resolver.selector(ctx, &v.value, opts)? {
        Some(t) => t,
        None => Term::default_of(&state.sort())
          .ok_or_else(|| VerifyError::Unsupported("default value of an array slot".into()))?,
      };
      let mut buggy = vec![Term::ne(state, expected)?];
      if let Some(event) = &v.event {
        buggy.push(Fact::Emitted(event.clone()).term());
      }
      if self.sat(ctx, &[Term::and(buggy)])? {
        info!("[sym] path {} leaves the state variable at an unexpected value", ctx.id);
        return Ok(false);
      }
    }
    Ok(true)
  }

  fn judge_return(
    &mut self,
    program: &Program,
    contract_idx: usize,
    entry: FnId,
    v: &ReturnVerify,
    contexts: &mut [Execution],
  ) -> Result<bool, VerifyError> {
    if contexts.is_empty() {
      return Ok(false);
    }
    let mut matched = false;
    for ctx in contexts.iter_mut().filter(|c| c.status == ExecStatus::Finished) {
      let mut resolver = Resolver::new(program, contract_idx, entry);
      let expected = resolver.selector(ctx, &v.ret_val, ResolveOptions::default())?;
      let returned = match &ctx.return_value {
        Some(ReturnSlot::Constant(c)) => Some(Term::from_constant(c)),
        Some(ReturnSlot::Symbolic(value)) => value.term().ok().cloned(),
        None => None,
      };
      let ok = match (returned, expected) {
        (Some(ret), Some(exp)) => match Term::eq(ret, exp)? {
          Term::Bool(b) => b,
          eq => self.sat(ctx, &[eq])?,
        },
        _ => false,
      };
      if !ok {
        debug!("[sym] path {} does not return the expected value", ctx.id);
        if v.at_least_one {
          continue;
        }
        return Ok(false);
      }
      matched = true;
    }
    Ok(!v.at_least_one || matched)
  }

  fn judge_order(
    &mut self,
    program: &Program,
    contract_idx: usize,
    entry: FnId,
    v: &OrderVerify,
    contexts: &mut [Execution],
  ) -> Result<bool, VerifyError> {
    let contract = &program.contracts[contract_idx];
    for ctx in contexts.iter_mut().filter(|c| c.status == ExecStatus::Finished) {
      let mut resolver = Resolver::new(program, contract_idx, entry);
      let ordered = resolver
        .selector(ctx, &v.ordered_by, ResolveOptions::default())?
        .ok_or_else(|| VerifyError::InvalidSelector("ordering array is a none value".into()))?;
      match &v.target {
        OrderTarget::EventEmit { event, arg_idx } => {
          let (id, decl) = contract
            .event(event)
            .ok_or_else(|| VerifyError::EventNotFound { contract: contract.name.clone(), event: event.clone() })?;
          let count = ctx.emit_counts.get(&id).copied().unwrap_or(0);
          if count < 2 {
            continue;
          }
          let sort = decl.params.get(*arg_idx).map(|p| Sort::of(&p.ty)).unwrap_or(Sort::Int);
          let mut mismatches = vec![];
          for occurrence in 1..=count {
            let arg = Fact::EmittedArg { event: event.clone(), occurrence, index: *arg_idx, sort: sort.clone() };
            let expected = Term::select(ordered.clone(), Term::int(occurrence - 1))?;
            mismatches.push(Term::ne(arg.term(), expected)?);
          }
          if self.sat(ctx, &[Term::or(mismatches)])? {
            info!("[sym] path {} emits {} out of order", ctx.id, event);
            return Ok(false);
          }
        }
        OrderTarget::Written { sv, arg_idx } => {
          let (id, var) = resolver.state_variable(sv)?;
          let count = ctx.sv_write_counts.get(&id).copied().unwrap_or(0);
          if !ctx.sv_written.contains(&id) || count < 2 {
            continue;
          }
          let len_term = ordered.derived("length", Sort::Int);
          let model = self.solver.model(&ctx.constraints.terms(), std::slice::from_ref(&len_term))?;
          let len = model
            .and_then(|m| m.int(&len_term))
            .and_then(|n| n.to_usize())
            .ok_or_else(|| VerifyError::Unsupported(format!("length of {} has no model value", len_term.name_hint())))?;
          for i in 0..len {
            let written = Fact::WrittenKey { var: var.name.clone(), write: (i + 1) * 2, level: *arg_idx }.term();
            let expected = Term::select(ordered.clone(), Term::int(i))?;
            if self.sat(ctx, &[Term::ne(written, expected)?])? {
              info!("[sym] path {} writes {} out of order", ctx.id, var.name);
              return Ok(false);
            }
          }
        }
      }
    }
    Ok(true)
  }
}

impl<'p> Verifier for SymbolicVerifier<'p> {
  fn run(&mut self, contract: &str, target: &Target, op: &VerifyOperation) -> Result<bool, VerifyError> {
    self.executions.clear();
    let program = self.program()?;
    let prepared = self.prepare(contract, target, op)?;
    if prepared.vacuous {
      info!("[sym] {} holds vacuously", op.kind());
      return Ok(true);
    }
    let entry = prepared.entry;
    let tracking = prepared.tracking;
    let expected_calls = prepared.expected_calls.clone();

    let mut contexts = self.explore(program, prepared);
    self.complete(program, &expected_calls, tracking, &mut contexts)?;
    let verdict = self.judge(program, entry, op, &mut contexts);
    self.executions = contexts;
    let verdict = verdict?;
    info!("[sym] {} on {} -> {}", op.kind(), program.function(entry).name, if verdict { "ok" } else { "violation" });
    Ok(verdict)
  }
}
