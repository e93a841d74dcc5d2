use std::collections::HashSet;

use log::{debug, warn};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::modules::config::VerifierConfig;
use crate::modules::error::SymError;
use crate::modules::execution::{Execution, Frame, IndexedRef, Location, ReturnSlot, Tracking};
use crate::modules::fact::Fact;
use crate::modules::ir::{
  BinaryOp, CallSignature, Constant, Contract, FnId, Function, Instruction, Node, NodeKind, Operand, Program, UnaryOp, Variable,
};
use crate::modules::keccak::keccak256_int;
use crate::modules::term::{Sort, Term, Value};

/// Where a path goes after one node: the next location (none once the path
/// completes), the branch constraint, and whether the edge is a throw.
#[derive(Debug, Clone, PartialEq)]
pub struct Successor {
  pub next: Option<Location>,
  pub constraint: Option<Term>,
  pub threw: bool,
}

impl Successor {
  pub fn goto(next: Location) -> Self {
    Successor { next: Some(next), constraint: None, threw: false }
  }

  pub fn branch(next: Location, constraint: Term) -> Self {
    Successor { next: Some(next), constraint: Some(constraint), threw: false }
  }

  pub fn throw(constraint: Option<Term>) -> Self {
    Successor { next: None, constraint, threw: true }
  }

  pub fn finish() -> Self {
    Successor { next: None, constraint: None, threw: false }
  }
}

/// Executes one CFG node at a time on an execution context.
pub struct Interpreter<'a> {
  pub program: &'a Program,
  pub contract: &'a Contract,
  pub contract_idx: usize,
  pub tracking: Tracking,
  pub config: &'a VerifierConfig,
}

impl<'a> Interpreter<'a> {
  pub fn new(program: &'a Program, contract_idx: usize, tracking: Tracking, config: &'a VerifierConfig) -> Self {
    Interpreter { program, contract: &program.contracts[contract_idx], contract_idx, tracking, config }
  }

  /// Runs the rest of the current node and returns its successors. An empty
  /// result never happens; a terminal successor has `next == None`.
  pub fn step(&self, ctx: &mut Execution) -> Result<Vec<Successor>, SymError> {
    let loc = ctx.location.ok_or_else(|| SymError::Malformed("stepping a completed path".into()))?;
    let function = self.program.function(loc.function);
    let node = function
      .node(loc.node)
      .ok_or_else(|| SymError::Malformed(format!("{} has no node {}", function.name, loc.node)))?;
    ctx.step += 1;
    debug!("[step] path {} at {}:{}+{}", ctx.id, function.name, node.id, loc.offset);

    if node.kind == NodeKind::Throw {
      return Ok(vec![Successor::throw(None)]);
    }
    if node.kind == NodeKind::Variable && loc.offset == 0 {
      if let Some(var) = &node.variable {
        self.declare(ctx, var, node.instructions.is_empty());
      }
    }

    for offset in loc.offset..node.instructions.len() {
      let here = Location { offset, ..loc };
      if let Some(successors) = self.exec(ctx, here, &node.instructions[offset])? {
        return Ok(successors);
      }
    }
    self.leave(ctx, loc, function, node)
  }

  fn declare(&self, ctx: &mut Execution, var: &Variable, uninitialized: bool) {
    let sort = Sort::of(&var.ty);
    match Term::default_of(&sort) {
      Some(default) if uninitialized => ctx.bind(var, Value::Term(default)),
      _ => {
        ctx.define(var);
      }
    }
  }

  fn leave(&self, ctx: &mut Execution, loc: Location, function: &Function, node: &Node) -> Result<Vec<Successor>, SymError> {
    let here = loc.function;
    let branching = node.sons.len() > 1 || (node.son_true.is_some() && node.son_false.is_some());
    if branching {
      let condition = match node.instructions.last() {
        Some(Instruction::Condition { value }) => value,
        _ => {
          // try/catch style fan-out
          let fan_out = node.sons.len() >= 3;
          return Ok(
            node
              .sons
              .iter()
              .filter(|&&s| !(fan_out && function.nodes[s].kind == NodeKind::EndIf))
              .map(|&s| Successor::goto(Location::node_start(here, s)))
              .collect(),
          );
        }
      };

      let cond = Term::truthy(self.condition_term(ctx, condition)?)?;
      if self.tracking.used_in_check && self.leads_to_throw(function, node) {
        self.mark_used_in_check(ctx, condition);
      }

      let (son_true, son_false) = match (node.son_true, node.son_false) {
        (None, None) => (node.sons.first().copied(), node.sons.get(1).copied()),
        edges => edges,
      };
      let mut take_true = true;
      if node.kind == NodeKind::IfLoop {
        let count = ctx.loop_counts.entry((here, node.id)).or_insert(0);
        *count += 1;
        if *count > self.config.loop_bound {
          debug!("[step] path {} leaves loop at {}:{} after {} rounds", ctx.id, function.name, node.id, *count - 1);
          take_true = false;
        }
      }

      let mut out = vec![];
      if let (Some(t), true) = (son_true, take_true) {
        out.push(Successor::branch(Location::node_start(here, t), cond.clone()));
      }
      if let Some(f) = son_false {
        out.push(Successor::branch(Location::node_start(here, f), Term::not(cond)));
      }
      return Ok(out);
    }

    match node.sons.first() {
      Some(&son) => Ok(vec![Successor::goto(Location::node_start(here, son))]),
      None => match ctx.stack.pop() {
        Some(frame) => Ok(vec![Successor::goto(frame.return_to)]),
        None => Ok(vec![Successor::finish()]),
      },
    }
  }

  fn condition_term(&self, ctx: &mut Execution, operand: &Operand) -> Result<Term, SymError> {
    match operand {
      Operand::Const(c) => Ok(Term::from_constant(c)),
      Operand::Var(v) => match ctx.bindings.get(v) {
        Some(value) => value.term().cloned(),
        None => Err(SymError::Unbound(v.name.clone())),
      },
    }
  }

  /// Whether one of the node's successors reverts right away.
  fn leads_to_throw(&self, function: &Function, node: &Node) -> bool {
    let sons = node.sons.iter().chain(node.son_true.iter()).chain(node.son_false.iter());
    sons.filter_map(|&s| function.node(s)).any(|son| {
      son.kind == NodeKind::Throw
        || son.instructions.iter().any(|ins| {
          ins.is_require() || matches!(ins, Instruction::SolidityCall { function, .. } if function.starts_with("revert"))
        })
    })
  }

  /// Marks every variable the check operand depends on.
  fn mark_used_in_check(&self, ctx: &mut Execution, operand: &Operand) {
    let Some(start) = operand.as_var() else {
      return;
    };
    let mut seen = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(var) = stack.pop() {
      if !seen.insert(var.clone()) {
        continue;
      }
      if ctx.used_in_check_tracked.contains(&var) && ctx.used_in_check.insert(var.clone()) {
        let fact = Fact::UsedInCheck(ctx.symbol_base(&var));
        ctx.assert(fact.term());
      }
      for deps in [ctx.def_by.get(&var), ctx.aliases.get(&var)].into_iter().flatten() {
        stack.extend(deps.iter().cloned());
      }
    }
  }

  fn record_def_by<'o>(&self, ctx: &mut Execution, lvalue: &Variable, operands: impl IntoIterator<Item = &'o Operand>) {
    if !self.tracking.def_by {
      return;
    }
    let deps = ctx.def_by.entry(lvalue.clone()).or_default();
    deps.extend(operands.into_iter().filter_map(|op| op.as_var().cloned()));
  }

  fn state_root(&self, ctx: &Execution, var: &Variable) -> Variable {
    ctx.state_refs.get(var).cloned().unwrap_or_else(|| var.clone())
  }

  /// Write bookkeeping for `lvalue`, run before the value is bound.
  fn record_state_write(&self, ctx: &mut Execution, lvalue: &Variable) {
    if !self.tracking.sv_write {
      return;
    }
    let root = self.state_root(ctx, lvalue);
    if !root.is_state() {
      return;
    }
    let Some((id, _)) = self.contract.state_variable(&root.name) else {
      return;
    };
    if ctx.sv_written.insert(id) {
      ctx.assert(Fact::Written(root.name.clone()).term());
    }
    if self.tracking.sv_write_count {
      *ctx.sv_write_counts.entry(id).or_insert(0) += 1;
    }
  }

  fn record_written_keys(&self, ctx: &mut Execution, lvalue: &Variable, keys: &[Term]) -> Result<(), SymError> {
    if !self.tracking.sv_written_key {
      return Ok(());
    }
    let root = self.state_root(ctx, lvalue);
    let Some((id, _)) = self.contract.state_variable(&root.name).filter(|_| root.is_state()) else {
      return Ok(());
    };
    let Some(levels) = ctx.sv_key_levels.get(&id).cloned() else {
      return Ok(());
    };
    let write = ctx.sv_write_counts.get(&id).copied().unwrap_or(0);
    for level in levels {
      if let Some(key) = keys.get(level) {
        let fact = Fact::WrittenKey { var: root.name.clone(), write, level };
        ctx.assert(Term::eq(fact.term(), key.clone())?);
      }
    }
    Ok(())
  }

  /// Binds `lvalue` to `value`. A write through an index reference is stored
  /// back into every enclosing level up to the root variable.
  fn assign(&self, ctx: &mut Execution, lvalue: &Variable, value: Value) -> Result<(), SymError> {
    let Some(link) = ctx.indexed.get(lvalue).cloned() else {
      let value = match value {
        Value::Term(t) => match Term::fit(t, &Sort::of(&lvalue.ty)) {
          Some(t) => Value::Term(t),
          None => ctx.define(lvalue),
        },
        tuple => tuple,
      };
      ctx.bind(lvalue, value);
      return Ok(());
    };

    let value = value.into_term()?;
    let mut keys = vec![link.key.clone()];
    let mut updated = Term::store(link.base_value.clone(), link.key.clone(), value.clone())?;
    ctx.bind(lvalue, Value::Term(value));
    let mut curr = link.base;
    while let Some(outer) = ctx.indexed.get(&curr).cloned() {
      ctx.bind(&curr, Value::Term(updated.clone()));
      keys.push(outer.key.clone());
      updated = Term::store(outer.base_value, outer.key, updated)?;
      curr = outer.base;
    }
    ctx.bind(&curr, Value::Term(updated));
    keys.reverse();
    self.record_written_keys(ctx, lvalue, &keys)
  }

  fn exec(&self, ctx: &mut Execution, loc: Location, ins: &Instruction) -> Result<Option<Vec<Successor>>, SymError> {
    let c = self.contract;
    match ins {
      Instruction::SolidityCall { function, arguments, lvalue } => {
        return self.solidity_call(ctx, loc, function, arguments, lvalue.as_ref());
      }
      Instruction::Assignment { lvalue, rvalue } => {
        self.record_def_by(ctx, lvalue, [rvalue]);
        if let Some(v) = rvalue.as_var() {
          ctx.aliases.entry(lvalue.clone()).or_default().insert(v.clone());
        }
        self.record_state_write(ctx, lvalue);
        let value = ctx.value_of(rvalue, c);
        self.assign(ctx, lvalue, value)?;
      }
      Instruction::TypeConversion { lvalue, variable } => {
        self.record_def_by(ctx, lvalue, [variable]);
        let value = match ctx.value_of(variable, c) {
          Value::Term(t) => match Term::fit(t, &Sort::of(&lvalue.ty)) {
            Some(t) => Value::Term(t),
            None => ctx.define(lvalue),
          },
          tuple => tuple,
        };
        ctx.bind(lvalue, value);
      }
      Instruction::Binary { op, left, right, lvalue, checked } => {
        self.record_def_by(ctx, lvalue, [left, right]);
        let l = ctx.term_of(left, c)?;
        let r = ctx.term_of(right, c)?;
        let expr = match binary(*op, l, r) {
          Ok(Some(t)) => t,
          Ok(None) => ctx.define(lvalue).into_term()?,
          Err(e) => {
            debug!("[step] {:?} left opaque: {}", op, e);
            ctx.define(lvalue).into_term()?
          }
        };
        if *checked {
          ctx.assume_unsigned(&Value::Term(expr.clone()), &lvalue.ty);
        }
        self.record_state_write(ctx, lvalue);
        self.assign(ctx, lvalue, Value::Term(expr))?;
      }
      Instruction::Unary { op, rvalue, lvalue } => {
        self.record_def_by(ctx, lvalue, [rvalue]);
        let value = match op {
          UnaryOp::Not => Term::not(Term::truthy(ctx.term_of(rvalue, c)?)?),
          UnaryOp::Tilde => ctx.define(lvalue).into_term()?,
        };
        self.assign(ctx, lvalue, Value::Term(value))?;
      }
      Instruction::Index { lvalue, base, key } => self.index(ctx, lvalue, base, key)?,
      Instruction::Member { lvalue, base, .. } => {
        if let Some(base) = base.as_var() {
          let root = self.state_root(ctx, base);
          ctx.state_refs.insert(lvalue.clone(), root);
        }
        self.record_def_by(ctx, lvalue, [base]);
        ctx.define(lvalue);
      }
      Instruction::Length { value, lvalue } => {
        if self.tracking.def_by {
          ctx.def_by.entry(lvalue.clone()).or_default().insert(value.clone());
        }
        let arr = ctx.get_sym(value, c).into_term()?;
        let len = arr.derived("length", Sort::Int);
        ctx.assert(Term::ge(len.clone(), Term::zero())?);
        ctx.bind(lvalue, Value::Term(len));
      }
      Instruction::Delete { variable, .. } => {
        self.record_state_write(ctx, variable);
        match Term::default_of(&Sort::of(&variable.ty)) {
          Some(default) => self.assign(ctx, variable, Value::Term(default))?,
          None => {
            ctx.define(variable);
          }
        }
      }
      Instruction::InternalCall { function, arguments, lvalue } => {
        let callee = self
          .program
          .resolve_internal(self.contract_idx, function, arguments.len())
          .ok_or_else(|| SymError::UnresolvedCall(function.clone()))?;
        return self.enter(ctx, loc, callee, arguments, lvalue.as_ref());
      }
      Instruction::LibraryCall { library, function, arguments, lvalue } => {
        let callee = self
          .program
          .resolve_library(library, function, arguments.len())
          .ok_or_else(|| SymError::UnresolvedCall(format!("{}.{}", library, function)))?;
        return self.enter(ctx, loc, callee, arguments, lvalue.as_ref());
      }
      Instruction::HighLevelCall { destination, function, arguments, lvalue } => {
        self.high_level_call(ctx, destination, function, arguments, lvalue.as_ref())?;
      }
      Instruction::LowLevelCall { destination, arguments, lvalue, .. } => {
        let mut deps = vec![destination];
        deps.extend(arguments.iter());
        if let Some(lv) = lvalue {
          self.record_def_by(ctx, lv, deps);
          ctx.define(lv);
        }
      }
      Instruction::Send { lvalue, destination, amount } => {
        if let Some(lv) = lvalue {
          self.record_def_by(ctx, lv, [destination, amount]);
          ctx.define(lv);
        }
      }
      Instruction::Transfer { .. } | Instruction::Condition { .. } => {}
      Instruction::EventCall { name, arguments } => self.emit(ctx, name, arguments)?,
      Instruction::Return { values } => {
        let mut items: Vec<Value> = values.iter().map(|v| ctx.value_of(v, c)).collect();
        let value = match items.len() {
          0 => return Ok(None),
          1 => items.remove(0),
          _ => Value::Tuple(items),
        };
        match ctx.stack.last().cloned() {
          Some(Frame { lvalue: Some(lv), .. }) => {
            self.record_def_by(ctx, &lv, values);
            ctx.bind(&lv, value);
          }
          Some(_) => {}
          None => {
            ctx.return_value = Some(match values.as_slice() {
              [Operand::Const(k)] => ReturnSlot::Constant(k.clone()),
              _ => ReturnSlot::Symbolic(value),
            });
          }
        }
      }
      Instruction::Unpack { lvalue, tuple, index } => {
        if self.tracking.def_by {
          ctx.def_by.entry(lvalue.clone()).or_default().insert(tuple.clone());
        }
        let item = match ctx.get_sym(tuple, c) {
          Value::Tuple(items) => {
            items.get(*index).cloned().ok_or_else(|| SymError::Malformed(format!("{} has no element {}", tuple.name, index)))?
          }
          Value::Term(_) if *index == 0 => ctx.get_sym(tuple, c),
          Value::Term(_) => return Err(SymError::Malformed(format!("{} is not a tuple", tuple.name))),
        };
        ctx.bind(lvalue, item);
      }
      Instruction::NewElementaryType { lvalue } => {
        ctx.define(lvalue);
      }
      Instruction::NewArray { lvalue, arguments } => {
        let arr = ctx.define(lvalue).into_term()?;
        if let Some(len) = arguments.first() {
          let len = ctx.term_of(len, c)?;
          ctx.assert(Term::eq(arr.derived("length", Sort::Int), len)?);
        }
      }
      Instruction::InitArray { lvalue, values } => {
        let mut arr = ctx.define(lvalue).into_term()?;
        for (i, v) in values.iter().enumerate() {
          let v = ctx.term_of(v, c)?;
          arr = Term::store(arr, Term::int(i), v)?;
        }
        ctx.assert(Term::eq(arr.derived("length", Sort::Int), Term::int(values.len()))?);
        ctx.bind(lvalue, Value::Term(arr));
      }
      Instruction::CodeSize { lvalue, value } => {
        let target = ctx.term_of(value, c)?;
        let size = target.derived("code.length", Sort::Int);
        ctx.assert(Term::ge(size.clone(), Term::zero())?);
        ctx.bind(lvalue, Value::Term(size));
      }
      Instruction::Unsupported { description, lvalue } => {
        debug!("[step] unsupported instruction: {}", description);
        if let Some(lv) = lvalue {
          ctx.define(lv);
        }
      }
    }
    Ok(None)
  }

  fn solidity_call(
    &self,
    ctx: &mut Execution,
    loc: Location,
    function: &str,
    arguments: &[Operand],
    lvalue: Option<&Variable>,
  ) -> Result<Option<Vec<Successor>>, SymError> {
    let c = self.contract;
    let name = function.split('(').next().unwrap_or(function);
    match name {
      "require" | "assert" => {
        let operand = arguments.first().ok_or_else(|| SymError::Malformed(format!("{} without argument", name)))?;
        if self.tracking.used_in_check {
          self.mark_used_in_check(ctx, operand);
        }
        let cond = Term::truthy(ctx.term_of(operand, c)?)?;
        if name == "assert" {
          ctx.assert(cond);
          return Ok(None);
        }
        let next = Location { offset: loc.offset + 1, ..loc };
        return Ok(Some(vec![Successor::branch(next, cond.clone()), Successor::throw(Some(Term::not(cond)))]));
      }
      "revert" => return Ok(Some(vec![Successor::throw(None)])),
      "code" | "extcodehash" | "codehash" => {
        if let (Some(lv), Some(target)) = (lvalue, arguments.first()) {
          let target = ctx.term_of(target, c)?;
          let suffix = if name == "code" { "code" } else { "codehash" };
          ctx.bind(lv, Value::Term(target.derived(suffix, Sort::Int)));
          return Ok(None);
        }
      }
      "keccak256" | "sha3" => {
        let literal: Option<Vec<u8>> = match arguments {
          [Operand::Const(Constant::Str(s))] => Some(s.as_bytes().to_vec()),
          _ => None,
        };
        if let (Some(lv), Some(bytes)) = (lvalue, literal) {
          ctx.bind(lv, Value::Term(Term::Int(keccak256_int(&bytes))));
          return Ok(None);
        }
      }
      _ => {}
    }
    if let Some(lv) = lvalue {
      self.record_def_by(ctx, lv, arguments);
      ctx.define(lv);
    }
    Ok(None)
  }

  /// Pushes a frame and jumps to the callee's entry node. Callee parameters
  /// alias the caller's arguments.
  fn enter(
    &self,
    ctx: &mut Execution,
    loc: Location,
    callee: FnId,
    arguments: &[Operand],
    lvalue: Option<&Variable>,
  ) -> Result<Option<Vec<Successor>>, SymError> {
    let f = self.program.function(callee);
    ctx.called_functions.insert(f.name.clone());
    for (i, arg) in arguments.iter().enumerate() {
      let Some(param) = f.param_var(i) else {
        break;
      };
      if let Some(v) = arg.as_var() {
        ctx.aliases.entry(param.clone()).or_default().insert(v.clone());
        if self.tracking.def_by {
          ctx.def_by.entry(param.clone()).or_default().insert(v.clone());
        }
      }
      let value = ctx.value_of(arg, self.contract);
      ctx.bind(&param, value);
    }
    if let Some(lv) = lvalue {
      ctx.define(lv);
    }
    if f.nodes.is_empty() {
      debug!("[step] {} has no body, call skipped", f.name);
      return Ok(None);
    }
    ctx.stack.push(Frame { return_to: Location { offset: loc.offset + 1, ..loc }, lvalue: lvalue.cloned() });
    Ok(Some(vec![Successor::goto(Location::node_start(callee, f.entry))]))
  }

  fn high_level_call(
    &self,
    ctx: &mut Execution,
    destination: &Operand,
    sig: &CallSignature,
    arguments: &[Operand],
    lvalue: Option<&Variable>,
  ) -> Result<(), SymError> {
    let c = self.contract;
    let dest = ctx.term_of(destination, c)?;
    let receiver = dest.name_hint();
    ctx.assert(Fact::Called { receiver: receiver.clone(), function: sig.name.clone() }.term());
    ctx.called_on.insert((receiver, sig.name.clone()));
    ctx.called_functions.insert(sig.name.clone());
    let occurrence = {
      let n = ctx.call_counts.entry(sig.name.clone()).or_insert(0);
      *n += 1;
      *n
    };
    if ctx.ret_of_call_tracked.contains(&sig.name) {
      ctx.assert(Fact::FnCalled(sig.name.clone()).term());
    }

    let sender = ctx.get_sym(&Variable::msg_sender(), c).into_term()?;
    ctx.deferred.push(Term::gt(dest.derived("code.length", Sort::Int), Term::zero())?);
    ctx.deferred.push(Term::ne(dest.clone(), Term::zero())?);
    ctx.deferred.push(Term::ne(dest, sender)?);

    if self.tracking.call_args {
      if let Some(indices) = ctx.call_args_tracked.get(&sig.name).cloned() {
        for index in indices {
          let Some(arg) = arguments.get(index) else {
            warn!("[step] call to {} has no argument {}", sig.name, index);
            continue;
          };
          let value = ctx.term_of(arg, c)?;
          let sort = sig.params.get(index).map(Sort::of).unwrap_or_else(|| value.sort());
          let fact = Fact::CallArg { function: sig.name.clone(), occurrence, index, sort };
          ctx.assert(Term::eq(fact.term(), value)?);
        }
      }
    }

    if let Some(lv) = lvalue {
      let mut deps = vec![destination];
      deps.extend(arguments.iter());
      self.record_def_by(ctx, lv, deps);
      let value = ctx.define(lv);
      if ctx.ret_of_call_tracked.contains(&sig.name) {
        let sort = sig.returns.first().map(Sort::of).unwrap_or(Sort::Int);
        let ret = match &value {
          Value::Tuple(items) => items.first().cloned().map(Value::into_term).transpose()?,
          Value::Term(t) => Some(t.clone()),
        };
        if let Some(ret) = ret {
          let fact = Fact::CallReturn { function: sig.name.clone(), sort };
          ctx.assert(Term::eq(fact.term(), ret)?);
        }
      }
    }
    Ok(())
  }

  fn emit(&self, ctx: &mut Execution, name: &str, arguments: &[Operand]) -> Result<(), SymError> {
    if !self.tracking.emit {
      return Ok(());
    }
    let Some((id, decl)) = self.contract.event(name) else {
      debug!("[step] event {} is not declared in {}", name, self.contract.name);
      return Ok(());
    };
    if ctx.events_emitted.insert(id) {
      ctx.assert(Fact::Emitted(name.to_string()).term());
    }
    let occurrence = {
      let n = ctx.emit_counts.entry(id).or_insert(0);
      *n += 1;
      *n
    };
    if !self.tracking.emit_args {
      return Ok(());
    }
    let Some(indices) = ctx.event_args_tracked.get(&id).cloned() else {
      return Ok(());
    };
    for index in indices {
      let Some(arg) = arguments.get(index) else {
        warn!("[step] {} emitted without argument {}", name, index);
        continue;
      };
      let value = ctx.term_of(arg, self.contract)?;
      let sort = decl.params.get(index).map(|p| Sort::of(&p.ty)).unwrap_or_else(|| value.sort());
      let fact = Fact::EmittedArg { event: name.to_string(), occurrence, index, sort };
      ctx.assert(Term::eq(fact.term(), value)?);
    }
    Ok(())
  }

  fn index(&self, ctx: &mut Execution, lvalue: &Variable, base: &Variable, key: &Operand) -> Result<(), SymError> {
    let c = self.contract;
    if self.tracking.def_by {
      let deps = ctx.def_by.entry(lvalue.clone()).or_default();
      deps.insert(base.clone());
      if let Some(k) = key.as_var() {
        deps.insert(k.clone());
      }
    }
    let root = self.state_root(ctx, base);
    ctx.state_refs.insert(lvalue.clone(), root.clone());

    let arr = ctx.get_sym(base, c).into_term()?;
    let key = ctx.term_of(key, c)?;
    let value = match Term::select(arr.clone(), key.clone()) {
      Ok(v) => v,
      Err(e) => {
        debug!("[step] index into {} left opaque: {}", base.name, e);
        ctx.indexed.remove(lvalue);
        ctx.define(lvalue);
        return Ok(());
      }
    };
    ctx.indexed.insert(lvalue.clone(), IndexedRef { base: base.clone(), base_value: arr, key: key.clone() });

    if root.is_state() {
      let mut keys = vec![key];
      let mut curr = base;
      while let Some(link) = ctx.indexed.get(curr) {
        keys.push(link.key.clone());
        curr = &link.base;
      }
      if keys.len() == root.ty.mapping_keys().len() {
        let outermost = keys.last().cloned().unwrap_or_else(Term::zero);
        if self.config.msg_sender_keyed_vars.contains(&root.name) {
          if let Some(empty) = Term::default_of(&value.sort()) {
            let owner_zero = Term::eq(outermost, Term::zero())?;
            ctx.assert(Term::implies(owner_zero, Term::eq(value.clone(), empty)?));
          }
        }
        if self.config.approval_vars.contains(&root.name) {
          let sender = ctx.get_sym(&Variable::msg_sender(), c).into_term()?;
          ctx.assert(Term::ne(value.clone(), sender)?);
        }
      }
    }

    let value = Value::Term(value);
    ctx.assume_unsigned(&value, &lvalue.ty);
    ctx.bind(lvalue, value);
    Ok(())
  }
}

/// `None` for operators without an integer model.
fn binary(op: BinaryOp, l: Term, r: Term) -> Result<Option<Term>, SymError> {
  let shift = |r: &Term| match r {
    Term::Int(k) => k.to_usize().filter(|k| *k <= 256).map(|k| Term::Int(BigInt::from(1) << k)),
    _ => None,
  };
  Ok(Some(match op {
    BinaryOp::Add => Term::add(l, r)?,
    BinaryOp::Sub => Term::sub(l, r)?,
    BinaryOp::Mul => Term::mul(l, r)?,
    BinaryOp::Div => Term::div(l, r)?,
    BinaryOp::Mod => Term::modulo(l, r)?,
    BinaryOp::Pow => return Term::pow(l, r),
    BinaryOp::Eq => Term::eq(l, r)?,
    BinaryOp::NotEq => Term::ne(l, r)?,
    BinaryOp::Lt => Term::lt(l, r)?,
    BinaryOp::Gt => Term::gt(l, r)?,
    BinaryOp::Le => Term::le(l, r)?,
    BinaryOp::Ge => Term::ge(l, r)?,
    BinaryOp::And => Term::and(vec![Term::truthy(l)?, Term::truthy(r)?]),
    BinaryOp::Or => Term::or(vec![Term::truthy(l)?, Term::truthy(r)?]),
    BinaryOp::Shl => match shift(&r) {
      Some(factor) => Term::mul(l, factor)?,
      None => return Ok(None),
    },
    BinaryOp::Shr => match shift(&r) {
      Some(factor) => Term::div(l, factor)?,
      None => return Ok(None),
    },
    BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => return Ok(None),
  }))
}
