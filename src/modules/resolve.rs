use std::collections::BTreeSet;

use crate::modules::error::VerifyError;
use crate::modules::execution::Execution;
use crate::modules::fact::Fact;
use crate::modules::ir::{FnId, Program, StateVarId, Variable};
use crate::modules::selector::{CompOp, Condition, LogicOp, Selector};
use crate::modules::term::{Sort, Term};

/// Per-call context for selector resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'o> {
  /// Event whose parameters `EventParam` refers to.
  pub event: Option<&'o str>,
  /// High-level call whose arguments `FnCallParam` refers to.
  pub fn_call: Option<&'o str>,
  /// Element picked from array-sorted operands.
  pub index_at_arr: Option<usize>,
  /// State variables resolve to their value when the path finished.
  pub post_exec: bool,
}

/// Turns rule selectors and conditions into terms over one execution context.
pub struct Resolver<'a> {
  program: &'a Program,
  contract_idx: usize,
  entry: FnId,
  /// Terms whose declared type is unsigned; the driver asserts `>= 0` on them.
  pub unsigned_terms: Vec<Term>,
  /// `FnCallRet` selectors seen so far.
  pub ret_of_call: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
  pub fn new(program: &'a Program, contract_idx: usize, entry: FnId) -> Self {
    Resolver { program, contract_idx, entry, unsigned_terms: vec![], ret_of_call: BTreeSet::new() }
  }

  fn contract_name(&self) -> String {
    self.program.contracts[self.contract_idx].name.clone()
  }

  pub fn anchored(&self, anchor: &str) -> Result<StateVarId, VerifyError> {
    self
      .program
      .anchored_state_variable(self.contract_idx, anchor)
      .ok_or_else(|| VerifyError::StateVarAnchorFnNotFound { contract: self.contract_name(), anchor: anchor.to_string() })
  }

  /// State variable a `StateVar` selector points at, keys ignored.
  pub fn state_variable(&self, selector: &Selector) -> Result<(StateVarId, Variable), VerifyError> {
    match selector {
      Selector::StateVar { anchor_fn, .. } => {
        let id = self.anchored(anchor_fn)?;
        let sv = self.program.contracts[self.contract_idx].state_var(id);
        Ok((id, Variable::state(&sv.name, sv.ty.clone())))
      }
      other => Err(VerifyError::InvalidSelector(format!("expected a state variable selector, got {:?}", other))),
    }
  }

  /// `None` only for `NoneValue`.
  pub fn selector(
    &mut self,
    ctx: &mut Execution,
    selector: &Selector,
    opts: ResolveOptions,
  ) -> Result<Option<Term>, VerifyError> {
    let program = self.program;
    let contract = &program.contracts[self.contract_idx];
    let term = match selector {
      Selector::NoneValue => return Ok(None),
      Selector::Constant { value } => value.to_term(),
      Selector::MsgSender => ctx.get_sym(&Variable::msg_sender(), contract).into_term()?,
      Selector::FuncParam { index } => {
        let param = self
          .program
          .function(self.entry)
          .param_var(*index)
          .ok_or_else(|| VerifyError::InvalidSelector(format!("no parameter at index {}", index)))?;
        let term = ctx.get_sym(&param, contract).into_term()?;
        if param.ty.is_unsigned() {
          self.unsigned_terms.push(term.clone());
        }
        term
      }
      Selector::EventParam { index } => {
        let event = opts.event.ok_or_else(|| VerifyError::InvalidSelector("event parameter without an event".into()))?;
        let (_, decl) = contract
          .event(event)
          .ok_or_else(|| VerifyError::EventNotFound { contract: contract.name.clone(), event: event.to_string() })?;
        let param = decl
          .params
          .get(*index)
          .ok_or_else(|| VerifyError::InvalidSelector(format!("{} has no parameter {}", event, index)))?;
        let term = Fact::EmittedArg { event: event.to_string(), occurrence: 1, index: *index, sort: Sort::of(&param.ty) }.term();
        if param.ty.is_unsigned() {
          self.unsigned_terms.push(term.clone());
        }
        term
      }
      Selector::FnCallParam { index } => {
        let function =
          opts.fn_call.ok_or_else(|| VerifyError::InvalidSelector("call parameter without a callee".into()))?;
        let ty = self.program.high_level_call(self.entry, function).and_then(|sig| sig.params.get(*index));
        let sort = ty.map(Sort::of).unwrap_or(Sort::Int);
        Fact::CallArg { function: function.to_string(), occurrence: 1, index: *index, sort }.term()
      }
      Selector::FnCallRet { fn_name } => {
        self.ret_of_call.insert(fn_name.clone());
        let sort = self
          .program
          .high_level_call(self.entry, fn_name)
          .and_then(|sig| sig.returns.first())
          .map(Sort::of)
          .unwrap_or(Sort::Int);
        Fact::CallReturn { function: fn_name.clone(), sort }.term()
      }
      Selector::ArrLength { value } => {
        let inner = self
          .selector(ctx, value, opts)?
          .ok_or_else(|| VerifyError::InvalidSelector("length of a none value".into()))?;
        let len = inner.derived("length", Sort::Int);
        self.unsigned_terms.push(len.clone());
        len
      }
      Selector::StateVar { keys, .. } => {
        let (_, var) = self.state_variable(selector)?;
        let mut term = if opts.post_exec {
          Fact::PostExec { var: var.name.clone(), sort: Sort::of(&var.ty) }.term()
        } else {
          ctx.get_sym(&var, contract).into_term()?
        };
        for key in keys {
          let mut key = self
            .selector(ctx, key, ResolveOptions { post_exec: false, ..opts })?
            .ok_or_else(|| VerifyError::InvalidSelector("none value used as a key".into()))?;
          if key.sort().is_array() {
            key = index_at(key, opts.index_at_arr)?;
          }
          term = Term::select(term, key)?;
        }
        if term.sort() == Sort::Int && var.ty.mentions_unsigned() {
          self.unsigned_terms.push(term.clone());
        }
        term
      }
    };
    Ok(Some(term))
  }

  pub fn condition(&mut self, ctx: &mut Execution, cond: &Condition, opts: ResolveOptions) -> Result<Term, VerifyError> {
    match cond {
      Condition::Comparison { left, right, op } => {
        let missing = || VerifyError::InvalidSelector("none value in a comparison".into());
        let mut l = self.selector(ctx, left, opts)?.ok_or_else(missing)?;
        let mut r = self.selector(ctx, right, opts)?.ok_or_else(missing)?;
        if l.sort().is_array() {
          l = index_at(l, opts.index_at_arr)?;
        } else if r.sort().is_array() {
          r = index_at(r, opts.index_at_arr)?;
        }
        Ok(match op {
          CompOp::Eq => Term::eq(l, r)?,
          CompOp::NotEq => Term::ne(l, r)?,
          CompOp::Gt => Term::gt(l, r)?,
          CompOp::Lt => Term::lt(l, r)?,
          CompOp::Gte => Term::ge(l, r)?,
          CompOp::Lte => Term::le(l, r)?,
        })
      }
      Condition::Logic { cond, op } => {
        let terms = cond.iter().map(|c| self.condition(ctx, c, opts)).collect::<Result<Vec<_>, _>>()?;
        Ok(match op {
          LogicOp::And => Term::and(terms),
          LogicOp::Or => Term::or(terms),
        })
      }
      Condition::Written { value, .. } => {
        let (id, var) = self.state_variable(value)?;
        ctx.sv_tracked.insert(id);
        Ok(Fact::Written(var.name).term())
      }
      Condition::UsedInCheck { value } => {
        let var = match value {
          Selector::FuncParam { index } => self
            .program
            .function(self.entry)
            .param_var(*index)
            .ok_or_else(|| VerifyError::InvalidSelector(format!("no parameter at index {}", index)))?,
          Selector::StateVar { .. } => self.state_variable(value)?.1,
          other => return Err(VerifyError::Unsupported(format!("used-in-check on {:?}", other))),
        };
        let fact = Fact::UsedInCheck(ctx.symbol_base(&var));
        ctx.used_in_check_tracked.insert(var);
        Ok(fact.term())
      }
    }
  }
}

fn index_at(arr: Term, index: Option<usize>) -> Result<Term, VerifyError> {
  match index {
    Some(i) => Ok(Term::select(arr, Term::int(i))?),
    None => Err(VerifyError::Unsupported("array operand without a representative length".into())),
  }
}
