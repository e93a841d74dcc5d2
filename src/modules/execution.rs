use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::modules::constraints::ConstraintLog;
use crate::modules::error::SymError;
use crate::modules::ir::{Constant, Contract, EventId, FnId, NodeId, Operand, Program, Scope, StateVarId, Variable};
use crate::modules::soltype::SolType;
use crate::modules::term::{Sort, Term, Value};

/// Which runtime facts the interpreter records for the running check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tracking {
  pub def_by: bool,
  pub used_in_check: bool,
  pub emit: bool,
  pub emit_args: bool,
  pub sv_write: bool,
  pub sv_write_count: bool,
  pub sv_written_key: bool,
  pub call_args: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
  Running,
  Threw,
  Unsat,
  Finished,
  Error(String),
}

impl ExecStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ExecStatus::Running)
  }
}

/// Next instruction to run: `offset` indexes the instructions of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
  pub function: FnId,
  pub node: NodeId,
  pub offset: usize,
}

impl Location {
  pub fn node_start(function: FnId, node: NodeId) -> Self {
    Location { function, node, offset: 0 }
  }
}

/// Pending internal call.
#[derive(Debug, Clone)]
pub struct Frame {
  pub return_to: Location,
  pub lvalue: Option<Variable>,
}

/// An index reference `lvalue = base[key]`, remembered so that a later write
/// through `lvalue` can be threaded back into `base`.
#[derive(Debug, Clone)]
pub struct IndexedRef {
  pub base: Variable,
  pub base_value: Term,
  pub key: Term,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnSlot {
  Constant(Constant),
  Symbolic(Value),
}

/// One symbolic execution path.
#[derive(Debug, Clone)]
pub struct Execution {
  pub id: usize,
  pub status: ExecStatus,
  pub location: Option<Location>,
  pub entry: FnId,
  pub entry_function: String,
  pub step: usize,
  pub stack: Vec<Frame>,

  pub bindings: HashMap<Variable, Value>,
  pub constraints: ConstraintLog,
  /// Checked after every step; the path dies once they become unsatisfiable.
  pub stop_if_unsat: Vec<Term>,
  /// Collected on the way and added at completion.
  pub deferred: Vec<Term>,
  /// Negated property of the running check.
  pub buggy: Option<Term>,
  pub array_length: Option<usize>,
  pub return_value: Option<ReturnSlot>,
  rw_count: HashMap<Variable, usize>,

  pub aliases: HashMap<Variable, HashSet<Variable>>,
  pub def_by: HashMap<Variable, HashSet<Variable>>,
  pub used_in_check: HashSet<Variable>,
  pub used_in_check_tracked: HashSet<Variable>,
  /// Root variable of every reference created by `Index` or `Member`.
  pub state_refs: HashMap<Variable, Variable>,
  pub indexed: HashMap<Variable, IndexedRef>,

  pub called_functions: BTreeSet<String>,
  pub called_on: BTreeSet<(String, String)>,
  pub call_counts: HashMap<String, usize>,
  pub call_args_tracked: BTreeMap<String, BTreeSet<usize>>,
  pub ret_of_call_tracked: BTreeSet<String>,

  pub sv_tracked: BTreeSet<StateVarId>,
  pub sv_written: BTreeSet<StateVarId>,
  pub sv_write_counts: HashMap<StateVarId, usize>,
  pub sv_key_levels: BTreeMap<StateVarId, BTreeSet<usize>>,

  pub events_tracked: BTreeSet<EventId>,
  pub events_emitted: BTreeSet<EventId>,
  pub emit_counts: HashMap<EventId, usize>,
  pub event_args_tracked: BTreeMap<EventId, BTreeSet<usize>>,

  pub loop_counts: HashMap<(FnId, NodeId), usize>,
}

impl Execution {
  pub fn new(id: usize, entry: FnId, entry_node: NodeId, entry_function: &str) -> Self {
    Execution {
      id,
      status: ExecStatus::Running,
      location: Some(Location::node_start(entry, entry_node)),
      entry,
      entry_function: entry_function.to_string(),
      step: 0,
      stack: vec![],
      bindings: HashMap::new(),
      constraints: ConstraintLog::new(),
      stop_if_unsat: vec![],
      deferred: vec![],
      buggy: None,
      array_length: None,
      return_value: None,
      rw_count: HashMap::new(),
      aliases: HashMap::new(),
      def_by: HashMap::new(),
      used_in_check: HashSet::new(),
      used_in_check_tracked: HashSet::new(),
      state_refs: HashMap::new(),
      indexed: HashMap::new(),
      called_functions: BTreeSet::new(),
      called_on: BTreeSet::new(),
      call_counts: HashMap::new(),
      call_args_tracked: BTreeMap::new(),
      ret_of_call_tracked: BTreeSet::new(),
      sv_tracked: BTreeSet::new(),
      sv_written: BTreeSet::new(),
      sv_write_counts: HashMap::new(),
      sv_key_levels: BTreeMap::new(),
      events_tracked: BTreeSet::new(),
      events_emitted: BTreeSet::new(),
      emit_counts: HashMap::new(),
      event_args_tracked: BTreeMap::new(),
      loop_counts: HashMap::new(),
    }
  }

  /// Independent copy under a new id. The constraint prefix stays shared.
  pub fn fork(&self, id: usize) -> Execution {
    let mut next = self.clone();
    next.id = id;
    next
  }

  pub fn assert(&mut self, term: Term) {
    self.constraints.push(term);
  }

  /// Number of distinct state variables written so far.
  pub fn written_count(&self) -> usize {
    self.sv_written.len()
  }

  /// Solver name of the first definition of `var`.
  pub fn symbol_base(&self, var: &Variable) -> String {
    match &var.scope {
      Scope::Param { function, index } if *function == self.entry_function => format!("p{}", index),
      Scope::State | Scope::Solidity => var.name.clone(),
      _ => format!("{}.{}", var.function().unwrap_or_default(), var.name),
    }
  }

  /// Symbol(s) named `name` for a value of type `ty`; tuple elements get `name_<i>`.
  pub fn symbol_for(name: &str, ty: &SolType) -> Value {
    match ty {
      SolType::Tuple(items) => {
        Value::Tuple(items.iter().enumerate().map(|(i, t)| Execution::symbol_for(&format!("{}_{}", name, i), t)).collect())
      }
      _ => Value::Term(Term::var(name, Sort::of(ty))),
    }
  }

  /// Current value of `var`, created on first use. State variables with a
  /// constant initializer are pinned to it.
  pub fn get_sym(&mut self, var: &Variable, contract: &Contract) -> Value {
    if let Some(v) = self.bindings.get(var) {
      return v.clone();
    }
    let value = Execution::symbol_for(&self.symbol_base(var), &var.ty);
    if var.is_state() {
      if let (Some(init), Value::Term(t)) = (contract.constant_initializer(&var.name), &value) {
        if let Ok(eq) = Term::eq(t.clone(), Term::from_constant(&init)) {
          self.assert(eq);
        }
      }
    }
    self.bindings.insert(var.clone(), value.clone());
    value
  }

  pub fn value_of(&mut self, operand: &Operand, contract: &Contract) -> Value {
    match operand {
      Operand::Const(c) => Value::Term(Term::from_constant(c)),
      Operand::Var(v) => self.get_sym(v, contract),
    }
  }

  pub fn term_of(&mut self, operand: &Operand, contract: &Contract) -> Result<Term, SymError> {
    self.value_of(operand, contract).into_term()
  }

  /// Fresh SSA symbol `<base>!<n>` for a redefinition of `var`.
  pub fn define(&mut self, var: &Variable) -> Value {
    let n = {
      let count = self.rw_count.entry(var.clone()).or_insert(0);
      *count += 1;
      *count
    };
    let value = Execution::symbol_for(&format!("{}!{}", self.symbol_base(var), n), &var.ty);
    self.bindings.insert(var.clone(), value.clone());
    value
  }

  pub fn bind(&mut self, var: &Variable, value: Value) {
    self.bindings.insert(var.clone(), value);
  }

  /// `value >= 0` for unsigned declarations.
  pub fn assume_unsigned(&mut self, value: &Value, ty: &SolType) {
    if !ty.is_unsigned() {
      return;
    }
    if let Value::Term(t) = value {
      if t.sort() == Sort::Int {
        if let Ok(ge) = Term::ge(t.clone(), Term::zero()) {
          self.assert(ge);
        }
      }
    }
  }

  /// Creates the symbols every check refers to: entry parameters, the state
  /// variables the entry function can reach, and the call environment.
  pub fn prepare_essential_vars(&mut self, program: &Program, entry: FnId) {
    let contract = &program.contracts[entry.contract];
    let function = program.function(entry);
    for i in 0..function.params.len() {
      if let Some(param) = function.param_var(i) {
        let value = self.get_sym(&param, contract);
        self.assume_unsigned(&value, &param.ty);
      }
    }

    let mut names = program.state_variables_read(entry);
    names.extend(program.state_variables_written(entry));
    for name in names {
      if let Some((_, sv)) = contract.state_variable(&name) {
        let var = Variable::state(&sv.name, sv.ty.clone());
        let value = self.get_sym(&var, contract);
        self.assume_unsigned(&value, &sv.ty);
      }
    }

    self.get_sym(&Variable::msg_sender(), contract);
    self.get_sym(&Variable::this(), contract);
    let value = Variable::solidity("msg.value", SolType::uint256());
    let sym = self.get_sym(&value, contract);
    self.assume_unsigned(&sym, &value.ty);
  }
}
