#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use num_bigint::BigInt;

use ercsym::modules::ir::{
  BinaryOp, CallSignature, Constant, Contract, ContractKind, EventDecl, EventParam, Function, Instruction, Mutability,
  Node, NodeKind, Operand, Param, Program, Scope, StateVariable, Variable, Visibility,
};
use ercsym::modules::soltype::SolType;
use ercsym::modules::solvers::{Model, SatResult, Solver, SolverError};
use ercsym::modules::term::Term;

pub const TOKEN: &str = "Token";

pub fn ty(s: &str) -> SolType {
  s.parse().unwrap()
}

pub fn param(function: &str, index: usize, name: &str, t: &str) -> Variable {
  Variable::param(function, index, name, ty(t))
}

pub fn tmp(function: &str, name: &str, t: &str) -> Variable {
  Variable::new(name, ty(t), Scope::Temporary { function: function.to_string() })
}

pub fn reference(function: &str, name: &str, t: &str) -> Variable {
  Variable::new(name, ty(t), Scope::Reference { function: function.to_string() })
}

pub fn state(name: &str, t: &str) -> Variable {
  Variable::state(name, ty(t))
}

pub fn var(v: &Variable) -> Operand {
  Operand::Var(v.clone())
}

pub fn int(i: i64) -> Operand {
  Operand::Const(Constant::Int(BigInt::from(i)))
}

pub fn node(id: usize, kind: NodeKind, instructions: Vec<Instruction>, sons: Vec<usize>) -> Node {
  Node { id, kind, instructions, sons, son_true: None, son_false: None, variable: None }
}

pub fn if_node(id: usize, kind: NodeKind, instructions: Vec<Instruction>, son_true: usize, son_false: usize) -> Node {
  Node { id, kind, instructions, sons: vec![son_true, son_false], son_true: Some(son_true), son_false: Some(son_false), variable: None }
}

pub fn entry() -> Node {
  node(0, NodeKind::Entry, vec![], vec![1])
}

pub fn function(name: &str, params: &[(&str, &str)], returns: &[&str], nodes: Vec<Node>) -> Function {
  Function {
    name: name.to_string(),
    params: params.iter().map(|(n, t)| Param { name: n.to_string(), ty: ty(t) }).collect(),
    returns: returns.iter().map(|t| ty(t)).collect(),
    visibility: Visibility::Public,
    mutability: Mutability::Nonpayable,
    is_constructor: false,
    entry: 0,
    nodes,
    source: None,
  }
}

pub fn view(mut f: Function) -> Function {
  f.mutability = Mutability::View;
  f
}

pub fn require(cond: &Variable) -> Instruction {
  Instruction::SolidityCall { function: "require(bool)".to_string(), arguments: vec![var(cond)], lvalue: None }
}

pub fn binary(op: BinaryOp, left: Operand, right: Operand, lvalue: &Variable) -> Instruction {
  Instruction::Binary { op, left, right, lvalue: lvalue.clone(), checked: true }
}

pub fn index(lvalue: &Variable, base: &Variable, key: Operand) -> Instruction {
  Instruction::Index { lvalue: lvalue.clone(), base: base.clone(), key }
}

pub fn assign(lvalue: &Variable, rvalue: Operand) -> Instruction {
  Instruction::Assignment { lvalue: lvalue.clone(), rvalue }
}

pub fn emit(name: &str, arguments: Vec<Operand>) -> Instruction {
  Instruction::EventCall { name: name.to_string(), arguments }
}

pub fn ret(values: Vec<Operand>) -> Instruction {
  Instruction::Return { values }
}

fn balances() -> Variable {
  state("_balances", "mapping(address => uint256)")
}

fn event(name: &str, params: &[(&str, &str, bool)]) -> EventDecl {
  EventDecl {
    name: name.to_string(),
    params: params.iter().map(|(n, t, indexed)| EventParam { name: n.to_string(), ty: ty(t), indexed: *indexed }).collect(),
  }
}

/// `check(uint256 x) { require(x > 0); }`
fn check_fn() -> Function {
  let x = param("check", 0, "x", "uint256");
  let t0 = tmp("check", "TMP_0", "bool");
  function(
    "check",
    &[("x", "uint256")],
    &[],
    vec![entry(), node(1, NodeKind::Expression, vec![binary(BinaryOp::Gt, var(&x), int(0), &t0), require(&t0)], vec![])],
  )
}

fn balance_of_fn() -> Function {
  let owner = param("balanceOf", 0, "owner", "address");
  let r0 = reference("balanceOf", "REF_0", "uint256");
  view(function(
    "balanceOf",
    &[("owner", "address")],
    &["uint256"],
    vec![entry(), node(1, NodeKind::Return, vec![index(&r0, &balances(), var(&owner)), ret(vec![var(&r0)])], vec![])],
  ))
}

fn getter(name: &str, sv: &Variable, returns: &str) -> Function {
  view(function(name, &[], &[returns], vec![entry(), node(1, NodeKind::Return, vec![ret(vec![var(sv)])], vec![])]))
}

fn transfer_fn() -> Function {
  let f = "transfer";
  let to = param(f, 0, "to", "address");
  let amount = param(f, 1, "amount", "uint256");
  let sender = Variable::msg_sender();
  let (r0, r1, r2) = (reference(f, "REF_0", "uint256"), reference(f, "REF_1", "uint256"), reference(f, "REF_2", "uint256"));
  let (t0, t1, t2) = (tmp(f, "TMP_0", "bool"), tmp(f, "TMP_1", "uint256"), tmp(f, "TMP_2", "uint256"));
  let checks = vec![index(&r0, &balances(), var(&sender)), binary(BinaryOp::Ge, var(&r0), var(&amount), &t0), require(&t0)];
  let moves = vec![
    index(&r1, &balances(), var(&sender)),
    binary(BinaryOp::Sub, var(&r1), var(&amount), &t1),
    assign(&r1, var(&t1)),
    index(&r2, &balances(), var(&to)),
    binary(BinaryOp::Add, var(&r2), var(&amount), &t2),
    assign(&r2, var(&t2)),
    emit("Transfer", vec![var(&sender), var(&to), var(&amount)]),
  ];
  function(
    f,
    &[("to", "address"), ("amount", "uint256")],
    &["bool"],
    vec![
      entry(),
      node(1, NodeKind::Expression, checks, vec![2]),
      node(2, NodeKind::Expression, moves, vec![3]),
      node(3, NodeKind::Return, vec![ret(vec![Operand::Const(Constant::Bool(true))])], vec![]),
    ],
  )
}

/// Credits `to` and bumps the supply; `Transfer(0, to, amount)` only when `emits`.
fn mint_fn(name: &str, emits: bool) -> Function {
  let to = param(name, 0, "to", "address");
  let amount = param(name, 1, "amount", "uint256");
  let supply = state("_totalSupply", "uint256");
  let r0 = reference(name, "REF_0", "uint256");
  let (t0, t1) = (tmp(name, "TMP_0", "uint256"), tmp(name, "TMP_1", "uint256"));
  let mut body = vec![
    index(&r0, &balances(), var(&to)),
    binary(BinaryOp::Add, var(&r0), var(&amount), &t0),
    assign(&r0, var(&t0)),
    binary(BinaryOp::Add, var(&supply), var(&amount), &t1),
    assign(&supply, var(&t1)),
  ];
  if emits {
    body.push(emit("Transfer", vec![int(0), var(&to), var(&amount)]));
  }
  function(name, &[("to", "address"), ("amount", "uint256")], &[], vec![entry(), node(1, NodeKind::Expression, body, vec![])])
}

fn set_owner_fn(name: &str, to_sender: bool) -> Function {
  let new_owner = param(name, 0, "newOwner", "address");
  let value = if to_sender { var(&Variable::msg_sender()) } else { var(&new_owner) };
  let owner = state("_owner", "address");
  function(name, &[("newOwner", "address")], &[], vec![entry(), node(1, NodeKind::Expression, vec![assign(&owner, value)], vec![])])
}

/// Calls `onReceived` on `to` only when `to` has code.
fn safe_call_fn() -> Function {
  let f = "safeCall";
  let to = param(f, 0, "to", "address");
  let (size, has_code) = (tmp(f, "TMP_0", "uint256"), tmp(f, "TMP_1", "bool"));
  let guard = vec![
    Instruction::CodeSize { lvalue: size.clone(), value: var(&to) },
    binary(BinaryOp::Gt, var(&size), int(0), &has_code),
    Instruction::Condition { value: var(&has_code) },
  ];
  let call = Instruction::HighLevelCall {
    destination: var(&to),
    function: CallSignature { name: "onReceived".to_string(), params: vec![ty("address")], returns: vec![ty("bytes4")] },
    arguments: vec![var(&Variable::msg_sender())],
    lvalue: None,
  };
  function(
    f,
    &[("to", "address")],
    &[],
    vec![
      entry(),
      if_node(1, NodeKind::If, guard, 2, 3),
      node(2, NodeKind::Expression, vec![call], vec![3]),
      node(3, NodeKind::EndIf, vec![], vec![]),
    ],
  )
}

fn no_call_fn() -> Function {
  let to = param("noCall", 0, "to", "address");
  let owner = state("_owner", "address");
  function("noCall", &[("to", "address")], &[], vec![entry(), node(1, NodeKind::Expression, vec![assign(&owner, var(&to))], vec![])])
}

/// Emits `Id(ids[first])` then `Id(ids[1 - first])`.
fn batch_fn(name: &str, first: i64) -> Function {
  let ids = param(name, 0, "ids", "uint256[]");
  let (r0, r1) = (reference(name, "REF_0", "uint256"), reference(name, "REF_1", "uint256"));
  let body = vec![
    index(&r0, &ids, int(first)),
    emit("Id", vec![var(&r0)]),
    index(&r1, &ids, int(1 - first)),
    emit("Id", vec![var(&r1)]),
  ];
  function(name, &[("ids", "uint256[]")], &[], vec![entry(), node(1, NodeKind::Expression, body, vec![])])
}

fn constructor_fn() -> Function {
  let owner = state("_owner", "address");
  let mut f = function(
    "constructor",
    &[],
    &[],
    vec![entry(), node(1, NodeKind::Expression, vec![assign(&owner, var(&Variable::msg_sender()))], vec![])],
  );
  f.is_constructor = true;
  f
}

pub fn token_contract() -> Contract {
  let sv = |name: &str, t: &str, visibility: Visibility, initializer: Option<Constant>| StateVariable {
    name: name.to_string(),
    ty: ty(t),
    visibility,
    initializer,
  };
  Contract {
    name: TOKEN.to_string(),
    kind: ContractKind::Contract,
    state_variables: vec![
      sv("_balances", "mapping(address => uint256)", Visibility::Private, None),
      sv("_totalSupply", "uint256", Visibility::Private, None),
      sv("_owner", "address", Visibility::Private, None),
      sv("decimals", "uint8", Visibility::Public, Some(Constant::Int(BigInt::from(18)))),
    ],
    functions: vec![
      check_fn(),
      balance_of_fn(),
      getter("totalSupply", &state("_totalSupply", "uint256"), "uint256"),
      getter("owner", &state("_owner", "address"), "address"),
      transfer_fn(),
      mint_fn("mint", true),
      mint_fn("mintSilent", false),
      set_owner_fn("setOwner", false),
      set_owner_fn("setOwnerToSender", true),
      safe_call_fn(),
      no_call_fn(),
      batch_fn("batch", 0),
      batch_fn("batchReversed", 1),
      constructor_fn(),
    ],
    events: vec![
      event("Transfer", &[("from", "address", true), ("to", "address", true), ("value", "uint256", false)]),
      event("Approval", &[("owner", "address", true), ("spender", "address", true), ("value", "uint256", false)]),
      event("Id", &[("id", "uint256", false)]),
    ],
  }
}

pub fn token_program() -> Program {
  Program { contracts: vec![token_contract()] }
}

/// Answers every query with a fixed result and counts the queries.
pub struct MockSolver {
  pub answer: SatResult,
  pub queries: Rc<Cell<usize>>,
}

impl MockSolver {
  pub fn new(answer: SatResult) -> (Self, Rc<Cell<usize>>) {
    let queries = Rc::new(Cell::new(0));
    (MockSolver { answer, queries: queries.clone() }, queries)
  }
}

impl Solver for MockSolver {
  fn check_sat(&mut self, _assertions: &[&Term]) -> Result<SatResult, SolverError> {
    self.queries.set(self.queries.get() + 1);
    Ok(self.answer)
  }

  fn model(&mut self, _assertions: &[&Term], _terms: &[Term]) -> Result<Option<Model>, SolverError> {
    self.queries.set(self.queries.get() + 1);
    Ok(None)
  }
}

/// Propositional stand-in for z3. Comparisons, equalities and boolean symbols
/// are independent atoms (`a <= b` reads as `!(a > b)`), so it answers sat
/// whenever no atom is forced both ways.
pub struct TableauSolver {
  pub queries: Rc<Cell<usize>>,
}

impl TableauSolver {
  pub fn new() -> (Self, Rc<Cell<usize>>) {
    let queries = Rc::new(Cell::new(0));
    (TableauSolver { queries: queries.clone() }, queries)
  }
}

fn atom(t: &Term) -> Term {
  match t {
    Term::Eq(a, b) if format!("{:?}", a) > format!("{:?}", b) => Term::Eq(b.clone(), a.clone()),
    other => other.clone(),
  }
}

fn satisfiable(mut goals: Vec<(Term, bool)>, mut assigned: HashMap<Term, bool>) -> bool {
  while let Some((t, polarity)) = goals.pop() {
    match t {
      Term::Bool(b) => {
        if b != polarity {
          return false;
        }
      }
      Term::Not(inner) => goals.push((*inner, !polarity)),
      Term::Le(a, b) => goals.push((Term::Gt(a, b), !polarity)),
      Term::Ge(a, b) => goals.push((Term::Lt(a, b), !polarity)),
      Term::And(items) if polarity => goals.extend(items.into_iter().map(|i| (i, true))),
      Term::Or(items) if !polarity => goals.extend(items.into_iter().map(|i| (i, false))),
      // one item has to take `polarity`
      Term::And(items) | Term::Or(items) => {
        return items.into_iter().any(|item| {
          let mut branch = goals.clone();
          branch.push((item, polarity));
          satisfiable(branch, assigned.clone())
        });
      }
      other => {
        let key = atom(&other);
        match assigned.get(&key) {
          Some(v) if *v != polarity => return false,
          _ => {
            assigned.insert(key, polarity);
          }
        }
      }
    }
  }
  true
}

impl Solver for TableauSolver {
  fn check_sat(&mut self, assertions: &[&Term]) -> Result<SatResult, SolverError> {
    self.queries.set(self.queries.get() + 1);
    let goals = assertions.iter().map(|t| ((*t).clone(), true)).collect();
    Ok(if satisfiable(goals, HashMap::new()) { SatResult::Sat } else { SatResult::Unsat })
  }

  fn model(&mut self, _assertions: &[&Term], _terms: &[Term]) -> Result<Option<Model>, SolverError> {
    self.queries.set(self.queries.get() + 1);
    Ok(None)
  }
}

/// `_balances[msg.sender] += amount`, optionally followed by a `Transfer`.
pub fn credit_fn(name: &str, emits: bool) -> Function {
  let amount = param(name, 0, "amount", "uint256");
  let sender = Variable::msg_sender();
  let r0 = reference(name, "REF_0", "uint256");
  let t0 = tmp(name, "TMP_0", "uint256");
  let mut body = vec![
    index(&r0, &balances(), var(&sender)),
    binary(BinaryOp::Add, var(&r0), var(&amount), &t0),
    assign(&r0, var(&t0)),
  ];
  if emits {
    body.push(emit("Transfer", vec![var(&sender), var(&sender), var(&amount)]));
  }
  function(name, &[("amount", "uint256")], &[], vec![entry(), node(1, NodeKind::Expression, body, vec![])])
}

/// The token plus `credit` (emits) and `creditSilent` (does not).
pub fn token_program_with_credit() -> Program {
  let mut program = token_program();
  program.contracts[0].functions.push(credit_fn("credit", true));
  program.contracts[0].functions.push(credit_fn("creditSilent", false));
  program
}
