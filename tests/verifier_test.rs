mod common;

use common::{token_program, token_program_with_credit, MockSolver, TableauSolver, TOKEN};
use ercsym::modules::config::VerifierConfig;
use ercsym::modules::error::VerifyError;
use ercsym::modules::execution::ExecStatus;
use ercsym::modules::ir::Program;
use ercsym::modules::selector::{ChangeType, CompOp, Condition, ConstantValue, Selector};
use ercsym::modules::solvers::{z3_available, SatResult};
use ercsym::modules::verifier::{SymbolicVerifier, Target, Verifier};
use ercsym::modules::verify::{
  CallVerify, EmitVerify, OrderTarget, OrderVerify, ReturnVerify, StateAssignVerify, ThrowOp, ThrowVerify,
  VerifyOperation,
};

fn x_compared_to_zero(op: CompOp) -> Condition {
  Condition::Comparison {
    left: Selector::FuncParam { index: 0 },
    right: Selector::Constant { value: ConstantValue::int(0) },
    op,
  }
}

fn throw_if(op: CompOp, throw_op: ThrowOp) -> VerifyOperation {
  VerifyOperation::ThrowVerify(ThrowVerify { cond: x_compared_to_zero(op), op: throw_op })
}

fn balances_written(change_type: ChangeType) -> Condition {
  Condition::Written { value: Selector::StateVar { anchor_fn: "balanceOf".to_string(), keys: vec![] }, change_type }
}

fn transfer_on_mint() -> VerifyOperation {
  VerifyOperation::EmitVerify(EmitVerify {
    event: "Transfer".to_string(),
    sv_cond: Some(balances_written(ChangeType::TokenCreation)),
    alternative_events: vec![],
    cond: None,
    within_call_fn: None,
    error_if_no_sv_cond: false,
    arg_verifiers: vec![],
  })
}

fn transfer_on_balance_change() -> VerifyOperation {
  VerifyOperation::EmitVerify(EmitVerify {
    event: "Transfer".to_string(),
    sv_cond: Some(balances_written(ChangeType::Unspecified)),
    alternative_events: vec![],
    cond: None,
    within_call_fn: None,
    error_if_no_sv_cond: false,
    arg_verifiers: vec![],
  })
}

fn owner_is(value: Selector) -> VerifyOperation {
  VerifyOperation::StateAssignVerify(StateAssignVerify {
    state: Selector::StateVar { anchor_fn: "owner".to_string(), keys: vec![] },
    value,
    op: "overwrite".to_string(),
    event: None,
  })
}

fn ids_order() -> VerifyOperation {
  VerifyOperation::OrderVerify(OrderVerify {
    target: OrderTarget::EventEmit { event: "Id".to_string(), arg_idx: 0 },
    ordered_by: Selector::FuncParam { index: 0 },
  })
}

fn on_received() -> VerifyOperation {
  VerifyOperation::CallVerify(CallVerify {
    callee: "onReceived".to_string(),
    on: Selector::FuncParam { index: 0 },
    cond: "is_contract".to_string(),
    arg_verifiers: vec![],
    alternative_callees: vec![],
  })
}

fn mocked(answer: SatResult) -> (SymbolicVerifier<'static>, std::rc::Rc<std::cell::Cell<usize>>) {
  let (solver, queries) = MockSolver::new(answer);
  (SymbolicVerifier::new(VerifierConfig::default()).with_solver(Box::new(solver)), queries)
}

fn tableau(program: &Program) -> SymbolicVerifier<'_> {
  let (solver, _) = TableauSolver::new();
  SymbolicVerifier::new(VerifierConfig::default()).with_solver(Box::new(solver)).with_program(program)
}

/// `(function, check, expected verdict)` rows shared by the stand-in and z3.
fn verdict_table() -> Vec<(&'static str, VerifyOperation, bool)> {
  vec![
    ("check", throw_if(CompOp::Lte, ThrowOp::Throw), true),
    ("check", throw_if(CompOp::Gt, ThrowOp::Throw), false),
    ("check", throw_if(CompOp::Lte, ThrowOp::NotThrow), false),
    ("check", throw_if(CompOp::Gt, ThrowOp::NotThrow), true),
    ("mint", transfer_on_mint(), true),
    ("mintSilent", transfer_on_mint(), false),
    ("credit", transfer_on_balance_change(), true),
    ("creditSilent", transfer_on_balance_change(), false),
    ("setOwner", owner_is(Selector::FuncParam { index: 0 }), true),
    ("setOwnerToSender", owner_is(Selector::FuncParam { index: 0 }), false),
    ("safeCall", on_received(), true),
    ("noCall", on_received(), false),
    ("batch", ids_order(), true),
    ("batchReversed", ids_order(), false),
  ]
}

#[test]
fn test_throw_and_not_throw_are_dual() {
  let program = token_program();
  let mut v = tableau(&program);
  let check = Target::named("check");

  assert!(v.run(TOKEN, &check, &throw_if(CompOp::Lte, ThrowOp::Throw)).unwrap());
  assert!(!v.run(TOKEN, &check, &throw_if(CompOp::Gt, ThrowOp::Throw)).unwrap());
  assert!(!v.run(TOKEN, &check, &throw_if(CompOp::Lte, ThrowOp::NotThrow)).unwrap());
  assert!(v.run(TOKEN, &check, &throw_if(CompOp::Gt, ThrowOp::NotThrow)).unwrap());
}

#[test]
fn test_throw_paths_are_recorded() {
  let program = token_program();
  let mut v = tableau(&program);
  v.run(TOKEN, &Target::named("check"), &throw_if(CompOp::Gt, ThrowOp::Throw)).unwrap();

  let statuses: Vec<&ExecStatus> = v.executions().iter().map(|c| &c.status).collect();
  assert_eq!(statuses.len(), 2);
  assert!(statuses.contains(&&ExecStatus::Threw));
  assert!(statuses.contains(&&ExecStatus::Finished));
}

#[test]
fn test_mint_without_transfer_event_is_a_violation() {
  let program = token_program();
  let mut v = tableau(&program);
  assert!(v.run(TOKEN, &Target::named("mint"), &transfer_on_mint()).unwrap());
  assert!(!v.run(TOKEN, &Target::named("mintSilent"), &transfer_on_mint()).unwrap());
}

#[test]
fn test_balance_change_must_emit_transfer() {
  let program = token_program_with_credit();
  let mut v = tableau(&program);
  assert!(v.run(TOKEN, &Target::named("credit"), &transfer_on_balance_change()).unwrap());
  assert!(!v.run(TOKEN, &Target::named("creditSilent"), &transfer_on_balance_change()).unwrap());
  assert!(v.executions().iter().all(|c| c.status == ExecStatus::Finished));
}

#[test]
fn test_owner_assignment() {
  let program = token_program();
  let mut v = tableau(&program);
  let expected = owner_is(Selector::FuncParam { index: 0 });
  assert!(v.run(TOKEN, &Target::named("setOwner"), &expected).unwrap());
  assert!(!v.run(TOKEN, &Target::named("setOwnerToSender"), &expected).unwrap());
}

#[test]
fn test_call_on_contract_receiver() {
  let program = token_program();
  let mut v = tableau(&program);
  assert!(v.run(TOKEN, &Target::named("safeCall"), &on_received()).unwrap());
  assert!(!v.run(TOKEN, &Target::named("noCall"), &on_received()).unwrap());
}

#[test]
fn test_emission_order_follows_array() {
  let program = token_program();
  let mut v = tableau(&program);
  assert!(v.run(TOKEN, &Target::named("batch"), &ids_order()).unwrap());
  assert!(!v.run(TOKEN, &Target::named("batchReversed"), &ids_order()).unwrap());
}

#[test]
fn test_verdict_follows_the_solver() {
  let program = token_program();
  for (answer, verdict) in [(SatResult::Sat, false), (SatResult::Unsat, true)] {
    let (solver, queries) = MockSolver::new(answer);
    let mut v = SymbolicVerifier::new(VerifierConfig::default()).with_solver(Box::new(solver)).with_program(&program);
    assert_eq!(v.run(TOKEN, &Target::named("mint"), &transfer_on_mint()).unwrap(), verdict);
    assert!(queries.get() >= 1);
  }
}

#[test]
fn test_verdicts_are_deterministic() {
  let program = token_program_with_credit();
  let mut v = tableau(&program);
  for (function, op, _) in verdict_table() {
    let first = v.run(TOKEN, &Target::named(function), &op).unwrap();
    let second = v.run(TOKEN, &Target::named(function), &op).unwrap();
    assert_eq!(first, second, "{}", function);
  }
}

#[test]
#[ignore = "needs z3 on PATH"]
fn test_verdicts_with_z3() {
  assert!(z3_available("z3"), "z3 not found");
  let program = token_program_with_credit();
  let mut v = SymbolicVerifier::new(VerifierConfig::default()).with_program(&program);
  for (function, op, expected) in verdict_table() {
    assert_eq!(v.run(TOKEN, &Target::named(function), &op).unwrap(), expected, "{} / {}", function, op.kind());
  }
}

#[test]
fn test_return_of_getter_needs_no_solver() {
  let program = token_program();
  let (v, queries) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let op = VerifyOperation::ReturnVerify(ReturnVerify {
    ret_val: Selector::StateVar { anchor_fn: "totalSupply".to_string(), keys: vec![] },
    cond: None,
    at_least_one: true,
  });
  assert!(v.run(TOKEN, &Target::named("totalSupply"), &op).unwrap());
  assert_eq!(queries.get(), 0);
}

#[test]
fn test_array_parameters_fork_per_length() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let target = Target::named("batch");

  let throw = VerifyOperation::ThrowVerify(ThrowVerify {
    cond: Condition::Comparison {
      left: Selector::ArrLength { value: Box::new(Selector::FuncParam { index: 0 }) },
      right: Selector::Constant { value: ConstantValue::int(1) },
      op: CompOp::Gt,
    },
    op: ThrowOp::Throw,
  });
  let prepared = v.prepare(TOKEN, &target, &throw).unwrap();
  let lengths: Vec<Option<usize>> = prepared.contexts.iter().map(|c| c.array_length).collect();
  assert_eq!(lengths, vec![Some(1), Some(2)]);

  let prepared = v.prepare(TOKEN, &target, &ids_order()).unwrap();
  let ids: Vec<usize> = prepared.contexts.iter().map(|c| c.id).collect();
  let lengths: Vec<Option<usize>> = prepared.contexts.iter().map(|c| c.array_length).collect();
  assert_eq!(ids, vec![0, 1, 2]);
  assert_eq!(lengths, vec![Some(0), Some(1), Some(2)]);
}

#[test]
fn test_emit_check_is_vacuous_without_write() {
  let program = token_program();
  let (v, queries) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  assert!(v.run(TOKEN, &Target::named("check"), &transfer_on_mint()).unwrap());
  assert_eq!(queries.get(), 0);
  assert!(v.executions().is_empty());
}

#[test]
fn test_call_check_builds_buggy_formula() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let prepared = v.prepare(TOKEN, &Target::named("safeCall"), &on_received()).unwrap();
  assert_eq!(prepared.expected_calls, vec![("p0".to_string(), "onReceived".to_string())]);
  assert!(prepared.buggy().is_some());
}

#[test]
fn test_missing_function() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let err = v.run(TOKEN, &Target::named("burn"), &transfer_on_mint()).unwrap_err();
  assert!(matches!(err, VerifyError::FnNotFound { .. }));
}

#[test]
fn test_missing_contract() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let err = v.run("Vault", &Target::named("mint"), &transfer_on_mint()).unwrap_err();
  assert!(matches!(err, VerifyError::ContractNotFound(_)));
}

#[test]
fn test_anchor_without_state_variable() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let op = VerifyOperation::StateAssignVerify(StateAssignVerify {
    state: Selector::StateVar { anchor_fn: "allowance".to_string(), keys: vec![] },
    value: Selector::NoneValue,
    op: "overwrite".to_string(),
    event: None,
  });
  let err = v.run(TOKEN, &Target::named("setOwner"), &op).unwrap_err();
  assert!(matches!(err, VerifyError::StateVarAnchorFnNotFound { .. }));
}

#[test]
fn test_unsupported_assignment_op() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let mut op = owner_is(Selector::FuncParam { index: 0 });
  if let VerifyOperation::StateAssignVerify(inner) = &mut op {
    inner.op = "add".to_string();
  }
  let err = v.run(TOKEN, &Target::named("setOwner"), &op).unwrap_err();
  assert!(matches!(err, VerifyError::Unsupported(_)));
}

#[test]
fn test_throw_needs_a_comparison() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Sat);
  let mut v = v.with_program(&program);
  let op = VerifyOperation::ThrowVerify(ThrowVerify { cond: balances_written(ChangeType::Unspecified), op: ThrowOp::Throw });
  let err = v.run(TOKEN, &Target::named("mint"), &op).unwrap_err();
  assert!(matches!(err, VerifyError::Unsupported(_)));
}

#[test]
fn test_run_without_program() {
  let (mut v, _) = mocked(SatResult::Sat);
  let err = v.run(TOKEN, &Target::named("mint"), &transfer_on_mint()).unwrap_err();
  assert!(matches!(err, VerifyError::CompilationUnitNotSet));
}

#[test]
fn test_step_budget_marks_paths() {
  let program = token_program();
  let (solver, _) = MockSolver::new(SatResult::Sat);
  let config = VerifierConfig { max_steps: 1, ..Default::default() };
  let mut v = SymbolicVerifier::new(config).with_solver(Box::new(solver)).with_program(&program);

  assert!(v.run(TOKEN, &Target::named("check"), &throw_if(CompOp::Lte, ThrowOp::Throw)).unwrap());
  let ctx = &v.executions()[0];
  match &ctx.status {
    ExecStatus::Error(msg) => assert!(msg.starts_with("budget exhausted")),
    other => panic!("unexpected status {:?}", other),
  }
}

#[test]
fn test_unsat_edges_prune_paths() {
  let program = token_program();
  let (v, _) = mocked(SatResult::Unsat);
  let mut v = v.with_program(&program);
  assert!(v.run(TOKEN, &Target::named("check"), &throw_if(CompOp::Gt, ThrowOp::Throw)).unwrap());
  assert!(v.executions().iter().all(|c| c.status == ExecStatus::Unsat));
}
