mod common;

use common::{token_program, TOKEN};
use ercsym::modules::config::VerifierConfig;
use ercsym::modules::execution::{Execution, Location, Tracking};
use ercsym::modules::fact::Fact;
use ercsym::modules::ir::{FnId, NodeKind, Program, Variable};
use ercsym::modules::stepper::Interpreter;
use ercsym::modules::term::{Sort, Term, Value};

fn start(program: &Program, name: &str) -> Execution {
  let contract = program.contract_index(TOKEN).unwrap();
  let function = program.contracts[contract].function_index(name, None).unwrap();
  let id = FnId { contract, function };
  let mut ctx = Execution::new(0, id, program.function(id).entry, name);
  ctx.prepare_essential_vars(program, id);
  ctx
}

#[test]
fn test_require_splits_into_branch_and_throw() {
  let program = token_program();
  let config = VerifierConfig::default();
  let interp = Interpreter::new(&program, 0, Tracking::default(), &config);
  let mut ctx = start(&program, "check");

  let succ = interp.step(&mut ctx).unwrap();
  assert_eq!(succ.len(), 1);
  assert!(succ[0].constraint.is_none());
  ctx.location = succ[0].next;

  let succ = interp.step(&mut ctx).unwrap();
  assert_eq!(succ.len(), 2);
  let p0 = Term::var("p0", Sort::Int);
  let positive = Term::gt(p0, Term::zero()).unwrap();
  assert_eq!(succ[0].constraint, Some(positive.clone()));
  assert!(!succ[0].threw);
  assert_eq!(succ[0].next.map(|l| l.offset), Some(2));
  assert!(succ[1].threw);
  assert_eq!(succ[1].constraint, Some(Term::not(positive)));
}

#[test]
fn test_mapping_write_is_stored_back() {
  let program = token_program();
  let config = VerifierConfig::default();
  let tracking = Tracking { sv_write: true, sv_write_count: true, sv_written_key: true, ..Default::default() };
  let interp = Interpreter::new(&program, 0, tracking, &config);
  let mut ctx = start(&program, "mint");
  let balances = program.contracts[0].state_variable("_balances").map(|(id, _)| id).unwrap();
  ctx.sv_key_levels.entry(balances).or_default().insert(0);

  ctx.location = interp.step(&mut ctx).unwrap()[0].next;
  let succ = interp.step(&mut ctx).unwrap();
  assert_eq!(succ.len(), 1);
  assert!(succ[0].next.is_none());

  let var = Variable::state("_balances", "mapping(address => uint256)".parse().unwrap());
  assert!(matches!(ctx.bindings.get(&var), Some(Value::Term(Term::Store(..)))));
  assert!(ctx.sv_written.contains(&balances));
  assert_eq!(ctx.sv_write_counts.get(&balances), Some(&1));

  let key = Fact::WrittenKey { var: "_balances".to_string(), write: 1, level: 0 }.term();
  let pinned = Term::eq(key, Term::var("p0", Sort::Int)).unwrap();
  assert!(ctx.constraints.terms().contains(&&pinned));
  assert!(ctx.constraints.terms().contains(&&Fact::Written("_balances".to_string()).term()));
}

#[test]
fn test_untracked_emission_is_ignored() {
  let program = token_program();
  let config = VerifierConfig::default();
  let interp = Interpreter::new(&program, 0, Tracking::default(), &config);
  let mut ctx = start(&program, "mint");
  ctx.location = interp.step(&mut ctx).unwrap()[0].next;
  interp.step(&mut ctx).unwrap();
  assert!(ctx.events_emitted.is_empty());
  assert!(ctx.sv_written.is_empty());
}

#[test]
fn test_emitted_arguments_are_recorded() {
  let program = token_program();
  let config = VerifierConfig::default();
  let tracking = Tracking { emit: true, emit_args: true, ..Default::default() };
  let interp = Interpreter::new(&program, 0, tracking, &config);
  let mut ctx = start(&program, "batch");
  let (id, _) = program.contracts[0].event("Id").unwrap();
  ctx.event_args_tracked.entry(id).or_default().insert(0);

  ctx.location = interp.step(&mut ctx).unwrap()[0].next;
  interp.step(&mut ctx).unwrap();
  assert_eq!(ctx.emit_counts.get(&id), Some(&2));

  let ids = Term::var("p0", Sort::array(Sort::Int, Sort::Int));
  for (occurrence, slot) in [(1usize, 0i64), (2, 1)] {
    let arg = Fact::EmittedArg { event: "Id".to_string(), occurrence, index: 0, sort: Sort::Int }.term();
    let expected = Term::eq(arg, Term::select(ids.clone(), Term::int(slot)).unwrap()).unwrap();
    assert!(ctx.constraints.terms().contains(&&expected));
  }
}

#[test]
fn test_high_level_call_defers_receiver_facts() {
  let program = token_program();
  let config = VerifierConfig::default();
  let interp = Interpreter::new(&program, 0, Tracking::default(), &config);
  let mut ctx = start(&program, "safeCall");

  ctx.location = interp.step(&mut ctx).unwrap()[0].next;
  let succ = interp.step(&mut ctx).unwrap();
  assert_eq!(succ.len(), 2);
  let has_code = Term::gt(Term::var("p0.code.length", Sort::Int), Term::zero()).unwrap();
  assert_eq!(succ[0].constraint, Some(has_code.clone()));
  assert_eq!(succ[1].constraint, Some(Term::not(has_code)));

  ctx.location = succ[0].next;
  interp.step(&mut ctx).unwrap();
  assert!(ctx.called_on.contains(&("p0".to_string(), "onReceived".to_string())));
  assert_eq!(ctx.deferred.len(), 3);
}

#[test]
fn test_loop_head_respects_bound() {
  let mut program = token_program();
  let f = program.contracts[0].function_index("safeCall", None).unwrap();
  program.contracts[0].functions[f].nodes[1].kind = NodeKind::IfLoop;
  let config = VerifierConfig { loop_bound: 1, ..Default::default() };
  let interp = Interpreter::new(&program, 0, Tracking::default(), &config);
  let mut ctx = start(&program, "safeCall");
  let head = Location::node_start(FnId { contract: 0, function: f }, 1);

  ctx.location = Some(head);
  assert_eq!(interp.step(&mut ctx).unwrap().len(), 2);
  ctx.location = Some(head);
  let succ = interp.step(&mut ctx).unwrap();
  assert_eq!(succ.len(), 1);
  assert_eq!(succ[0].next.map(|l| l.node), Some(3));
}

#[test]
fn test_redefinitions_get_fresh_names() {
  let program = token_program();
  let mut ctx = start(&program, "check");
  let x = Variable::new(
    "counter",
    "uint256".parse().unwrap(),
    ercsym::modules::ir::Scope::Local { function: "check".to_string() },
  );
  assert_eq!(ctx.define(&x), Value::Term(Term::var("check.counter!1", Sort::Int)));
  assert_eq!(ctx.define(&x), Value::Term(Term::var("check.counter!2", Sort::Int)));

  let p = program.function(ctx.entry).param_var(0).unwrap();
  assert_eq!(ctx.symbol_base(&p), "p0");
}

#[test]
fn test_fork_shares_constraint_prefix() {
  let program = token_program();
  let ctx = start(&program, "check");
  let mut other = ctx.fork(7);
  assert_eq!(other.id, 7);
  assert!(other.constraints.shares_head_with(&ctx.constraints));
  other.assert(Term::var("flag", Sort::Bool));
  assert!(!other.constraints.shares_head_with(&ctx.constraints));
  assert_eq!(other.constraints.len(), ctx.constraints.len() + 1);
}

#[test]
fn test_anchor_resolution_is_stable() {
  use ercsym::modules::resolve::{ResolveOptions, Resolver};
  use ercsym::modules::selector::Selector;

  let program = token_program();
  let mut ctx = start(&program, "mint");
  let mut resolver = Resolver::new(&program, 0, ctx.entry);
  let selector = Selector::StateVar { anchor_fn: "balanceOf".to_string(), keys: vec![Selector::MsgSender] };
  let bound = ctx.bindings.len();

  let first = resolver.selector(&mut ctx, &selector, ResolveOptions::default()).unwrap();
  let second = resolver.selector(&mut ctx, &selector, ResolveOptions::default()).unwrap();
  assert_eq!(first, second);
  assert_eq!(ctx.bindings.len(), bound);
}

#[test]
fn test_forked_paths_write_independently() {
  let program = token_program();
  let config = VerifierConfig::default();
  let tracking = Tracking { sv_write: true, sv_write_count: true, ..Default::default() };
  let interp = Interpreter::new(&program, 0, tracking, &config);
  let mut ctx = start(&program, "mint");
  ctx.location = interp.step(&mut ctx).unwrap()[0].next;

  let mut other = ctx.fork(1);
  assert_eq!(other.written_count(), ctx.written_count());
  interp.step(&mut other).unwrap();
  assert_eq!(other.written_count(), 2);
  assert_eq!(ctx.written_count(), 0);
  assert!(ctx.sv_write_counts.is_empty());
}
