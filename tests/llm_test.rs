mod common;

use std::cell::RefCell;

use common::{token_program, TOKEN};
use ercsym::modules::config::VerifierConfig;
use ercsym::modules::error::VerifyError;
use ercsym::modules::llm::{parse_verdict, LlmClient, LlmError, LlmVerifier};
use ercsym::modules::selector::{ChangeType, Condition, Selector};
use ercsym::modules::verifier::{Target, Verifier};
use ercsym::modules::verify::{EmitVerify, VerifyOperation};

/// Replays a canned answer and keeps every prompt it was asked.
struct Canned {
  answer: String,
  prompts: RefCell<Vec<String>>,
}

impl Canned {
  fn new(answer: &str) -> Self {
    Canned { answer: answer.to_string(), prompts: RefCell::new(vec![]) }
  }
}

impl LlmClient for Canned {
  fn ask(&self, prompt: &str) -> Result<String, LlmError> {
    self.prompts.borrow_mut().push(prompt.to_string());
    Ok(self.answer.clone())
  }
}

fn transfer_on_mint() -> VerifyOperation {
  VerifyOperation::EmitVerify(EmitVerify {
    event: "Transfer".to_string(),
    sv_cond: Some(Condition::Written {
      value: Selector::StateVar { anchor_fn: "balanceOf".to_string(), keys: vec![] },
      change_type: ChangeType::TokenCreation,
    }),
    alternative_events: vec![],
    cond: None,
    within_call_fn: None,
    error_if_no_sv_cond: false,
    arg_verifiers: vec![],
  })
}

#[test]
fn test_parse_verdict() {
  assert_eq!(parse_verdict("YES"), Some(true));
  assert_eq!(parse_verdict("no."), Some(false));
  assert_eq!(parse_verdict("Yes, although there is no event"), Some(true));
  assert_eq!(parse_verdict("NO, yes would be wrong"), Some(false));
  assert_eq!(parse_verdict("maybe"), None);
  assert_eq!(parse_verdict("I cannot tell, the result is UNKNOWN"), None);
  assert_eq!(parse_verdict("Not sure"), None);
  assert_eq!(parse_verdict("YES, it is NOT safe"), Some(true));
  assert_eq!(parse_verdict("Answer: no"), Some(false));
}

#[test]
fn test_prompt_carries_source_and_property() {
  let mut program = token_program();
  let f = program.contracts[0].function_index("mintSilent", None).unwrap();
  program.contracts[0].functions[f].source = Some("function mintSilent(address to, uint256 amount) { ... }".to_string());

  let v = LlmVerifier::new(VerifierConfig::default(), Canned::new("NO")).with_program(&program);
  let prompt = v.prompt(TOKEN, &Target::named("mintSilent"), &transfer_on_mint()).unwrap().unwrap();
  assert!(prompt.contains("function mintSilent(address to, uint256 amount)"));
  assert!(prompt.contains("\"EmitVerify\""));
  assert!(prompt.contains("|Transfer#emitted|"));
  assert!(prompt.ends_with("Return in \"YES\" or \"NO\".\n"));
}

#[test]
fn test_answer_decides_verdict() {
  let mut program = token_program();
  for f in program.contracts[0].functions.iter_mut() {
    f.source = Some(format!("function {}() {{}}", f.name));
  }
  let op = transfer_on_mint();
  let target = Target::named("mint");

  let mut yes = LlmVerifier::new(VerifierConfig::default(), Canned::new("YES")).with_program(&program);
  assert!(!yes.run(TOKEN, &target, &op).unwrap());
  let mut no = LlmVerifier::new(VerifierConfig::default(), Canned::new("NO")).with_program(&program);
  assert!(no.run(TOKEN, &target, &op).unwrap());
  let mut unsure = LlmVerifier::new(VerifierConfig::default(), Canned::new("it cannot be determined")).with_program(&program);
  assert!(matches!(unsure.run(TOKEN, &target, &op), Err(VerifyError::Llm(LlmError::Inconclusive(_)))));
}

#[test]
fn test_missing_source_is_skipped_without_asking() {
  let program = token_program();
  let client = Canned::new("YES");
  let mut v = LlmVerifier::new(VerifierConfig::default(), client).with_program(&program);
  let err = v.run(TOKEN, &Target::named("mint"), &transfer_on_mint()).unwrap_err();
  assert!(matches!(err, VerifyError::MissingSource { .. }));
  assert_eq!(v.prompt(TOKEN, &Target::named("mint"), &transfer_on_mint()).unwrap(), None);
}

#[test]
fn test_unknown_function_is_reported() {
  let program = token_program();
  let mut v = LlmVerifier::new(VerifierConfig::default(), Canned::new("YES")).with_program(&program);
  assert!(v.run(TOKEN, &Target::named("burn"), &transfer_on_mint()).is_err());
}
