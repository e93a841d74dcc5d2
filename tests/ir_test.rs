use ercsym::modules::ir::{BinaryOp, Constant, Instruction, NodeKind, Operand, Program, Scope};
use num_bigint::BigInt;
use serde_json::json;

fn check_program() -> serde_json::Value {
  let x = json!({"name": "x", "type": "uint256", "kind": "param", "function": "check", "index": 0});
  let positive = json!({"name": "TMP_0", "type": "bool", "kind": "temporary", "function": "check"});
  json!({
    "contracts": [{
      "name": "Gate",
      "functions": [{
        "name": "check",
        "params": [{"name": "x", "type": "uint256"}],
        "visibility": "external",
        "entry": 0,
        "nodes": [
          {"id": 0, "kind": "entry", "sons": [1]},
          {
            "id": 1,
            "kind": "expression",
            "instructions": [
              {"instruction": "binary", "op": ">", "left": x, "right": 0, "lvalue": positive, "checked": false},
              {"instruction": "solidity_call", "function": "require(bool)", "arguments": [positive]}
            ]
          }
        ]
      }]
    }]
  })
}

#[test]
fn test_load_binary_and_builtin_instructions() {
  let program = Program::from_json(&check_program().to_string()).unwrap();
  let function = &program.contracts[0].functions[0];
  assert_eq!(function.nodes[1].kind, NodeKind::Expression);

  match &function.nodes[1].instructions[0] {
    Instruction::Binary { op, left: Operand::Var(left), right, lvalue, checked } => {
      assert_eq!(*op, BinaryOp::Gt);
      assert_eq!(left.scope, Scope::Param { function: "check".to_string(), index: 0 });
      assert_eq!(*right, Operand::Const(Constant::Int(BigInt::from(0))));
      assert_eq!(lvalue.name, "TMP_0");
      assert!(!checked);
    }
    other => panic!("unexpected instruction {:?}", other),
  }
  assert!(function.nodes[1].instructions[1].is_require());
}

#[test]
fn test_instructions_survive_serialization() {
  let program = Program::from_json(&check_program().to_string()).unwrap();
  let text = serde_json::to_string(&program).unwrap();
  let again = Program::from_json(&text).unwrap();
  assert_eq!(again.contracts[0].functions[0].nodes[1].instructions, program.contracts[0].functions[0].nodes[1].instructions);
}

#[test]
fn test_dangling_edge_is_rejected() {
  let mut doc = check_program();
  doc["contracts"][0]["functions"][0]["nodes"][0]["sons"] = json!([7]);
  assert!(Program::from_json(&doc.to_string()).is_err());
}
