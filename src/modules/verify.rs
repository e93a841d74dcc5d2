use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::modules::error::VerifyError;
use crate::modules::execution::Tracking;
use crate::modules::selector::{null_default, ChangeType, Condition, Selector};

pub const VERIFY_KINDS: [&str; 6] =
  ["ThrowVerify", "ReturnVerify", "EmitVerify", "StateAssignVerify", "CallVerify", "OrderVerify"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrowOp {
  #[default]
  Throw,
  NotThrow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowVerify {
  pub cond: Condition,
  #[serde(default, deserialize_with = "null_default")]
  pub op: ThrowOp,
}

fn yes() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnVerify {
  pub ret_val: Selector,
  #[serde(default)]
  pub cond: Option<Condition>,
  #[serde(default = "yes")]
  pub at_least_one: bool,
}

/// Expected value (and/or condition) of one event or call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgVerify {
  #[serde(alias = "arg_idx")]
  pub arg_index: usize,
  #[serde(default)]
  pub value: Option<Selector>,
  #[serde(default)]
  pub cond: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitVerify {
  pub event: String,
  #[serde(default)]
  pub sv_cond: Option<Condition>,
  #[serde(default, deserialize_with = "null_default")]
  pub alternative_events: Vec<String>,
  #[serde(default)]
  pub cond: Option<Condition>,
  #[serde(default)]
  pub within_call_fn: Option<String>,
  #[serde(default)]
  pub error_if_no_sv_cond: bool,
  #[serde(default, deserialize_with = "null_default")]
  pub arg_verifiers: Vec<ArgVerify>,
}

impl EmitVerify {
  pub fn change_type(&self) -> ChangeType {
    match &self.sv_cond {
      Some(Condition::Written { change_type, .. }) => *change_type,
      _ => ChangeType::Unspecified,
    }
  }
}

fn overwrite() -> String {
  "overwrite".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAssignVerify {
  pub state: Selector,
  pub value: Selector,
  #[serde(default = "overwrite")]
  pub op: String,
  #[serde(default)]
  pub event: Option<String>,
}

fn is_contract() -> String {
  "is_contract".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallVerify {
  pub callee: String,
  pub on: Selector,
  #[serde(default = "is_contract")]
  pub cond: String,
  #[serde(default, deserialize_with = "null_default")]
  pub arg_verifiers: Vec<ArgVerify>,
  #[serde(default, deserialize_with = "null_default")]
  pub alternative_callees: Vec<String>,
}

/// The record whose per-occurrence values must follow an ordering array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderTarget {
  EventEmit { event: String, arg_idx: usize },
  Written { sv: Selector, arg_idx: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderVerify {
  pub target: OrderTarget,
  pub ordered_by: Selector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VerifyOperation {
  ThrowVerify(ThrowVerify),
  ReturnVerify(ReturnVerify),
  EmitVerify(EmitVerify),
  StateAssignVerify(StateAssignVerify),
  CallVerify(CallVerify),
  OrderVerify(OrderVerify),
}

impl VerifyOperation {
  pub fn kind(&self) -> &'static str {
    match self {
      VerifyOperation::ThrowVerify(_) => "ThrowVerify",
      VerifyOperation::ReturnVerify(_) => "ReturnVerify",
      VerifyOperation::EmitVerify(_) => "EmitVerify",
      VerifyOperation::StateAssignVerify(_) => "StateAssignVerify",
      VerifyOperation::CallVerify(_) => "CallVerify",
      VerifyOperation::OrderVerify(_) => "OrderVerify",
    }
  }

  fn conditions(&self) -> Vec<&Condition> {
    match self {
      VerifyOperation::ThrowVerify(v) => vec![&v.cond],
      VerifyOperation::ReturnVerify(v) => v.cond.iter().collect(),
      VerifyOperation::EmitVerify(v) => {
        let args = v.arg_verifiers.iter().filter_map(|a| a.cond.as_ref());
        v.sv_cond.iter().chain(v.cond.iter()).chain(args).collect()
      }
      VerifyOperation::CallVerify(v) => v.arg_verifiers.iter().filter_map(|a| a.cond.as_ref()).collect(),
      VerifyOperation::StateAssignVerify(_) | VerifyOperation::OrderVerify(_) => vec![],
    }
  }

  /// Runtime facts the interpreter has to record for this operation.
  pub fn tracking(&self) -> Tracking {
    let mut t = Tracking::default();
    match self {
      VerifyOperation::ThrowVerify(_) => t.sv_write = true,
      VerifyOperation::ReturnVerify(_) => {}
      VerifyOperation::EmitVerify(v) => {
        t.emit = true;
        t.emit_args = true;
        t.sv_write = true;
        t.sv_write_count = true;
        t.sv_written_key = v.change_type() != ChangeType::Unspecified;
      }
      VerifyOperation::StateAssignVerify(v) => {
        t.sv_write = true;
        t.emit = v.event.is_some();
        t.emit_args = v.event.is_some();
      }
      VerifyOperation::CallVerify(v) => {
        t.def_by = true;
        t.call_args = !v.arg_verifiers.is_empty();
      }
      VerifyOperation::OrderVerify(v) => match v.target {
        OrderTarget::EventEmit { .. } => {
          t.emit = true;
          t.emit_args = true;
        }
        OrderTarget::Written { .. } => {
          t.sv_write = true;
          t.sv_write_count = true;
          t.sv_written_key = true;
        }
      },
    }
    if self.conditions().iter().any(|c| c.mentions_used_in_check()) {
      t.def_by = true;
      t.used_in_check = true;
    }
    t
  }
}

/// Decodes the `sym` field of a rule document. Accepts a flat object carrying
/// a `type` discriminator, or a wrapper object whose single key names the kind.
pub fn deserialize_verify(sym: &Json) -> Result<VerifyOperation, VerifyError> {
  let obj = sym.as_object().ok_or_else(|| VerifyError::UnknownVerifyType(sym.to_string()))?;

  let wrapped = VERIFY_KINDS.iter().find_map(|k| obj.get(*k).map(|inner| (*k, inner)));
  let flat = match wrapped {
    Some((kind, inner)) => {
      let mut inner = inner.clone();
      let fields = inner.as_object_mut().ok_or_else(|| VerifyError::UnknownVerifyType(kind.to_string()))?;
      fields.entry("type").or_insert_with(|| Json::String(kind.to_string()));
      inner
    }
    None if obj.contains_key("type") => sym.clone(),
    None if obj.len() == 1 => match obj.values().next() {
      Some(inner) if inner.get("type").is_some() => inner.clone(),
      _ => return Err(VerifyError::UnknownVerifyType(sym.to_string())),
    },
    None => return Err(VerifyError::UnknownVerifyType(sym.to_string())),
  };

  let kind = flat.get("type").and_then(|t| t.as_str()).unwrap_or_default();
  if !VERIFY_KINDS.contains(&kind) {
    return Err(VerifyError::UnknownVerifyType(kind.to_string()));
  }
  Ok(serde_json::from_value(flat)?)
}
