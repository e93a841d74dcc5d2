use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::modules::ir::parse_int_literal;
use crate::modules::term::Term;

/// Treats an explicit `null` like a missing field.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Where a rule finds a value to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Selector {
  #[serde(rename = "FuncParamSelector")]
  FuncParam { index: usize },
  #[serde(rename = "EventParamSelector")]
  EventParam { index: usize },
  #[serde(rename = "FnCallParamSelector")]
  FnCallParam { index: usize },
  /// Slot of the state variable behind `anchor_fn`, indexed by `keys` level by level.
  #[serde(rename = "StateVarSelector")]
  StateVar {
    anchor_fn: String,
    #[serde(default, deserialize_with = "deserialize_keys")]
    keys: Vec<Selector>,
  },
  #[serde(rename = "ConstantSelector")]
  Constant { value: ConstantValue },
  #[serde(rename = "MsgSenderSelector")]
  MsgSender,
  #[serde(rename = "ArrLengthSelector")]
  ArrLength { value: Box<Selector> },
  #[serde(rename = "FnCallRetSelector")]
  FnCallRet { fn_name: String },
  #[serde(rename = "NoneValueSelector")]
  NoneValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKey {
  Selector(Selector),
  Name(String),
}

fn deserialize_keys<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Selector>, D::Error> {
  let raw: Option<Vec<RawKey>> = Option::deserialize(deserializer)?;
  raw
    .unwrap_or_default()
    .into_iter()
    .map(|k| match k {
      RawKey::Selector(s) => Ok(s),
      RawKey::Name(n) if n == "msg.sender" => Ok(Selector::MsgSender),
      RawKey::Name(n) => Err(serde::de::Error::custom(format!("unsupported state variable key {}", n))),
    })
    .collect()
}

/// Literal of a `ConstantSelector`. Integers wider than 64 bits are written as
/// decimal or `0x` strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
  Bool(bool),
  Int(BigInt),
  Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConstantValue {
  Bool(bool),
  Signed(i64),
  Unsigned(u64),
  Float(f64),
  Str(String),
}

impl<'de> Deserialize<'de> for ConstantValue {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    match RawConstantValue::deserialize(deserializer)? {
      RawConstantValue::Bool(b) => Ok(ConstantValue::Bool(b)),
      RawConstantValue::Signed(i) => Ok(ConstantValue::Int(BigInt::from(i))),
      RawConstantValue::Unsigned(u) => Ok(ConstantValue::Int(BigInt::from(u))),
      RawConstantValue::Float(f) => {
        Err(serde::de::Error::custom(format!("constant {} is not an exact integer, write it as a string", f)))
      }
      RawConstantValue::Str(s) => Ok(match parse_int_literal(&s) {
        Some(i) if !s.trim().is_empty() => ConstantValue::Int(i),
        _ => ConstantValue::Str(s),
      }),
    }
  }
}

impl Serialize for ConstantValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      ConstantValue::Bool(b) => serializer.serialize_bool(*b),
      ConstantValue::Int(i) => match i.to_i64() {
        Some(small) => serializer.serialize_i64(small),
        None => serializer.serialize_str(&i.to_string()),
      },
      ConstantValue::Str(s) => serializer.serialize_str(s),
    }
  }
}

impl ConstantValue {
  pub fn int<T: Into<BigInt>>(v: T) -> Self {
    ConstantValue::Int(v.into())
  }

  pub fn to_term(&self) -> Term {
    match self {
      ConstantValue::Bool(b) => Term::Bool(*b),
      ConstantValue::Int(i) => Term::Int(i.clone()),
      ConstantValue::Str(s) => Term::Str(s.clone()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompOp {
  Eq,
  NotEq,
  Gt,
  Lt,
  Gte,
  Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
  And,
  #[default]
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
  #[default]
  #[serde(rename = "none")]
  Unspecified,
  TokenCreation,
  TokenBurn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
  #[serde(rename = "CompCondition")]
  Comparison { left: Selector, right: Selector, op: CompOp },
  #[serde(rename = "LogicCondition")]
  Logic {
    cond: Vec<Condition>,
    #[serde(default, deserialize_with = "null_default")]
    op: LogicOp,
  },
  #[serde(rename = "WrittenCondition")]
  Written {
    value: Selector,
    #[serde(default, deserialize_with = "null_default")]
    change_type: ChangeType,
  },
  #[serde(rename = "UsedInCheckCondition")]
  UsedInCheck { value: Selector },
}

impl Condition {
  pub fn mentions_used_in_check(&self) -> bool {
    match self {
      Condition::UsedInCheck { .. } => true,
      Condition::Logic { cond, .. } => cond.iter().any(|c| c.mentions_used_in_check()),
      Condition::Comparison { .. } | Condition::Written { .. } => false,
    }
  }

  /// State-variable selectors referenced by `Written` predicates.
  pub fn written_selectors(&self) -> Vec<&Selector> {
    match self {
      Condition::Written { value, .. } => vec![value],
      Condition::Logic { cond, .. } => cond.iter().flat_map(|c| c.written_selectors()).collect(),
      Condition::Comparison { .. } | Condition::UsedInCheck { .. } => vec![],
    }
  }
}
