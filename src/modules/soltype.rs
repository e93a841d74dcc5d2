use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot parse type `{input}` at byte {pos}: {reason}")]
pub struct TypeParseError {
  pub input: String,
  pub pos: usize,
  pub reason: &'static str,
}

/// Solidity type as reported by the front end, e.g. `mapping(address => uint256)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SolType {
  /// Value types and user-defined names (`uint256`, `address`, `IERC20`, ...).
  Elementary(String),
  Mapping(Box<SolType>, Box<SolType>),
  /// `T[]` when the length is `None`, `T[n]` otherwise.
  Array(Box<SolType>, Option<usize>),
  Tuple(Vec<SolType>),
}

impl SolType {
  pub fn elementary(name: &str) -> Self {
    SolType::Elementary(name.to_string())
  }

  pub fn address() -> Self {
    SolType::elementary("address")
  }

  pub fn uint256() -> Self {
    SolType::elementary("uint256")
  }

  pub fn boolean() -> Self {
    SolType::elementary("bool")
  }

  pub fn is_bool(&self) -> bool {
    matches!(self, SolType::Elementary(n) if n == "bool")
  }

  pub fn is_string(&self) -> bool {
    matches!(self, SolType::Elementary(n) if n == "string")
  }

  pub fn is_unsigned(&self) -> bool {
    matches!(self, SolType::Elementary(n) if n.starts_with("uint"))
  }

  pub fn is_address(&self) -> bool {
    matches!(self, SolType::Elementary(n) if n == "address")
  }

  pub fn is_mapping(&self) -> bool {
    matches!(self, SolType::Mapping(..))
  }

  pub fn is_array(&self) -> bool {
    matches!(self, SolType::Array(..))
  }

  /// Key types of every nested mapping level, outermost first.
  pub fn mapping_keys(&self) -> Vec<&SolType> {
    let mut keys = vec![];
    let mut curr = self;
    while let SolType::Mapping(key, value) = curr {
      keys.push(key.as_ref());
      curr = value;
    }
    keys
  }

  /// The innermost value type once every mapping level is indexed.
  pub fn mapping_leaf(&self) -> &SolType {
    let mut curr = self;
    while let SolType::Mapping(_, value) = curr {
      curr = value;
    }
    curr
  }

  /// Whether any component of the type is an unsigned integer or an address.
  pub fn mentions_unsigned(&self) -> bool {
    match self {
      SolType::Elementary(_) => self.is_unsigned() || self.is_address(),
      SolType::Mapping(k, v) => k.mentions_unsigned() || v.mentions_unsigned(),
      SolType::Array(t, _) => t.mentions_unsigned(),
      SolType::Tuple(ts) => ts.iter().any(|t| t.mentions_unsigned()),
    }
  }
}

impl fmt::Display for SolType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SolType::Elementary(name) => write!(f, "{}", name),
      SolType::Mapping(k, v) => write!(f, "mapping({} => {})", k, v),
      SolType::Array(t, None) => write!(f, "{}[]", t),
      SolType::Array(t, Some(n)) => write!(f, "{}[{}]", t, n),
      SolType::Tuple(ts) => {
        let inner: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
        write!(f, "({})", inner.join(","))
      }
    }
  }
}

impl From<SolType> for String {
  fn from(ty: SolType) -> String {
    ty.to_string()
  }
}

impl TryFrom<String> for SolType {
  type Error = TypeParseError;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    s.parse()
  }
}

impl FromStr for SolType {
  type Err = TypeParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parser = TypeParser { input: s, pos: 0 };
    let ty = parser.parse_type()?;
    parser.skip_ws();
    if parser.pos != s.len() {
      return Err(parser.error("trailing input"));
    }
    Ok(ty)
  }
}

struct TypeParser<'a> {
  input: &'a str,
  pos: usize,
}

impl<'a> TypeParser<'a> {
  fn rest(&self) -> &'a str {
    &self.input[self.pos..]
  }

  fn skip_ws(&mut self) {
    let trimmed = self.rest().trim_start();
    self.pos = self.input.len() - trimmed.len();
  }

  fn error(&self, reason: &'static str) -> TypeParseError {
    TypeParseError { input: self.input.to_string(), pos: self.pos, reason }
  }

  fn eat(&mut self, token: &str) -> bool {
    self.skip_ws();
    if self.rest().starts_with(token) {
      self.pos += token.len();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, token: &str, reason: &'static str) -> Result<(), TypeParseError> {
    if self.eat(token) {
      Ok(())
    } else {
      Err(self.error(reason))
    }
  }

  fn parse_type(&mut self) -> Result<SolType, TypeParseError> {
    self.skip_ws();
    let mut ty = if self.eat("mapping(") || self.eat("mapping (") {
      let key = self.parse_type()?;
      self.expect("=>", "expected `=>`")?;
      let value = self.parse_type()?;
      self.expect(")", "unclosed mapping")?;
      SolType::Mapping(Box::new(key), Box::new(value))
    } else if self.eat("(") {
      let mut elems = vec![];
      if !self.eat(")") {
        loop {
          elems.push(self.parse_type()?);
          if self.eat(")") {
            break;
          }
          self.expect(",", "expected `,` or `)` in tuple")?;
        }
      }
      SolType::Tuple(elems)
    } else {
      self.parse_leaf()?
    };

    while self.eat("[") {
      let start = self.pos;
      let digits = self.rest().chars().take_while(|c| c.is_ascii_digit()).count();
      self.pos += digits;
      let len = if digits == 0 { None } else { self.input[start..start + digits].parse().ok() };
      self.expect("]", "unclosed array suffix")?;
      ty = SolType::Array(Box::new(ty), len);
    }
    Ok(ty)
  }

  fn parse_leaf(&mut self) -> Result<SolType, TypeParseError> {
    let len = self.rest().find(|c| matches!(c, '[' | ']' | ',' | '(' | ')' | '=')).unwrap_or(self.rest().len());
    let raw = self.rest()[..len].trim();
    if raw.is_empty() {
      return Err(self.error("expected a type name"));
    }
    self.pos += len;
    let mut name = raw;
    for prefix in ["contract ", "struct ", "enum "] {
      if let Some(stripped) = name.strip_prefix(prefix) {
        name = stripped.trim();
      }
    }
    let name = name.strip_suffix(" payable").unwrap_or(name).trim();
    Ok(SolType::Elementary(name.to_string()))
  }
}
