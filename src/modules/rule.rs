use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::modules::error::VerifyError;
use crate::modules::soltype::{SolType, TypeParseError};
use crate::modules::verify::{deserialize_verify, VerifyOperation};

#[derive(Debug, Error)]
pub enum RuleError {
  #[error("cannot read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("malformed interface `{0}`")]
  Signature(String),
  #[error(transparent)]
  Type(#[from] TypeParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
  Throw,
  Emit,
  Assign,
  Call,
  Return,
  Order,
  Interface,
}

impl RuleKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      RuleKind::Throw => "throw",
      RuleKind::Emit => "emit",
      RuleKind::Assign => "assign",
      RuleKind::Call => "call",
      RuleKind::Return => "return",
      RuleKind::Order => "order",
      RuleKind::Interface => "interface",
    }
  }
}

/// One compliance rule as produced by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
  pub rule: String,
  #[serde(rename = "type")]
  pub kind: RuleKind,
  #[serde(default)]
  pub interface: String,
  #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sym: Option<Json>,
}

impl Rule {
  /// `None` when the rule carries no symbolic form.
  pub fn verify_operation(&self) -> Option<Result<VerifyOperation, VerifyError>> {
    self.sym.as_ref().map(deserialize_verify)
  }

  pub fn signature(&self) -> Result<Signature, RuleError> {
    Signature::parse(&self.interface)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDef {
  pub def: String,
}

/// Rules of one token standard together with the interface it mandates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErcDocument {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub functions: Vec<InterfaceDef>,
  #[serde(default)]
  pub events: Vec<InterfaceDef>,
  #[serde(default)]
  pub rules: Vec<Rule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
  Rules(Vec<Rule>),
  Document(ErcDocument),
}

impl ErcDocument {
  /// Accepts a bare rule array or a full document object.
  pub fn from_json(text: &str) -> Result<ErcDocument, RuleError> {
    Ok(match serde_json::from_str(text)? {
      RuleFile::Rules(rules) => ErcDocument { rules, ..Default::default() },
      RuleFile::Document(doc) => doc,
    })
  }

  pub fn load(path: &Path) -> Result<ErcDocument, RuleError> {
    let text = fs::read_to_string(path).map_err(|source| RuleError::Io { path: path.display().to_string(), source })?;
    let mut doc = ErcDocument::from_json(&text)?;
    if doc.name.is_empty() {
      doc.name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    }
    Ok(doc)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
  Function,
  Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigParam {
  pub ty: SolType,
  pub name: Option<String>,
  pub indexed: bool,
}

/// Parsed `function f(T a, ...) ... returns (R)` or `event E(T indexed a, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
  pub kind: SignatureKind,
  pub name: String,
  pub params: Vec<SigParam>,
  pub returns: Vec<SolType>,
}

const LOCATIONS: [&str; 3] = ["memory", "calldata", "storage"];

impl Signature {
  pub fn parse(text: &str) -> Result<Signature, RuleError> {
    let head = Regex::new(r"^\s*(function|event)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(").map_err(|_| RuleError::Signature(text.into()))?;
    let caps = head.captures(text).ok_or_else(|| RuleError::Signature(text.into()))?;
    let kind = if &caps[1] == "event" { SignatureKind::Event } else { SignatureKind::Function };
    let name = caps[2].to_string();
    let open = caps.get(0).map_or(0, |m| m.end());
    let close = matching_paren(text, open).ok_or_else(|| RuleError::Signature(text.into()))?;
    let params = split_top_level(&text[open..close])
      .into_iter()
      .map(|p| parse_param(p, kind))
      .collect::<Result<Vec<_>, _>>()?;

    let mut returns = vec![];
    let tail = &text[close + 1..];
    if let Some(pos) = tail.find("returns") {
      let rest = &tail[pos + "returns".len()..];
      let start = rest.find('(').ok_or_else(|| RuleError::Signature(text.into()))? + 1;
      let end = matching_paren(rest, start).ok_or_else(|| RuleError::Signature(text.into()))?;
      for r in split_top_level(&rest[start..end]) {
        returns.push(parse_param(r, SignatureKind::Function)?.ty);
      }
    }
    Ok(Signature { kind, name, params, returns })
  }

  pub fn is_event(&self) -> bool {
    self.kind == SignatureKind::Event
  }

  pub fn param_types(&self) -> Vec<&SolType> {
    self.params.iter().map(|p| &p.ty).collect()
  }

  /// Canonical `Name(type,type)` form, indexed markers included for events.
  pub fn canonical(&self) -> String {
    let params: Vec<String> = self
      .params
      .iter()
      .map(|p| if p.indexed { format!("{} indexed", p.ty) } else { p.ty.to_string() })
      .collect();
    format!("{}({})", self.name, params.join(","))
  }
}

/// `uint` and `int` are aliases of their 256-bit forms.
pub fn normalize_type(raw: &str) -> String {
  let re = Regex::new(r"\b(u?int)\b").map(|re| re.replace_all(raw, "${1}256").into_owned());
  re.unwrap_or_else(|_| raw.to_string())
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
  let mut depth = 1;
  for (i, c) in text[open..].char_indices() {
    match c {
      '(' => depth += 1,
      ')' => {
        depth -= 1;
        if depth == 0 {
          return Some(open + i);
        }
      }
      _ => {}
    }
  }
  None
}

fn split_top_level(list: &str) -> Vec<&str> {
  let mut parts = vec![];
  let mut depth = 0;
  let mut start = 0;
  for (i, c) in list.char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth -= 1,
      ',' if depth == 0 => {
        parts.push(list[start..i].trim());
        start = i + 1;
      }
      _ => {}
    }
  }
  let last = list[start..].trim();
  if !last.is_empty() || !parts.is_empty() {
    parts.push(last);
  }
  parts
}

fn parse_param(raw: &str, kind: SignatureKind) -> Result<SigParam, RuleError> {
  // The type is everything up to the first space outside of parentheses.
  let mut depth = 0;
  let mut split = raw.len();
  for (i, c) in raw.char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth -= 1,
      ' ' if depth == 0 && !raw[..i].trim_end().ends_with("mapping") => {
        split = i;
        break;
      }
      _ => {}
    }
  }
  let ty: SolType = normalize_type(&raw[..split]).parse()?;
  let mut indexed = false;
  let mut name = None;
  for word in raw[split..].split_whitespace() {
    match word {
      "indexed" if kind == SignatureKind::Event => indexed = true,
      w if LOCATIONS.contains(&w) => {}
      w => name = Some(w.to_string()),
    }
  }
  Ok(SigParam { ty, name, indexed })
}
