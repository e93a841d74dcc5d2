//! Read-only model of the static-analysis front end's output.
//!
//! The front end flattens inheritance and lowers every function to a control-flow graph whose nodes carry
//! instructions from a closed vocabulary. The verifier never re-analyzes source text; everything it needs about a
//! contract is answered by the queries in this module.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::modules::soltype::SolType;

#[derive(Debug, Error)]
pub enum IrError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("malformed front-end document: {0}")]
  Json(#[from] serde_json::Error),
  #[error("function {contract}.{function}: {reason}")]
  Malformed { contract: String, function: String, reason: String },
}

pub type NodeId = usize;

/// Position of a function inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FnId {
  pub contract: usize,
  pub function: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateVarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub usize);

/// One compilation unit: every contract, library and interface the front end saw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
  #[serde(default)]
  pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
  #[default]
  Contract,
  Library,
  Interface,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
  pub name: String,
  #[serde(default)]
  pub kind: ContractKind,
  #[serde(default)]
  pub state_variables: Vec<StateVariable>,
  #[serde(default)]
  pub functions: Vec<Function>,
  #[serde(default)]
  pub events: Vec<EventDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
  Public,
  External,
  #[default]
  Internal,
  Private,
}

impl Visibility {
  pub fn is_entry_point(&self) -> bool {
    matches!(self, Visibility::Public | Visibility::External)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
  Pure,
  View,
  Payable,
  #[default]
  Nonpayable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVariable {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: SolType,
  #[serde(default)]
  pub visibility: Visibility,
  #[serde(default)]
  pub initializer: Option<Constant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParam {
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type")]
  pub ty: SolType,
  #[serde(default)]
  pub indexed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDecl {
  pub name: String,
  #[serde(default)]
  pub params: Vec<EventParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: SolType,
}

fn public_visibility() -> Visibility {
  Visibility::Public
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
  pub name: String,
  #[serde(default)]
  pub params: Vec<Param>,
  #[serde(default)]
  pub returns: Vec<SolType>,
  #[serde(default = "public_visibility")]
  pub visibility: Visibility,
  #[serde(default)]
  pub mutability: Mutability,
  #[serde(default)]
  pub is_constructor: bool,
  #[serde(default)]
  pub entry: NodeId,
  #[serde(default)]
  pub nodes: Vec<Node>,
  /// Source excerpt, only used by the LLM audit path.
  #[serde(default)]
  pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  Entry,
  #[default]
  Expression,
  Variable,
  If,
  IfLoop,
  StartLoop,
  EndLoop,
  EndIf,
  Return,
  Throw,
  Try,
  Catch,
  Placeholder,
  Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
  pub id: NodeId,
  #[serde(default)]
  pub kind: NodeKind,
  #[serde(default)]
  pub instructions: Vec<Instruction>,
  #[serde(default)]
  pub sons: Vec<NodeId>,
  #[serde(default)]
  pub son_true: Option<NodeId>,
  #[serde(default)]
  pub son_false: Option<NodeId>,
  /// Declared variable of a `Variable` node.
  #[serde(default)]
  pub variable: Option<Variable>,
}

/// Where a variable lives. Function-scoped kinds name their function so that
/// inlined callees never share bindings with their callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
  Param { function: String, index: usize },
  Local { function: String },
  Temporary { function: String },
  Reference { function: String },
  State,
  Solidity,
}

/// A variable of the IR. Identity is `(name, scope)`; the type is carried along
/// but never distinguishes two variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: SolType,
  #[serde(flatten)]
  pub scope: Scope,
}

impl PartialEq for Variable {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.scope == other.scope
  }
}

impl Eq for Variable {}

impl Hash for Variable {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.name.hash(state);
    self.scope.hash(state);
  }
}

impl Variable {
  pub fn new(name: &str, ty: SolType, scope: Scope) -> Self {
    Variable { name: name.to_string(), ty, scope }
  }

  pub fn state(name: &str, ty: SolType) -> Self {
    Variable::new(name, ty, Scope::State)
  }

  pub fn solidity(name: &str, ty: SolType) -> Self {
    Variable::new(name, ty, Scope::Solidity)
  }

  pub fn msg_sender() -> Self {
    Variable::solidity("msg.sender", SolType::address())
  }

  pub fn this() -> Self {
    Variable::solidity("this", SolType::address())
  }

  pub fn param(function: &str, index: usize, name: &str, ty: SolType) -> Self {
    Variable::new(name, ty, Scope::Param { function: function.to_string(), index })
  }

  pub fn is_state(&self) -> bool {
    self.scope == Scope::State
  }

  pub fn function(&self) -> Option<&str> {
    match &self.scope {
      Scope::Param { function, .. }
      | Scope::Local { function }
      | Scope::Temporary { function }
      | Scope::Reference { function } => Some(function),
      Scope::State | Scope::Solidity => None,
    }
  }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
  Bool(bool),
  Int(BigInt),
  Str(String),
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer literal.
pub fn parse_int_literal(s: &str) -> Option<BigInt> {
  let s = s.trim();
  if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    let padded = if digits.len() % 2 == 1 { format!("0{}", digits) } else { digits.to_string() };
    let bytes = hex::decode(padded).ok()?;
    return Some(BigInt::from_bytes_be(Sign::Plus, &bytes));
  }
  BigInt::parse_bytes(s.as_bytes(), 10)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConstant {
  Bool(bool),
  Signed(i64),
  Unsigned(u64),
  Str(String),
  Big { int: String },
}

impl<'de> Deserialize<'de> for Constant {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    match RawConstant::deserialize(deserializer)? {
      RawConstant::Bool(b) => Ok(Constant::Bool(b)),
      RawConstant::Signed(i) => Ok(Constant::Int(BigInt::from(i))),
      RawConstant::Unsigned(u) => Ok(Constant::Int(BigInt::from(u))),
      RawConstant::Str(s) => Ok(Constant::Str(s)),
      RawConstant::Big { int } => parse_int_literal(&int)
        .map(Constant::Int)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid integer literal {}", int))),
    }
  }
}

impl Serialize for Constant {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    match self {
      Constant::Bool(b) => serializer.serialize_bool(*b),
      Constant::Str(s) => serializer.serialize_str(s),
      Constant::Int(i) => match i.to_i64() {
        Some(small) => serializer.serialize_i64(small),
        None => {
          let mut map = serializer.serialize_map(Some(1))?;
          map.serialize_entry("int", &i.to_string())?;
          map.end()
        }
      },
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
  Var(Variable),
  Const(Constant),
}

impl Operand {
  pub fn as_var(&self) -> Option<&Variable> {
    match self {
      Operand::Var(v) => Some(v),
      Operand::Const(_) => None,
    }
  }
}

/// Signature of the target of a high-level (external) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSignature {
  pub name: String,
  #[serde(default)]
  pub params: Vec<SolType>,
  #[serde(default)]
  pub returns: Vec<SolType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
  #[serde(rename = "!")]
  Not,
  #[serde(rename = "~")]
  Tilde,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
  #[serde(rename = "+")]
  Add,
  #[serde(rename = "-")]
  Sub,
  #[serde(rename = "*")]
  Mul,
  #[serde(rename = "/")]
  Div,
  #[serde(rename = "%")]
  Mod,
  #[serde(rename = "**")]
  Pow,
  #[serde(rename = "==")]
  Eq,
  #[serde(rename = "!=")]
  NotEq,
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = "&&")]
  And,
  #[serde(rename = "||")]
  Or,
  #[serde(rename = "&")]
  BitAnd,
  #[serde(rename = "|")]
  BitOr,
  #[serde(rename = "^")]
  BitXor,
  #[serde(rename = "<<")]
  Shl,
  #[serde(rename = ">>")]
  Shr,
}

/// The closed instruction vocabulary of the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum Instruction {
  /// Builtins such as `require(bool)`, `revert()`, `code(address)`.
  SolidityCall {
    function: String,
    #[serde(default)]
    arguments: Vec<Operand>,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  Assignment {
    lvalue: Variable,
    rvalue: Operand,
  },
  TypeConversion {
    lvalue: Variable,
    variable: Operand,
  },
  InternalCall {
    function: String,
    #[serde(default)]
    arguments: Vec<Operand>,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  LibraryCall {
    library: String,
    function: String,
    #[serde(default)]
    arguments: Vec<Operand>,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  HighLevelCall {
    destination: Operand,
    function: CallSignature,
    #[serde(default)]
    arguments: Vec<Operand>,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  LowLevelCall {
    destination: Operand,
    function_name: String,
    #[serde(default)]
    arguments: Vec<Operand>,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  Unary {
    op: UnaryOp,
    rvalue: Operand,
    lvalue: Variable,
  },
  Binary {
    op: BinaryOp,
    left: Operand,
    right: Operand,
    lvalue: Variable,
    /// Checked (reverting) arithmetic.
    #[serde(default)]
    checked: bool,
  },
  Length {
    value: Variable,
    lvalue: Variable,
  },
  EventCall {
    name: String,
    #[serde(default)]
    arguments: Vec<Operand>,
  },
  Index {
    lvalue: Variable,
    base: Variable,
    key: Operand,
  },
  Delete {
    lvalue: Variable,
    variable: Variable,
  },
  NewElementaryType {
    lvalue: Variable,
  },
  Return {
    #[serde(default)]
    values: Vec<Operand>,
  },
  Unpack {
    lvalue: Variable,
    tuple: Variable,
    index: usize,
  },
  Member {
    lvalue: Variable,
    base: Operand,
    member: String,
  },
  Condition {
    value: Operand,
  },
  Transfer {
    destination: Operand,
    amount: Operand,
  },
  Send {
    destination: Operand,
    amount: Operand,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
  NewArray {
    lvalue: Variable,
    #[serde(default)]
    arguments: Vec<Operand>,
  },
  InitArray {
    lvalue: Variable,
    #[serde(default)]
    values: Vec<Operand>,
  },
  CodeSize {
    lvalue: Variable,
    value: Operand,
  },
  /// Anything the front end could not map onto the vocabulary above.
  Unsupported {
    #[serde(default)]
    description: String,
    #[serde(default)]
    lvalue: Option<Variable>,
  },
}

impl Instruction {
  pub fn lvalue(&self) -> Option<&Variable> {
    match self {
      Instruction::Assignment { lvalue, .. }
      | Instruction::TypeConversion { lvalue, .. }
      | Instruction::Unary { lvalue, .. }
      | Instruction::Binary { lvalue, .. }
      | Instruction::Length { lvalue, .. }
      | Instruction::Index { lvalue, .. }
      | Instruction::Delete { lvalue, .. }
      | Instruction::NewElementaryType { lvalue }
      | Instruction::Unpack { lvalue, .. }
      | Instruction::Member { lvalue, .. }
      | Instruction::NewArray { lvalue, .. }
      | Instruction::InitArray { lvalue, .. }
      | Instruction::CodeSize { lvalue, .. } => Some(lvalue),
      Instruction::SolidityCall { lvalue, .. }
      | Instruction::InternalCall { lvalue, .. }
      | Instruction::LibraryCall { lvalue, .. }
      | Instruction::HighLevelCall { lvalue, .. }
      | Instruction::LowLevelCall { lvalue, .. }
      | Instruction::Send { lvalue, .. }
      | Instruction::Unsupported { lvalue, .. } => lvalue.as_ref(),
      Instruction::EventCall { .. }
      | Instruction::Return { .. }
      | Instruction::Condition { .. }
      | Instruction::Transfer { .. } => None,
    }
  }

  /// Every operand the instruction reads.
  pub fn reads(&self) -> Vec<&Operand> {
    match self {
      Instruction::SolidityCall { arguments, .. }
      | Instruction::InternalCall { arguments, .. }
      | Instruction::LibraryCall { arguments, .. }
      | Instruction::EventCall { arguments, .. }
      | Instruction::NewArray { arguments, .. } => arguments.iter().collect(),
      Instruction::HighLevelCall { destination, arguments, .. }
      | Instruction::LowLevelCall { destination, arguments, .. } => {
        std::iter::once(destination).chain(arguments.iter()).collect()
      }
      Instruction::Assignment { rvalue, .. } | Instruction::Unary { rvalue, .. } => vec![rvalue],
      Instruction::TypeConversion { variable, .. } => vec![variable],
      Instruction::Binary { left, right, .. } => vec![left, right],
      Instruction::Index { key, .. } => vec![key],
      Instruction::Return { values } | Instruction::InitArray { values, .. } => values.iter().collect(),
      Instruction::Member { base, .. } => vec![base],
      Instruction::Condition { value } | Instruction::CodeSize { value, .. } => vec![value],
      Instruction::Transfer { destination, amount } | Instruction::Send { destination, amount, .. } => {
        vec![destination, amount]
      }
      Instruction::Length { .. }
      | Instruction::Delete { .. }
      | Instruction::NewElementaryType { .. }
      | Instruction::Unpack { .. }
      | Instruction::Unsupported { .. } => vec![],
    }
  }

  pub fn is_require(&self) -> bool {
    matches!(self, Instruction::SolidityCall { function, .. } if function.starts_with("require("))
  }
}

impl Function {
  pub fn param_var(&self, index: usize) -> Option<Variable> {
    self.params.get(index).map(|p| Variable::param(&self.name, index, &p.name, p.ty.clone()))
  }

  pub fn node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id)
  }

  pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
    self.nodes.iter().flat_map(|n| n.instructions.iter())
  }

  pub fn is_state_mutating(&self) -> bool {
    !matches!(self.mutability, Mutability::Pure | Mutability::View)
  }

  /// State variables this function's own instructions read and write.
  pub fn direct_state_access(&self) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut roots: HashMap<&Variable, &Variable> = HashMap::new();
    for ins in self.instructions() {
      match ins {
        Instruction::Index { lvalue, base, .. } => {
          let root = roots.get(base).copied().unwrap_or(base);
          roots.insert(lvalue, root);
        }
        Instruction::Member { lvalue, base: Operand::Var(base), .. } => {
          let root = roots.get(base).copied().unwrap_or(base);
          roots.insert(lvalue, root);
        }
        _ => {}
      }
    }
    let root_of = |v: &Variable| -> Variable { roots.get(v).map(|r| (*r).clone()).unwrap_or_else(|| v.clone()) };

    let mut read = BTreeSet::new();
    let mut written = BTreeSet::new();
    for ins in self.instructions() {
      for op in ins.reads() {
        if let Some(v) = op.as_var() {
          let root = root_of(v);
          if root.is_state() {
            read.insert(root.name);
          }
        }
      }
      match ins {
        Instruction::Index { base, .. } | Instruction::Length { value: base, .. } => {
          let root = root_of(base);
          if root.is_state() {
            read.insert(root.name);
          }
        }
        Instruction::Member { .. } => {}
        Instruction::Delete { variable, .. } => {
          let root = root_of(variable);
          if root.is_state() {
            written.insert(root.name);
          }
        }
        _ => {
          if let Some(lvalue) = ins.lvalue() {
            let root = root_of(lvalue);
            if root.is_state() {
              written.insert(root.name);
            }
          }
        }
      }
    }
    (read, written)
  }
}

impl Contract {
  pub fn function_index(&self, name: &str, arity: Option<usize>) -> Option<usize> {
    self
      .functions
      .iter()
      .position(|f| f.name == name && !f.is_constructor && arity.map_or(true, |n| f.params.len() == n))
  }

  pub fn state_variable(&self, name: &str) -> Option<(StateVarId, &StateVariable)> {
    self.state_variables.iter().enumerate().find(|(_, sv)| sv.name == name).map(|(i, sv)| (StateVarId(i), sv))
  }

  pub fn state_var(&self, id: StateVarId) -> &StateVariable {
    &self.state_variables[id.0]
  }

  pub fn event(&self, name: &str) -> Option<(EventId, &EventDecl)> {
    self.events.iter().enumerate().find(|(_, e)| e.name == name).map(|(i, e)| (EventId(i), e))
  }

  pub fn event_decl(&self, id: EventId) -> &EventDecl {
    &self.events[id.0]
  }

  pub fn constructor(&self) -> Option<&Function> {
    self.functions.iter().find(|f| f.is_constructor)
  }

  /// Constant a state variable holds once construction finishes: its declared
  /// initializer, or the first constant the constructor assigns to it.
  pub fn constant_initializer(&self, name: &str) -> Option<Constant> {
    let (_, sv) = self.state_variable(name)?;
    if let Some(c) = &sv.initializer {
      return Some(c.clone());
    }
    let ctor = self.constructor()?;
    let mut consts: HashMap<&Variable, Constant> = HashMap::new();
    for ins in ctor.instructions() {
      match ins {
        Instruction::Assignment { lvalue, rvalue } => {
          let value = match rvalue {
            Operand::Const(c) => Some(c.clone()),
            Operand::Var(v) => consts.get(v).cloned(),
          };
          if let Some(c) = value {
            if lvalue.is_state() && lvalue.name == name {
              return Some(c);
            }
            consts.insert(lvalue, c);
          }
        }
        Instruction::TypeConversion { lvalue, variable: Operand::Const(c) } => {
          consts.insert(lvalue, c.clone());
        }
        _ => {}
      }
    }
    None
  }
}

impl Program {
  pub fn from_json(text: &str) -> Result<Program, IrError> {
    let program: Program = serde_json::from_str(text)?;
    program.validate()?;
    Ok(program)
  }

  pub fn load(path: &Path) -> Result<Program, IrError> {
    let text =
      fs::read_to_string(path).map_err(|source| IrError::Io { path: path.display().to_string(), source })?;
    Program::from_json(&text)
  }

  /// Node ids must equal their position and every edge must land on a node.
  pub fn validate(&self) -> Result<(), IrError> {
    for c in &self.contracts {
      for f in &c.functions {
        let malformed = |reason: String| IrError::Malformed {
          contract: c.name.clone(),
          function: f.name.clone(),
          reason,
        };
        if !f.nodes.is_empty() && f.entry >= f.nodes.len() {
          return Err(malformed(format!("entry node {} does not exist", f.entry)));
        }
        for (i, node) in f.nodes.iter().enumerate() {
          if node.id != i {
            return Err(malformed(format!("node at position {} has id {}", i, node.id)));
          }
          let edges = node.sons.iter().chain(node.son_true.iter()).chain(node.son_false.iter());
          for &son in edges {
            if son >= f.nodes.len() {
              return Err(malformed(format!("node {} points to missing node {}", i, son)));
            }
          }
        }
      }
    }
    Ok(())
  }

  pub fn contract_index(&self, name: &str) -> Option<usize> {
    self.contracts.iter().position(|c| c.name == name)
  }

  pub fn function(&self, id: FnId) -> &Function {
    &self.contracts[id.contract].functions[id.function]
  }

  pub fn resolve_internal(&self, contract: usize, name: &str, arity: usize) -> Option<FnId> {
    let c = &self.contracts[contract];
    c.functions
      .iter()
      .position(|f| f.name == name && f.params.len() == arity)
      .or_else(|| c.functions.iter().position(|f| f.name == name))
      .map(|function| FnId { contract, function })
  }

  pub fn resolve_library(&self, library: &str, name: &str, arity: usize) -> Option<FnId> {
    let contract = self.contract_index(library)?;
    self.resolve_internal(contract, name, arity)
  }

  /// Functions reachable from `root` through internal and library calls, `root` included.
  pub fn reachable(&self, root: FnId) -> Vec<FnId> {
    let mut seen = HashSet::from([root]);
    let mut order = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
      for ins in self.function(id).instructions() {
        let callee = match ins {
          Instruction::InternalCall { function, arguments, .. } => {
            self.resolve_internal(id.contract, function, arguments.len())
          }
          Instruction::LibraryCall { library, function, arguments, .. } => {
            self.resolve_library(library, function, arguments.len())
          }
          _ => None,
        };
        if let Some(callee) = callee {
          if seen.insert(callee) {
            order.push(callee);
            queue.push_back(callee);
          }
        }
      }
    }
    order
  }

  pub fn state_variables_read(&self, root: FnId) -> BTreeSet<String> {
    self.reachable(root).into_iter().flat_map(|id| self.function(id).direct_state_access().0).collect()
  }

  pub fn state_variables_written(&self, root: FnId) -> BTreeSet<String> {
    self.reachable(root).into_iter().flat_map(|id| self.function(id).direct_state_access().1).collect()
  }

  pub fn events_emitted(&self, root: FnId) -> BTreeSet<String> {
    let mut events = BTreeSet::new();
    for id in self.reachable(root) {
      for ins in self.function(id).instructions() {
        if let Instruction::EventCall { name, .. } = ins {
          events.insert(name.clone());
        }
      }
    }
    events
  }

  pub fn high_level_call(&self, root: FnId, name: &str) -> Option<&CallSignature> {
    self.reachable(root).into_iter().find_map(|id| {
      self.function(id).instructions().find_map(|ins| match ins {
        Instruction::HighLevelCall { function, .. } if function.name == name => Some(function),
        _ => None,
      })
    })
  }

  /// The single state variable an anchor getter stands for. A public state
  /// variable whose auto-generated getter carries the anchor's name also counts.
  pub fn anchored_state_variable(&self, contract: usize, anchor: &str) -> Option<StateVarId> {
    let c = &self.contracts[contract];
    if let Some(function) = c.function_index(anchor, None) {
      let read = self.state_variables_read(FnId { contract, function });
      if read.len() == 1 {
        return read.iter().next().and_then(|name| c.state_variable(name)).map(|(id, _)| id);
      }
      return None;
    }
    c.state_variable(anchor).filter(|(_, sv)| sv.visibility == Visibility::Public).map(|(id, _)| id)
  }
}
