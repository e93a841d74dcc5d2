use crate::modules::term::{Sort, Term};

/// Runtime facts the interpreter records and the driver reasons about.
///
/// This is the only place where a fact turns into a solver symbol name; the
/// execution context itself keys its bookkeeping by typed handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fact {
  /// The state variable was written at least once.
  Written(String),
  /// How many times the state variable was written.
  WrittenCount(String),
  /// Key used at mapping level `level` by the `write`-th write.
  WrittenKey { var: String, write: usize, level: usize },
  /// Value of the state variable when the path finished.
  PostExec { var: String, sort: Sort },
  Emitted(String),
  /// Argument `index` of the `occurrence`-th emission (1-based).
  EmittedArg { event: String, occurrence: usize, index: usize, sort: Sort },
  /// `function` was called on the receiver named `receiver`.
  Called { receiver: String, function: String },
  /// `function` was called on any receiver.
  FnCalled(String),
  /// Value returned by the latest call of `function`.
  CallReturn { function: String, sort: Sort },
  /// Argument `index` of the `occurrence`-th call of `function` (1-based).
  CallArg { function: String, occurrence: usize, index: usize, sort: Sort },
  Threw,
  UsedInCheck(String),
}

impl Fact {
  pub fn symbol(&self) -> String {
    match self {
      Fact::Written(var) => format!("{}#written", var),
      Fact::WrittenCount(var) => format!("{}#writtencnt", var),
      Fact::WrittenKey { var, write, level } => format!("{}#{}#{}", var, write, level),
      Fact::PostExec { var, .. } => format!("{}#postexec", var),
      Fact::Emitted(event) => format!("{}#emitted", event),
      Fact::EmittedArg { event, occurrence, index, .. } => format!("{}#{}#{}", event, occurrence, index),
      Fact::Called { receiver, function } => format!("{}.{}#called", receiver, function),
      Fact::FnCalled(function) => format!("{}#called", function),
      Fact::CallReturn { function, .. } => format!("{}#ret", function),
      Fact::CallArg { function, occurrence, index, .. } => format!("{}#call#{}#{}", function, occurrence, index),
      Fact::Threw => "#throwed".to_string(),
      Fact::UsedInCheck(var) => format!("{}#check-used", var),
    }
  }

  pub fn sort(&self) -> Sort {
    match self {
      Fact::Written(_) | Fact::Emitted(_) | Fact::Called { .. } | Fact::FnCalled(_) | Fact::Threw => Sort::Bool,
      Fact::UsedInCheck(_) => Sort::Bool,
      Fact::WrittenCount(_) | Fact::WrittenKey { .. } => Sort::Int,
      Fact::PostExec { sort, .. }
      | Fact::EmittedArg { sort, .. }
      | Fact::CallArg { sort, .. }
      | Fact::CallReturn { sort, .. } => sort.clone(),
    }
  }

  pub fn term(&self) -> Term {
    Term::var(self.symbol(), self.sort())
  }

  /// `fact == false` for boolean facts.
  pub fn negated(&self) -> Term {
    Term::not(self.term())
  }
}
