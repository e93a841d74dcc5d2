use std::collections::BTreeMap;
use std::fmt;

use num_traits::Signed;

use crate::modules::solvers::SolverError;
use crate::modules::term::{Sort, Term};

/// A rendered SMT-LIB2 script fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SMT2 {
  pub declarations: Vec<String>,
  pub assertions: Vec<String>,
}

impl fmt::Display for SMT2 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for d in &self.declarations {
      writeln!(f, "{}", d)?;
    }
    for a in &self.assertions {
      writeln!(f, "{}", a)?;
    }
    Ok(())
  }
}

/// Quoted symbol; `|` and `\` cannot appear inside a quoted symbol.
pub fn symbol(name: &str) -> String {
  format!("|{}|", name.replace(['|', '\\'], "_"))
}

pub fn sort_to_smt(sort: &Sort) -> String {
  match sort {
    Sort::Bool => "Bool".to_string(),
    Sort::Int => "Int".to_string(),
    Sort::Str => "String".to_string(),
    Sort::Array(d, r) => format!("(Array {} {})", sort_to_smt(d), sort_to_smt(r)),
  }
}

fn nary(f: &mut fmt::Formatter<'_>, op: &str, args: &[&Term]) -> fmt::Result {
  write!(f, "({}", op)?;
  for a in args {
    write!(f, " {}", a)?;
  }
  write!(f, ")")
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Term::Var(name, _) => write!(f, "{}", symbol(name)),
      Term::Int(i) if i.is_negative() => write!(f, "(- {})", i.abs()),
      Term::Int(i) => write!(f, "{}", i),
      Term::Bool(b) => write!(f, "{}", b),
      Term::Str(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
      Term::Add(a, b) => nary(f, "+", &[&**a, &**b]),
      Term::Sub(a, b) => nary(f, "-", &[&**a, &**b]),
      Term::Mul(a, b) => nary(f, "*", &[&**a, &**b]),
      Term::Div(a, b) => nary(f, "div", &[&**a, &**b]),
      Term::Mod(a, b) => nary(f, "mod", &[&**a, &**b]),
      Term::Eq(a, b) => nary(f, "=", &[&**a, &**b]),
      Term::Lt(a, b) => nary(f, "<", &[&**a, &**b]),
      Term::Le(a, b) => nary(f, "<=", &[&**a, &**b]),
      Term::Gt(a, b) => nary(f, ">", &[&**a, &**b]),
      Term::Ge(a, b) => nary(f, ">=", &[&**a, &**b]),
      Term::Not(a) => nary(f, "not", &[&**a]),
      Term::And(ts) if ts.is_empty() => write!(f, "true"),
      Term::And(ts) => nary(f, "and", &ts.iter().collect::<Vec<_>>()),
      Term::Or(ts) if ts.is_empty() => write!(f, "false"),
      Term::Or(ts) => nary(f, "or", &ts.iter().collect::<Vec<_>>()),
      Term::Ite(c, t, e) => nary(f, "ite", &[&**c, &**t, &**e]),
      Term::Select(a, i) => nary(f, "select", &[&**a, &**i]),
      Term::Store(a, i, v) => nary(f, "store", &[&**a, &**i, &**v]),
    }
  }
}

fn collect_vars(term: &Term, decls: &mut BTreeMap<String, Sort>) -> Result<(), SolverError> {
  let mut stack = vec![term];
  while let Some(t) = stack.pop() {
    match t {
      Term::Var(name, sort) => {
        if let Some(prev) = decls.insert(name.clone(), sort.clone()) {
          if prev != *sort {
            return Err(SolverError::SortClash(name.clone()));
          }
        }
      }
      Term::Int(_) | Term::Bool(_) | Term::Str(_) => {}
      Term::Not(a) => stack.push(a),
      Term::Add(a, b)
      | Term::Sub(a, b)
      | Term::Mul(a, b)
      | Term::Div(a, b)
      | Term::Mod(a, b)
      | Term::Eq(a, b)
      | Term::Lt(a, b)
      | Term::Le(a, b)
      | Term::Gt(a, b)
      | Term::Ge(a, b)
      | Term::Select(a, b) => {
        stack.push(a);
        stack.push(b);
      }
      Term::Ite(a, b, c) | Term::Store(a, b, c) => {
        stack.push(a);
        stack.push(b);
        stack.push(c);
      }
      Term::And(ts) | Term::Or(ts) => stack.extend(ts.iter()),
    }
  }
  Ok(())
}

/// Declarations for every symbol in `terms` followed by one `assert` per entry of `assertions`.
pub fn assert_terms(assertions: &[&Term], extra_symbols: &[Term]) -> Result<SMT2, SolverError> {
  let mut decls = BTreeMap::new();
  for t in assertions.iter().copied().chain(extra_symbols.iter()) {
    collect_vars(t, &mut decls)?;
  }
  Ok(SMT2 {
    declarations: decls
      .iter()
      .map(|(name, sort)| format!("(declare-fun {} () {})", symbol(name), sort_to_smt(sort)))
      .collect(),
    assertions: assertions.iter().map(|t| format!("(assert {})", t)).collect(),
  })
}
