use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::modules::error::SymError;
use crate::modules::ir::Constant;
use crate::modules::soltype::SolType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sort {
  Bool,
  Int,
  Str,
  Array(Box<Sort>, Box<Sort>),
}

impl Sort {
  pub fn array(domain: Sort, range: Sort) -> Sort {
    Sort::Array(Box::new(domain), Box::new(range))
  }

  /// Sort used for a value of declared type `ty`. Mappings and arrays become
  /// integer-indexed arrays; only `bool` leaves keep a boolean element sort.
  pub fn of(ty: &SolType) -> Sort {
    if ty.is_string() {
      Sort::Str
    } else {
      Sort::stored(ty)
    }
  }

  fn stored(ty: &SolType) -> Sort {
    match ty {
      SolType::Mapping(_, value) => Sort::array(Sort::Int, Sort::stored(value)),
      SolType::Array(elem, _) => Sort::array(Sort::Int, Sort::stored(elem)),
      t if t.is_bool() => Sort::Bool,
      _ => Sort::Int,
    }
  }

  pub fn is_array(&self) -> bool {
    matches!(self, Sort::Array(..))
  }
}

/// Symbolic term over integers, booleans, strings and arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
  Var(String, Sort),
  Int(BigInt),
  Bool(bool),
  Str(String),
  Add(Box<Term>, Box<Term>),
  Sub(Box<Term>, Box<Term>),
  Mul(Box<Term>, Box<Term>),
  Div(Box<Term>, Box<Term>),
  Mod(Box<Term>, Box<Term>),
  Eq(Box<Term>, Box<Term>),
  Lt(Box<Term>, Box<Term>),
  Le(Box<Term>, Box<Term>),
  Gt(Box<Term>, Box<Term>),
  Ge(Box<Term>, Box<Term>),
  Not(Box<Term>),
  And(Vec<Term>),
  Or(Vec<Term>),
  Ite(Box<Term>, Box<Term>, Box<Term>),
  Select(Box<Term>, Box<Term>),
  Store(Box<Term>, Box<Term>, Box<Term>),
}

fn sort_error(what: &str, a: &Term, b: &Term) -> SymError {
  SymError::Sort(format!("{}: {:?} vs {:?}", what, a.sort(), b.sort()))
}

impl Term {
  pub fn var(name: impl Into<String>, sort: Sort) -> Term {
    Term::Var(name.into(), sort)
  }

  pub fn int<T: Into<BigInt>>(v: T) -> Term {
    Term::Int(v.into())
  }

  pub fn zero() -> Term {
    Term::Int(BigInt::zero())
  }

  pub fn from_constant(c: &Constant) -> Term {
    match c {
      Constant::Bool(b) => Term::Bool(*b),
      Constant::Int(i) => Term::Int(i.clone()),
      Constant::Str(s) => Term::Str(s.clone()),
    }
  }

  /// Default value of a sort, `None` for arrays.
  pub fn default_of(sort: &Sort) -> Option<Term> {
    match sort {
      Sort::Bool => Some(Term::Bool(false)),
      Sort::Int => Some(Term::zero()),
      Sort::Str => Some(Term::Str(String::new())),
      Sort::Array(..) => None,
    }
  }

  pub fn sort(&self) -> Sort {
    match self {
      Term::Var(_, s) => s.clone(),
      Term::Int(_) | Term::Add(..) | Term::Sub(..) | Term::Mul(..) | Term::Div(..) | Term::Mod(..) => Sort::Int,
      Term::Str(_) => Sort::Str,
      Term::Bool(_)
      | Term::Eq(..)
      | Term::Lt(..)
      | Term::Le(..)
      | Term::Gt(..)
      | Term::Ge(..)
      | Term::Not(_)
      | Term::And(_)
      | Term::Or(_) => Sort::Bool,
      Term::Ite(_, t, _) => t.sort(),
      Term::Select(a, _) => match a.sort() {
        Sort::Array(_, range) => *range,
        other => other,
      },
      Term::Store(a, _, _) => a.sort(),
    }
  }

  pub fn as_var_name(&self) -> Option<&str> {
    match self {
      Term::Var(name, _) => Some(name),
      _ => None,
    }
  }

  /// Name used when deriving related symbols (`<name>.length`, `<name>.code`, ...).
  pub fn name_hint(&self) -> String {
    match self {
      Term::Var(name, _) => name.clone(),
      other => other.to_string().replace('|', ""),
    }
  }

  pub fn derived(&self, suffix: &str, sort: Sort) -> Term {
    Term::Var(format!("{}.{}", self.name_hint(), suffix), sort)
  }

  /// Reconciles a boolean with the integer literals `0`/`1` (and the other way round).
  fn coerce_to(sort: &Sort, t: Term) -> Term {
    match (sort, &t) {
      (Sort::Bool, Term::Int(i)) if i.is_zero() || i.is_one() => Term::Bool(i.is_one()),
      (Sort::Int, Term::Bool(b)) => Term::int(u8::from(*b)),
      _ => t,
    }
  }

  /// `t` as a value of `sort`, when it already is one or a literal converts.
  pub fn fit(t: Term, sort: &Sort) -> Option<Term> {
    let t = Term::coerce_to(sort, t);
    if &t.sort() == sort {
      Some(t)
    } else {
      None
    }
  }

  fn coerce(a: Term, b: Term) -> (Term, Term) {
    let b = Term::coerce_to(&a.sort(), b);
    let a = Term::coerce_to(&b.sort(), a);
    (a, b)
  }

  pub fn eq(a: Term, b: Term) -> Result<Term, SymError> {
    let (a, b) = Term::coerce(a, b);
    if a.sort() != b.sort() {
      return Err(sort_error("==", &a, &b));
    }
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) => Term::Bool(x == y),
      (Term::Bool(x), Term::Bool(y)) => Term::Bool(x == y),
      (Term::Str(x), Term::Str(y)) => Term::Bool(x == y),
      _ if a == b => Term::Bool(true),
      _ => Term::Eq(Box::new(a), Box::new(b)),
    })
  }

  pub fn ne(a: Term, b: Term) -> Result<Term, SymError> {
    Ok(Term::not(Term::eq(a, b)?))
  }

  fn int_pair(what: &str, a: &Term, b: &Term) -> Result<(), SymError> {
    if a.sort() != Sort::Int || b.sort() != Sort::Int {
      return Err(sort_error(what, a, b));
    }
    Ok(())
  }

  fn compare(
    what: &str,
    a: Term,
    b: Term,
    fold: fn(&BigInt, &BigInt) -> bool,
    build: fn(Box<Term>, Box<Term>) -> Term,
  ) -> Result<Term, SymError> {
    Term::int_pair(what, &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) => Term::Bool(fold(x, y)),
      _ => build(Box::new(a), Box::new(b)),
    })
  }

  pub fn lt(a: Term, b: Term) -> Result<Term, SymError> {
    Term::compare("<", a, b, |x, y| x < y, Term::Lt)
  }

  pub fn le(a: Term, b: Term) -> Result<Term, SymError> {
    Term::compare("<=", a, b, |x, y| x <= y, Term::Le)
  }

  pub fn gt(a: Term, b: Term) -> Result<Term, SymError> {
    Term::compare(">", a, b, |x, y| x > y, Term::Gt)
  }

  pub fn ge(a: Term, b: Term) -> Result<Term, SymError> {
    Term::compare(">=", a, b, |x, y| x >= y, Term::Ge)
  }

  pub fn add(a: Term, b: Term) -> Result<Term, SymError> {
    Term::int_pair("+", &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) => Term::Int(x + y),
      (Term::Int(x), _) if x.is_zero() => b,
      (_, Term::Int(y)) if y.is_zero() => a,
      _ => Term::Add(Box::new(a), Box::new(b)),
    })
  }

  pub fn sub(a: Term, b: Term) -> Result<Term, SymError> {
    Term::int_pair("-", &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) => Term::Int(x - y),
      (_, Term::Int(y)) if y.is_zero() => a,
      _ => Term::Sub(Box::new(a), Box::new(b)),
    })
  }

  pub fn mul(a: Term, b: Term) -> Result<Term, SymError> {
    Term::int_pair("*", &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) => Term::Int(x * y),
      (Term::Int(x), _) if x.is_one() => b,
      (_, Term::Int(y)) if y.is_one() => a,
      _ => Term::Mul(Box::new(a), Box::new(b)),
    })
  }

  pub fn div(a: Term, b: Term) -> Result<Term, SymError> {
    Term::int_pair("/", &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) if !x.is_negative() && y.is_positive() => Term::Int(x / y),
      (_, Term::Int(y)) if y.is_one() => a,
      _ => Term::Div(Box::new(a), Box::new(b)),
    })
  }

  pub fn modulo(a: Term, b: Term) -> Result<Term, SymError> {
    Term::int_pair("%", &a, &b)?;
    Ok(match (&a, &b) {
      (Term::Int(x), Term::Int(y)) if !x.is_negative() && y.is_positive() => Term::Int(x % y),
      _ => Term::Mod(Box::new(a), Box::new(b)),
    })
  }

  /// `a ** b` when the exponent is a small literal, `None` otherwise.
  pub fn pow(a: Term, b: Term) -> Result<Option<Term>, SymError> {
    Term::int_pair("**", &a, &b)?;
    let exp = match &b {
      Term::Int(e) => e.to_u32(),
      _ => None,
    };
    Ok(match (exp, &a) {
      (Some(e), Term::Int(base)) if e <= 256 => Some(Term::Int(num_traits::pow(base.clone(), e as usize))),
      (Some(0), _) => Some(Term::int(1)),
      (Some(e), _) if e <= 8 => {
        let mut acc = a.clone();
        for _ in 1..e {
          acc = Term::mul(acc, a.clone())?;
        }
        Some(acc)
      }
      _ => None,
    })
  }

  pub fn not(t: Term) -> Term {
    match t {
      Term::Bool(b) => Term::Bool(!b),
      Term::Not(inner) => *inner,
      other => Term::Not(Box::new(other)),
    }
  }

  pub fn and(terms: Vec<Term>) -> Term {
    let mut flat = vec![];
    for t in terms {
      match t {
        Term::Bool(true) => {}
        Term::Bool(false) => return Term::Bool(false),
        Term::And(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    match flat.len() {
      0 => Term::Bool(true),
      1 => flat.remove(0),
      _ => Term::And(flat),
    }
  }

  pub fn or(terms: Vec<Term>) -> Term {
    let mut flat = vec![];
    for t in terms {
      match t {
        Term::Bool(false) => {}
        Term::Bool(true) => return Term::Bool(true),
        Term::Or(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    match flat.len() {
      0 => Term::Bool(false),
      1 => flat.remove(0),
      _ => Term::Or(flat),
    }
  }

  pub fn implies(a: Term, b: Term) -> Term {
    Term::or(vec![Term::not(a), b])
  }

  pub fn ite(c: Term, t: Term, e: Term) -> Result<Term, SymError> {
    let (t, e) = Term::coerce(t, e);
    if t.sort() != e.sort() {
      return Err(sort_error("ite", &t, &e));
    }
    Ok(match c {
      Term::Bool(true) => t,
      Term::Bool(false) => e,
      c => Term::Ite(Box::new(c), Box::new(t), Box::new(e)),
    })
  }

  /// Boolean view of a branch or `require` predicate.
  pub fn truthy(t: Term) -> Result<Term, SymError> {
    match t.sort() {
      Sort::Bool => Ok(t),
      Sort::Int => Term::ne(t, Term::zero()),
      other => Err(SymError::Sort(format!("predicate of sort {:?}", other))),
    }
  }

  pub fn select(arr: Term, idx: Term) -> Result<Term, SymError> {
    let domain = match arr.sort() {
      Sort::Array(domain, _) => *domain,
      _ => return Err(sort_error("select on non-array", &arr, &idx)),
    };
    let idx = Term::coerce_to(&domain, idx);
    if idx.sort() != domain {
      return Err(sort_error("select index", &arr, &idx));
    }
    if let Term::Store(_, key, value) = &arr {
      if **key == idx {
        return Ok((**value).clone());
      }
    }
    Ok(Term::Select(Box::new(arr), Box::new(idx)))
  }

  pub fn store(arr: Term, idx: Term, value: Term) -> Result<Term, SymError> {
    let (domain, range) = match arr.sort() {
      Sort::Array(domain, range) => (*domain, *range),
      _ => return Err(sort_error("store on non-array", &arr, &idx)),
    };
    let idx = Term::coerce_to(&domain, idx);
    let value = Term::coerce_to(&range, value);
    if idx.sort() != domain {
      return Err(sort_error("store index", &arr, &idx));
    }
    if value.sort() != range {
      return Err(sort_error("store value", &arr, &value));
    }
    Ok(Term::Store(Box::new(arr), Box::new(idx), Box::new(value)))
  }
}

/// Symbolic value of an IR variable: a single term, or one per tuple element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  Term(Term),
  Tuple(Vec<Value>),
}

impl Value {
  pub fn term(&self) -> Result<&Term, SymError> {
    match self {
      Value::Term(t) => Ok(t),
      Value::Tuple(_) => Err(SymError::Malformed("tuple used where a single value is expected".into())),
    }
  }

  pub fn into_term(self) -> Result<Term, SymError> {
    match self {
      Value::Term(t) => Ok(t),
      Value::Tuple(_) => Err(SymError::Malformed("tuple used where a single value is expected".into())),
    }
  }
}

impl From<Term> for Value {
  fn from(t: Term) -> Self {
    Value::Term(t)
  }
}
