use std::sync::Arc;

use crate::modules::term::Term;

#[derive(Debug)]
struct Link {
  term: Term,
  prev: Option<Arc<Link>>,
}

/// Append-only path constraints. Cloning shares the whole prefix, so forking a
/// context costs O(1) and later pushes on either side stay private.
#[derive(Debug, Clone, Default)]
pub struct ConstraintLog {
  head: Option<Arc<Link>>,
  len: usize,
}

impl ConstraintLog {
  pub fn new() -> Self {
    ConstraintLog::default()
  }

  pub fn push(&mut self, term: Term) {
    if term == Term::Bool(true) {
      return;
    }
    let prev = self.head.take();
    self.head = Some(Arc::new(Link { term, prev }));
    self.len += 1;
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Assertions in insertion order.
  pub fn terms(&self) -> Vec<&Term> {
    let mut out = Vec::with_capacity(self.len);
    let mut curr = self.head.as_deref();
    while let Some(link) = curr {
      out.push(&link.term);
      curr = link.prev.as_deref();
    }
    out.reverse();
    out
  }

  /// Assertions followed by `extra`, ready for a one-off query.
  pub fn with<'a>(&'a self, extra: &'a [Term]) -> Vec<&'a Term> {
    let mut out = self.terms();
    out.extend(extra.iter());
    out
  }

  /// Whether both logs still point at the same latest assertion.
  pub fn shares_head_with(&self, other: &ConstraintLog) -> bool {
    match (&self.head, &other.head) {
      (Some(a), Some(b)) => Arc::ptr_eq(a, b),
      (None, None) => true,
      _ => false,
    }
  }
}

impl Drop for ConstraintLog {
  fn drop(&mut self) {
    let mut curr = self.head.take();
    while let Some(link) = curr {
      match Arc::try_unwrap(link) {
        Ok(mut owned) => curr = owned.prev.take(),
        Err(_) => break,
      }
    }
  }
}
