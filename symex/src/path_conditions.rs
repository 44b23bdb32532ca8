use smtio::term::Term;
use std::collections::HashSet;

/// A stack of scopes of assumed boolean terms, kept in lock-step with the
/// solver's push/pop depth.
#[derive(Debug)]
pub struct PathConditions {
    scopes: Vec<HashSet<Term>>,
}

impl PathConditions {
    pub fn new() -> PathConditions {
        PathConditions { scopes: vec![HashSet::new()] }
    }

    /// Depth of pushed scopes, excluding the base scope.
    pub fn depth(&self) -> u32 {
        (self.scopes.len() - 1) as u32
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashSet::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() <= 1 {
            panic!("internal error: popped the base path-condition scope");
        }
        self.scopes.pop();
    }

    /// Add a term to the topmost scope.
    pub fn add(&mut self, t: Term) {
        self.scopes.last_mut().expect("scopes").insert(t);
    }

    /// Structural membership in any scope; the triviality shortcut for
    /// assertions.
    pub fn contains(&self, t: &Term) -> bool {
        self.scopes.iter().any(|scope| scope.contains(t))
    }

    pub fn all(&self) -> Vec<Term> {
        let mut terms: Vec<Term> = Vec::new();
        for scope in &self.scopes {
            terms.extend(scope.iter().cloned());
        }
        terms
    }

    pub fn reset(&mut self) {
        self.scopes = vec![HashSet::new()];
    }
}
