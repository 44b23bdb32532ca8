use crate::chunks::InverseFunctions;
use smtio::term::{Fun, Ident, Term};
use std::sync::Arc;

/// Definitional axioms captured during symbolic execution, later consulted
/// by function axiomatisation.
#[derive(Clone, Debug)]
pub enum Recorded {
    InverseFunctions(Arc<InverseFunctions>),
    FvfDefinition {
        field: Ident,
        fvf: Term,
        value_axioms: Vec<Term>,
        domain_axiom: Option<Term>,
    },
    PsfDefinition {
        predicate: Ident,
        psf: Term,
        value_axioms: Vec<Term>,
    },
    PermMacro {
        fun: Fun,
        body: Term,
    },
}

/// Append-only log of recorded definitions.
#[derive(Debug, Default)]
pub struct FunctionRecorder {
    log: Vec<Recorded>,
}

impl FunctionRecorder {
    pub fn new() -> FunctionRecorder {
        FunctionRecorder { log: Vec::new() }
    }

    pub fn append(&mut self, entry: Recorded) {
        self.log.push(entry);
    }

    pub fn entries(&self) -> &[Recorded] {
        &self.log
    }
}
