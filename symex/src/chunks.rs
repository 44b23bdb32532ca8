use crate::ast;
use smtio::term::{mk_lookup, replace_codomain, Fun, Ident, Sort, Term};
use std::sync::Arc;

/// Fresh inverse functions minted for a quantified permission, together
/// with their defining axioms.
#[derive(Clone, Debug)]
pub struct InverseFunctions {
    /// One inverse per bound variable, each mapping codomain values back to
    /// the quantified domain.
    pub funs: Vec<Fun>,
    pub qvars: Vec<(Ident, Sort)>,
    pub axioms: Vec<Term>,
}

#[derive(Clone, Debug)]
pub struct FieldChunk {
    pub rcvr: Term,
    pub field: Ident,
    pub value: Term,
    pub perm: Term,
}

impl FieldChunk {
    pub fn with_perm(&self, perm: Term) -> FieldChunk {
        FieldChunk { rcvr: self.rcvr.clone(), field: self.field.clone(), value: self.value.clone(), perm }
    }
}

#[derive(Clone, Debug)]
pub struct PredicateChunk {
    pub name: Ident,
    pub args: Vec<Term>,
    pub snap: Term,
    pub perm: Term,
}

impl PredicateChunk {
    pub fn with_perm(&self, perm: Term) -> PredicateChunk {
        PredicateChunk {
            name: self.name.clone(),
            args: self.args.clone(),
            snap: self.snap.clone(),
            perm,
        }
    }
}

/// A chunk covering a range of receivers for one field.  The permission
/// term is parameterised by the implicit codomain variable `?r`.
#[derive(Clone, Debug)]
pub struct QuantifiedFieldChunk {
    pub field: Ident,
    pub fvf: Term,
    pub perm: Term,
    pub inv: Option<Arc<InverseFunctions>>,
    /// Set when the chunk provably covers a single receiver; enables the
    /// instantiated (unquantified) axiom forms.
    pub singleton_rcvr: Option<Term>,
    /// Syntactic hints (seq/set terms from the receiver or condition) used
    /// by the chunk-order heuristics.
    pub hints: Vec<Term>,
}

impl QuantifiedFieldChunk {
    pub fn perm_at(&self, rcvr: &Term) -> Term {
        replace_codomain(&self.perm, rcvr)
    }

    pub fn value_at(&self, rcvr: &Term) -> Term {
        mk_lookup(&self.field, &self.fvf, rcvr)
    }

    pub fn with_perm(&self, perm: Term) -> QuantifiedFieldChunk {
        QuantifiedFieldChunk {
            field: self.field.clone(),
            fvf: self.fvf.clone(),
            perm,
            inv: self.inv.clone(),
            singleton_rcvr: self.singleton_rcvr.clone(),
            hints: self.hints.clone(),
        }
    }
}

/// The predicate analogue of a quantified field chunk; the permission term
/// is parameterised by the codomain variables `?a0, ?a1, ...`.
#[derive(Clone, Debug)]
pub struct QuantifiedPredicateChunk {
    pub name: Ident,
    pub psf: Term,
    pub arg_sorts: Vec<Sort>,
    pub perm: Term,
    pub inv: Option<Arc<InverseFunctions>>,
}

impl QuantifiedPredicateChunk {
    pub fn with_perm(&self, perm: Term) -> QuantifiedPredicateChunk {
        QuantifiedPredicateChunk {
            name: self.name.clone(),
            psf: self.psf.clone(),
            arg_sorts: self.arg_sorts.clone(),
            perm,
            inv: self.inv.clone(),
        }
    }
}

/// A ghost chunk for a packaged magic wand, carrying the evaluated bindings
/// of the wand's free variables.
#[derive(Clone, Debug)]
pub struct MagicWandChunk {
    pub label: Option<Ident>,
    pub lhs: ast::Expr,
    pub rhs: ast::Expr,
    pub bindings: Vec<Term>,
    pub snap: Term,
}

#[derive(Clone, Debug)]
pub enum Chunk {
    Field(FieldChunk),
    Predicate(PredicateChunk),
    QuantField(QuantifiedFieldChunk),
    QuantPredicate(QuantifiedPredicateChunk),
    MagicWand(MagicWandChunk),
}

impl Chunk {
    /// The resource this chunk holds permission to.
    pub fn id(&self) -> Option<&Ident> {
        match self {
            Chunk::Field(c) => Some(&c.field),
            Chunk::Predicate(c) => Some(&c.name),
            Chunk::QuantField(c) => Some(&c.field),
            Chunk::QuantPredicate(c) => Some(&c.name),
            Chunk::MagicWand(c) => c.label.as_ref(),
        }
    }

    pub fn perm(&self) -> Option<&Term> {
        match self {
            Chunk::Field(c) => Some(&c.perm),
            Chunk::Predicate(c) => Some(&c.perm),
            Chunk::QuantField(c) => Some(&c.perm),
            Chunk::QuantPredicate(c) => Some(&c.perm),
            // wands are not fractional
            Chunk::MagicWand(_) => None,
        }
    }
}
