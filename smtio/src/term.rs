use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type Ident = Arc<String>;

pub type Sort = Arc<SortX>;
pub type Sorts = Arc<Vec<Sort>>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum SortX {
    Bool,
    Int,
    Perm,
    Ref,
    Snap,
    Seq(Sort),
    Set(Sort),
    Multiset(Sort),
    /// Field-value functions, one sort per field, with the field's value sort
    FieldValueFunction(Ident, Sort),
    /// Predicate-snap functions, one sort per predicate
    PredicateSnapFunction(Ident),
}

pub type Fun = Arc<FunX>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FunX {
    pub name: Ident,
    pub arg_sorts: Sorts,
    pub sort: Sort,
}

pub type Binder<A> = Arc<BinderX<A>>;
pub type Binders<A> = Arc<Vec<Binder<A>>>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BinderX<A> {
    pub name: Ident,
    pub a: A,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Quant {
    Forall,
    Exists,
}

pub type Trigger = Arc<Vec<Term>>;
pub type Triggers = Arc<Vec<Trigger>>;

/// Quantifier id, also used to derive the skolemid
pub type Qid = Ident;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Bool(bool),
    Int(BigInt),
    Null,
    Unit,
    NoPerm,
    FullPerm,
    EmptySet(Sort),
    EmptySeq(Sort),
    EmptyMultiset(Sort),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    /// 0 < p, on permissions
    IsPositive,
    First,
    Second,
    SetCard,
    SeqLen,
    MultisetCard,
    SingletonSet,
    SingletonSeq,
    SingletonMultiset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Implies,
    Eq,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    EuclideanDiv,
    EuclideanMod,
    /// numerator / denominator, both Int, yielding Perm
    FractionPerm,
    PermPlus,
    PermMinus,
    PermTimes,
    PermMin,
    PermLess,
    PermAtMost,
    Combine,
    SetAdd,
    SetUnion,
    SetIntersection,
    SetDifference,
    SetIn,
    SetSubset,
    SeqAppend,
    SeqIndex,
    SeqTake,
    SeqDrop,
    MultisetUnion,
    MultisetCount,
}

pub type Term = Arc<TermX>;
pub type Terms = Arc<Vec<Term>>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TermX {
    Const(Constant),
    Var(Ident, Sort),
    App(Fun, Terms),
    Unary(UnaryOp, Term),
    Binary(BinaryOp, Term, Term),
    And(Terms),
    Or(Terms),
    Ite(Term, Term, Term),
    SeqUpdate(Term, Term, Term),
    Quant(Quant, Binders<Sort>, Triggers, Qid, Term),
    Let(Binder<Term>, Term),
    /// Field-value-function lookup: field name, fvf, receiver
    Lookup(Ident, Term, Term),
    /// Domain of a field-value function, a Set<$Ref>
    Domain(Ident, Term),
    /// Predicate-snap-function lookup: predicate name, psf, arguments
    PredLookup(Ident, Term, Terms),
    PredDomain(Ident, Term),
    /// Bridges a term into another sort (e.g. a field value into Snap)
    SortWrapper(Sort, Term),
}

pub type Decl = Arc<DeclX>;
pub type Decls = Arc<Vec<Decl>>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum DeclX {
    /// declare-sort of a mangled sort name
    Sort(Sort),
    Const(Ident, Sort),
    Fun(Fun),
    /// define-fun; used for the split algorithm's permission macros
    DefineFun(Fun, Binders<Sort>, Term),
}

impl SortX {
    pub fn is_bool(&self) -> bool {
        matches!(self, SortX::Bool)
    }
}

impl TermX {
    /// Every well-formed term has a unique sort.
    pub fn sort(&self) -> Sort {
        match self {
            TermX::Const(c) => match c {
                Constant::Bool(_) => Arc::new(SortX::Bool),
                Constant::Int(_) => Arc::new(SortX::Int),
                Constant::Null => Arc::new(SortX::Ref),
                Constant::Unit => Arc::new(SortX::Snap),
                Constant::NoPerm | Constant::FullPerm => Arc::new(SortX::Perm),
                Constant::EmptySet(s) => Arc::new(SortX::Set(s.clone())),
                Constant::EmptySeq(s) => Arc::new(SortX::Seq(s.clone())),
                Constant::EmptyMultiset(s) => Arc::new(SortX::Multiset(s.clone())),
            },
            TermX::Var(_, sort) => sort.clone(),
            TermX::App(fun, _) => fun.sort.clone(),
            TermX::Unary(op, t) => match op {
                UnaryOp::Not | UnaryOp::IsPositive => Arc::new(SortX::Bool),
                UnaryOp::First | UnaryOp::Second => Arc::new(SortX::Snap),
                UnaryOp::SetCard | UnaryOp::SeqLen | UnaryOp::MultisetCard => {
                    Arc::new(SortX::Int)
                }
                UnaryOp::SingletonSet => Arc::new(SortX::Set(t.sort())),
                UnaryOp::SingletonSeq => Arc::new(SortX::Seq(t.sort())),
                UnaryOp::SingletonMultiset => Arc::new(SortX::Multiset(t.sort())),
            },
            TermX::Binary(op, lhs, _) => match op {
                BinaryOp::Implies
                | BinaryOp::Eq
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::PermLess
                | BinaryOp::PermAtMost
                | BinaryOp::SetIn
                | BinaryOp::SetSubset => Arc::new(SortX::Bool),
                BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::EuclideanDiv
                | BinaryOp::EuclideanMod
                | BinaryOp::MultisetCount => Arc::new(SortX::Int),
                BinaryOp::FractionPerm
                | BinaryOp::PermPlus
                | BinaryOp::PermMinus
                | BinaryOp::PermTimes
                | BinaryOp::PermMin => Arc::new(SortX::Perm),
                BinaryOp::Combine => Arc::new(SortX::Snap),
                BinaryOp::SetAdd
                | BinaryOp::SetUnion
                | BinaryOp::SetIntersection
                | BinaryOp::SetDifference
                | BinaryOp::SeqAppend
                | BinaryOp::SeqTake
                | BinaryOp::SeqDrop
                | BinaryOp::MultisetUnion => lhs.sort(),
                BinaryOp::SeqIndex => match &*lhs.sort() {
                    SortX::Seq(elem) => elem.clone(),
                    _ => panic!("internal error: SeqIndex applied to non-sequence"),
                },
            },
            TermX::And(_) | TermX::Or(_) => Arc::new(SortX::Bool),
            TermX::Ite(_, thn, _) => thn.sort(),
            TermX::SeqUpdate(s, _, _) => s.sort(),
            TermX::Quant(..) => Arc::new(SortX::Bool),
            TermX::Let(_, body) => body.sort(),
            TermX::Lookup(_, fvf, _) => match &*fvf.sort() {
                SortX::FieldValueFunction(_, value) => value.clone(),
                _ => panic!("internal error: Lookup applied to non-FVF"),
            },
            TermX::Domain(_, _) => Arc::new(SortX::Set(Arc::new(SortX::Ref))),
            TermX::PredLookup(_, _, _) => Arc::new(SortX::Snap),
            TermX::PredDomain(_, _) => Arc::new(SortX::Set(Arc::new(SortX::Snap))),
            TermX::SortWrapper(sort, _) => sort.clone(),
        }
    }
}

pub fn str_ident(x: &str) -> Ident {
    Arc::new(x.to_string())
}

pub fn mk_true() -> Term {
    Arc::new(TermX::Const(Constant::Bool(true)))
}

pub fn mk_false() -> Term {
    Arc::new(TermX::Const(Constant::Bool(false)))
}

pub fn mk_bool(b: bool) -> Term {
    if b { mk_true() } else { mk_false() }
}

pub fn mk_int<I: Into<BigInt>>(i: I) -> Term {
    Arc::new(TermX::Const(Constant::Int(i.into())))
}

pub fn mk_null() -> Term {
    Arc::new(TermX::Const(Constant::Null))
}

pub fn mk_unit() -> Term {
    Arc::new(TermX::Const(Constant::Unit))
}

pub fn no_perm() -> Term {
    Arc::new(TermX::Const(Constant::NoPerm))
}

pub fn full_perm() -> Term {
    Arc::new(TermX::Const(Constant::FullPerm))
}

pub fn mk_var(x: &str, sort: &Sort) -> Term {
    Arc::new(TermX::Var(str_ident(x), sort.clone()))
}

pub fn ident_var(x: &Ident, sort: &Sort) -> Term {
    Arc::new(TermX::Var(x.clone(), sort.clone()))
}

pub fn mk_app(fun: &Fun, args: &[Term]) -> Term {
    Arc::new(TermX::App(fun.clone(), Arc::new(args.to_vec())))
}

fn is_true(t: &Term) -> bool {
    matches!(&**t, TermX::Const(Constant::Bool(true)))
}

fn is_false(t: &Term) -> bool {
    matches!(&**t, TermX::Const(Constant::Bool(false)))
}

pub fn mk_not(t: &Term) -> Term {
    match &**t {
        TermX::Const(Constant::Bool(b)) => mk_bool(!b),
        TermX::Unary(UnaryOp::Not, inner) => inner.clone(),
        _ => Arc::new(TermX::Unary(UnaryOp::Not, t.clone())),
    }
}

pub fn mk_and(terms: &[Term]) -> Term {
    if terms.iter().any(is_false) {
        return mk_false();
    }
    let mut flat: Vec<Term> = Vec::new();
    for t in terms {
        match &**t {
            TermX::Const(Constant::Bool(true)) => {}
            TermX::And(ts) => flat.extend(ts.iter().cloned()),
            _ => flat.push(t.clone()),
        }
    }
    if flat.len() == 0 {
        mk_true()
    } else if flat.len() == 1 {
        flat[0].clone()
    } else {
        Arc::new(TermX::And(Arc::new(flat)))
    }
}

pub fn mk_or(terms: &[Term]) -> Term {
    if terms.iter().any(is_true) {
        return mk_true();
    }
    let flat: Vec<Term> = terms.iter().filter(|t| !is_false(t)).cloned().collect();
    if flat.len() == 0 {
        mk_false()
    } else if flat.len() == 1 {
        flat[0].clone()
    } else {
        Arc::new(TermX::Or(Arc::new(flat)))
    }
}

pub fn mk_implies(lhs: &Term, rhs: &Term) -> Term {
    match (&**lhs, &**rhs) {
        (TermX::Const(Constant::Bool(false)), _) => mk_true(),
        (TermX::Const(Constant::Bool(true)), _) => rhs.clone(),
        (_, TermX::Const(Constant::Bool(true))) => mk_true(),
        (_, TermX::Const(Constant::Bool(false))) => mk_not(lhs),
        _ => Arc::new(TermX::Binary(BinaryOp::Implies, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_eq(lhs: &Term, rhs: &Term) -> Term {
    if lhs == rhs {
        return mk_true();
    }
    match (&**lhs, &**rhs) {
        (TermX::Const(Constant::Bool(true)), _) => rhs.clone(),
        (_, TermX::Const(Constant::Bool(true))) => lhs.clone(),
        (TermX::Const(c1), TermX::Const(c2)) if c1 != c2 => match (c1, c2) {
            (Constant::Bool(_), Constant::Bool(_))
            | (Constant::Int(_), Constant::Int(_))
            | (Constant::NoPerm | Constant::FullPerm, Constant::NoPerm | Constant::FullPerm) => {
                mk_false()
            }
            _ => Arc::new(TermX::Binary(BinaryOp::Eq, lhs.clone(), rhs.clone())),
        },
        _ => Arc::new(TermX::Binary(BinaryOp::Eq, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_ite(cond: &Term, thn: &Term, els: &Term) -> Term {
    match &**cond {
        TermX::Const(Constant::Bool(true)) => thn.clone(),
        TermX::Const(Constant::Bool(false)) => els.clone(),
        _ if thn == els => thn.clone(),
        _ => Arc::new(TermX::Ite(cond.clone(), thn.clone(), els.clone())),
    }
}

fn int_lit(t: &Term) -> Option<&BigInt> {
    match &**t {
        TermX::Const(Constant::Int(i)) => Some(i),
        _ => None,
    }
}

pub fn mk_lt(lhs: &Term, rhs: &Term) -> Term {
    match (int_lit(lhs), int_lit(rhs)) {
        (Some(a), Some(b)) => mk_bool(a < b),
        _ => Arc::new(TermX::Binary(BinaryOp::Lt, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_le(lhs: &Term, rhs: &Term) -> Term {
    match (int_lit(lhs), int_lit(rhs)) {
        (Some(a), Some(b)) => mk_bool(a <= b),
        _ => Arc::new(TermX::Binary(BinaryOp::Le, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_add(lhs: &Term, rhs: &Term) -> Term {
    match (int_lit(lhs), int_lit(rhs)) {
        (Some(a), Some(b)) => mk_int(a + b),
        _ => Arc::new(TermX::Binary(BinaryOp::Add, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_sub(lhs: &Term, rhs: &Term) -> Term {
    match (int_lit(lhs), int_lit(rhs)) {
        (Some(a), Some(b)) => mk_int(a - b),
        _ => Arc::new(TermX::Binary(BinaryOp::Sub, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_mul(lhs: &Term, rhs: &Term) -> Term {
    match (int_lit(lhs), int_lit(rhs)) {
        (Some(a), Some(b)) => mk_int(a * b),
        _ => Arc::new(TermX::Binary(BinaryOp::Mul, lhs.clone(), rhs.clone())),
    }
}

/// The rational value of a permission term built from literals, if any.
pub fn perm_rational(t: &Term) -> Option<BigRational> {
    match &**t {
        TermX::Const(Constant::NoPerm) => Some(BigRational::zero()),
        TermX::Const(Constant::FullPerm) => Some(BigRational::one()),
        TermX::Binary(BinaryOp::FractionPerm, n, d) => match (int_lit(n), int_lit(d)) {
            (Some(n), Some(d)) if !d.is_zero() => {
                Some(BigRational::new(n.clone(), d.clone()))
            }
            _ => None,
        },
        TermX::Binary(BinaryOp::PermPlus, a, b) => Some(perm_rational(a)? + perm_rational(b)?),
        TermX::Binary(BinaryOp::PermMinus, a, b) => Some(perm_rational(a)? - perm_rational(b)?),
        TermX::Binary(BinaryOp::PermTimes, a, b) => Some(perm_rational(a)? * perm_rational(b)?),
        TermX::Binary(BinaryOp::PermMin, a, b) => {
            let (a, b) = (perm_rational(a)?, perm_rational(b)?);
            Some(if a <= b { a } else { b })
        }
        _ => None,
    }
}

pub fn rational_to_perm(r: &BigRational) -> Term {
    if r.is_zero() {
        no_perm()
    } else if r.is_one() {
        full_perm()
    } else {
        Arc::new(TermX::Binary(
            BinaryOp::FractionPerm,
            mk_int(r.numer().clone()),
            mk_int(r.denom().clone()),
        ))
    }
}

pub fn mk_frac(numer: &Term, denom: &Term) -> Term {
    let t = Arc::new(TermX::Binary(BinaryOp::FractionPerm, numer.clone(), denom.clone()));
    match perm_rational(&t) {
        Some(r) => rational_to_perm(&r),
        None => t,
    }
}

pub fn mk_perm_plus(lhs: &Term, rhs: &Term) -> Term {
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => rational_to_perm(&(a + b)),
        (_, Some(b)) if b.is_zero() => lhs.clone(),
        (Some(a), _) if a.is_zero() => rhs.clone(),
        _ => Arc::new(TermX::Binary(BinaryOp::PermPlus, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_perm_minus(lhs: &Term, rhs: &Term) -> Term {
    if lhs == rhs {
        return no_perm();
    }
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => rational_to_perm(&(a - b)),
        (_, Some(b)) if b.is_zero() => lhs.clone(),
        _ => Arc::new(TermX::Binary(BinaryOp::PermMinus, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_perm_times(lhs: &Term, rhs: &Term) -> Term {
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => rational_to_perm(&(a * b)),
        (Some(a), _) if a.is_one() => rhs.clone(),
        (_, Some(b)) if b.is_one() => lhs.clone(),
        (Some(a), _) if a.is_zero() => no_perm(),
        (_, Some(b)) if b.is_zero() => no_perm(),
        _ => Arc::new(TermX::Binary(BinaryOp::PermTimes, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_perm_min(lhs: &Term, rhs: &Term) -> Term {
    if lhs == rhs {
        return lhs.clone();
    }
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => rational_to_perm(&if a <= b { a } else { b }),
        _ => Arc::new(TermX::Binary(BinaryOp::PermMin, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_perm_less(lhs: &Term, rhs: &Term) -> Term {
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => mk_bool(a < b),
        _ => Arc::new(TermX::Binary(BinaryOp::PermLess, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_perm_at_most(lhs: &Term, rhs: &Term) -> Term {
    if lhs == rhs {
        return mk_true();
    }
    match (perm_rational(lhs), perm_rational(rhs)) {
        (Some(a), Some(b)) => mk_bool(a <= b),
        _ => Arc::new(TermX::Binary(BinaryOp::PermAtMost, lhs.clone(), rhs.clone())),
    }
}

pub fn mk_is_positive(t: &Term) -> Term {
    match perm_rational(t) {
        Some(r) => mk_bool(r.is_positive()),
        None => Arc::new(TermX::Unary(UnaryOp::IsPositive, t.clone())),
    }
}

/// 0 <= p
pub fn mk_is_non_negative(t: &Term) -> Term {
    mk_perm_at_most(&no_perm(), t)
}

pub fn mk_combine(lhs: &Term, rhs: &Term) -> Term {
    Arc::new(TermX::Binary(BinaryOp::Combine, lhs.clone(), rhs.clone()))
}

pub fn mk_first(t: &Term) -> Term {
    match &**t {
        TermX::Binary(BinaryOp::Combine, l, _) => l.clone(),
        _ => Arc::new(TermX::Unary(UnaryOp::First, t.clone())),
    }
}

pub fn mk_second(t: &Term) -> Term {
    match &**t {
        TermX::Binary(BinaryOp::Combine, _, r) => r.clone(),
        _ => Arc::new(TermX::Unary(UnaryOp::Second, t.clone())),
    }
}

/// Bridge `t` into `sort`; identity when the sorts already agree.
pub fn mk_sort_wrapper(t: &Term, sort: &Sort) -> Term {
    if &t.sort() == sort {
        return t.clone();
    }
    match &**t {
        TermX::SortWrapper(_, inner) if &inner.sort() == sort => inner.clone(),
        _ => Arc::new(TermX::SortWrapper(sort.clone(), t.clone())),
    }
}

pub fn mk_binder<A: Clone>(x: &Ident, a: &A) -> Binder<A> {
    Arc::new(BinderX { name: x.clone(), a: a.clone() })
}

pub fn mk_forall(binders: &Binders<Sort>, triggers: &Triggers, qid: &Qid, body: &Term) -> Term {
    if binders.len() == 0 || is_true(body) {
        body.clone()
    } else {
        Arc::new(TermX::Quant(
            Quant::Forall,
            binders.clone(),
            triggers.clone(),
            qid.clone(),
            body.clone(),
        ))
    }
}

pub fn mk_exists(binders: &Binders<Sort>, triggers: &Triggers, qid: &Qid, body: &Term) -> Term {
    if binders.len() == 0 {
        body.clone()
    } else {
        Arc::new(TermX::Quant(
            Quant::Exists,
            binders.clone(),
            triggers.clone(),
            qid.clone(),
            body.clone(),
        ))
    }
}

pub fn mk_let(x: &Ident, bound: &Term, body: &Term) -> Term {
    Arc::new(TermX::Let(Arc::new(BinderX { name: x.clone(), a: bound.clone() }), body.clone()))
}

pub fn mk_lookup(field: &Ident, fvf: &Term, rcvr: &Term) -> Term {
    Arc::new(TermX::Lookup(field.clone(), fvf.clone(), rcvr.clone()))
}

pub fn mk_domain(field: &Ident, fvf: &Term) -> Term {
    Arc::new(TermX::Domain(field.clone(), fvf.clone()))
}

pub fn mk_unary(op: UnaryOp, t: &Term) -> Term {
    Arc::new(TermX::Unary(op, t.clone()))
}

pub fn mk_binary(op: BinaryOp, lhs: &Term, rhs: &Term) -> Term {
    Arc::new(TermX::Binary(op, lhs.clone(), rhs.clone()))
}

/// Visit every subterm (including quantifier bodies and triggers), preorder.
pub fn visit_term<F: FnMut(&Term)>(term: &Term, f: &mut F) {
    f(term);
    match &**term {
        TermX::Const(_) | TermX::Var(..) => {}
        TermX::App(_, args) | TermX::And(args) | TermX::Or(args) => {
            for t in args.iter() {
                visit_term(t, f);
            }
        }
        TermX::Unary(_, t)
        | TermX::Domain(_, t)
        | TermX::PredDomain(_, t)
        | TermX::SortWrapper(_, t) => visit_term(t, f),
        TermX::Binary(_, t1, t2) | TermX::Lookup(_, t1, t2) => {
            visit_term(t1, f);
            visit_term(t2, f);
        }
        TermX::Ite(t1, t2, t3) | TermX::SeqUpdate(t1, t2, t3) => {
            visit_term(t1, f);
            visit_term(t2, f);
            visit_term(t3, f);
        }
        TermX::Quant(_, _, triggers, _, body) => {
            for trigger in triggers.iter() {
                for t in trigger.iter() {
                    visit_term(t, f);
                }
            }
            visit_term(body, f);
        }
        TermX::Let(binder, body) => {
            visit_term(&binder.a, f);
            visit_term(body, f);
        }
        TermX::PredLookup(_, psf, args) => {
            visit_term(psf, f);
            for t in args.iter() {
                visit_term(t, f);
            }
        }
    }
}

/// Collect the subterms satisfying `pred` (e.g. all quantifications).
pub fn collect_subterms<F: Fn(&TermX) -> bool>(term: &Term, pred: F) -> Vec<Term> {
    let mut found: Vec<Term> = Vec::new();
    visit_term(term, &mut |t: &Term| {
        if pred(t) {
            found.push(t.clone());
        }
    });
    found
}

pub fn contains_var(term: &Term, x: &Ident) -> bool {
    free_vars(term).contains(x)
}

pub fn free_vars(term: &Term) -> HashSet<Ident> {
    let mut vars: HashSet<Ident> = HashSet::new();
    free_vars_rec(term, &mut HashSet::new(), &mut vars);
    vars
}

fn free_vars_rec(term: &Term, bound: &mut HashSet<Ident>, vars: &mut HashSet<Ident>) {
    match &**term {
        TermX::Var(x, _) => {
            if !bound.contains(x) {
                vars.insert(x.clone());
            }
        }
        TermX::Quant(_, binders, triggers, _, body) => {
            let added: Vec<Ident> = binders
                .iter()
                .filter(|b| bound.insert(b.name.clone()))
                .map(|b| b.name.clone())
                .collect();
            for trigger in triggers.iter() {
                for t in trigger.iter() {
                    free_vars_rec(t, bound, vars);
                }
            }
            free_vars_rec(body, bound, vars);
            for x in added {
                bound.remove(&x);
            }
        }
        TermX::Let(binder, body) => {
            free_vars_rec(&binder.a, bound, vars);
            let added = bound.insert(binder.name.clone());
            free_vars_rec(body, bound, vars);
            if added {
                bound.remove(&binder.name);
            }
        }
        _ => {
            let mut children: Vec<Term> = Vec::new();
            collect_children(term, &mut children);
            for c in children {
                free_vars_rec(&c, bound, vars);
            }
        }
    }
}

fn collect_children(term: &Term, children: &mut Vec<Term>) {
    match &**term {
        TermX::Const(_) | TermX::Var(..) => {}
        TermX::App(_, args) | TermX::And(args) | TermX::Or(args) => {
            children.extend(args.iter().cloned())
        }
        TermX::Unary(_, t)
        | TermX::Domain(_, t)
        | TermX::PredDomain(_, t)
        | TermX::SortWrapper(_, t) => children.push(t.clone()),
        TermX::Binary(_, t1, t2) | TermX::Lookup(_, t1, t2) => {
            children.push(t1.clone());
            children.push(t2.clone());
        }
        TermX::Ite(t1, t2, t3) | TermX::SeqUpdate(t1, t2, t3) => {
            children.push(t1.clone());
            children.push(t2.clone());
            children.push(t3.clone());
        }
        TermX::Quant(_, _, _, _, body) => children.push(body.clone()),
        TermX::Let(binder, body) => {
            children.push(binder.a.clone());
            children.push(body.clone());
        }
        TermX::PredLookup(_, psf, args) => {
            children.push(psf.clone());
            children.extend(args.iter().cloned());
        }
    }
}

/// Capture-avoiding substitution of free variables.  Sorts are preserved:
/// callers must only map variables to terms of the same sort.
pub fn subst(term: &Term, map: &HashMap<Ident, Term>) -> Term {
    if map.is_empty() {
        return term.clone();
    }
    match &**term {
        TermX::Const(_) => term.clone(),
        TermX::Var(x, _) => match map.get(x) {
            Some(t) => t.clone(),
            None => term.clone(),
        },
        TermX::App(fun, args) => {
            Arc::new(TermX::App(fun.clone(), subst_all(args, map)))
        }
        TermX::Unary(op, t) => Arc::new(TermX::Unary(*op, subst(t, map))),
        TermX::Binary(op, t1, t2) => {
            Arc::new(TermX::Binary(*op, subst(t1, map), subst(t2, map)))
        }
        TermX::And(ts) => Arc::new(TermX::And(subst_all(ts, map))),
        TermX::Or(ts) => Arc::new(TermX::Or(subst_all(ts, map))),
        TermX::Ite(t1, t2, t3) => {
            Arc::new(TermX::Ite(subst(t1, map), subst(t2, map), subst(t3, map)))
        }
        TermX::SeqUpdate(t1, t2, t3) => {
            Arc::new(TermX::SeqUpdate(subst(t1, map), subst(t2, map), subst(t3, map)))
        }
        TermX::Quant(quant, binders, triggers, qid, body) => {
            let mut map: HashMap<Ident, Term> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for b in binders.iter() {
                map.remove(&b.name);
            }
            if map.is_empty() {
                return term.clone();
            }
            // Rename any binder captured by the replacement terms
            let mut replaced_free: HashSet<Ident> = HashSet::new();
            for t in map.values() {
                replaced_free.extend(free_vars(t));
            }
            let mut new_binders: Vec<Binder<Sort>> = Vec::new();
            for b in binders.iter() {
                if replaced_free.contains(&b.name) {
                    let fresh = rename_away(&b.name, &replaced_free, body);
                    map.insert(b.name.clone(), ident_var(&fresh, &b.a));
                    new_binders.push(Arc::new(BinderX { name: fresh, a: b.a.clone() }));
                } else {
                    new_binders.push(b.clone());
                }
            }
            let triggers: Vec<Trigger> = triggers
                .iter()
                .map(|tr| Arc::new(tr.iter().map(|t| subst(t, &map)).collect::<Vec<_>>()))
                .collect();
            Arc::new(TermX::Quant(
                *quant,
                Arc::new(new_binders),
                Arc::new(triggers),
                qid.clone(),
                subst(body, &map),
            ))
        }
        TermX::Let(binder, body) => {
            let bound = subst(&binder.a, map);
            let mut map: HashMap<Ident, Term> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            map.remove(&binder.name);
            let mut replaced_free: HashSet<Ident> = HashSet::new();
            for t in map.values() {
                replaced_free.extend(free_vars(t));
            }
            let name = if replaced_free.contains(&binder.name) {
                let fresh = rename_away(&binder.name, &replaced_free, body);
                map.insert(binder.name.clone(), ident_var(&fresh, &bound.sort()));
                fresh
            } else {
                binder.name.clone()
            };
            Arc::new(TermX::Let(
                Arc::new(BinderX { name, a: bound }),
                subst(body, &map),
            ))
        }
        TermX::Lookup(f, fvf, rcvr) => {
            Arc::new(TermX::Lookup(f.clone(), subst(fvf, map), subst(rcvr, map)))
        }
        TermX::Domain(f, fvf) => Arc::new(TermX::Domain(f.clone(), subst(fvf, map))),
        TermX::PredLookup(p, psf, args) => {
            Arc::new(TermX::PredLookup(p.clone(), subst(psf, map), subst_all(args, map)))
        }
        TermX::PredDomain(p, psf) => Arc::new(TermX::PredDomain(p.clone(), subst(psf, map))),
        TermX::SortWrapper(sort, t) => {
            Arc::new(TermX::SortWrapper(sort.clone(), subst(t, map)))
        }
    }
}

fn subst_all(terms: &Terms, map: &HashMap<Ident, Term>) -> Terms {
    Arc::new(terms.iter().map(|t| subst(t, map)).collect::<Vec<_>>())
}

fn rename_away(x: &Ident, avoid: &HashSet<Ident>, body: &Term) -> Ident {
    let body_free = free_vars(body);
    let mut n: u64 = 0;
    loop {
        let candidate = Arc::new(format!("{}{}{}", x, crate::def::SUFFIX_RENAME, n));
        if !avoid.contains(&candidate) && !body_free.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Substitute a single variable.
pub fn subst_var(term: &Term, x: &Ident, with: &Term) -> Term {
    let mut map: HashMap<Ident, Term> = HashMap::new();
    map.insert(x.clone(), with.clone());
    subst(term, &map)
}

/// The implicit codomain variable of quantified chunks.
pub fn codomain_var(sort: &Sort) -> Term {
    mk_var(crate::def::CODOMAIN_VAR, sort)
}

/// Rewrite the codomain placeholder `?r` by a given term.
pub fn replace_codomain(term: &Term, with: &Term) -> Term {
    subst_var(term, &str_ident(crate::def::CODOMAIN_VAR), with)
}
