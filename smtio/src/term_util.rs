use crate::term::{
    Binder, BinderX, Binders, Fun, FunX, Ident, Sort, SortX, Term, TermX, Trigger, Triggers,
};
use std::sync::Arc;

pub fn bool_sort() -> Sort {
    Arc::new(SortX::Bool)
}

pub fn int_sort() -> Sort {
    Arc::new(SortX::Int)
}

pub fn perm_sort() -> Sort {
    Arc::new(SortX::Perm)
}

pub fn ref_sort() -> Sort {
    Arc::new(SortX::Ref)
}

pub fn snap_sort() -> Sort {
    Arc::new(SortX::Snap)
}

pub fn set_sort(elem: &Sort) -> Sort {
    Arc::new(SortX::Set(elem.clone()))
}

pub fn seq_sort(elem: &Sort) -> Sort {
    Arc::new(SortX::Seq(elem.clone()))
}

pub fn multiset_sort(elem: &Sort) -> Sort {
    Arc::new(SortX::Multiset(elem.clone()))
}

pub fn fvf_sort(field: &Ident, value: &Sort) -> Sort {
    Arc::new(SortX::FieldValueFunction(field.clone(), value.clone()))
}

pub fn psf_sort(predicate: &Ident) -> Sort {
    Arc::new(SortX::PredicateSnapFunction(predicate.clone()))
}

pub fn mk_fun(name: &str, arg_sorts: &[Sort], sort: &Sort) -> Fun {
    Arc::new(FunX {
        name: Arc::new(name.to_string()),
        arg_sorts: Arc::new(arg_sorts.to_vec()),
        sort: sort.clone(),
    })
}

pub fn sort_binder(x: &Ident, sort: &Sort) -> Binder<Sort> {
    Arc::new(BinderX { name: x.clone(), a: sort.clone() })
}

pub fn sort_binders(pairs: &[(Ident, Sort)]) -> Binders<Sort> {
    Arc::new(pairs.iter().map(|(x, s)| sort_binder(x, s)).collect::<Vec<_>>())
}

pub fn mk_trigger(terms: &[Term]) -> Trigger {
    Arc::new(terms.to_vec())
}

pub fn mk_triggers(triggers: &[Trigger]) -> Triggers {
    Arc::new(triggers.to_vec())
}

pub fn no_triggers() -> Triggers {
    Arc::new(vec![])
}

/// True iff the term is a quantification.
pub fn is_quant(t: &Term) -> bool {
    matches!(&**t, TermX::Quant(..))
}
