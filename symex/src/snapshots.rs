use smtio::term::{mk_first, mk_second, mk_sort_wrapper, mk_unit, Sort, Term};
use smtio::term_util::snap_sort;
use std::rc::Rc;

/// Yields, for a requested sort, the snapshot term that should underlie any
/// chunk produced for the assertion at hand.
pub type SnapFn<'a> = Rc<dyn Fn(&Sort) -> Term + 'a>;

/// A snapshot function backed by one fixed snapshot term, bridged into the
/// requested sort.
pub fn fixed(snap: Term) -> SnapFn<'static> {
    Rc::new(move |sort| mk_sort_wrapper(&snap, sort))
}

pub fn unit() -> SnapFn<'static> {
    fixed(mk_unit())
}

/// The left half of a conjunction's snapshot.
pub fn first_of<'a>(sf: &SnapFn<'a>) -> SnapFn<'a> {
    let sf = sf.clone();
    Rc::new(move |sort| mk_sort_wrapper(&mk_first(&sf(&snap_sort())), sort))
}

/// The right half of a conjunction's snapshot.
pub fn second_of<'a>(sf: &SnapFn<'a>) -> SnapFn<'a> {
    let sf = sf.clone();
    Rc::new(move |sort| mk_sort_wrapper(&mk_second(&sf(&snap_sort())), sort))
}
