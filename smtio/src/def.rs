/*
In SMT-LIB format, symbols are built of letters, digits, and:
  ~ ! @ $ % ^ & * _ - + = < > . ? /
(some words, like "pop" and "declare-fun", are reserved.)
Symbols starting with . or @ are reserved for the solver internals, and
the solver likes to introduce symbols containing !.

We use these conventions for generated symbols:
- fresh local constants       x@0, x@1, ...
- renamed bound variables     x!0, x!1, ...
- sort-derived symbols        $Ref, $Snap, $Perm.min, $FVF<f>, Set<$Ref>
- macro definitions           pTaken@0, ...
*/

pub const SUFFIX_FRESH: &str = "@";
pub const SUFFIX_RENAME: &str = "!";

pub const REF_SORT: &str = "$Ref";
pub const REF_NULL: &str = "$Ref.null";
pub const SNAP_SORT: &str = "$Snap";
pub const SNAP_UNIT: &str = "$Snap.unit";
pub const SNAP_COMBINE: &str = "$Snap.combine";
pub const SNAP_FIRST: &str = "$Snap.first";
pub const SNAP_SECOND: &str = "$Snap.second";
pub const PERM_MIN: &str = "$Perm.min";

// The implicit codomain variable of quantified chunks.  It never reaches the
// solver: every emitted axiom substitutes it away first.
pub const CODOMAIN_VAR: &str = "?r";

pub fn codomain_arg(i: usize) -> String {
    format!("?a{}", i)
}

pub fn fvf_sort_name(field: &str) -> String {
    format!("$FVF<{}>", field)
}

pub fn fvf_lookup_name(field: &str) -> String {
    format!("$FVF.lookup_{}", field)
}

pub fn fvf_domain_name(field: &str) -> String {
    format!("$FVF.domain_{}", field)
}

pub fn psf_sort_name(predicate: &str) -> String {
    format!("$PSF<{}>", predicate)
}

pub fn psf_lookup_name(predicate: &str) -> String {
    format!("$PSF.lookup_{}", predicate)
}

pub fn psf_domain_name(predicate: &str) -> String {
    format!("$PSF.domain_{}", predicate)
}

pub fn sort_wrapper_name(from: &str, to: &str) -> String {
    format!("$SortWrappers.{}To{}", from, to)
}

pub fn collection_fun_name(op: &str, elem: &str) -> String {
    format!("{}<{}>", op, elem)
}

pub fn mk_skolem_id(qid: &str) -> String {
    format!("{}-aux", qid)
}
