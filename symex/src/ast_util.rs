use crate::ast::{BinaryOp, Expr, ExprX, Ident, LocX, Spanned, Typ, TypX};
use smtio::term::Sort;
use smtio::term_util::{
    bool_sort, int_sort, multiset_sort, perm_sort, ref_sort, seq_sort, set_sort,
};
use std::collections::HashSet;
use std::sync::Arc;

pub fn typ_to_sort(typ: &Typ) -> Sort {
    match &**typ {
        TypX::Bool => bool_sort(),
        TypX::Int => int_sort(),
        TypX::Perm => perm_sort(),
        TypX::Ref => ref_sort(),
        TypX::Seq(t) => seq_sort(&typ_to_sort(t)),
        TypX::Set(t) => set_sort(&typ_to_sort(t)),
        TypX::Multiset(t) => multiset_sort(&typ_to_sort(t)),
    }
}

/// Split nested conjunctions into top-level conjuncts, left to right.
pub fn top_level_conjuncts(expr: &Expr) -> Vec<Expr> {
    let mut conjuncts: Vec<Expr> = Vec::new();
    collect_conjuncts(expr, &mut conjuncts);
    conjuncts
}

fn collect_conjuncts(expr: &Expr, conjuncts: &mut Vec<Expr>) {
    match &expr.x {
        ExprX::Binary(BinaryOp::And, lhs, rhs) => {
            collect_conjuncts(lhs, conjuncts);
            collect_conjuncts(rhs, conjuncts);
        }
        _ => conjuncts.push(expr.clone()),
    }
}

/// Select the inhale half of every inhale-exhale assertion.
pub fn when_inhaling(expr: &Expr) -> Expr {
    map_inhale_exhale(expr, true)
}

/// Select the exhale half of every inhale-exhale assertion.
pub fn when_exhaling(expr: &Expr) -> Expr {
    map_inhale_exhale(expr, false)
}

fn map_inhale_exhale(expr: &Expr, inhale: bool) -> Expr {
    let span = expr.span.clone();
    match &expr.x {
        ExprX::InhaleExhale(a, b) => {
            let chosen = if inhale { a } else { b };
            map_inhale_exhale(chosen, inhale)
        }
        ExprX::Binary(op, lhs, rhs) => Spanned::new(
            span,
            ExprX::Binary(*op, map_inhale_exhale(lhs, inhale), map_inhale_exhale(rhs, inhale)),
        ),
        ExprX::CondExp(c, t, e) => Spanned::new(
            span,
            ExprX::CondExp(
                map_inhale_exhale(c, inhale),
                map_inhale_exhale(t, inhale),
                map_inhale_exhale(e, inhale),
            ),
        ),
        ExprX::Let(x, bound, body) => Spanned::new(
            span,
            ExprX::Let(x.clone(), bound.clone(), map_inhale_exhale(body, inhale)),
        ),
        ExprX::Forall(params, body) => {
            Spanned::new(span, ExprX::Forall(params.clone(), map_inhale_exhale(body, inhale)))
        }
        _ => expr.clone(),
    }
}

/// Free program variables of an expression, in first-occurrence order.
pub fn free_vars(expr: &Expr) -> Vec<Ident> {
    let mut bound: HashSet<Ident> = HashSet::new();
    let mut seen: HashSet<Ident> = HashSet::new();
    let mut order: Vec<Ident> = Vec::new();
    free_vars_rec(expr, &mut bound, &mut seen, &mut order);
    order
}

fn free_vars_rec(
    expr: &Expr,
    bound: &mut HashSet<Ident>,
    seen: &mut HashSet<Ident>,
    order: &mut Vec<Ident>,
) {
    match &expr.x {
        ExprX::Const(_) => {}
        ExprX::Var(x) => {
            if !bound.contains(x) && seen.insert(x.clone()) {
                order.push(x.clone());
            }
        }
        ExprX::Unary(_, e) => free_vars_rec(e, bound, seen, order),
        ExprX::Binary(_, e1, e2) => {
            free_vars_rec(e1, bound, seen, order);
            free_vars_rec(e2, bound, seen, order);
        }
        ExprX::CondExp(e1, e2, e3) | ExprX::SeqUpdate(e1, e2, e3) => {
            free_vars_rec(e1, bound, seen, order);
            free_vars_rec(e2, bound, seen, order);
            free_vars_rec(e3, bound, seen, order);
        }
        ExprX::Let(x, e1, e2) => {
            free_vars_rec(e1, bound, seen, order);
            let added = bound.insert(x.clone());
            free_vars_rec(e2, bound, seen, order);
            if added {
                bound.remove(x);
            }
        }
        ExprX::FieldAccess(e, _) => free_vars_rec(e, bound, seen, order),
        ExprX::Acc(loc, perm) => {
            free_vars_loc(loc, bound, seen, order);
            free_vars_rec(perm, bound, seen, order);
        }
        ExprX::QuantifiedPermission(params, cond, loc, perm) => {
            let added: Vec<Ident> = params
                .iter()
                .filter(|p| bound.insert(p.name.clone()))
                .map(|p| p.name.clone())
                .collect();
            free_vars_rec(cond, bound, seen, order);
            free_vars_loc(loc, bound, seen, order);
            free_vars_rec(perm, bound, seen, order);
            for x in added {
                bound.remove(&x);
            }
        }
        ExprX::Forall(params, body) => {
            let added: Vec<Ident> = params
                .iter()
                .filter(|p| bound.insert(p.name.clone()))
                .map(|p| p.name.clone())
                .collect();
            free_vars_rec(body, bound, seen, order);
            for x in added {
                bound.remove(&x);
            }
        }
        ExprX::MagicWand(_, lhs, rhs) => {
            free_vars_rec(lhs, bound, seen, order);
            free_vars_rec(rhs, bound, seen, order);
        }
        ExprX::InhaleExhale(a, b) => {
            free_vars_rec(a, bound, seen, order);
            free_vars_rec(b, bound, seen, order);
        }
        ExprX::FuncApp(_, args) => {
            for arg in args.iter() {
                free_vars_rec(arg, bound, seen, order);
            }
        }
    }
}

fn free_vars_loc(
    loc: &Arc<LocX>,
    bound: &mut HashSet<Ident>,
    seen: &mut HashSet<Ident>,
    order: &mut Vec<Ident>,
) {
    match &**loc {
        LocX::Field(rcvr, _) => free_vars_rec(rcvr, bound, seen, order),
        LocX::Predicate(_, args) => {
            for arg in args.iter() {
                free_vars_rec(arg, bound, seen, order);
            }
        }
    }
}

/// True iff the expression mentions the heap (access predicates, field
/// reads, wands).
pub fn is_heap_dependent(expr: &Expr) -> bool {
    match &expr.x {
        ExprX::Const(_) | ExprX::Var(_) => false,
        ExprX::Unary(_, e) => is_heap_dependent(e),
        ExprX::Binary(_, e1, e2) => is_heap_dependent(e1) || is_heap_dependent(e2),
        ExprX::CondExp(e1, e2, e3) | ExprX::SeqUpdate(e1, e2, e3) => {
            is_heap_dependent(e1) || is_heap_dependent(e2) || is_heap_dependent(e3)
        }
        ExprX::Let(_, e1, e2) => is_heap_dependent(e1) || is_heap_dependent(e2),
        ExprX::FieldAccess(..)
        | ExprX::Acc(..)
        | ExprX::QuantifiedPermission(..)
        | ExprX::MagicWand(..)
        | ExprX::InhaleExhale(..) => true,
        ExprX::Forall(_, body) => is_heap_dependent(body),
        ExprX::FuncApp(_, args) => args.iter().any(|a| is_heap_dependent(a)),
    }
}

pub fn str_ident(x: &str) -> Ident {
    Arc::new(x.to_string())
}
