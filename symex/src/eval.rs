use crate::ast::{Expr, ExprX, Ident, Span};
use crate::ast_util::typ_to_sort;
use crate::chunks::{Chunk, QuantifiedFieldChunk};
use crate::results::{ErrorContext, ErrorKind, VerificationResult};
use crate::state::State;
use crate::translate::{lower_binary, lower_const, lower_unary};
use crate::verifier::Verifier;
use smtio::term::{
    ident_var, mk_app, mk_forall, mk_is_positive, mk_ite, mk_let, mk_perm_plus, no_perm, Sort,
    Term, TermX,
};
use smtio::term_util::{mk_fun, sort_binders};
use std::sync::Arc;

/// Evaluate an expression under the given state.  This is the evaluator's
/// contract with the producer and consumer: pure subexpressions become
/// terms; field reads consult the heap and require readable permission.
pub fn eval(
    s: &State,
    expr: &Expr,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<Term, VerificationResult> {
    match &expr.x {
        ExprX::Const(c) => Ok(lower_const(c)),
        ExprX::Var(x) => match s.store.get(x) {
            Some(t) => Ok(t.clone()),
            None => panic!("internal error: variable {} not in store", x),
        },
        ExprX::Unary(op, e) => {
            let t = eval(s, e, pve, v)?;
            Ok(lower_unary(*op, &t))
        }
        ExprX::Binary(op, e1, e2) => {
            let t1 = eval(s, e1, pve, v)?;
            let t2 = eval(s, e2, pve, v)?;
            Ok(lower_binary(*op, &t1, &t2))
        }
        ExprX::CondExp(c, t, e) => {
            let tc = eval(s, c, pve, v)?;
            let tt = eval(s, t, pve, v)?;
            let te = eval(s, e, pve, v)?;
            Ok(mk_ite(&tc, &tt, &te))
        }
        ExprX::Let(x, e1, e2) => {
            let t1 = eval(s, e1, pve, v)?;
            let s2 = s.with_store(s.store.plus(x, &t1));
            let t2 = eval(&s2, e2, pve, v)?;
            // keep the binding structure; the store-based value is equal
            if smtio::term::contains_var(&t2, x) {
                Ok(mk_let(x, &t1, &t2))
            } else {
                Ok(t2)
            }
        }
        ExprX::SeqUpdate(e1, e2, e3) => {
            let t1 = eval(s, e1, pve, v)?;
            let t2 = eval(s, e2, pve, v)?;
            let t3 = eval(s, e3, pve, v)?;
            Ok(Arc::new(TermX::SeqUpdate(t1, t2, t3)))
        }
        ExprX::FieldAccess(rcvr, field) => {
            let t_rcvr = eval(s, rcvr, pve, v)?;
            field_read(s, field, &t_rcvr, &expr.span, pve, v)
        }
        ExprX::Forall(params, body) => {
            let mut binder_sorts: Vec<(Ident, Sort)> = Vec::new();
            let mut s2 = s.clone();
            for p in params.iter() {
                let sort = typ_to_sort(&p.typ);
                s2 = s2.with_store(s2.store.plus(&p.name, &ident_var(&p.name, &sort)));
                binder_sorts.push((p.name.clone(), sort));
            }
            if crate::ast_util::is_heap_dependent(body) {
                panic!(
                    "internal error: heap-dependent quantifier body in pure position: {}",
                    expr.span.as_string
                );
            }
            let t_body = eval(&s2, body, pve, v)?;
            let qid = v.fresh_qid(crate::def::QID_USER);
            Ok(mk_forall(
                &sort_binders(&binder_sorts),
                &smtio::term_util::no_triggers(),
                &qid,
                &t_body,
            ))
        }
        ExprX::FuncApp(name, args) => {
            let (arg_sorts, ret_sort) = {
                let function = v.program.function(name).unwrap_or_else(|| {
                    panic!("internal error: unknown function {}", name)
                });
                let arg_sorts: Vec<Sort> =
                    function.typs.iter().map(|t| typ_to_sort(t)).collect();
                (arg_sorts, typ_to_sort(&function.ret))
            };
            let mut t_args: Vec<Term> = Vec::new();
            for arg in args.iter() {
                t_args.push(eval(s, arg, pve, v)?);
            }
            Ok(mk_app(&mk_fun(name, &arg_sorts, &ret_sort), &t_args))
        }
        ExprX::Acc(..)
        | ExprX::QuantifiedPermission(..)
        | ExprX::MagicWand(..)
        | ExprX::InhaleExhale(..) => {
            panic!(
                "internal error: heap assertion evaluated in pure position: {}",
                expr.span.as_string
            )
        }
    }
}

pub fn eval_all(
    s: &State,
    exprs: &[Expr],
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<Vec<Term>, VerificationResult> {
    let mut terms: Vec<Term> = Vec::new();
    for e in exprs {
        terms.push(eval(s, e, pve, v)?);
    }
    Ok(terms)
}

/// Read a field location out of the heap, requiring a readable permission.
fn field_read(
    s: &State,
    field: &Ident,
    rcvr: &Term,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<Term, VerificationResult> {
    if s.qp_fields.contains(field) {
        let candidates: Vec<QuantifiedFieldChunk> = s
            .heap
            .chunks()
            .iter()
            .filter_map(|c| match c {
                Chunk::QuantField(qc) if &qc.field == field => Some(qc.clone()),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return Err(VerificationResult::failure(
                pve.error_at(ErrorKind::InsufficientPermission, span),
            ));
        }
        let mut perm_total = no_perm();
        for c in &candidates {
            perm_total = mk_perm_plus(&perm_total, &c.perm_at(rcvr));
        }
        let readable = mk_is_positive(&perm_total);
        match v.decider.assert(s, &readable, None) {
            Ok(true) => {}
            Ok(false) => {
                return Err(VerificationResult::failure(
                    pve.error_at(ErrorKind::InsufficientPermission, span),
                ));
            }
            Err(e) => return Err(crate::verifier::prover_failure(pve, span, &e)),
        }
        let fvf = match crate::qp::summarizing_fvf(v, field, &candidates) {
            Ok(fvf) => fvf,
            Err(e) => return Err(crate::verifier::prover_failure(pve, span, &e)),
        };
        return Ok(smtio::term::mk_lookup(field, &fvf, rcvr));
    }

    let timeout = Some(v.config.split_timeout);
    let found = v.decider.find_chunk(s, field, &[rcvr.clone()], timeout);
    match found {
        Ok(Some(i)) => match &s.heap.chunks()[i] {
            Chunk::Field(fc) => {
                let readable = mk_is_positive(&fc.perm);
                match v.decider.assert(s, &readable, None) {
                    Ok(true) => Ok(fc.value.clone()),
                    Ok(false) => Err(VerificationResult::failure(
                        pve.error_at(ErrorKind::InsufficientPermission, span),
                    )),
                    Err(e) => Err(crate::verifier::prover_failure(pve, span, &e)),
                }
            }
            _ => panic!("internal error: find_chunk returned a non-field chunk"),
        },
        Ok(None) => Err(VerificationResult::failure(
            pve.error_at(ErrorKind::InsufficientPermission, span),
        )),
        Err(e) => Err(crate::verifier::prover_failure(pve, span, &e)),
    }
}
