use crate::ast::{BinaryOp, Expr, ExprX, LocX, Param, Span};
use crate::ast_util::{is_heap_dependent, typ_to_sort, when_exhaling};
use crate::branch::branch;
use crate::chunks::Chunk;
use crate::consolidate::consolidate;
use crate::eval::{eval, eval_all};
use crate::qp;
use crate::results::{ErrorContext, ErrorKind, VerificationResult};
use crate::state::State;
use crate::verifier::{prover_failure, Verifier};
use smtio::prover::ProverError;
use smtio::term::{
    codomain_var, ident_var, mk_and, mk_combine, mk_eq, mk_forall, mk_implies,
    mk_is_non_negative, mk_perm_at_most, mk_perm_minus, mk_perm_times, mk_sort_wrapper, mk_unit,
    Constant, Ident, Sort, Term, TermX,
};
use smtio::term_util::{no_triggers, snap_sort, sort_binders};
use std::rc::Rc;

/// The consumer's continuation receives the next state and the snapshot of
/// the consumed heap portion.
pub type ConsumeCont<'a> = Rc<dyn Fn(State, Term, &mut Verifier) -> VerificationResult + 'a>;

macro_rules! tryv {
    ($e:expr) => {
        match $e {
            Ok(t) => t,
            Err(r) => return r,
        }
    };
}

fn try_prover<T>(
    r: Result<T, ProverError>,
    pve: &ErrorContext,
    span: &Span,
) -> Result<T, VerificationResult> {
    r.map_err(|e| prover_failure(pve, span, &e))
}

/// Exhale an assertion: evaluate pure parts, remove or reduce chunks,
/// assert facts.  Snapshots flow out through the continuation.
pub fn consume<'a>(
    s: State,
    assertion: &Expr,
    pve: &ErrorContext,
    v: &mut Verifier,
    q: ConsumeCont<'a>,
) -> VerificationResult {
    let assertion = when_exhaling(assertion);
    consume_rec(s, assertion, pve.clone(), v, q)
}

/// Exhale a list of assertions; the combined snapshot pairs them up left to
/// right.
pub fn consume_all<'a>(
    s: State,
    assertions: &'a [Expr],
    pve: &ErrorContext,
    v: &mut Verifier,
    q: ConsumeCont<'a>,
) -> VerificationResult {
    match assertions.split_first() {
        None => q(s, mk_unit(), v),
        Some((first, rest)) => {
            let pve2 = pve.clone();
            consume(
                s,
                first,
                pve,
                v,
                Rc::new(move |s1, snap1, v| {
                    let q = q.clone();
                    let snap1 = snap1.clone();
                    consume_all(
                        s1,
                        rest,
                        &pve2,
                        v,
                        Rc::new(move |s2, snap2, v| {
                            q(s2, mk_combine(&snap1, &snap2), v)
                        }),
                    )
                }),
            )
        }
    }
}

fn consume_rec<'a>(
    s: State,
    assertion: Expr,
    pve: ErrorContext,
    v: &mut Verifier,
    q: ConsumeCont<'a>,
) -> VerificationResult {
    let span = assertion.span.clone();
    match &assertion.x {
        ExprX::Binary(BinaryOp::And, a1, a2) => {
            let a2 = a2.clone();
            let pve2 = pve.clone();
            consume_rec(
                s,
                a1.clone(),
                pve.clone(),
                v,
                Rc::new(move |s1, snap1, v| {
                    let q = q.clone();
                    let snap1 = snap1.clone();
                    consume_rec(
                        s1,
                        a2.clone(),
                        pve2.clone(),
                        v,
                        Rc::new(move |s2, snap2, v| {
                            q(s2, mk_combine(&snap1, &snap2), v)
                        }),
                    )
                }),
            )
        }
        ExprX::Binary(BinaryOp::Implies, cond, body) if is_heap_dependent(body) => {
            let t_cond = tryv!(eval(&s, cond, &pve, v));
            let body = body.clone();
            let (pve_t, q_t, q_e) = (pve.clone(), q.clone(), q);
            branch(
                s,
                &t_cond,
                &span,
                &pve,
                v,
                Box::new(move |s, v| consume_rec(s, body.clone(), pve_t, v, q_t)),
                Box::new(move |s, v| q_e(s, mk_unit(), v)),
            )
        }
        ExprX::CondExp(cond, thn, els)
            if is_heap_dependent(thn) || is_heap_dependent(els) =>
        {
            let t_cond = tryv!(eval(&s, cond, &pve, v));
            let (thn, els) = (thn.clone(), els.clone());
            let (pve_t, pve_e) = (pve.clone(), pve.clone());
            let (q_t, q_e) = (q.clone(), q);
            branch(
                s,
                &t_cond,
                &span,
                &pve,
                v,
                Box::new(move |s, v| consume_rec(s, thn.clone(), pve_t, v, q_t)),
                Box::new(move |s, v| consume_rec(s, els.clone(), pve_e, v, q_e)),
            )
        }
        ExprX::Let(x, bound, body) => {
            let t_bound = tryv!(eval(&s, bound, &pve, v));
            let s2 = s.with_store(s.store.plus(x, &t_bound));
            consume_rec(s2, body.clone(), pve, v, q)
        }
        ExprX::Acc(loc, perm) => {
            let (s2, snap) = tryv!(consume_acc(s, loc, perm, &span, &pve, v));
            q(s2, snap, v)
        }
        ExprX::QuantifiedPermission(params, cond, loc, perm) => {
            let (s2, snap) =
                tryv!(consume_quantified(s, params, cond, loc, perm, &span, &pve, v));
            q(s2, snap, v)
        }
        ExprX::MagicWand(label, lhs, rhs) => {
            let (s2, snap) = tryv!(consume_wand(s, &assertion, label, lhs, rhs, &span, &pve, v));
            q(s2, snap, v)
        }
        ExprX::InhaleExhale(..) => {
            panic!("internal error: inhale-exhale assertion not normalised away")
        }
        _ => {
            // pure expression: evaluate and assert
            let t = tryv!(eval(&s, &assertion, &pve, v));
            match v.decider.assert(&s, &t, None) {
                Ok(true) => {}
                Ok(false) => {
                    return VerificationResult::failure(
                        pve.error_at(ErrorKind::AssertionFalse, &span),
                    )
                    .and_then(|| q(s, mk_unit(), v));
                }
                Err(e) => return prover_failure(&pve, &span, &e),
            }
            tryv!(try_prover(v.decider.assume(&[t]), &pve, &span));
            q(s, mk_unit(), v)
        }
    }
}

/// One retry after heap consolidation; the entry heap is restored (by
/// value) when the retry fails as well.
fn consume_with_retry(
    s: State,
    pve: &ErrorContext,
    span: &Span,
    v: &mut Verifier,
    attempt: &dyn Fn(&State, &mut Verifier) -> Result<(State, Term), VerificationResult>,
) -> Result<(State, Term), VerificationResult> {
    match attempt(&s, v) {
        Ok(r) => Ok(r),
        Err(r1) => {
            if r1.is_fatal() {
                return Err(r1);
            }
            let mut s2 = match consolidate(&s, v) {
                Ok(s2) => s2,
                Err(e) => return Err(prover_failure(pve, span, &e)),
            };
            s2.retrying = true;
            match attempt(&s2, v) {
                Ok(r) => Ok(r),
                Err(_) => Err(r1),
            }
        }
    }
}

fn assert_non_negative(
    s: &State,
    perm: &Term,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<(), VerificationResult> {
    let nonneg = mk_is_non_negative(perm);
    match v.decider.assert(s, &nonneg, None) {
        Ok(true) => {}
        Ok(false) => {
            return Err(VerificationResult::failure(
                pve.error_at(ErrorKind::NegativePermission, span),
            ));
        }
        Err(e) => return Err(prover_failure(pve, span, &e)),
    }
    try_prover(v.decider.assume(&[nonneg]), pve, span)?;
    Ok(())
}

fn consume_acc(
    s: State,
    loc: &crate::ast::Loc,
    perm: &Expr,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<(State, Term), VerificationResult> {
    let t_perm = eval(&s, perm, pve, v)?;
    assert_non_negative(&s, &t_perm, span, pve, v)?;
    let t_loss = mk_perm_times(&t_perm, &s.scaling);

    match &**loc {
        LocX::Field(rcvr, field) => {
            let t_rcvr = eval(&s, rcvr, pve, v)?;
            let field = field.clone();
            consume_with_retry(s, pve, span, v, &|s, v| {
                if s.qp_fields.contains(&field) {
                    let (heap, snap) =
                        qp::consume_singleton_field(v, s, &field, &t_rcvr, &t_loss, span, pve)?;
                    return Ok((s.with_heap(heap), snap));
                }
                let timeout = Some(v.config.split_timeout);
                let found = try_prover(
                    v.decider.find_chunk(s, &field, &[t_rcvr.clone()], timeout),
                    pve,
                    span,
                )?;
                let i = match found {
                    Some(i) => i,
                    None => {
                        return Err(VerificationResult::failure(
                            pve.error_at(ErrorKind::InsufficientPermission, span),
                        ));
                    }
                };
                let chunk = match &s.heap.chunks()[i] {
                    Chunk::Field(fc) => fc.clone(),
                    _ => panic!("internal error: find_chunk returned a non-field chunk"),
                };
                let sufficient = mk_perm_at_most(&t_loss, &chunk.perm);
                match v.decider.assert(s, &sufficient, None) {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(VerificationResult::failure(
                            pve.error_at(ErrorKind::InsufficientPermission, span),
                        ));
                    }
                    Err(e) => return Err(prover_failure(pve, span, &e)),
                }
                let remaining = mk_perm_minus(&chunk.perm, &t_loss);
                let heap = if is_no_perm(&remaining) {
                    s.heap.without(i)
                } else {
                    s.heap.replaced(i, Chunk::Field(chunk.with_perm(remaining)))
                };
                let snap = mk_sort_wrapper(&chunk.value, &snap_sort());
                let consumed = Chunk::Field(chunk.with_perm(t_loss.clone()));
                Ok((transfer(s.with_heap(heap), consumed), snap))
            })
        }
        LocX::Predicate(name, args) => {
            let t_args = eval_all(&s, args, pve, v)?;
            let name = name.clone();
            consume_with_retry(s, pve, span, v, &|s, v| {
                if s.qp_predicates.contains(&name) {
                    let arg_sorts = v.predicate_arg_sorts(&name);
                    let codomain = qp::pred_codomain_vars(&arg_sorts);
                    let eqs: Vec<Term> = codomain
                        .iter()
                        .zip(t_args.iter())
                        .map(|(cv, a)| mk_eq(cv, a))
                        .collect();
                    let cond_inv = mk_and(&eqs);
                    let constrain = v.decider.is_arp(&t_loss);
                    let (heap, snap) = qp::split_predicate(
                        v, s, &name, &arg_sorts, &cond_inv, &t_loss, constrain, span, pve,
                    )?;
                    return Ok((s.with_heap(heap), snap));
                }
                let timeout = Some(v.config.split_timeout);
                let found =
                    try_prover(v.decider.find_chunk(s, &name, &t_args, timeout), pve, span)?;
                let i = match found {
                    Some(i) => i,
                    None => {
                        return Err(VerificationResult::failure(
                            pve.error_at(ErrorKind::InsufficientPermission, span),
                        ));
                    }
                };
                let chunk = match &s.heap.chunks()[i] {
                    Chunk::Predicate(pc) => pc.clone(),
                    _ => panic!("internal error: find_chunk returned a non-predicate chunk"),
                };
                let sufficient = mk_perm_at_most(&t_loss, &chunk.perm);
                match v.decider.assert(s, &sufficient, None) {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(VerificationResult::failure(
                            pve.error_at(ErrorKind::InsufficientPermission, span),
                        ));
                    }
                    Err(e) => return Err(prover_failure(pve, span, &e)),
                }
                let remaining = mk_perm_minus(&chunk.perm, &t_loss);
                let heap = if is_no_perm(&remaining) {
                    s.heap.without(i)
                } else {
                    s.heap.replaced(i, Chunk::Predicate(chunk.with_perm(remaining)))
                };
                let consumed = Chunk::Predicate(chunk.with_perm(t_loss.clone()));
                Ok((transfer(s.with_heap(heap), consumed), chunk.snap.clone()))
            })
        }
    }
}

fn is_no_perm(t: &Term) -> bool {
    matches!(&**t, TermX::Const(Constant::NoPerm))
}

/// Exhale `forall xs :: cond ==> acc(loc, perm)` via the heap-split
/// algorithm.
fn consume_quantified(
    s: State,
    params: &[Param],
    cond: &Expr,
    loc: &crate::ast::Loc,
    perm: &Expr,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<(State, Term), VerificationResult> {
    let mut qvars: Vec<(Ident, Sort)> = Vec::new();
    let mut s_q = s.clone();
    for p in params {
        let sort = typ_to_sort(&p.typ);
        let qv = try_prover(v.decider.fresh(&p.name, &sort), pve, span)?;
        if let TermX::Var(name, _) = &*qv {
            qvars.push((name.clone(), sort));
        }
        s_q = s_q.with_store(s_q.store.plus(&p.name, &qv));
    }
    let t_cond = eval(&s_q, cond, pve, v)?;

    // forall x :: c(x) ==> 0 <= p(x)
    let t_perm = eval(&s_q, perm, pve, v)?;
    let nonneg = mk_forall(
        &sort_binders(&qvars),
        &no_triggers(),
        &v.fresh_qid(crate::def::QID_NON_NEGATIVE),
        &mk_implies(&t_cond, &mk_is_non_negative(&t_perm)),
    );
    match v.decider.assert(&s, &nonneg, None) {
        Ok(true) => {}
        Ok(false) => {
            return Err(VerificationResult::failure(
                pve.error_at(ErrorKind::NegativePermission, span),
            ));
        }
        Err(e) => return Err(prover_failure(pve, span, &e)),
    }
    let t_loss = mk_perm_times(&t_perm, &s.scaling);

    match &**loc {
        LocX::Field(rcvr, field) => {
            let t_rcvr = eval(&s_q, rcvr, pve, v)?;

            // a violation here is reported as ReceiverNotInjective
            let inj = qp::injectivity_axiom(v, &qvars, &[t_rcvr.clone()], &t_cond, &t_loss);
            match v.decider.assert(&s, &inj, None) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(VerificationResult::failure(
                        pve.error_at(ErrorKind::ReceiverNotInjective, span),
                    ));
                }
                Err(e) => return Err(prover_failure(pve, span, &e)),
            }

            let built = try_prover(
                qp::mk_inverse_functions(
                    v,
                    &qvars,
                    &[t_rcvr.clone()],
                    &[codomain_var(&smtio::term_util::ref_sort())],
                    &t_cond,
                    &t_loss,
                ),
                pve,
                span,
            )?;

            let qvar_term = ident_var(&qvars[0].0, &qvars[0].1);
            let domain_set = qp::optimized_domain(&t_cond, &t_rcvr, &qvar_term);
            let hints = qp::extract_hints(&[&t_cond, &t_rcvr]);
            let constrain = v.decider.is_arp(&t_loss);
            let field = field.clone();

            let s = try_prover(qp::raise_field_to_qp(v, &s, &field), pve, span)?;
            consume_with_retry(s, pve, span, v, &|s, v| {
                let result = qp::split_field(
                    v,
                    s,
                    &field,
                    &built.cond_inv,
                    &built.perm_inv,
                    constrain,
                    &hints,
                    domain_set.clone(),
                    span,
                    pve,
                )?;
                let snap = mk_sort_wrapper(&result.fvf, &snap_sort());
                Ok((s.with_heap(result.heap), snap))
            })
        }
        LocX::Predicate(name, args) => {
            let t_args = eval_all(&s_q, args, pve, v)?;
            let arg_sorts = v.predicate_arg_sorts(name);

            let inj = qp::injectivity_axiom(v, &qvars, &t_args, &t_cond, &t_loss);
            match v.decider.assert(&s, &inj, None) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(VerificationResult::failure(
                        pve.error_at(ErrorKind::ReceiverNotInjective, span),
                    ));
                }
                Err(e) => return Err(prover_failure(pve, span, &e)),
            }

            let built = try_prover(
                qp::mk_inverse_functions(
                    v,
                    &qvars,
                    &t_args,
                    &qp::pred_codomain_vars(&arg_sorts),
                    &t_cond,
                    &t_loss,
                ),
                pve,
                span,
            )?;

            let constrain = v.decider.is_arp(&t_loss);
            let name = name.clone();
            let s = try_prover(qp::raise_predicate_to_qp(v, &s, &name, &arg_sorts), pve, span)?;
            consume_with_retry(s, pve, span, v, &|s, v| {
                let (heap, snap) = qp::split_predicate(
                    v,
                    s,
                    &name,
                    &arg_sorts,
                    &built.cond_inv,
                    &built.perm_inv,
                    constrain,
                    span,
                    pve,
                )?;
                Ok((s.with_heap(heap), snap))
            })
        }
    }
}

/// Search the heap for a syntactically matching wand chunk; under
/// exhale-ext the chunk moves into the topmost reserve heap.
fn consume_wand(
    s: State,
    wand: &Expr,
    label: &Option<Ident>,
    lhs: &Expr,
    rhs: &Expr,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
) -> Result<(State, Term), VerificationResult> {
    let vars = crate::ast_util::free_vars(wand);
    let mut bindings: Vec<Term> = Vec::new();
    for x in &vars {
        match s.store.get(x) {
            Some(t) => bindings.push(t.clone()),
            None => panic!("internal error: wand variable {} not in store", x),
        }
    }
    consume_with_retry(s, pve, span, v, &|s, v| {
        let found = s.heap.chunks().iter().position(|c| match c {
            Chunk::MagicWand(w) => match label {
                Some(l) => w.label.as_ref() == Some(l),
                None => &w.lhs == lhs && &w.rhs == rhs && w.bindings == bindings,
            },
            _ => false,
        });
        match found {
            Some(i) => {
                let chunk = match &s.heap.chunks()[i] {
                    Chunk::MagicWand(w) => w.clone(),
                    _ => unreachable!(),
                };
                let mut s2 = s.with_heap(s.heap.without(i));
                if s2.exhale_ext {
                    if let Some(top) = s2.reserve_heaps.last_mut() {
                        *top = top.plus(Chunk::MagicWand(chunk.clone()));
                    }
                }
                Ok((s2, chunk.snap))
            }
            None => {
                let kind = if label.is_some() {
                    ErrorKind::NamedMagicWandChunkNotFound
                } else {
                    ErrorKind::MagicWandChunkNotFound
                };
                Err(VerificationResult::failure(pve.error_at(kind, span)))
            }
        }
    })
}

/// Under exhale-ext, the consumed portion moves into the topmost reserve
/// heap (the "used" heap of the enclosing package operation).
fn transfer(mut s: State, consumed: Chunk) -> State {
    if s.exhale_ext {
        if let Some(top) = s.reserve_heaps.last_mut() {
            *top = top.plus(consumed);
        }
    }
    s
}
