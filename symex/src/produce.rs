use crate::ast::{BinaryOp, Expr, ExprX, LocX, Param, Span};
use crate::ast_util::{is_heap_dependent, typ_to_sort, when_inhaling};
use crate::branch::branch;
use crate::chunks::{Chunk, FieldChunk, MagicWandChunk, PredicateChunk};
use crate::eval::{eval, eval_all};
use crate::qp;
use crate::results::{ErrorContext, ErrorKind, VerificationResult};
use crate::snapshots::{self, SnapFn};
use crate::state::State;
use crate::verifier::{prover_failure, Verifier};
use smtio::prover::ProverError;
use smtio::term::{
    codomain_var, ident_var, mk_app, mk_eq, mk_forall, mk_implies, mk_is_non_negative,
    mk_is_positive, mk_ite, mk_not, mk_null, mk_perm_times, mk_unit, no_perm, Ident, Sort, Term,
    TermX,
};
use smtio::term_util::{no_triggers, ref_sort, snap_sort, sort_binders};
use std::rc::Rc;

pub type ProduceCont<'a> = Rc<dyn Fn(State, &mut Verifier) -> VerificationResult + 'a>;

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

/// Inhale an assertion: evaluate pure parts, add chunks, assume facts.
/// The snapshot function yields the snapshot term underlying any new chunks.
pub fn produce<'a>(
    s: State,
    sf: SnapFn<'a>,
    assertion: &Expr,
    pve: &ErrorContext,
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    let assertion = when_inhaling(assertion);
    produce_rec(s, sf, assertion, pve.clone(), v, q)
}

/// Inhale a list of assertions (e.g. the conjuncts of a precondition), each
/// under a fresh snapshot.
pub fn produce_all<'a>(
    s: State,
    assertions: &'a [Expr],
    pve: &ErrorContext,
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    match assertions.split_first() {
        None => q(s, v),
        Some((first, rest)) => {
            let snap = tryv!(try_prover(
                v.decider.fresh(crate::def::PREFIX_SNAP, &snap_sort()),
                pve,
                &first.span
            ));
            let pve2 = pve.clone();
            produce(
                s,
                snapshots::fixed(snap),
                first,
                pve,
                v,
                Rc::new(move |s2, v| produce_all(s2, rest, &pve2, v, q.clone())),
            )
        }
    }
}

fn produce_rec<'a>(
    s: State,
    sf: SnapFn<'a>,
    assertion: Expr,
    pve: ErrorContext,
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    let span = assertion.span.clone();
    match &assertion.x {
        ExprX::Binary(BinaryOp::And, a1, a2) => {
            let sf1 = snapshots::first_of(&sf);
            let sf2 = snapshots::second_of(&sf);
            let a2 = a2.clone();
            let pve2 = pve.clone();
            produce_rec(
                s,
                sf1,
                a1.clone(),
                pve.clone(),
                v,
                Rc::new(move |s1, v| {
                    produce_rec(s1, sf2.clone(), a2.clone(), pve2.clone(), v, q.clone())
                }),
            )
        }
        ExprX::Binary(BinaryOp::Implies, cond, body) if is_heap_dependent(body) => {
            let t_cond = tryv!(eval(&s, cond, &pve, v));
            let body = body.clone();
            let (pve_t, pve_e) = (pve.clone(), pve.clone());
            let (sf_t, sf_e) = (sf.clone(), sf.clone());
            let (q_t, q_e) = (q.clone(), q);
            let span_e = span.clone();
            branch(
                s,
                &t_cond,
                &span,
                &pve,
                v,
                Box::new(move |s, v| produce_rec(s, sf_t, body.clone(), pve_t, v, q_t)),
                Box::new(move |s, v| {
                    // the snapshot collapses to unit on the untaken side
                    let snap = sf_e(&snap_sort());
                    if let Err(e) = v.decider.assume(&[mk_eq(&snap, &mk_unit())]) {
                        return prover_failure(&pve_e, &span_e, &e);
                    }
                    q_e(s, v)
                }),
            )
        }
        ExprX::CondExp(cond, thn, els)
            if is_heap_dependent(thn) || is_heap_dependent(els) =>
        {
            let t_cond = tryv!(eval(&s, cond, &pve, v));
            let (thn, els) = (thn.clone(), els.clone());
            let (pve_t, pve_e) = (pve.clone(), pve.clone());
            let (sf_t, sf_e) = (sf.clone(), sf.clone());
            let (q_t, q_e) = (q.clone(), q);
            branch(
                s,
                &t_cond,
                &span,
                &pve,
                v,
                Box::new(move |s, v| produce_rec(s, sf_t, thn.clone(), pve_t, v, q_t)),
                Box::new(move |s, v| produce_rec(s, sf_e, els.clone(), pve_e, v, q_e)),
            )
        }
        ExprX::Let(x, bound, body) => {
            let t_bound = tryv!(eval(&s, bound, &pve, v));
            let s2 = s.with_store(s.store.plus(x, &t_bound));
            produce_rec(s2, sf, body.clone(), pve, v, q)
        }
        ExprX::Acc(loc, perm) => produce_acc(s, sf, loc, perm, &span, pve, v, q),
        ExprX::QuantifiedPermission(params, cond, loc, perm) => {
            produce_quantified(s, sf, params, cond, loc, perm, &span, pve, v, q)
        }
        ExprX::MagicWand(label, lhs, rhs) => {
            let vars = crate::ast_util::free_vars(&assertion);
            let mut bindings: Vec<Term> = Vec::new();
            for x in &vars {
                match s.store.get(x) {
                    Some(t) => bindings.push(t.clone()),
                    None => panic!("internal error: wand variable {} not in store", x),
                }
            }
            let chunk = MagicWandChunk {
                label: label.clone(),
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                bindings,
                snap: sf(&snap_sort()),
            };
            let s2 = s.with_heap(s.heap.plus(Chunk::MagicWand(chunk)));
            q(s2, v)
        }
        ExprX::InhaleExhale(..) => {
            panic!("internal error: inhale-exhale assertion not normalised away")
        }
        _ => {
            // pure expression: evaluate and assume
            let t = tryv!(eval(&s, &assertion, &pve, v));
            tryv!(try_prover(v.decider.assume(&[t]), &pve, &span));
            q(s, v)
        }
    }
}

fn produce_acc<'a>(
    s: State,
    sf: SnapFn<'a>,
    loc: &crate::ast::Loc,
    perm: &Expr,
    span: &Span,
    pve: ErrorContext,
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    let t_perm = tryv!(eval(&s, perm, &pve, v));

    // permissions may not be negative, even on inhale
    let nonneg = mk_is_non_negative(&t_perm);
    match v.decider.assert(&s, &nonneg, None) {
        Ok(true) => {}
        Ok(false) => {
            return VerificationResult::failure(
                pve.error_at(ErrorKind::NegativePermission, span),
            );
        }
        Err(e) => return prover_failure(&pve, span, &e),
    }
    tryv!(try_prover(v.decider.assume(&[nonneg]), &pve, span));
    let t_gain = mk_perm_times(&t_perm, &s.scaling);

    match &**loc {
        LocX::Field(rcvr, field) => {
            let t_rcvr = tryv!(eval(&s, rcvr, &pve, v));
            let non_null = mk_implies(
                &mk_is_positive(&t_gain),
                &mk_not(&mk_eq(&t_rcvr, &mk_null())),
            );
            tryv!(try_prover(v.decider.assume(&[non_null]), &pve, span));

            let field_sort = match v.program.field(field) {
                Some(f) => typ_to_sort(&f.typ),
                None => panic!("internal error: unknown field {}", field),
            };
            let value = sf(&field_sort);

            let s2 = if s.qp_fields.contains(field) {
                let qc = tryv!(try_prover(
                    qp::singleton_field_chunk(v, field, &t_rcvr, &t_gain, &value),
                    &pve,
                    span
                ));
                s.with_heap(s.heap.plus(Chunk::QuantField(qc)))
            } else {
                tryv!(try_prover(
                    v.decider.assume_field_upper_bounds(&s, &t_rcvr, field, &t_gain),
                    &pve,
                    span
                ));
                let chunk = FieldChunk {
                    rcvr: t_rcvr,
                    field: field.clone(),
                    value,
                    perm: t_gain,
                };
                s.with_heap(s.heap.plus(Chunk::Field(chunk)))
            };
            q(s2, v)
        }
        LocX::Predicate(name, args) => {
            let t_args = tryv!(eval_all(&s, args, &pve, v));
            let snap = sf(&snap_sort());
            if v.config.enable_predicate_triggers_on_inhale {
                let trigger = tryv!(try_prover(
                    v.ensure_predicate_trigger(name),
                    &pve,
                    span
                ));
                let app = mk_app(&trigger, &t_args);
                tryv!(try_prover(v.decider.assume(&[app]), &pve, span));
            }
            let s2 = if s.qp_predicates.contains(name) {
                let arg_sorts = v.predicate_arg_sorts(name);
                let qc = tryv!(try_prover(
                    qp::singleton_predicate_chunk(v, name, &arg_sorts, &t_args, &t_gain, &snap),
                    &pve,
                    span
                ));
                s.with_heap(s.heap.plus(Chunk::QuantPredicate(qc)))
            } else {
                let chunk = PredicateChunk {
                    name: name.clone(),
                    args: t_args,
                    snap,
                    perm: t_gain,
                };
                s.with_heap(s.heap.plus(Chunk::Predicate(chunk)))
            };
            q(s2, v)
        }
    }
}

/// Inhale `forall xs :: cond ==> acc(loc, perm)`: mint inverse functions,
/// check receiver injectivity (a well-definedness condition of the
/// assertion), and add a fresh quantified chunk.
fn produce_quantified<'a>(
    s: State,
    _sf: SnapFn<'a>,
    params: &[Param],
    cond: &Expr,
    loc: &crate::ast::Loc,
    perm: &Expr,
    span: &Span,
    pve: ErrorContext,
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    let mut qvars: Vec<(Ident, Sort)> = Vec::new();
    let mut s_q = s.clone();
    for p in params {
        let sort = typ_to_sort(&p.typ);
        let qv = tryv!(try_prover(v.decider.fresh(&p.name, &sort), &pve, span));
        if let TermX::Var(name, _) = &*qv {
            qvars.push((name.clone(), sort));
        }
        s_q = s_q.with_store(s_q.store.plus(&p.name, &qv));
    }
    let t_cond = tryv!(eval(&s_q, cond, &pve, v));

    match &**loc {
        LocX::Field(rcvr, field) => {
            let t_rcvr = tryv!(eval(&s_q, rcvr, &pve, v));
            let t_perm = tryv!(eval(&s_q, perm, &pve, v));
            let t_gain = mk_perm_times(&t_perm, &s.scaling);

            // forall x :: c(x) ==> 0 <= p(x)
            let nonneg = mk_forall(
                &sort_binders(&qvars),
                &no_triggers(),
                &v.fresh_qid(crate::def::QID_NON_NEGATIVE),
                &mk_implies(&t_cond, &mk_is_non_negative(&t_perm)),
            );
            match v.decider.assert(&s, &nonneg, None) {
                Ok(true) => {}
                Ok(false) => {
                    return VerificationResult::failure(
                        pve.error_at(ErrorKind::NegativePermission, span),
                    );
                }
                Err(e) => return prover_failure(&pve, span, &e),
            }
            tryv!(try_prover(v.decider.assume(&[nonneg]), &pve, span));

            let inj = qp::injectivity_axiom(v, &qvars, &[t_rcvr.clone()], &t_cond, &t_gain);
            if v.config.assume_injectivity_on_inhale {
                tryv!(try_prover(v.decider.assume(&[inj]), &pve, span));
            } else {
                match v.decider.assert(&s, &inj, None) {
                    Ok(true) => {}
                    Ok(false) => {
                        return VerificationResult::failure(
                            pve.error_at(ErrorKind::ReceiverNotInjective, span),
                        );
                    }
                    Err(e) => return prover_failure(&pve, span, &e),
                }
            }

            let built = tryv!(try_prover(
                qp::mk_inverse_functions(
                    v,
                    &qvars,
                    &[t_rcvr.clone()],
                    &[codomain_var(&ref_sort())],
                    &t_cond,
                    &t_gain,
                ),
                &pve,
                span
            ));

            let non_null = qp::non_null_axiom(v, &qvars, &t_rcvr, &t_cond, &t_gain);
            tryv!(try_prover(v.decider.assume(&[non_null]), &pve, span));

            // raise any basic chunks for this field to quantified form
            let s2 = tryv!(try_prover(qp::raise_field_to_qp(v, &s, field), &pve, span));

            let fvf_sort = tryv!(try_prover(v.ensure_fvf(field), &pve, span));
            let fvf = tryv!(try_prover(
                v.decider.fresh(crate::def::PREFIX_FVF, &fvf_sort),
                &pve,
                span
            ));

            // dom(fvf) is the produced range
            let qvar_term = ident_var(&qvars[0].0, &qvars[0].1);
            let domain_axiom = match qp::optimized_domain(&t_cond, &t_rcvr, &qvar_term) {
                Some(set) => mk_eq(&smtio::term::mk_domain(field, &fvf), &set),
                None => {
                    let rd = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
                    let rd_var = ident_var(&rd, &ref_sort());
                    let member = smtio::term::mk_binary(
                        smtio::term::BinaryOp::SetIn,
                        &rd_var,
                        &smtio::term::mk_domain(field, &fvf),
                    );
                    mk_forall(
                        &sort_binders(&[(rd, ref_sort())]),
                        &no_triggers(),
                        &v.fresh_qid(crate::def::QID_DOMAIN_DEF),
                        &mk_eq(&member, &smtio::term::replace_codomain(&built.cond_inv, &rd_var)),
                    )
                }
            };
            tryv!(try_prover(v.decider.assume(&[domain_axiom.clone()]), &pve, span));
            v.recorder.append(crate::recorder::Recorded::FvfDefinition {
                field: field.clone(),
                fvf: fvf.clone(),
                value_axioms: vec![],
                domain_axiom: Some(domain_axiom),
            });

            let chunk = crate::chunks::QuantifiedFieldChunk {
                field: field.clone(),
                fvf,
                perm: mk_ite(&built.cond_inv, &built.perm_inv, &no_perm()),
                inv: Some(built.inv),
                singleton_rcvr: None,
                hints: qp::extract_hints(&[&t_cond, &t_rcvr]),
            };
            let s3 = s2.with_heap(s2.heap.plus(Chunk::QuantField(chunk)));
            q(s3, v)
        }
        LocX::Predicate(name, args) => {
            let t_args = tryv!(eval_all(&s_q, args, &pve, v));
            let t_perm = tryv!(eval(&s_q, perm, &pve, v));
            let t_gain = mk_perm_times(&t_perm, &s.scaling);
            let arg_sorts = v.predicate_arg_sorts(name);
            let codomain_vars = qp::pred_codomain_vars(&arg_sorts);

            let nonneg = mk_forall(
                &sort_binders(&qvars),
                &no_triggers(),
                &v.fresh_qid(crate::def::QID_NON_NEGATIVE),
                &mk_implies(&t_cond, &mk_is_non_negative(&t_perm)),
            );
            match v.decider.assert(&s, &nonneg, None) {
                Ok(true) => {}
                Ok(false) => {
                    return VerificationResult::failure(
                        pve.error_at(ErrorKind::NegativePermission, span),
                    );
                }
                Err(e) => return prover_failure(&pve, span, &e),
            }
            tryv!(try_prover(v.decider.assume(&[nonneg]), &pve, span));

            let inj = qp::injectivity_axiom(v, &qvars, &t_args, &t_cond, &t_gain);
            if v.config.assume_injectivity_on_inhale {
                tryv!(try_prover(v.decider.assume(&[inj]), &pve, span));
            } else {
                match v.decider.assert(&s, &inj, None) {
                    Ok(true) => {}
                    Ok(false) => {
                        return VerificationResult::failure(
                            pve.error_at(ErrorKind::ReceiverNotInjective, span),
                        );
                    }
                    Err(e) => return prover_failure(&pve, span, &e),
                }
            }

            let built = tryv!(try_prover(
                qp::mk_inverse_functions(v, &qvars, &t_args, &codomain_vars, &t_cond, &t_gain),
                &pve,
                span
            ));

            let s2 = tryv!(try_prover(
                qp::raise_predicate_to_qp(v, &s, name, &arg_sorts),
                &pve,
                span
            ));
            let psf_sort = tryv!(try_prover(v.ensure_psf(name), &pve, span));
            let psf = tryv!(try_prover(
                v.decider.fresh(crate::def::PREFIX_PSF, &psf_sort),
                &pve,
                span
            ));

            if v.config.enable_predicate_triggers_on_inhale {
                let trigger = tryv!(try_prover(v.ensure_predicate_trigger(name), &pve, span));
                let app = mk_app(&trigger, &t_args);
                let trig_axiom = mk_forall(
                    &sort_binders(&qvars),
                    &no_triggers(),
                    &v.fresh_qid(crate::def::QID_NON_NEGATIVE),
                    &mk_implies(&t_cond, &app),
                );
                tryv!(try_prover(v.decider.assume(&[trig_axiom]), &pve, span));
            }

            let chunk = crate::chunks::QuantifiedPredicateChunk {
                name: name.clone(),
                psf,
                arg_sorts,
                perm: mk_ite(&built.cond_inv, &built.perm_inv, &no_perm()),
                inv: Some(built.inv),
            };
            let s3 = s2.with_heap(s2.heap.plus(Chunk::QuantPredicate(chunk)));
            q(s3, v)
        }
    }
}
