use crate::ast::Span;
use crate::chunks::{Chunk, InverseFunctions, QuantifiedFieldChunk, QuantifiedPredicateChunk};
use crate::recorder::Recorded;
use crate::results::{ErrorContext, ErrorKind, VerificationResult};
use crate::state::{Heap, State};
use crate::verifier::{prover_failure, Verifier};
use smtio::prover::ProverError;
use smtio::term::{
    codomain_var, collect_subterms, ident_var, mk_and, mk_app, mk_domain, mk_eq, mk_forall,
    mk_implies, mk_is_positive, mk_ite, mk_lookup, mk_not, mk_perm_less, mk_perm_min,
    mk_perm_minus, mk_unary, no_perm, replace_codomain, subst, BinaryOp, Ident, Sort, Term, TermX,
    Trigger, UnaryOp,
};
use smtio::term_util::{
    mk_trigger, mk_triggers, no_triggers, perm_sort, ref_sort, snap_sort, sort_binders,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Substitute the predicate codomain placeholders `?a0, ?a1, ...`.
pub fn replace_codomains(t: &Term, with: &[Term]) -> Term {
    let mut map: HashMap<Ident, Term> = HashMap::new();
    for (i, arg) in with.iter().enumerate() {
        map.insert(Arc::new(smtio::def::codomain_arg(i)), arg.clone());
    }
    subst(t, &map)
}

pub fn pred_codomain_vars(arg_sorts: &[Sort]) -> Vec<Term> {
    arg_sorts
        .iter()
        .enumerate()
        .map(|(i, s)| ident_var(&Arc::new(smtio::def::codomain_arg(i)), s))
        .collect()
}

/// Syntactic hints biasing the chunk-order heuristics: sequence and set
/// terms appearing in receiver or condition, e.g. `s[i]` or `x in s`.
pub fn extract_hints(terms: &[&Term]) -> Vec<Term> {
    let mut hints: Vec<Term> = Vec::new();
    for t in terms {
        for sub in collect_subterms(t, |x| {
            matches!(
                x,
                TermX::Binary(BinaryOp::SeqIndex, _, _) | TermX::Binary(BinaryOp::SetIn, _, _)
            )
        }) {
            let hint = match &*sub {
                TermX::Binary(BinaryOp::SeqIndex, s, _) => s.clone(),
                TermX::Binary(BinaryOp::SetIn, _, s) => s.clone(),
                _ => unreachable!(),
            };
            if !hints.contains(&hint) {
                hints.push(hint);
            }
        }
    }
    hints
}

/// Chunks whose hint set equals the consumer's come first.
fn order_candidates(
    candidates: Vec<(usize, QuantifiedFieldChunk)>,
    hints: &[Term],
    disable: bool,
) -> Vec<(usize, QuantifiedFieldChunk)> {
    if disable || hints.is_empty() {
        return candidates;
    }
    let wanted: HashSet<&Term> = hints.iter().collect();
    let (mut matching, mut rest): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|(_, c)| {
        let have: HashSet<&Term> = c.hints.iter().collect();
        have == wanted
    });
    matching.append(&mut rest);
    matching
}

fn trigger_candidate(t: &Term) -> bool {
    matches!(
        &**t,
        TermX::App(..)
            | TermX::Lookup(..)
            | TermX::PredLookup(..)
            | TermX::Binary(BinaryOp::SeqIndex, _, _)
            | TermX::Binary(BinaryOp::SetIn, _, _)
    )
}

fn isc_triggers(v: &Verifier, terms: &[Term]) -> smtio::term::Triggers {
    if v.config.disable_isc_triggers {
        return no_triggers();
    }
    let usable: Vec<Term> = terms.iter().filter(|t| trigger_candidate(t)).cloned().collect();
    if usable.is_empty() {
        no_triggers()
    } else {
        mk_triggers(&[mk_trigger(&usable)])
    }
}

/// Built inverse functions plus the quantified entities rewritten through
/// them, parameterised by the codomain placeholder(s).
pub struct BuiltInverses {
    pub inv: Arc<InverseFunctions>,
    /// condition with the bound variables replaced by inverse applications
    pub cond_inv: Term,
    /// permission amount, likewise
    pub perm_inv: Term,
}

/// Mint fresh inverse functions for `forall xs :: cond ==> acc(...(es)...)`
/// and assume their two defining axiom families.
pub fn mk_inverse_functions(
    v: &mut Verifier,
    qvars: &[(Ident, Sort)],
    codomain_terms: &[Term],
    codomain_vars: &[Term],
    cond: &Term,
    perm: &Term,
) -> Result<BuiltInverses, ProverError> {
    let codomain_sorts: Vec<Sort> = codomain_terms.iter().map(|t| t.sort()).collect();
    let mut funs = Vec::new();
    for (_, qsort) in qvars {
        funs.push(v.decider.fresh_fun(crate::def::PREFIX_INVERSE, &codomain_sorts, qsort)?);
    }

    let guard = mk_and(&[cond.clone(), mk_is_positive(perm)]);
    let qvar_terms: Vec<Term> = qvars.iter().map(|(x, s)| ident_var(x, s)).collect();
    let mut axioms: Vec<Term> = Vec::new();

    // inv(e(x)) = x
    let mut eqs: Vec<Term> = Vec::new();
    for (fun, qv) in funs.iter().zip(qvar_terms.iter()) {
        eqs.push(mk_eq(&mk_app(fun, codomain_terms), qv));
    }
    axioms.push(mk_forall(
        &sort_binders(qvars),
        &isc_triggers(v, codomain_terms),
        &v.fresh_qid(crate::def::QID_INV_OF_RCVR),
        &mk_implies(&guard, &mk_and(&eqs)),
    ));

    // e(inv(r)) = r
    let inv_apps: Vec<Term> = funs.iter().map(|f| mk_app(f, codomain_vars)).collect();
    let mut inv_map: HashMap<Ident, Term> = HashMap::new();
    for ((x, _), app) in qvars.iter().zip(inv_apps.iter()) {
        inv_map.insert(x.clone(), app.clone());
    }
    let cond_inv = subst(cond, &inv_map);
    let perm_inv = subst(perm, &inv_map);
    let guard_inv = mk_and(&[cond_inv.clone(), mk_is_positive(&perm_inv)]);
    let mut eqs_inv: Vec<Term> = Vec::new();
    for (e, r) in codomain_terms.iter().zip(codomain_vars.iter()) {
        eqs_inv.push(mk_eq(&subst(e, &inv_map), r));
    }
    let codomain_binders: Vec<(Ident, Sort)> = codomain_vars
        .iter()
        .map(|t| match &**t {
            TermX::Var(x, s) => (x.clone(), s.clone()),
            _ => panic!("internal error: codomain variable expected"),
        })
        .collect();
    axioms.push(mk_forall(
        &sort_binders(&codomain_binders),
        &isc_triggers(v, &inv_apps),
        &v.fresh_qid(crate::def::QID_RCVR_OF_INV),
        &mk_implies(&guard_inv, &mk_and(&eqs_inv)),
    ));

    v.decider.assume(&axioms)?;
    let inv = Arc::new(InverseFunctions {
        funs,
        qvars: qvars.to_vec(),
        axioms: axioms.clone(),
    });
    v.recorder.append(Recorded::InverseFunctions(inv.clone()));
    Ok(BuiltInverses { inv, cond_inv, perm_inv })
}

/// forall x1, x2 :: c(x1) && 0 < p(x1) && c(x2) && 0 < p(x2) && e(x1) == e(x2)
///   ==> x1 == x2
pub fn injectivity_axiom(
    v: &mut Verifier,
    qvars: &[(Ident, Sort)],
    codomain_terms: &[Term],
    cond: &Term,
    perm: &Term,
) -> Term {
    let mut binders: Vec<(Ident, Sort)> = Vec::new();
    let mut maps: Vec<HashMap<Ident, Term>> = Vec::new();
    for _ in 0..2 {
        let mut map: HashMap<Ident, Term> = HashMap::new();
        for (x, s) in qvars {
            let fresh = v.decider.fresh_bound(x);
            map.insert(x.clone(), ident_var(&fresh, s));
            binders.push((fresh, s.clone()));
        }
        maps.push(map);
    }
    let mut hyps: Vec<Term> = Vec::new();
    for map in &maps {
        hyps.push(subst(cond, map));
        hyps.push(mk_is_positive(&subst(perm, map)));
    }
    for e in codomain_terms {
        hyps.push(mk_eq(&subst(e, &maps[0]), &subst(e, &maps[1])));
    }
    let mut concl: Vec<Term> = Vec::new();
    for (x, s) in qvars {
        concl.push(mk_eq(
            &subst(&ident_var(x, s), &maps[0]),
            &subst(&ident_var(x, s), &maps[1]),
        ));
    }
    mk_forall(
        &sort_binders(&binders),
        &no_triggers(),
        &v.fresh_qid(crate::def::QID_INJECTIVITY),
        &mk_implies(&mk_and(&hyps), &mk_and(&concl)),
    )
}

/// forall x :: c(x) && 0 < p(x) ==> e(x) != null
pub fn non_null_axiom(
    v: &mut Verifier,
    qvars: &[(Ident, Sort)],
    rcvr: &Term,
    cond: &Term,
    perm: &Term,
) -> Term {
    let guard = mk_and(&[cond.clone(), mk_is_positive(perm)]);
    mk_forall(
        &sort_binders(qvars),
        &isc_triggers(v, &[rcvr.clone()]),
        &v.fresh_qid(crate::def::QID_NON_NULL),
        &mk_implies(&guard, &mk_not(&mk_eq(rcvr, &smtio::term::mk_null()))),
    )
}

/// A singleton quantified chunk for `acc(t.f, p)` once field f has been
/// split to quantified form.
pub fn singleton_field_chunk(
    v: &mut Verifier,
    field: &Ident,
    rcvr: &Term,
    perm: &Term,
    value: &Term,
) -> Result<QuantifiedFieldChunk, ProverError> {
    let fvf_sort = v.ensure_fvf(field)?;
    let fvf = v.decider.fresh(crate::def::PREFIX_FVF, &fvf_sort)?;
    let value_axiom = mk_eq(&mk_lookup(field, &fvf, rcvr), value);
    let domain_axiom = mk_eq(
        &mk_domain(field, &fvf),
        &mk_unary(UnaryOp::SingletonSet, rcvr),
    );
    v.decider.assume(&[value_axiom.clone(), domain_axiom.clone()])?;
    v.recorder.append(Recorded::FvfDefinition {
        field: field.clone(),
        fvf: fvf.clone(),
        value_axioms: vec![value_axiom],
        domain_axiom: Some(domain_axiom),
    });
    let chunk_perm = mk_ite(
        &mk_eq(&codomain_var(&ref_sort()), rcvr),
        perm,
        &no_perm(),
    );
    Ok(QuantifiedFieldChunk {
        field: field.clone(),
        fvf,
        perm: chunk_perm,
        inv: None,
        singleton_rcvr: Some(rcvr.clone()),
        hints: extract_hints(&[rcvr]),
    })
}

/// Raise every basic chunk for `field` to a singleton quantified chunk, and
/// remember the field as split to quantified form.
pub fn raise_field_to_qp(
    v: &mut Verifier,
    s: &State,
    field: &Ident,
) -> Result<State, ProverError> {
    if s.qp_fields.contains(field) {
        return Ok(s.clone());
    }
    let mut chunks: Vec<Chunk> = Vec::new();
    for chunk in s.heap.chunks() {
        match chunk {
            Chunk::Field(fc) if &fc.field == field => {
                let qc = singleton_field_chunk(v, field, &fc.rcvr, &fc.perm, &fc.value)?;
                chunks.push(Chunk::QuantField(qc));
            }
            other => chunks.push(other.clone()),
        }
    }
    let mut s2 = s.with_heap(Heap::from_chunks(chunks));
    s2.qp_fields.insert(field.clone());
    Ok(s2)
}

/// A fresh field-value function summarising several quantified chunks, for
/// heap reads in pure positions.
pub fn summarizing_fvf(
    v: &mut Verifier,
    field: &Ident,
    candidates: &[QuantifiedFieldChunk],
) -> Result<Term, ProverError> {
    if candidates.len() == 1 {
        return Ok(candidates[0].fvf.clone());
    }
    let fvf_sort = v.ensure_fvf(field)?;
    let fvf = v.decider.fresh(crate::def::PREFIX_FVF, &fvf_sort)?;
    let axioms = value_axioms(v, field, &fvf, candidates, None);
    v.decider.assume(&axioms)?;
    v.recorder.append(Recorded::FvfDefinition {
        field: field.clone(),
        fvf: fvf.clone(),
        value_axioms: axioms,
        domain_axiom: None,
    });
    Ok(fvf)
}

/// For every candidate ch: where ch still had permission, the new fvf agrees
/// with the candidate's.  Singleton chunks get the instantiated form.
fn value_axioms(
    v: &mut Verifier,
    field: &Ident,
    fvf: &Term,
    candidates: &[QuantifiedFieldChunk],
    cond_inv: Option<&Term>,
) -> Vec<Term> {
    let mut axioms: Vec<Term> = Vec::new();
    for ch in candidates {
        match &ch.singleton_rcvr {
            Some(t) => {
                let mut hyps = vec![mk_is_positive(&ch.perm_at(t))];
                if let Some(c) = cond_inv {
                    hyps.push(replace_codomain(c, t));
                }
                axioms.push(mk_implies(
                    &mk_and(&hyps),
                    &mk_eq(&mk_lookup(field, fvf, t), &ch.value_at(t)),
                ));
            }
            None => {
                let r_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
                let r = ident_var(&r_id, &ref_sort());
                let mut hyps = vec![mk_is_positive(&ch.perm_at(&r))];
                if let Some(c) = cond_inv {
                    hyps.push(replace_codomain(c, &r));
                }
                let lhs = mk_lookup(field, fvf, &r);
                let rhs = ch.value_at(&r);
                let triggers: Vec<Trigger> =
                    vec![mk_trigger(&[lhs.clone()]), mk_trigger(&[rhs.clone()])];
                axioms.push(mk_forall(
                    &sort_binders(&[(r_id, ref_sort())]),
                    &mk_triggers(&triggers),
                    &v.fresh_qid(crate::def::QID_VALUE_DEF),
                    &mk_implies(&mk_and(&hyps), &mk_eq(&lhs, &rhs)),
                ));
            }
        }
    }
    axioms
}

pub struct SplitResult {
    pub heap: Heap,
    pub fvf: Term,
}

/// The heap-split algorithm: bulk-transfer `p_init` permission at every
/// receiver satisfying `cond_inv` out of the quantified chunks for `field`.
/// Both parameters range over the codomain placeholder `?r`.  In constrain
/// mode (abstract read permissions) chunks are never depleted; in exact mode
/// each chunk is dropped once provably empty.
pub fn split_field(
    v: &mut Verifier,
    s: &State,
    field: &Ident,
    cond_inv: &Term,
    p_init: &Term,
    constrain: bool,
    hints: &[Term],
    domain_set: Option<Term>,
    span: &Span,
    pve: &ErrorContext,
) -> Result<SplitResult, VerificationResult> {
    let err = |e: &ProverError| prover_failure(pve, span, e);

    // 1. partition candidates for this field from the other chunks
    let mut others: Vec<Chunk> = Vec::new();
    let mut candidates: Vec<(usize, QuantifiedFieldChunk)> = Vec::new();
    for (i, chunk) in s.heap.chunks().iter().enumerate() {
        match chunk {
            Chunk::QuantField(qc) if &qc.field == field => candidates.push((i, qc.clone())),
            other => others.push(other.clone()),
        }
    }

    // 2. heuristic ordering
    let candidates =
        order_candidates(candidates, hints, v.config.disable_chunk_order_heuristics);
    let originals: Vec<QuantifiedFieldChunk> =
        candidates.iter().map(|(_, c)| c.clone()).collect();

    // 3. fresh result fvf
    let fvf_sort = v.ensure_fvf(field).map_err(|e| err(&e))?;
    let fvf = v.decider.fresh(crate::def::PREFIX_FVF, &fvf_sort).map_err(|e| err(&e))?;

    // 4. needed(r) = c_inv(r) ? p_init(r) : none
    let mut needed = mk_ite(cond_inv, p_init, &no_perm());
    let done_goal = |v: &mut Verifier, needed: &Term| {
        let r_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
        let r = ident_var(&r_id, &ref_sort());
        mk_forall(
            &sort_binders(&[(r_id, ref_sort())]),
            &no_triggers(),
            &v.fresh_qid(crate::def::QID_NEEDED_ZERO),
            &mk_implies(
                &replace_codomain(cond_inv, &r),
                &mk_eq(&replace_codomain(needed, &r), &no_perm()),
            ),
        )
    };

    let mut survivors: Vec<QuantifiedFieldChunk> = Vec::new();
    let mut taken_enough = false;
    let split_timeout = Some(v.config.split_timeout);
    let mut remaining_candidates = candidates.into_iter().map(|(_, c)| c);

    while let Some(ch) = remaining_candidates.next() {
        // 5. pTaken_i(r) = c_inv(r) ? min(ch.perm(r), needed(r)) : none,
        // minted as a macro to keep the SMT input tractable
        let r_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
        let r = ident_var(&r_id, &ref_sort());
        let taken_body = replace_codomain(
            &mk_ite(cond_inv, &mk_perm_min(&ch.perm, &needed), &no_perm()),
            &r,
        );
        let taken_fun = v
            .decider
            .declare_macro(
                crate::def::PREFIX_PTAKEN,
                &[(r_id, ref_sort())],
                &perm_sort(),
                &taken_body,
            )
            .map_err(|e| err(&e))?;
        v.recorder.append(Recorded::PermMacro { fun: taken_fun.clone(), body: taken_body });
        let taken = mk_app(&taken_fun, &[codomain_var(&ref_sort())]);
        needed = mk_perm_minus(&needed, &taken);
        let reduced = ch.with_perm(mk_perm_minus(&ch.perm, &taken));

        if constrain {
            // 6a. constrain mode: the chunk keeps a remainder; assume the
            // abstract read amount is below whatever the chunk holds
            let r2_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
            let r2 = ident_var(&r2_id, &ref_sort());
            let constraint = mk_forall(
                &sort_binders(&[(r2_id, ref_sort())]),
                &no_triggers(),
                &v.fresh_qid(crate::def::QID_CONSTRAIN),
                &mk_implies(
                    &mk_not(&mk_eq(&ch.perm_at(&r2), &no_perm())),
                    &mk_perm_less(&replace_codomain(p_init, &r2), &ch.perm_at(&r2)),
                ),
            );
            v.decider.assume(&[constraint]).map_err(|e| err(&e))?;
            survivors.push(reduced);
        } else {
            // 6b. exact mode: short-check whether the chunk is depleted
            let depleted_goal = match &ch.singleton_rcvr {
                Some(t) => mk_eq(&replace_codomain(&reduced.perm, t), &no_perm()),
                None => {
                    let r3_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
                    let r3 = ident_var(&r3_id, &ref_sort());
                    mk_forall(
                        &sort_binders(&[(r3_id, ref_sort())]),
                        &no_triggers(),
                        &v.fresh_qid(crate::def::QID_DEPLETED),
                        &mk_eq(&replace_codomain(&reduced.perm, &r3), &no_perm()),
                    )
                }
            };
            let depleted =
                v.decider.check(s, &depleted_goal, split_timeout).map_err(|e| err(&e))?;
            if !depleted {
                survivors.push(reduced);
            }
        }

        // 7. short-check for early success; an unknown answer falls through
        // to the final must-check
        let goal = done_goal(v, &needed);
        if v.decider.check(s, &goal, split_timeout).map_err(|e| err(&e))? {
            taken_enough = true;
            break;
        }
    }
    survivors.extend(remaining_candidates);

    // 8. the mandatory must-check, without a timeout
    if !taken_enough {
        let goal = done_goal(v, &needed);
        match v.decider.assert(s, &goal, Some(0)) {
            Ok(true) => {}
            Ok(false) => {
                return Err(VerificationResult::failure(
                    pve.error_at(ErrorKind::InsufficientPermission, span),
                ));
            }
            Err(e) => return Err(err(&e)),
        }
    }

    // 9. the FVF definition bundle
    let mut axioms = value_axioms(v, field, &fvf, &originals, Some(cond_inv));
    let domain_axiom = match domain_set {
        // optimised form for conditions of the shape `x in set` with an
        // identity receiver
        Some(set) => mk_eq(&mk_domain(field, &fvf), &set),
        None => {
            let rd_id = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
            let rd = ident_var(&rd_id, &ref_sort());
            let member = smtio::term::mk_binary(
                BinaryOp::SetIn,
                &rd,
                &mk_domain(field, &fvf),
            );
            mk_forall(
                &sort_binders(&[(rd_id, ref_sort())]),
                &mk_triggers(&[mk_trigger(&[member.clone()])]),
                &v.fresh_qid(crate::def::QID_DOMAIN_DEF),
                &mk_eq(&member, &replace_codomain(cond_inv, &rd)),
            )
        }
    };
    axioms.push(domain_axiom.clone());
    v.decider.assume(&axioms).map_err(|e| err(&e))?;
    let value_only = axioms[..axioms.len() - 1].to_vec();
    v.recorder.append(Recorded::FvfDefinition {
        field: field.clone(),
        fvf: fvf.clone(),
        value_axioms: value_only,
        domain_axiom: Some(domain_axiom),
    });

    let mut chunks = others;
    chunks.extend(survivors.into_iter().map(Chunk::QuantField));
    Ok(SplitResult { heap: Heap::from_chunks(chunks), fvf })
}

/// The predicate analogue of `split_field`; permission terms range over the
/// codomain placeholders `?a0, ?a1, ...`.
pub fn split_predicate(
    v: &mut Verifier,
    s: &State,
    predicate: &Ident,
    arg_sorts: &[Sort],
    cond_inv: &Term,
    p_init: &Term,
    constrain: bool,
    span: &Span,
    pve: &ErrorContext,
) -> Result<(Heap, Term), VerificationResult> {
    let err = |e: &ProverError| prover_failure(pve, span, e);

    let mut others: Vec<Chunk> = Vec::new();
    let mut candidates: Vec<QuantifiedPredicateChunk> = Vec::new();
    for chunk in s.heap.chunks() {
        match chunk {
            Chunk::QuantPredicate(qc) if &qc.name == predicate => candidates.push(qc.clone()),
            other => others.push(other.clone()),
        }
    }

    let psf_sort = v.ensure_psf(predicate).map_err(|e| err(&e))?;
    let psf = v.decider.fresh(crate::def::PREFIX_PSF, &psf_sort).map_err(|e| err(&e))?;

    let fresh_args = |v: &mut Verifier| -> (Vec<(Ident, Sort)>, Vec<Term>) {
        let mut binders = Vec::new();
        let mut vars = Vec::new();
        for sort in arg_sorts {
            let x = v.decider.fresh_bound(crate::def::PREFIX_BOUND);
            vars.push(ident_var(&x, sort));
            binders.push((x, sort.clone()));
        }
        (binders, vars)
    };
    let done_goal = |v: &mut Verifier, needed: &Term| {
        let (binders, vars) = fresh_args(v);
        mk_forall(
            &sort_binders(&binders),
            &no_triggers(),
            &v.fresh_qid(crate::def::QID_NEEDED_ZERO),
            &mk_implies(
                &replace_codomains(cond_inv, &vars),
                &mk_eq(&replace_codomains(needed, &vars), &no_perm()),
            ),
        )
    };

    let originals = candidates.clone();
    let mut needed = mk_ite(cond_inv, p_init, &no_perm());
    let mut survivors: Vec<QuantifiedPredicateChunk> = Vec::new();
    let mut taken_enough = false;
    let split_timeout = Some(v.config.split_timeout);
    let mut remaining = candidates.into_iter();

    while let Some(ch) = remaining.next() {
        let (binders, vars) = fresh_args(v);
        let taken_body = replace_codomains(
            &mk_ite(cond_inv, &mk_perm_min(&ch.perm, &needed), &no_perm()),
            &vars,
        );
        let taken_fun = v
            .decider
            .declare_macro(crate::def::PREFIX_PTAKEN, &binders, &perm_sort(), &taken_body)
            .map_err(|e| err(&e))?;
        v.recorder.append(Recorded::PermMacro { fun: taken_fun.clone(), body: taken_body });
        let taken = mk_app(&taken_fun, &pred_codomain_vars(arg_sorts));
        needed = mk_perm_minus(&needed, &taken);
        let reduced = ch.with_perm(mk_perm_minus(&ch.perm, &taken));

        if constrain {
            let (binders, vars) = fresh_args(v);
            let constraint = mk_forall(
                &sort_binders(&binders),
                &no_triggers(),
                &v.fresh_qid(crate::def::QID_CONSTRAIN),
                &mk_implies(
                    &mk_not(&mk_eq(&replace_codomains(&ch.perm, &vars), &no_perm())),
                    &mk_perm_less(
                        &replace_codomains(p_init, &vars),
                        &replace_codomains(&ch.perm, &vars),
                    ),
                ),
            );
            v.decider.assume(&[constraint]).map_err(|e| err(&e))?;
            survivors.push(reduced);
        } else {
            let (binders, vars) = fresh_args(v);
            let depleted_goal = mk_forall(
                &sort_binders(&binders),
                &no_triggers(),
                &v.fresh_qid(crate::def::QID_DEPLETED),
                &mk_eq(&replace_codomains(&reduced.perm, &vars), &no_perm()),
            );
            let depleted =
                v.decider.check(s, &depleted_goal, split_timeout).map_err(|e| err(&e))?;
            if !depleted {
                survivors.push(reduced);
            }
        }

        let goal = done_goal(v, &needed);
        if v.decider.check(s, &goal, split_timeout).map_err(|e| err(&e))? {
            taken_enough = true;
            break;
        }
    }
    survivors.extend(remaining);

    if !taken_enough {
        let goal = done_goal(v, &needed);
        match v.decider.assert(s, &goal, Some(0)) {
            Ok(true) => {}
            Ok(false) => {
                return Err(VerificationResult::failure(
                    pve.error_at(ErrorKind::InsufficientPermission, span),
                ));
            }
            Err(e) => return Err(err(&e)),
        }
    }

    // value definitions tying the result psf to the source chunks
    let mut axioms: Vec<Term> = Vec::new();
    for ch in &originals {
        let (binders, vars) = fresh_args(v);
        let guard = mk_and(&[
            replace_codomains(cond_inv, &vars),
            mk_is_positive(&replace_codomains(&ch.perm, &vars)),
        ]);
        let lhs = Arc::new(TermX::PredLookup(predicate.clone(), psf.clone(), Arc::new(vars.clone())));
        let rhs = Arc::new(TermX::PredLookup(predicate.clone(), ch.psf.clone(), Arc::new(vars)));
        axioms.push(mk_forall(
            &sort_binders(&binders),
            &no_triggers(),
            &v.fresh_qid(crate::def::QID_PSF_VALUE_DEF),
            &mk_implies(&guard, &mk_eq(&lhs, &rhs)),
        ));
    }
    v.decider.assume(&axioms).map_err(|e| err(&e))?;
    v.recorder.append(Recorded::PsfDefinition {
        predicate: predicate.clone(),
        psf: psf.clone(),
        value_axioms: axioms,
    });

    let mut chunks = others;
    chunks.extend(survivors.into_iter().map(Chunk::QuantPredicate));
    Ok((Heap::from_chunks(chunks), snapify(&psf)))
}

fn snapify(t: &Term) -> Term {
    smtio::term::mk_sort_wrapper(t, &snap_sort())
}

/// Detect the optimised domain shape: condition `x in set` with an identity
/// receiver, so dom(fvf) can be equated with the set directly.
pub fn optimized_domain(cond: &Term, rcvr: &Term, qvar: &Term) -> Option<Term> {
    if rcvr != qvar {
        return None;
    }
    match &**cond {
        TermX::Binary(BinaryOp::SetIn, x, set) if x == qvar => Some(set.clone()),
        _ => None,
    }
}

/// A singleton quantified predicate chunk for `acc(P(args), p)` once P has
/// been split to quantified form.
pub fn singleton_predicate_chunk(
    v: &mut Verifier,
    predicate: &Ident,
    arg_sorts: &[Sort],
    args: &[Term],
    perm: &Term,
    snap: &Term,
) -> Result<QuantifiedPredicateChunk, ProverError> {
    let psf_sort = v.ensure_psf(predicate)?;
    let psf = v.decider.fresh(crate::def::PREFIX_PSF, &psf_sort)?;
    let value_axiom = mk_eq(
        &Arc::new(TermX::PredLookup(predicate.clone(), psf.clone(), Arc::new(args.to_vec()))),
        snap,
    );
    v.decider.assume(&[value_axiom.clone()])?;
    v.recorder.append(Recorded::PsfDefinition {
        predicate: predicate.clone(),
        psf: psf.clone(),
        value_axioms: vec![value_axiom],
    });
    let codomain = pred_codomain_vars(arg_sorts);
    let eqs: Vec<Term> =
        codomain.iter().zip(args.iter()).map(|(cv, a)| mk_eq(cv, a)).collect();
    let chunk_perm = mk_ite(&mk_and(&eqs), perm, &no_perm());
    Ok(QuantifiedPredicateChunk {
        name: predicate.clone(),
        psf,
        arg_sorts: arg_sorts.to_vec(),
        perm: chunk_perm,
        inv: None,
    })
}

/// Raise every basic chunk for `predicate` to a singleton quantified chunk.
pub fn raise_predicate_to_qp(
    v: &mut Verifier,
    s: &State,
    predicate: &Ident,
    arg_sorts: &[Sort],
) -> Result<State, ProverError> {
    if s.qp_predicates.contains(predicate) {
        return Ok(s.clone());
    }
    let mut chunks: Vec<Chunk> = Vec::new();
    for chunk in s.heap.chunks() {
        match chunk {
            Chunk::Predicate(pc) if &pc.name == predicate => {
                let qc = singleton_predicate_chunk(
                    v, predicate, arg_sorts, &pc.args, &pc.perm, &pc.snap,
                )?;
                chunks.push(Chunk::QuantPredicate(qc));
            }
            other => chunks.push(other.clone()),
        }
    }
    let mut s2 = s.with_heap(Heap::from_chunks(chunks));
    s2.qp_predicates.insert(predicate.clone());
    Ok(s2)
}

/// The split result for a non-quantified `acc(t.f, p)` against quantified
/// chunks: a singleton condition over the codomain variable.
pub fn consume_singleton_field(
    v: &mut Verifier,
    s: &State,
    field: &Ident,
    rcvr: &Term,
    loss: &Term,
    span: &Span,
    pve: &ErrorContext,
) -> Result<(Heap, Term), VerificationResult> {
    let cond_inv = mk_eq(&codomain_var(&ref_sort()), rcvr);
    let constrain = v.decider.is_arp(loss);
    let hints = extract_hints(&[rcvr]);
    let result = split_field(
        v, s, field, &cond_inv, loss, constrain, &hints, None, span, pve,
    )?;
    let snap = smtio::term::mk_lookup(field, &result.fvf, rcvr);
    Ok((result.heap, snapify(&snap)))
}
