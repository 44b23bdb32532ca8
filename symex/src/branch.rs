use crate::ast::Span;
use crate::results::{ErrorContext, VerificationResult};
use crate::state::State;
use crate::verifier::{prover_failure, Verifier};
use smtio::prover::SatResult;
use smtio::term::{mk_not, Constant, Term, TermX};

/// Explore both sides of a condition.  Each side runs in its own solver
/// scope with the (negated) condition assumed; a side whose path condition
/// becomes unsatisfiable is dropped as `Unreachable`.  The state is passed
/// by value, so every side starts from the pre-branch heap.
pub fn branch<'a>(
    s: State,
    t: &Term,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
    f_then: Box<dyn FnOnce(State, &mut Verifier) -> VerificationResult + 'a>,
    f_else: Box<dyn FnOnce(State, &mut Verifier) -> VerificationResult + 'a>,
) -> VerificationResult {
    match &**t {
        TermX::Const(Constant::Bool(true)) => return f_then(s, v),
        TermX::Const(Constant::Bool(false)) => return f_else(s, v),
        _ => {}
    }
    let r_then = branch_side(s.clone(), t, span, pve, v, f_then);
    if r_then.is_fatal() {
        return r_then;
    }
    let r_else = branch_side(s, &mk_not(t), span, pve, v, f_else);
    r_then.combine(r_else)
}

fn branch_side<'a>(
    s: State,
    t: &Term,
    span: &Span,
    pve: &ErrorContext,
    v: &mut Verifier,
    f: Box<dyn FnOnce(State, &mut Verifier) -> VerificationResult + 'a>,
) -> VerificationResult {
    if let Err(e) = v.decider.push_scope() {
        return prover_failure(pve, span, &e);
    }
    if let Err(e) = v.decider.assume(&[t.clone()]) {
        let _ = v.decider.pop_scope();
        return prover_failure(pve, span, &e);
    }
    let timeout = Some(v.config.split_timeout);
    let feasible = match v.decider.prover().check_sat(timeout) {
        Ok(sat) => sat != SatResult::Unsat,
        Err(e) => {
            let _ = v.decider.pop_scope();
            return prover_failure(pve, span, &e);
        }
    };
    let result = if feasible { f(s, v) } else { VerificationResult::Unreachable };
    if let Err(e) = v.decider.pop_scope() {
        return prover_failure(pve, span, &e);
    }
    result
}
