use smtio::prover::{EventLog, RecordingProver};
use smtio::term::Term;
use std::sync::Arc;
use symex::config::Config;
use symex::parser::parse_program_str;
use symex::results::VerificationError;
use symex::verifier::Verifier;

pub fn build_verifier(src: &str) -> (Verifier, EventLog) {
    let log = EventLog::default();
    let prover = RecordingProver::with_log(log.clone());
    (build_with_prover(src, Config::new(), Box::new(prover)), log)
}

pub fn build_verifier_refusing(
    src: &str,
    refuse: impl Fn(&Term) -> bool + 'static,
) -> (Verifier, EventLog) {
    let log = EventLog::default();
    let prover =
        RecordingProver::with_goal_oracle(log.clone(), move |goal| !refuse(goal));
    (build_with_prover(src, Config::new(), Box::new(prover)), log)
}

fn build_with_prover(
    src: &str,
    config: Config,
    prover: Box<dyn smtio::prover::Prover>,
) -> Verifier {
    let program = parse_program_str(src).unwrap_or_else(|e| panic!("parse error: {}", e));
    Verifier::new(Arc::new(config), program, prover).expect("verifier setup")
}

pub fn verify_all(v: &mut Verifier) -> Vec<(String, Vec<VerificationError>)> {
    let methods = v.program.methods.clone();
    methods
        .iter()
        .map(|m| ((*m.name).clone(), v.verify_method(m)))
        .collect()
}

/// True iff the goal contains a quantifier whose qid starts with `prefix`.
pub fn goal_has_qid(goal: &Term, prefix: &str) -> bool {
    use smtio::term::{collect_subterms, TermX};
    collect_subterms(goal, |t| matches!(t, TermX::Quant(..)))
        .iter()
        .any(|q| match &**q {
            TermX::Quant(_, _, _, qid, _) => qid.starts_with(prefix),
            _ => false,
        })
}
