use crate::ast::Span;
use serde::Serialize;

/// Why an assertion could not be established.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AssertionFalse,
    InsufficientPermission,
    NegativePermission,
    ReceiverNotInjective,
    MagicWandChunkNotFound,
    NamedMagicWandChunkNotFound,
    /// The solver produced output we could not act on; fatal for the method.
    ProverInteraction,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationError {
    pub kind: ErrorKind,
    /// Source position of the offending assertion
    pub pos: String,
    /// What was being verified when the failure occurred
    pub context: String,
}

impl VerificationError {
    pub fn describe(&self) -> String {
        let reason = match self.kind {
            ErrorKind::AssertionFalse => "assertion might not hold",
            ErrorKind::InsufficientPermission => "there might be insufficient permission",
            ErrorKind::NegativePermission => "permission might be negative",
            ErrorKind::ReceiverNotInjective => "receiver might not be injective",
            ErrorKind::MagicWandChunkNotFound => "no matching magic wand chunk found",
            ErrorKind::NamedMagicWandChunkNotFound => "named magic wand chunk not found",
            ErrorKind::ProverInteraction => "the solver interaction failed",
        };
        format!("{}: {} (at {})", self.context, reason, self.pos)
    }
}

/// The partial-verification-error context supplied by the caller of a
/// produce/consume, e.g. "the precondition of method m".
#[derive(Clone, Debug)]
pub struct ErrorContext {
    pub text: String,
    pub span: Span,
}

impl ErrorContext {
    pub fn new(text: &str, span: &Span) -> Self {
        ErrorContext { text: text.to_string(), span: span.clone() }
    }

    pub fn error_at(&self, kind: ErrorKind, span: &Span) -> VerificationError {
        VerificationError {
            kind,
            pos: span.as_string.clone(),
            context: self.text.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Failures {
    pub errors: Vec<VerificationError>,
    /// Fatal failures abort the enclosing method immediately.
    pub fatal: bool,
}

/// Outcome of a symbolic-execution path.  `Unreachable` marks a path whose
/// path condition became unsatisfiable; it is dropped, not reported.
#[derive(Clone, Debug)]
pub enum VerificationResult {
    Success,
    Unreachable,
    Failure(Failures),
}

impl VerificationResult {
    pub fn failure(error: VerificationError) -> VerificationResult {
        VerificationResult::Failure(Failures { errors: vec![error], fatal: false })
    }

    pub fn fatal(error: VerificationError) -> VerificationResult {
        VerificationResult::Failure(Failures { errors: vec![error], fatal: true })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, VerificationResult::Failure(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, VerificationResult::Failure(Failures { fatal: true, .. }))
    }

    pub fn errors(&self) -> &[VerificationError] {
        match self {
            VerificationResult::Failure(f) => &f.errors,
            _ => &[],
        }
    }

    /// Sequential composition: short-circuits on fatal results and links
    /// non-fatal failures for later reporting.
    pub fn and_then(self, f: impl FnOnce() -> VerificationResult) -> VerificationResult {
        match self {
            VerificationResult::Success => f(),
            VerificationResult::Unreachable => VerificationResult::Unreachable,
            VerificationResult::Failure(failures) => {
                if failures.fatal {
                    return VerificationResult::Failure(failures);
                }
                match f() {
                    VerificationResult::Success | VerificationResult::Unreachable => {
                        VerificationResult::Failure(failures)
                    }
                    VerificationResult::Failure(mut more) => {
                        let mut errors = failures.errors;
                        errors.append(&mut more.errors);
                        VerificationResult::Failure(Failures { errors, fatal: more.fatal })
                    }
                }
            }
        }
    }

    /// Join of two sibling branches.  `Unreachable` is the identity.
    pub fn combine(self, other: VerificationResult) -> VerificationResult {
        match (self, other) {
            (VerificationResult::Unreachable, r) => r,
            (r, VerificationResult::Unreachable) => r,
            (VerificationResult::Success, r) => r,
            (r, VerificationResult::Success) => r,
            (VerificationResult::Failure(mut f1), VerificationResult::Failure(mut f2)) => {
                f1.errors.append(&mut f2.errors);
                VerificationResult::Failure(Failures {
                    errors: f1.errors,
                    fatal: f1.fatal || f2.fatal,
                })
            }
        }
    }
}
