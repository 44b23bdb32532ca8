use crate::emitter::Emitter;
use crate::nodes;
use crate::printer::{decl_to_node, node_to_string, str_to_node, term_to_node};
use crate::smt_process::SmtProcess;
use crate::term::{Decl, DeclX, Fun, FunX, Sort, Term};
use sise::Node;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProverError {
    /// The solver binary is missing or cannot be started.
    DependencyNotFound(String),
    /// The solver sent output we did not expect.
    Interaction(String),
}

impl std::fmt::Display for ProverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProverError::DependencyNotFound(s) => {
                write!(f, "could not start the SMT solver: {}", s)
            }
            ProverError::Interaction(s) => {
                write!(f, "unexpected output from the SMT solver: {}", s)
            }
        }
    }
}

impl std::error::Error for ProverError {}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssertionMode {
    /// (push) (assert (not G)) (check-sat) (pop)
    PushPop,
    /// guard g, (assert (=> g (not G))), (check-sat g)
    SoftConstraints,
}

/// The lifecycle of a prover.  `Erroneous` is terminal and entered when the
/// solver binary cannot be spawned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProverState {
    Created,
    Initialised,
    Running,
    Stopped,
    Erroneous,
}

/// The decider's window onto the solver.  `assume` is cheap; `assert_goal`
/// and `check_goal` run an SMT query.
pub trait Prover {
    /// Start the underlying solver; `DependencyNotFound` when the binary is
    /// missing or unstartable.
    fn start(&mut self) -> Result<(), ProverError>;
    fn comment(&mut self, s: &str);
    fn push(&mut self, n: u32) -> Result<(), ProverError>;
    fn pop(&mut self, n: u32) -> Result<(), ProverError>;
    fn assume(&mut self, t: &Term) -> Result<(), ProverError>;
    fn declare(&mut self, d: &Decl) -> Result<(), ProverError>;
    /// Emit a pre-rendered SMT-LIB command (used for the prelude).
    fn emit_raw(&mut self, line: &str) -> Result<(), ProverError>;
    /// Prove a goal; `timeout` in milliseconds, `None` for the default.
    fn assert_goal(&mut self, goal: &Term, timeout: Option<u32>) -> Result<bool, ProverError>;
    /// Like `assert_goal`, but always push/pop scoped and never fetches a model.
    fn check_goal(&mut self, goal: &Term, timeout: Option<u32>) -> Result<bool, ProverError>;
    /// Satisfiability of the current assertion stack.
    fn check_sat(&mut self, timeout: Option<u32>) -> Result<SatResult, ProverError>;
    /// Mint and declare a fresh uninterpreted function (a constant when
    /// `arg_sorts` is empty).
    fn fresh(
        &mut self,
        prefix: &str,
        arg_sorts: &[Sort],
        result_sort: &Sort,
    ) -> Result<Fun, ProverError>;
    /// Mint a fresh symbol without declaring anything.
    fn fresh_name(&mut self, prefix: &str) -> crate::term::Ident;
    fn statistics(&mut self) -> Result<Vec<(String, String)>, ProverError>;
    fn get_last_model(&mut self) -> Option<String>;
    fn push_pop_depth(&self) -> u32;
    fn stop(&mut self) -> Result<(), ProverError>;
    fn reset(&mut self) -> Result<(), ProverError>;
}

pub struct SmtDriverOptions {
    pub exe: String,
    pub args: Vec<String>,
    /// Default solver timeout in milliseconds; 0 disables the timeout.
    pub default_timeout_ms: u32,
    pub assertion_mode: AssertionMode,
    /// Fetch a model after every failed assertion.
    pub advanced_models: bool,
}

impl Default for SmtDriverOptions {
    fn default() -> Self {
        SmtDriverOptions {
            exe: solver_executable(),
            args: Vec::new(),
            default_timeout_ms: 0,
            assertion_mode: AssertionMode::PushPop,
            advanced_models: false,
        }
    }
}

pub fn solver_executable() -> String {
    if let Ok(path) = std::env::var("SYMEX_Z3_PATH") {
        path
    } else {
        if cfg!(windows) { "z3.exe" } else { "z3" }.to_string()
    }
}

/// Hard backstop on top of the solver-side timeout, so a wedged solver does
/// not hang the verifier.
const RESPONSE_GRACE_MS: u64 = 10_000;

pub struct SmtDriver {
    options: SmtDriverOptions,
    state: ProverState,
    process: Option<SmtProcess>,
    emitter: Emitter,
    push_pop_scope_depth: u32,
    /// Cache for the :timeout option; re-emitted only when the desired value
    /// differs.
    last_timeout: Option<u32>,
    fresh_counter: u64,
    last_model: Option<String>,
    num_queries: u64,
    num_assumptions: u64,
}

impl SmtDriver {
    pub fn new(options: SmtDriverOptions, log: Option<Box<dyn std::io::Write>>) -> Self {
        SmtDriver {
            options,
            state: ProverState::Created,
            process: None,
            emitter: Emitter::new(true, log),
            push_pop_scope_depth: 0,
            last_timeout: None,
            fresh_counter: 0,
            last_model: None,
            num_queries: 0,
            num_assumptions: 0,
        }
    }

    fn transition(&mut self, to: ProverState) {
        use ProverState::*;
        let ok = matches!(
            (self.state, to),
            (Created, Initialised)
                | (Initialised, Running)
                | (Running, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Created, Erroneous)
                | (Initialised, Erroneous)
                | (Running, Erroneous)
        );
        if !ok {
            panic!("internal error: invalid prover state transition {:?} -> {:?}", self.state, to);
        }
        self.state = to;
    }

    pub fn state(&self) -> ProverState {
        self.state
    }

    fn launch(&mut self) -> Result<(), ProverError> {
        self.transition(ProverState::Initialised);
        match SmtProcess::launch(&self.options.exe, &self.options.args) {
            Ok(process) => {
                self.process = Some(process);
            }
            Err(e) => {
                self.state = ProverState::Erroneous;
                return Err(ProverError::DependencyNotFound(format!(
                    "{}: {}",
                    self.options.exe, e
                )));
            }
        }
        self.transition(ProverState::Running);
        self.configure()
    }

    fn configure(&mut self) -> Result<(), ProverError> {
        self.set_option("print-success", "true")?;
        self.set_option("global-declarations", "true")?;
        self.set_option("smtlib2_compliant", "true")?;
        self.set_option("auto_config", "false")?;
        self.set_option("smt.mbqi", "false")?;
        self.set_option("smt.qi.eager_threshold", "100.0")?;
        self.last_timeout = None;
        Ok(())
    }

    pub fn set_option(&mut self, option: &str, value: &str) -> Result<(), ProverError> {
        self.emitter.log_set_option(option, value);
        self.exec_success()
    }

    /// Send the emitter's buffered lines and collect the response lines,
    /// logging and dropping solver warnings.
    fn exec(&mut self, timeout: Option<u32>) -> Result<Vec<String>, ProverError> {
        let data = self.emitter.take_pipe_data();
        let process = match &mut self.process {
            Some(p) => p,
            None => panic!("internal error: prover not running"),
        };
        let handle = process.send_commands_async(data);
        let waited: Result<Vec<String>, ()> = match timeout {
            None => Ok(handle.wait()),
            Some(ms) => {
                let grace = std::time::Duration::from_millis(ms as u64 + RESPONSE_GRACE_MS);
                handle.wait_timeout(grace).map_err(|_| ())
            }
        };
        let lines = match waited {
            Ok(lines) => lines,
            Err(()) => {
                self.state = ProverState::Erroneous;
                return Err(ProverError::Interaction(
                    "the solver stopped responding".to_string(),
                ));
            }
        };
        let mut result: Vec<String> = Vec::new();
        for line in lines {
            if line.starts_with("WARNING") {
                self.emitter.comment(&line);
            } else if line == "<<EOF>>" {
                self.state = ProverState::Erroneous;
                return Err(ProverError::Interaction(
                    "the solver process terminated unexpectedly".to_string(),
                ));
            } else if !line.is_empty() {
                result.push(line);
            }
        }
        Ok(result)
    }

    fn exec_success(&mut self) -> Result<(), ProverError> {
        let lines = self.exec(None)?;
        match &lines[..] {
            [line] if line == "success" => Ok(()),
            _ => Err(ProverError::Interaction(format!(
                "expected success, got: {}",
                lines.join(" ")
            ))),
        }
    }

    fn set_timeout(&mut self, timeout_ms: u32) -> Result<(), ProverError> {
        if self.last_timeout != Some(timeout_ms) {
            self.set_option("timeout", &timeout_ms.to_string())?;
            self.last_timeout = Some(timeout_ms);
        }
        Ok(())
    }

    fn read_sat(&mut self, timeout_ms: u32) -> Result<SatResult, ProverError> {
        let wait = if timeout_ms == 0 { None } else { Some(timeout_ms) };
        let lines = self.exec(wait)?;
        match &lines[..] {
            [line] if line == "sat" => Ok(SatResult::Sat),
            [line] if line == "unsat" => Ok(SatResult::Unsat),
            [line] if line == "unknown" => Ok(SatResult::Unknown),
            _ => Err(ProverError::Interaction(format!(
                "expected sat, unsat or unknown, got: {}",
                lines.join(" ")
            ))),
        }
    }

    fn fetch_model(&mut self) -> Result<(), ProverError> {
        self.emitter.log_word("get-model");
        let lines = self.exec(None)?;
        self.last_model = Some(lines.join("\n"));
        Ok(())
    }

    pub fn version(&mut self) -> Result<String, ProverError> {
        self.emitter.log_get_info("version");
        let lines = self.exec(None)?;
        Ok(lines.join(" "))
    }

    /// Prove `goal` with an explicit push/pop scope around the negated goal.
    fn prove_scoped(
        &mut self,
        goal: &Term,
        timeout_ms: u32,
        fetch_model: bool,
    ) -> Result<bool, ProverError> {
        self.emitter.log_push();
        self.exec_success()?;
        self.emitter
            .log_node(&nodes!(assert (not {term_to_node(goal)})));
        self.exec_success()?;
        self.emitter.log_word("check-sat");
        let sat = self.read_sat(timeout_ms)?;
        if sat != SatResult::Unsat && fetch_model {
            self.fetch_model()?;
        }
        self.emitter.log_pop();
        self.exec_success()?;
        Ok(sat == SatResult::Unsat)
    }

    /// Prove `goal` by discharging a fresh soft-constraint guard, avoiding
    /// stack churn.
    fn prove_soft(
        &mut self,
        goal: &Term,
        timeout_ms: u32,
        fetch_model: bool,
    ) -> Result<bool, ProverError> {
        let guard = format!("$grd{}{}", crate::def::SUFFIX_FRESH, self.fresh_counter);
        self.fresh_counter += 1;
        self.emitter
            .log_node(&nodes!(declare-const {str_to_node(&guard)} Bool));
        self.exec_success()?;
        self.emitter.log_node(
            &nodes!(assert (=> {str_to_node(&guard)} (not {term_to_node(goal)}))),
        );
        self.exec_success()?;
        self.emitter
            .log_node(&nodes!(check-sat {str_to_node(&guard)}));
        let sat = self.read_sat(timeout_ms)?;
        if sat != SatResult::Unsat && fetch_model {
            self.fetch_model()?;
        }
        Ok(sat == SatResult::Unsat)
    }
}

impl Prover for SmtDriver {
    fn start(&mut self) -> Result<(), ProverError> {
        self.launch()
    }

    fn comment(&mut self, s: &str) {
        self.emitter.comment(s);
    }

    fn push(&mut self, n: u32) -> Result<(), ProverError> {
        for _ in 0..n {
            self.emitter.log_push();
            self.exec_success()?;
            self.push_pop_scope_depth += 1;
        }
        Ok(())
    }

    fn pop(&mut self, n: u32) -> Result<(), ProverError> {
        if n > self.push_pop_scope_depth {
            panic!("internal error: popping more scopes than have been pushed");
        }
        for _ in 0..n {
            self.emitter.log_pop();
            self.exec_success()?;
            self.push_pop_scope_depth -= 1;
        }
        Ok(())
    }

    fn assume(&mut self, t: &Term) -> Result<(), ProverError> {
        self.num_assumptions += 1;
        self.emitter.log_node(&nodes!(assert {term_to_node(t)}));
        self.exec_success()
    }

    fn declare(&mut self, d: &Decl) -> Result<(), ProverError> {
        self.emitter.log_node(&decl_to_node(d));
        self.exec_success()
    }

    fn emit_raw(&mut self, line: &str) -> Result<(), ProverError> {
        self.emitter.log_raw(line);
        self.exec_success()
    }

    fn assert_goal(&mut self, goal: &Term, timeout: Option<u32>) -> Result<bool, ProverError> {
        self.num_queries += 1;
        let timeout_ms = timeout.unwrap_or(self.options.default_timeout_ms);
        self.set_timeout(timeout_ms)?;
        let fetch_model = self.options.advanced_models;
        match self.options.assertion_mode {
            AssertionMode::PushPop => self.prove_scoped(goal, timeout_ms, fetch_model),
            AssertionMode::SoftConstraints => self.prove_soft(goal, timeout_ms, fetch_model),
        }
    }

    fn check_goal(&mut self, goal: &Term, timeout: Option<u32>) -> Result<bool, ProverError> {
        self.num_queries += 1;
        let timeout_ms = timeout.unwrap_or(self.options.default_timeout_ms);
        self.set_timeout(timeout_ms)?;
        self.prove_scoped(goal, timeout_ms, false)
    }

    fn check_sat(&mut self, timeout: Option<u32>) -> Result<SatResult, ProverError> {
        self.num_queries += 1;
        let timeout_ms = timeout.unwrap_or(self.options.default_timeout_ms);
        self.set_timeout(timeout_ms)?;
        self.emitter.log_word("check-sat");
        self.read_sat(timeout_ms)
    }

    fn fresh(
        &mut self,
        prefix: &str,
        arg_sorts: &[Sort],
        result_sort: &Sort,
    ) -> Result<Fun, ProverError> {
        let name = format!("{}{}{}", prefix, crate::def::SUFFIX_FRESH, self.fresh_counter);
        self.fresh_counter += 1;
        let fun = Arc::new(FunX {
            name: Arc::new(name),
            arg_sorts: Arc::new(arg_sorts.to_vec()),
            sort: result_sort.clone(),
        });
        let decl = if arg_sorts.is_empty() {
            Arc::new(DeclX::Const(fun.name.clone(), result_sort.clone()))
        } else {
            Arc::new(DeclX::Fun(fun.clone()))
        };
        self.declare(&decl)?;
        Ok(fun)
    }

    fn fresh_name(&mut self, prefix: &str) -> crate::term::Ident {
        let name = format!("{}{}{}", prefix, crate::def::SUFFIX_FRESH, self.fresh_counter);
        self.fresh_counter += 1;
        Arc::new(name)
    }

    fn statistics(&mut self) -> Result<Vec<(String, String)>, ProverError> {
        self.emitter.log_get_info("all-statistics");
        let lines = self.exec(None)?;
        let text = lines.join("\n");
        let mut stats: Vec<(String, String)> = Vec::new();
        let mut parser = sise::Parser::new(text.as_bytes());
        if let Ok(Node::List(nodes)) = sise::read_into_tree(&mut parser) {
            let mut i = 0;
            while i + 1 < nodes.len() {
                if let Node::Atom(key) = &nodes[i] {
                    if let Some(key) = key.strip_prefix(':') {
                        stats.push((key.to_string(), node_to_string(&nodes[i + 1])));
                        i += 2;
                        continue;
                    }
                }
                i += 1;
            }
        }
        stats.push(("queries".to_string(), self.num_queries.to_string()));
        stats.push(("assumptions".to_string(), self.num_assumptions.to_string()));
        Ok(stats)
    }

    fn get_last_model(&mut self) -> Option<String> {
        self.last_model.clone()
    }

    fn push_pop_depth(&self) -> u32 {
        self.push_pop_scope_depth
    }

    fn stop(&mut self) -> Result<(), ProverError> {
        if self.state == ProverState::Running {
            self.transition(ProverState::Stopped);
        }
        if let Some(mut process) = self.process.take() {
            process.shutdown();
        }
        self.emitter.blank_line();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ProverError> {
        self.emitter.log_word("reset");
        self.exec_success()?;
        self.push_pop_scope_depth = 0;
        self.last_model = None;
        self.configure()
    }
}

/// An in-memory prover that records every command, for tests and dry runs.
/// Goals are answered by a configurable oracle (default: everything proves),
/// satisfiability checks by a fixed answer (default: `Unknown`, so both
/// branches of every conditional stay live).  The event log can be shared,
/// so it stays inspectable after the prover has been handed off.
pub struct RecordingProver {
    log: EventLog,
    depth: u32,
    fresh_counter: u64,
    goal_oracle: Box<dyn Fn(&Term) -> bool>,
    sat_answer: SatResult,
    /// Assumptions per scope, for the syntactic contradiction check.
    scopes: Vec<Vec<Term>>,
}

pub type EventLog = std::sync::Arc<std::sync::Mutex<Vec<ProverEvent>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProverEvent {
    Comment(String),
    Push,
    Pop,
    Assume(Term),
    Declare(Decl),
    Raw(String),
    AssertGoal(Term),
    CheckGoal(Term),
    CheckSat,
}

pub fn log_assumptions(log: &EventLog) -> Vec<Term> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProverEvent::Assume(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

pub fn log_goals(log: &EventLog) -> Vec<Term> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProverEvent::AssertGoal(t) | ProverEvent::CheckGoal(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

pub fn log_declarations(log: &EventLog) -> Vec<Decl> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProverEvent::Declare(d) => Some(d.clone()),
            _ => None,
        })
        .collect()
}

impl RecordingProver {
    pub fn new() -> Self {
        RecordingProver::with_log(EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        RecordingProver {
            log,
            depth: 0,
            fresh_counter: 0,
            goal_oracle: Box::new(|_| true),
            sat_answer: SatResult::Unknown,
            scopes: vec![Vec::new()],
        }
    }

    /// Unsat when the assumptions contain the false constant or a term
    /// together with its negation; otherwise the configured answer.
    fn syntactic_sat(&self) -> SatResult {
        use crate::term::{mk_not, Constant, TermX};
        let mut all: std::collections::HashSet<Term> = std::collections::HashSet::new();
        for scope in &self.scopes {
            all.extend(scope.iter().cloned());
        }
        for t in &all {
            if matches!(&**t, TermX::Const(Constant::Bool(false))) {
                return SatResult::Unsat;
            }
            if all.contains(&mk_not(t)) {
                return SatResult::Unsat;
            }
        }
        self.sat_answer
    }

    /// Answer goals through `oracle` instead of proving everything.
    pub fn with_goal_oracle(log: EventLog, oracle: impl Fn(&Term) -> bool + 'static) -> Self {
        let mut prover = RecordingProver::with_log(log);
        prover.goal_oracle = Box::new(oracle);
        prover
    }

    fn record(&mut self, event: ProverEvent) {
        self.log.lock().unwrap().push(event);
    }
}

impl Prover for RecordingProver {
    fn start(&mut self) -> Result<(), ProverError> {
        Ok(())
    }

    fn comment(&mut self, s: &str) {
        self.record(ProverEvent::Comment(s.to_string()));
    }

    fn push(&mut self, n: u32) -> Result<(), ProverError> {
        for _ in 0..n {
            self.record(ProverEvent::Push);
            self.scopes.push(Vec::new());
            self.depth += 1;
        }
        Ok(())
    }

    fn pop(&mut self, n: u32) -> Result<(), ProverError> {
        for _ in 0..n {
            if self.depth == 0 {
                panic!("internal error: popping more scopes than have been pushed");
            }
            self.record(ProverEvent::Pop);
            self.scopes.pop();
            self.depth -= 1;
        }
        Ok(())
    }

    fn assume(&mut self, t: &Term) -> Result<(), ProverError> {
        self.record(ProverEvent::Assume(t.clone()));
        self.scopes.last_mut().expect("scopes").push(t.clone());
        Ok(())
    }

    fn declare(&mut self, d: &Decl) -> Result<(), ProverError> {
        self.record(ProverEvent::Declare(d.clone()));
        Ok(())
    }

    fn emit_raw(&mut self, line: &str) -> Result<(), ProverError> {
        self.record(ProverEvent::Raw(line.to_string()));
        Ok(())
    }

    fn assert_goal(&mut self, goal: &Term, _timeout: Option<u32>) -> Result<bool, ProverError> {
        self.record(ProverEvent::AssertGoal(goal.clone()));
        Ok((self.goal_oracle)(goal))
    }

    fn check_goal(&mut self, goal: &Term, _timeout: Option<u32>) -> Result<bool, ProverError> {
        self.record(ProverEvent::CheckGoal(goal.clone()));
        Ok((self.goal_oracle)(goal))
    }

    fn check_sat(&mut self, _timeout: Option<u32>) -> Result<SatResult, ProverError> {
        self.record(ProverEvent::CheckSat);
        Ok(self.syntactic_sat())
    }

    fn fresh(
        &mut self,
        prefix: &str,
        arg_sorts: &[Sort],
        result_sort: &Sort,
    ) -> Result<Fun, ProverError> {
        let name = format!("{}{}{}", prefix, crate::def::SUFFIX_FRESH, self.fresh_counter);
        self.fresh_counter += 1;
        let fun = Arc::new(FunX {
            name: Arc::new(name),
            arg_sorts: Arc::new(arg_sorts.to_vec()),
            sort: result_sort.clone(),
        });
        self.record(ProverEvent::Declare(if arg_sorts.is_empty() {
            Arc::new(DeclX::Const(fun.name.clone(), result_sort.clone()))
        } else {
            Arc::new(DeclX::Fun(fun.clone()))
        }));
        Ok(fun)
    }

    fn fresh_name(&mut self, prefix: &str) -> crate::term::Ident {
        let name = format!("{}{}{}", prefix, crate::def::SUFFIX_FRESH, self.fresh_counter);
        self.fresh_counter += 1;
        Arc::new(name)
    }

    fn statistics(&mut self) -> Result<Vec<(String, String)>, ProverError> {
        Ok(vec![])
    }

    fn get_last_model(&mut self) -> Option<String> {
        None
    }

    fn push_pop_depth(&self) -> u32 {
        self.depth
    }

    fn stop(&mut self) -> Result<(), ProverError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ProverError> {
        self.depth = 0;
        self.scopes = vec![Vec::new()];
        Ok(())
    }
}
