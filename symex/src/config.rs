use smtio::prover::{solver_executable, AssertionMode};
use std::path::PathBuf;

pub const SOLVER_LOG_DIR: &str = ".symex-solver-log";
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_SPLIT_TIMEOUT_MS: u32 = 500;

#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the SMT binary; SYMEX_Z3_PATH overrides the default.
    pub smt_exe: String,
    /// Extra solver arguments.
    pub smt_args: Vec<String>,
    /// Default assertion timeout in milliseconds; 0 disables it.
    pub smt_timeout: u32,
    /// Directory receiving per-verifier solver logs, if any.
    pub log_dir: Option<String>,
    pub assertion_mode: AssertionMode,
    /// Timeout for the split algorithm's in-loop depleted checks.
    pub split_timeout: u32,
    /// Skip the hint-based chunk reordering in the split algorithm.
    pub disable_chunk_order_heuristics: bool,
    /// Omit auto-generated triggers for inverse/non-null axioms.
    pub disable_isc_triggers: bool,
    /// Fetch models on failed assertions.
    pub ide_mode_advanced: bool,
    /// Emit the predicate trigger function when producing predicate instances.
    pub enable_predicate_triggers_on_inhale: bool,
    /// Assume rather than check receiver injectivity when inhaling
    /// quantified permissions.
    pub assume_injectivity_on_inhale: bool,
    pub output_json: bool,
}

impl Config {
    pub fn new() -> Config {
        Config {
            smt_exe: solver_executable(),
            smt_args: Vec::new(),
            smt_timeout: DEFAULT_TIMEOUT_MS,
            log_dir: None,
            assertion_mode: AssertionMode::PushPop,
            split_timeout: DEFAULT_SPLIT_TIMEOUT_MS,
            disable_chunk_order_heuristics: false,
            disable_isc_triggers: false,
            ide_mode_advanced: false,
            enable_predicate_triggers_on_inhale: false,
            assume_injectivity_on_inhale: false,
            output_json: false,
        }
    }

    /// Per-verifier solver log path, when logging is enabled.
    pub fn smt_log_file(&self, id: usize) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| PathBuf::from(dir).join(format!("logfile-{:02}.smt2", id)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
