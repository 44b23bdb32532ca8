use getopts::Options;
use smtio::prover::{AssertionMode, ProverError, SmtDriver, SmtDriverOptions};
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use symex::config::Config;
use symex::parser::parse_program_str;
use symex::verifier::verify_program;

fn main() {
    let mut args = std::env::args();
    let program_name = args.next().unwrap();

    let mut opts = Options::new();
    opts.optopt("", "smt-exe", "Path to the SMT solver binary", "PATH");
    opts.optmulti("", "smt-arg", "Extra argument passed to the solver", "ARG");
    opts.optopt("", "timeout", "Default assertion timeout in ms (0 disables)", "MS");
    opts.optopt("", "split-timeout", "Timeout for permission-split sub-checks in ms", "MS");
    opts.optopt(
        "",
        "assertion-mode",
        "How goals are discharged: push-pop or soft-constraints",
        "MODE",
    );
    opts.optopt("", "log-smt", "Directory receiving solver logs", "DIR");
    opts.optflag("", "no-chunk-order-heuristics", "Disable hint-based chunk ordering");
    opts.optflag("", "no-isc-triggers", "Omit triggers on inverse/non-null axioms");
    opts.optflag("", "ide-mode-advanced", "Fetch models on failed assertions");
    opts.optflag(
        "",
        "predicate-triggers-on-inhale",
        "Emit the predicate trigger function on produce",
    );
    opts.optflag(
        "",
        "assume-injectivity-on-inhale",
        "Assume rather than check receiver injectivity when inhaling",
    );
    opts.optflag("", "output-json", "Report failures as JSON");
    opts.optflag("h", "help", "print this help menu");

    let print_usage = || {
        let brief = format!("Usage: {} INPUT [OPTIONS]", program_name);
        eprint!("{}", opts.usage(&brief));
    };

    let matches = match opts.parse(args) {
        Ok(m) => {
            if m.opt_present("h") {
                print_usage();
                return;
            }
            match m.free.len() {
                1 => m,
                _ => {
                    print_usage();
                    std::process::exit(-1);
                }
            }
        }
        Err(f) => {
            eprintln!("Error: {}", f.to_string());
            print_usage();
            std::process::exit(-1);
        }
    };

    let mut config = Config::new();
    if let Some(exe) = matches.opt_str("smt-exe") {
        config.smt_exe = exe;
    }
    config.smt_args = matches.opt_strs("smt-arg");
    if let Some(ms) = matches.opt_str("timeout") {
        config.smt_timeout = ms.parse().expect("--timeout expects a number");
    }
    if let Some(ms) = matches.opt_str("split-timeout") {
        config.split_timeout = ms.parse().expect("--split-timeout expects a number");
    }
    if let Some(mode) = matches.opt_str("assertion-mode") {
        config.assertion_mode = match mode.as_str() {
            "push-pop" => AssertionMode::PushPop,
            "soft-constraints" => AssertionMode::SoftConstraints,
            _ => {
                eprintln!("Error: unknown assertion mode {}", mode);
                std::process::exit(-1);
            }
        };
    }
    config.log_dir = matches.opt_str("log-smt");
    config.disable_chunk_order_heuristics = matches.opt_present("no-chunk-order-heuristics");
    config.disable_isc_triggers = matches.opt_present("no-isc-triggers");
    config.ide_mode_advanced = matches.opt_present("ide-mode-advanced");
    config.enable_predicate_triggers_on_inhale =
        matches.opt_present("predicate-triggers-on-inhale");
    config.assume_injectivity_on_inhale = matches.opt_present("assume-injectivity-on-inhale");
    config.output_json = matches.opt_present("output-json");
    let config = Arc::new(config);

    // Read and parse the input file
    let in_filename = &matches.free[0];
    let mut input = String::new();
    File::open(in_filename)
        .and_then(|mut file| file.read_to_string(&mut input))
        .unwrap_or_else(|e| panic!("could not read file {}: {}", in_filename, e));
    let program = match parse_program_str(&input) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(-1);
        }
    };

    // Set up the solver driver
    let log = config.smt_log_file(0).map(|path| {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).expect("could not create solver log directory");
        }
        Box::new(File::create(&path).expect("could not create solver log file"))
            as Box<dyn std::io::Write>
    });
    let driver_options = SmtDriverOptions {
        exe: config.smt_exe.clone(),
        args: config.smt_args.clone(),
        default_timeout_ms: config.smt_timeout,
        assertion_mode: config.assertion_mode,
        advanced_models: config.ide_mode_advanced,
    };
    let driver = SmtDriver::new(driver_options, log);

    // Verify
    let results = match verify_program(&config, &program, Box::new(driver)) {
        Ok(results) => results,
        Err(ProverError::DependencyNotFound(e)) => {
            eprintln!("Error: could not start the SMT solver: {}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let mut count_verified = 0;
    let mut count_errors = 0;
    for result in &results {
        if result.errors.is_empty() {
            count_verified += 1;
        } else {
            count_errors += 1;
            for error in &result.errors {
                if config.output_json {
                    println!("{}", serde_json::to_string(error).expect("serialize error"));
                } else {
                    println!("Error in method {}: {}", result.method, error.describe());
                }
            }
        }
    }
    println!(
        "Verification results:: verified: {} errors: {}",
        count_verified, count_errors
    );
    std::process::exit(if count_errors == 0 { 0 } else { 1 });
}
