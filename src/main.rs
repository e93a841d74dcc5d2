use getopts::Options;
use log::{debug, error, info, LevelFilter};
use std::path::Path;
use std::{env, process};

use ercsym::modules::audit::Auditor;
use ercsym::modules::config::VerifierConfig;
use ercsym::modules::ir::Program;
use ercsym::modules::rule::ErcDocument;
use ercsym::modules::solvers::z3_available;

#[derive(Debug)]
struct Args {
  ir_path: String,
  contract_name: String,
  rules_path: String,
  function_name: Option<String>,
  config_path: Option<String>,
  jobs: Option<usize>,
  solver: Option<String>,
  timeout_ms: Option<u64>,
  use_llm: bool,
  verbose_level: Option<String>,
}

fn print_usage(program: &str, opts: &Options) {
  let brief = format!("Usage: {} IR_JSON CONTRACT_NAME -r RULES [options]", program);
  print!("{}", opts.usage(&brief));
}

fn parse_args() -> Args {
  let args: Vec<String> = env::args().collect();
  let program = args[0].clone();

  let mut opts = Options::new();
  opts.optopt("r", "rules", "ERC rule document (JSON)", "RULES");
  opts.optopt("f", "function", "only check rules on this function", "FUNCTION");
  opts.optopt("c", "config", "verifier configuration (JSON)", "CONFIG");
  opts.optopt("j", "jobs", "worker threads (defaults to the number of cores)", "JOBS");
  opts.optopt("", "solver", "z3 executable", "CMD");
  opts.optopt("", "timeout", "per-query solver timeout in milliseconds", "MS");
  opts.optflag("", "llm", "ask a language model instead of solving");
  opts.optopt("v", "verbose", "level of verbose", "LEVEL");
  opts.optflag("h", "help", "print this help menu");

  let matches = match opts.parse(&args[1..]) {
    Ok(m) => m,
    Err(f) => {
      eprintln!("Error: {}", f);
      print_usage(&program, &opts);
      process::exit(1);
    }
  };

  if matches.opt_present("h") {
    print_usage(&program, &opts);
    process::exit(0);
  }

  if matches.free.len() < 2 {
    eprintln!("Error: IR_JSON and CONTRACT_NAME are required.");
    print_usage(&program, &opts);
    process::exit(1);
  }
  let rules_path = match matches.opt_str("r") {
    Some(r) => r,
    None => {
      eprintln!("Error: a rule document is required (-r).");
      print_usage(&program, &opts);
      process::exit(1);
    }
  };

  let parse_num = |name: &str| {
    matches.opt_str(name).map(|v| {
      v.parse::<u64>().unwrap_or_else(|_| {
        eprintln!("Error: --{} expects a number, got {}", name, v);
        process::exit(1);
      })
    })
  };

  Args {
    ir_path: matches.free[0].clone(),
    contract_name: matches.free[1].clone(),
    rules_path,
    function_name: matches.opt_str("f"),
    config_path: matches.opt_str("c"),
    jobs: parse_num("jobs").map(|n| n as usize),
    solver: matches.opt_str("solver"),
    timeout_ms: parse_num("timeout"),
    use_llm: matches.opt_present("llm"),
    verbose_level: matches.opt_str("v"),
  }
}

fn level_filter(level: Option<&str>) -> LevelFilter {
  match level {
    Some("0") | Some("error") => LevelFilter::Error,
    Some("1") | Some("warn") => LevelFilter::Warn,
    Some("2") | Some("info") => LevelFilter::Info,
    Some("3") | Some("debug") => LevelFilter::Debug,
    Some("4") | Some("trace") => LevelFilter::Trace,
    _ => LevelFilter::Info,
  }
}

fn main() {
  let args = parse_args();
  env_logger::Builder::new().filter_level(level_filter(args.verbose_level.as_deref())).parse_default_env().init();
  debug!("{:?}", args);

  let mut config = match &args.config_path {
    Some(path) => match VerifierConfig::load(Path::new(path)) {
      Ok(c) => c,
      Err(e) => {
        error!("Failed to load config '{}': {}", path, e);
        process::exit(1);
      }
    },
    None => VerifierConfig::default(),
  };
  if let Some(solver) = args.solver {
    config.solver.command = solver;
  }
  if args.timeout_ms.is_some() {
    config.solver.timeout_ms = args.timeout_ms;
  }
  if args.use_llm && config.llm.is_none() {
    config.llm = Some(Default::default());
  }
  if !args.use_llm && !z3_available(&config.solver.command) {
    error!("Solver '{}' is not available", config.solver.command);
    process::exit(1);
  }

  info!("Loading IR from file: {}", args.ir_path);
  let program = match Program::load(Path::new(&args.ir_path)) {
    Ok(p) => p,
    Err(e) => {
      error!("Failed to load IR '{}': {}", args.ir_path, e);
      process::exit(1);
    }
  };
  info!("Loading rules from file: {}", args.rules_path);
  let doc = match ErcDocument::load(Path::new(&args.rules_path)) {
    Ok(d) => d,
    Err(e) => {
      error!("Failed to load rules '{}': {}", args.rules_path, e);
      process::exit(1);
    }
  };

  let auditor = Auditor::new(&program, config, args.use_llm).only_function(args.function_name);
  let violations = match auditor.audit_parallel(&args.contract_name, &doc, args.jobs) {
    Ok(v) => v,
    Err(e) => {
      error!("Audit of {} failed: {}", args.contract_name, e);
      process::exit(1);
    }
  };
  info!("{} violations found in {}", violations.len(), args.contract_name);

  match serde_json::to_string_pretty(&violations) {
    Ok(json) => println!("{}", json),
    Err(e) => {
      error!("Failed to serialize the report: {}", e);
      process::exit(1);
    }
  }
}
