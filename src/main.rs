//! echoform's main application entry point.
//! Handles command-line argument parsing, wires the host collaborators and
//! reports the outcome of one processing pass.

use echoform::{
    cli::{get_args, Args},
    config::load_vars_file,
    error::default_error_handler,
    host::{Host, LocalFileSystem, ModuleRegistry, ReqwestClient, SystemSnapshot},
    logger::init_logger,
    processor::TemplateProcessor,
    value::Map,
};

/// Exit status of a failed pass
const EXIT_PARSE_ERROR: i32 = 2;

/// Exit status when the host cannot be set up
const EXIT_SETUP_ERROR: i32 = 3;

/// Main application entry point.
fn main() {
    let args = get_args();
    init_logger(args.verbose);

    std::process::exit(run(args));
}

/// Runs one pass and prints options, info, warnings and the outcome.
///
/// # Returns
/// * The process exit status
fn run(args: Args) -> i32 {
    let vars = match &args.vars {
        Some(path) => load_vars_file(path).unwrap_or_else(|e| default_error_handler(e, EXIT_SETUP_ERROR)),
        None => Map::new(),
    };
    let http = ReqwestClient::new().unwrap_or_else(|e| default_error_handler(e, EXIT_SETUP_ERROR));
    let system = SystemSnapshot::capture();
    let modules = ModuleRegistry::new();
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let mut processor = TemplateProcessor::new(host, args.process_options(vars));
    let result = processor.process();

    let to_json = |value: serde_json::Result<String>| value.unwrap_or_else(|e| e.to_string());
    println!("\noptions: {}", to_json(serde_json::to_string_pretty(processor.options())));
    println!("\ninfo: {}", to_json(serde_json::to_string_pretty(processor.info())));
    for (i, warning) in processor.warnings().iter().enumerate() {
        println!("[WARNING {}] {}", i + 1, warning);
    }

    match result {
        Ok(outcome) => {
            println!("\nmessage: {outcome}");
            0
        }
        Err(e) => {
            eprintln!("\nparse error:\n\n{e}\n");
            EXIT_PARSE_ERROR
        }
    }
}
