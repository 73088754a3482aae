//! Command-line interface implementation for echoform.
//! Provides argument parsing and help text formatting using clap.

use clap::{error::ErrorKind, CommandFactory, Parser};
use std::path::PathBuf;

use crate::config::OptionSet;
use crate::processor::ProcessOptions;
use crate::value::Map;

/// Command-line arguments structure for echoform.
#[derive(Parser, Debug)]
#[command(author, version, about = "echoform: refresh generated regions of a file from declared resources", long_about = None)]
pub struct Args {
    /// Source file carrying the directives
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Write the result here instead of updating the source in place.
    /// Directive statements are stripped from the output unless
    /// --keep-statements is given.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep directive statements in the output
    #[arg(long)]
    pub keep_statements: bool,

    /// Comment opening delimiter of directives (default "//")
    #[arg(long)]
    pub comment_start: Option<String>,

    /// Comment closing delimiter of directives (default empty)
    #[arg(long)]
    pub comment_end: Option<String>,

    /// Opening delimiter of expressions (default "{{")
    #[arg(long)]
    pub var_start: Option<String>,

    /// Closing delimiter of expressions (default "}}")
    #[arg(long)]
    pub var_end: Option<String>,

    /// Escape character for option values and URIs
    #[arg(long)]
    pub escape: Option<String>,

    /// JSON or YAML file with variables available to expressions
    #[arg(long, value_name = "FILE")]
    pub vars: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Caller options given on the command line.
    pub fn option_set(&self) -> OptionSet {
        [
            ("comment-start", &self.comment_start),
            ("comment-end", &self.comment_end),
            ("var-start", &self.var_start),
            ("var-end", &self.var_end),
            ("escape", &self.escape),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }

    /// Request for the processor.
    ///
    /// # Arguments
    /// * `vars` - Variables loaded from `--vars`
    pub fn process_options(&self, vars: Map) -> ProcessOptions {
        ProcessOptions {
            input: self.input.clone(),
            output: self.output.clone(),
            keep_statements: self.keep_statements,
            options: self.option_set(),
            vars,
        }
    }
}

/// Parses command line arguments and returns the Args structure.
///
/// # Returns
/// * `Args` - Parsed command line arguments
///
/// # Exits
/// * With status code 1 if required arguments are missing
/// * With clap's default error handling for other argument errors
pub fn get_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if e.kind() == ErrorKind::MissingRequiredArgument {
                Args::command()
                    .help_template(
                        r#"{about-section}
{usage-heading} {usage}

{all-args}
{after-help}
"#,
                    )
                    .print_help()
                    .unwrap();
                std::process::exit(1);
            } else {
                e.exit();
            }
        }
    }
}
