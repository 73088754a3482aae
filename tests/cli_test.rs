use clap::Parser;
use echoform::cli::Args;
use echoform::config::OptionValue;
use echoform::value::Map;
use std::ffi::OsString;
use std::path::PathBuf;

fn make_args(args: &[&str]) -> Vec<OsString> {
    let mut res = vec![OsString::from("echoform")];
    res.extend(args.iter().map(OsString::from));
    res
}

#[test]
fn test_basic_args() {
    let args = make_args(&["./src/main.c"]);
    let parsed = Args::try_parse_from(args).unwrap();

    assert_eq!(parsed.input, PathBuf::from("./src/main.c"));
    assert_eq!(parsed.output, None);
    assert!(!parsed.keep_statements);
    assert!(!parsed.verbose);
    assert_eq!(parsed.vars, None);
}

#[test]
fn test_all_flags() {
    let args = make_args(&[
        "--output",
        "out/main.c",
        "--keep-statements",
        "--verbose",
        "--vars",
        "vars.yaml",
        "main.c",
    ]);
    let parsed = Args::try_parse_from(args).unwrap();

    assert_eq!(parsed.output, Some(PathBuf::from("out/main.c")));
    assert!(parsed.keep_statements);
    assert!(parsed.verbose);
    assert_eq!(parsed.vars, Some(PathBuf::from("vars.yaml")));
}

#[test]
fn test_short_flags() {
    let args = make_args(&["-o", "out.txt", "-v", "in.txt"]);
    let parsed = Args::try_parse_from(args).unwrap();

    assert_eq!(parsed.output, Some(PathBuf::from("out.txt")));
    assert!(parsed.verbose);
}

#[test]
fn test_delimiter_options() {
    let args = make_args(&["--comment-start", "#", "--var-start", "<%", "--var-end", "%>", "in.py"]);
    let parsed = Args::try_parse_from(args).unwrap();
    let options = parsed.option_set();

    assert_eq!(options.get_str("comment-start"), Some("#"));
    assert_eq!(options.get_str("var-start"), Some("<%"));
    assert_eq!(options.get("var-end"), Some(&OptionValue::from("%>")));
    assert!(!options.contains("comment-end"));
    assert!(!options.contains("escape"));
}

#[test]
fn test_process_options() {
    let args = make_args(&["--keep-statements", "-o", "b.txt", "a.txt"]);
    let parsed = Args::try_parse_from(args).unwrap();
    let request = parsed.process_options(Map::new());

    assert_eq!(request.input, PathBuf::from("a.txt"));
    assert_eq!(request.output, Some(PathBuf::from("b.txt")));
    assert!(request.keep_statements);
    assert!(request.vars.is_empty());
}

#[test]
fn test_missing_args() {
    let args = make_args(&[]);
    assert!(Args::try_parse_from(args).is_err());
}

#[test]
fn test_missing_args_prints_help_and_exits() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_echoform")).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("<INPUT>"));
}
