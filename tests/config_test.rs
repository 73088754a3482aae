use std::fs;

use echoform::config::{escape, load_vars_file, InFileOptions, OptionSet, OptionValue};
use echoform::error::EchoformError;
use echoform::value::Value;
use tempfile::TempDir;

#[test]
fn test_defaults_without_options_statement() {
    let in_file = InFileOptions::derive("plain text\n", &OptionSet::new()).unwrap();
    let options = in_file.options();

    assert_eq!(options.get_str("comment-start"), Some("//"));
    assert_eq!(options.get_str("comment-end"), Some(""));
    assert_eq!(options.get_str("var-start"), Some("{{"));
    assert_eq!(options.get_str("var-end"), Some("}}"));
    assert!(!options.contains("no-echo"));
    assert_eq!(in_file.first_pass_count(), 0);
    assert!(!in_file.is_on_top());
}

#[test]
fn test_in_file_options_override_defaults() {
    let text = "# .options |comment-start=#|var-start=<%|var-end=%>|no-echo\nbody\n";
    let in_file = InFileOptions::derive(text, &OptionSet::new()).unwrap();
    let delimiters = in_file.delimiters();

    assert_eq!(delimiters.comment_start, "#");
    assert_eq!(delimiters.var_start, "<%");
    assert_eq!(delimiters.var_end, "%>");
    assert!(in_file.options().is_true("no-echo"));
    assert_eq!(in_file.first_pass_count(), 4);
    assert!(in_file.is_on_top());
}

#[test]
fn test_caller_options_sit_between_defaults_and_file() {
    let caller: OptionSet = [("comment-start", "--"), ("var-start", "[["), ("var-end", "]]")].into_iter().collect();
    let text = "-- .options |var-start=<<\n";
    let in_file = InFileOptions::derive(text, &caller).unwrap();
    let options = in_file.options();

    assert_eq!(options.get_str("comment-start"), Some("--"));
    assert_eq!(options.get_str("var-start"), Some("<<"));
    assert_eq!(options.get_str("var-end"), Some("]]"));
}

#[test]
fn test_unwrapped_options_statement_is_inconsistent() {
    let text = "x = \".options |comment-start=#\"\n";
    let err = InFileOptions::derive(text, &OptionSet::new()).unwrap_err();
    assert!(matches!(err, EchoformError::StatementConsistencyError(_)));
}

#[test]
fn test_conflicting_first_pass_option() {
    let text = "# .options |comment-start=#\n# .options |comment-start=;\n";
    let err = InFileOptions::derive(text, &OptionSet::new()).unwrap_err();

    match err {
        EchoformError::StatementConsistencyError(message) => {
            assert!(message.contains("First parsed: comment-start=#"));
            assert!(message.contains("Getting: comment-start=;"));
        }
        other => panic!("Expected StatementConsistencyError, got {other:?}"),
    }
}

#[test]
fn test_invalid_ignore_head() {
    let text = "// .options |ignore-head=(\n";
    let err = InFileOptions::derive(text, &OptionSet::new()).unwrap_err();
    assert!(matches!(err, EchoformError::DelimiterError(_)));
}

#[test]
fn test_escape_option() {
    let text = "// .options |escape=\\|output=a\\:b.txt\n";
    let in_file = InFileOptions::derive(text, &OptionSet::new()).unwrap();

    assert_eq!(in_file.options().get_str("escape"), Some("\\"));
    assert_eq!(in_file.options().get_str("output"), Some("a:b.txt"));
    assert_eq!(in_file.unescape("x\\{\\{y"), "x{{y");
    assert_eq!(escape("a{b}\\", '\\'), "a\\{b\\}\\\\");
}

#[test]
fn test_escape_round_trip() {
    let in_file = InFileOptions::derive("// .options |escape=\\\n", &OptionSet::new()).unwrap();
    let samples = ["", "plain words", "{{ a | b }}", "a\\b\\\\c", "|key=va:lue|", "./x/y.txt", "tab\there", "ünï cødé {}"];

    for sample in samples {
        assert_eq!(in_file.unescape(&escape(sample, '\\')), sample, "round trip of {sample:?}");
    }
}

#[test]
fn test_remove_options() {
    let text = "// .options |no-echo\nbody\n";
    let in_file = InFileOptions::derive(text, &OptionSet::new()).unwrap();
    assert_eq!(in_file.remove_options(text), "body\n");

    let text = "head\n// .options |no-echo\nbody";
    let in_file = InFileOptions::derive(text, &OptionSet::new()).unwrap();
    assert_eq!(in_file.remove_options(text), "head\nbody");
}

#[test]
fn test_option_value_truthiness() {
    assert!(OptionValue::Bool(true).is_truthy());
    assert!(!OptionValue::from("").is_truthy());
    assert!(OptionValue::from("x").is_truthy());
}

#[test]
fn test_load_vars_file() {
    let temp_dir = TempDir::new().unwrap();

    let json = temp_dir.path().join("vars.json");
    fs::write(&json, r#"{"name": "demo", "tags": ["a", "b"]}"#).unwrap();
    let vars = load_vars_file(&json).unwrap();
    assert_eq!(vars.get("name"), Some(&Value::from("demo")));
    assert_eq!(vars.get("tags").map(ToString::to_string), Some("a,b".to_string()));

    let yaml = temp_dir.path().join("vars.yaml");
    fs::write(&yaml, "name: demo\nport: 8080\n").unwrap();
    let vars = load_vars_file(&yaml).unwrap();
    assert_eq!(vars.get("port"), Some(&Value::Number(8080.0)));

    let list = temp_dir.path().join("list.yaml");
    fs::write(&list, "- a\n- b\n").unwrap();
    assert!(matches!(load_vars_file(&list), Err(EchoformError::ResourceError { .. })));

    assert!(load_vars_file(temp_dir.path().join("missing.json")).unwrap_err().is_not_found());
}
