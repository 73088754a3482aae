use std::io;

use echoform::error::EchoformError;

#[test]
fn test_error_conversion() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
    let err: EchoformError = io_err.into();

    match err {
        EchoformError::IoError(_) => (),
        _ => panic!("Expected IoError variant"),
    }
}

#[test]
fn test_error_display() {
    let err = EchoformError::DelimiterError("bad fragment".to_string());
    assert_eq!(err.to_string(), "Delimiter error: bad fragment.");

    let err = EchoformError::resource("./a.json", "parse as json error: EOF");
    assert_eq!(err.to_string(), "Resource error for './a.json': parse as json error: EOF");

    let err = EchoformError::expression("{{x | y}}", "action \"y\" should be function");
    assert_eq!(err.to_string(), "Expression error in '{{x | y}}': action \"y\" should be function");
}

#[test]
fn test_declaration_error_wraps_cause() {
    let err = EchoformError::DeclarationError {
        statement: "// var a = ./a.txt".to_string(),
        source: Box::new(EchoformError::resource("/d/a.txt", "read file error")),
    };
    let message = err.to_string();
    assert!(message.starts_with("Declaration error in '// var a = ./a.txt'"));
    assert!(message.contains("read file error"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_is_not_found() {
    let missing = EchoformError::path_io("/nope", io::Error::new(io::ErrorKind::NotFound, "gone"));
    assert!(missing.is_not_found());

    let denied = EchoformError::path_io("/nope", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
    assert!(!denied.is_not_found());
    assert!(!EchoformError::OutputConflictError("x".to_string()).is_not_found());
}
