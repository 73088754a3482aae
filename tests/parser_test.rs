use echoform::parser::{
    echo_blocks, escape_fragment, find_options_statement, options_block, Directive, DirectiveScanner,
    ExpressionScanner, Operator, VarStatement,
};

fn scanner() -> DirectiveScanner {
    DirectiveScanner::new("//", "", "", "").unwrap()
}

#[test]
fn test_var_statement() {
    let scanner = scanner();

    assert_eq!(
        scanner.classify("// var a = b"),
        Some(Directive::Var(VarStatement {
            var_type: None,
            name: "a",
            operator: Operator::Required,
            uri: "b",
        }))
    );
    assert_eq!(
        scanner.classify("  // var text a ~ ./x.txt  "),
        Some(Directive::Var(VarStatement {
            var_type: Some("text"),
            name: "a",
            operator: Operator::BestEffort,
            uri: "./x.txt",
        }))
    );
    assert_eq!(
        scanner.classify("// var fn .output = out/{{name}}.txt"),
        Some(Directive::Var(VarStatement {
            var_type: Some("fn"),
            name: ".output",
            operator: Operator::Required,
            uri: "out/{{name}}.txt",
        }))
    );
}

#[test]
fn test_invalid_var_statement() {
    let scanner = scanner();

    assert_eq!(scanner.classify("// var a b = c"), None);
    assert_eq!(scanner.classify("// var a ="), None);
    assert_eq!(scanner.classify("// variable = 1"), None);
    assert_eq!(scanner.classify("x // var a = b"), None);
}

#[test]
fn test_echo_directives() {
    let scanner = scanner();

    assert_eq!(
        scanner.classify("    // echo {{x}}"),
        Some(Directive::Echo { indent: "    ", text: "{{x}}" })
    );
    assert_eq!(scanner.classify("// echo"), Some(Directive::Echo { indent: "", text: "" }));
    assert_eq!(scanner.classify("\t// echo-end "), Some(Directive::EchoEnd));
    assert_eq!(scanner.classify("// echoes"), None);
}

#[test]
fn test_block_comment_delimiters() {
    let scanner = DirectiveScanner::new("/*", "*/", "", "").unwrap();

    match scanner.classify("/* var json cfg = ./cfg.json */") {
        Some(Directive::Var(statement)) => {
            assert_eq!(statement.var_type, Some("json"));
            assert_eq!(statement.uri, "./cfg.json");
        }
        other => panic!("Expected a var statement, got {other:?}"),
    }
    assert_eq!(scanner.classify("// var a = b"), None);
}

#[test]
fn test_ignore_head_fragment() {
    let scanner = DirectiveScanner::new("//", "", r"<!--\s*", "").unwrap();
    assert_eq!(scanner.classify("<!-- // echo-end"), Some(Directive::EchoEnd));
    assert_eq!(scanner.classify("// echo-end"), None);
}

#[test]
fn test_escape_fragment() {
    assert_eq!(escape_fragment("/*", "comment-start").unwrap(), r"/\*");
    assert!(escape_fragment("a b", "comment-start").is_ok());
    assert!(escape_fragment("a\nb", "comment-start").is_err());
}

#[test]
fn test_find_options_statement() {
    let statement = find_options_statement("code\n# .options ;comment-start=#;no-echo\n").unwrap();
    assert_eq!(statement.separator, ';');
    assert_eq!(statement.items().collect::<Vec<_>>(), vec!["comment-start=#", "no-echo"]);

    assert!(find_options_statement("no options here").is_none());
}

#[test]
fn test_blocks() {
    let scanner = scanner();
    let tokens =
        scanner.tokenize("a\n// .options |x\n// .options |y\nb\n// echo a\n// echo b\nbody\n// echo-end\n// echo dangling");

    assert_eq!(options_block(&tokens), Some(1..3));

    let blocks = echo_blocks(&tokens);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].open, 4..6);
    assert_eq!(blocks[0].end, 7);
    assert_eq!(blocks[0].body(), 6..7);
}

#[test]
fn test_expression_scanner() {
    let scanner = ExpressionScanner::new("{{", "}}").unwrap();
    let text = "a {{ x }} b {{y:z | json : }} c {{ bad! }} d {{}}";
    let found: Vec<_> = scanner.find_iter(text).collect();

    assert_eq!(found.len(), 3);
    assert_eq!(found[0].text, "{{ x }}");
    assert_eq!(found[0].expression, "x");
    assert_eq!(found[1].expression, "y:z | json :");
    assert_eq!(&text[found[1].range.clone()], "{{y:z | json : }}");
    assert_eq!(found[2].expression, "");
}

#[test]
fn test_expression_wrap() {
    let scanner = ExpressionScanner::new("<%", "%>").unwrap();
    assert_eq!(scanner.wrap("x"), "<%x%>");
    assert_eq!(scanner.wrap("<% x %>"), "<% x %>");
}
