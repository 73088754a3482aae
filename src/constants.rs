//! Common constants used throughout echoform.

/// Directive keyword opening an options statement
pub const OPTIONS_MARKER: &str = ".options";

/// Characters allowed in option, variable and path-segment names (regex class body)
pub const NAME_CHARS: &str = r"a-zA-Z0-9_.\-";

/// Line break characters (regex class body)
pub const LINE_BREAK_CHARS: &str = r"\r\n";

/// Blank characters that may pad directives (regex class body)
pub const BLANK_CHARS: &str = r" \t";

/// Option names parsed by the first pass. Their in-file values are fixed by the
/// first occurrence and every later occurrence must agree.
pub const FIRST_PASS_OPTIONS: [&str; 5] =
    ["comment-start", "comment-end", "escape", "ignore-head", "ignore-tail"];

/// Built-in option defaults. Options without a default are left unset.
pub const DEFAULT_OPTIONS: [(&str, Option<&str>); 8] = [
    ("comment-start", Some("//")),
    ("comment-end", Some("")),
    ("var-start", Some("{{")),
    ("var-end", Some("}}")),
    ("ignore-head", Some("")),
    ("ignore-tail", Some("")),
    ("escape", None),
    ("no-echo", None),
];

/// Reserved variable controlling the output path
pub const OUTPUT_VAR: &str = ".output";

/// Reserved variable that skips writing when `true`
pub const IGNORE_VAR: &str = ".ignore";

/// Maximum nesting of pack resources
pub const MAX_PACK_DEPTH: usize = 16;

/// Var type names accepted in `var` statements
pub const VAR_TYPES: [&str; 10] =
    ["text", "json", "list", "stat", "pack", "get", "value", "number", "string", "fn"];
