//! Configuration handling for echoform sources.
//! This module derives the effective options of a source file from built-in
//! defaults, caller-supplied values and the in-file `.options` statement, and
//! loads caller variable files.

use std::borrow::Cow;
use std::path::Path;

use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::constants::{DEFAULT_OPTIONS, FIRST_PASS_OPTIONS, LINE_BREAK_CHARS};
use crate::error::{EchoformError, EchoformResult};
use crate::parser::{self, DirectiveScanner, OptionsStatement};
use crate::value::{Map, Value};

/// Value of a single option: `name=value` or a bare `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Str(String),
}

impl OptionValue {
    /// JavaScript-style truthiness: `true` or a non-empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Str(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

/// Ordered mapping of option name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OptionSet(IndexMap<String, OptionValue>);

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults; options without a default stay unset.
    pub fn defaults() -> Self {
        let mut options = Self::new();
        for (name, value) in DEFAULT_OPTIONS {
            if let Some(value) = value {
                options.set(name, value);
            }
        }
        options
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    /// String value of an option; bare boolean options yield `None`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(OptionValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether the option is exactly boolean `true`.
    pub fn is_true(&self, name: &str) -> bool {
        matches!(self.0.get(name), Some(OptionValue::Bool(true)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn set<N: Into<String>, V: Into<OptionValue>>(&mut self, name: N, value: V) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// Options as template values, for the `options` built-in.
    pub fn to_value_map(&self) -> Map {
        self.0
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    OptionValue::Bool(b) => Value::Bool(*b),
                    OptionValue::Str(s) => Value::String(s.clone()),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl<N: Into<String>, V: Into<OptionValue>> FromIterator<(N, V)> for OptionSet {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (name, value) in iter {
            options.set(name, value);
        }
        options
    }
}

/// Delimiters derived for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub comment_start: String,
    pub comment_end: String,
    pub var_start: String,
    pub var_end: String,
    pub ignore_head: String,
    pub ignore_tail: String,
    pub escape: Option<char>,
}

impl Delimiters {
    pub fn from_options(options: &OptionSet) -> Self {
        let text = |name: &str| options.get_str(name).unwrap_or_default().to_string();
        Self {
            comment_start: text("comment-start"),
            comment_end: text("comment-end"),
            var_start: text("var-start"),
            var_end: text("var-end"),
            ignore_head: text("ignore-head"),
            ignore_tail: text("ignore-tail"),
            escape: options.get_str("escape").and_then(|s| s.chars().next()),
        }
    }

    /// Directive scanner for these delimiters.
    pub fn scanner(&self) -> EchoformResult<DirectiveScanner> {
        DirectiveScanner::new(
            &self.comment_start,
            &self.comment_end,
            &self.ignore_head,
            &self.ignore_tail,
        )
    }
}

/// Escapes `text` so that [`InFileOptions::unescape`] with the same escape
/// character gives it back: the escape character itself and every
/// punctuation character get prefixed.
pub fn escape(text: &str, escape_char: char) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == escape_char || !(parser::is_name_char(c) || c.is_whitespace()) {
            out.push(escape_char);
        }
        out.push(c);
    }
    out
}

/// Options of one source file: the in-file `.options` statement merged over
/// caller values and built-in defaults.
#[derive(Debug, Clone)]
pub struct InFileOptions {
    options: OptionSet,
    escape_re: Option<Regex>,
    scanner: Option<DirectiveScanner>,
    first_pass_count: usize,
    is_on_top: bool,
}

impl InFileOptions {
    /// Derives the options of `text`.
    ///
    /// # Errors
    /// * `EchoformError::DelimiterError` if `ignore-head`/`ignore-tail` are not valid
    ///   pattern fragments or a delimiter contains illegal blanks
    /// * `EchoformError::StatementConsistencyError` if the comment-wrapped options block
    ///   disagrees with the first, wrapping-agnostic parse
    pub fn derive(text: &str, caller: &OptionSet) -> EchoformResult<Self> {
        let mut this = Self {
            options: OptionSet::new(),
            escape_re: None,
            scanner: None,
            first_pass_count: 0,
            is_on_top: false,
        };

        let defaults = OptionSet::defaults();
        for name in FIRST_PASS_OPTIONS {
            match caller.get(name).or_else(|| defaults.get(name)) {
                Some(OptionValue::Str(value)) if name == "escape" => this.set_escape(value)?,
                Some(value) => this.options.set(name, value.clone()),
                None => {}
            }
        }

        this.first_parse(text)?;
        if this.first_pass_count > 0 {
            this.second_parse(text)?;
        }

        for (name, value) in caller.iter() {
            if !this.options.contains(name) {
                this.options.set(name.clone(), value.clone());
            }
        }
        for (name, value) in defaults.iter() {
            if !this.options.contains(name) {
                this.options.set(name.clone(), value.clone());
            }
        }
        debug!("Derived options: {:?}", this.options);

        Ok(this)
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn delimiters(&self) -> Delimiters {
        Delimiters::from_options(&self.options)
    }

    /// Whether the options block starts on the first line of the file.
    pub fn is_on_top(&self) -> bool {
        self.is_on_top
    }

    /// Number of option items recognized by the first pass.
    pub fn first_pass_count(&self) -> usize {
        self.first_pass_count
    }

    /// Removes the options block from `text`, together with one leading line
    /// break when the block was the first thing in the file.
    pub fn remove_options(&self, text: &str) -> String {
        let Some(scanner) = &self.scanner else {
            return text.to_string();
        };
        let tokens = scanner.tokenize(text);
        match parser::options_block(&tokens) {
            Some(block) => parser::retain_lines(&tokens, |index, _| !block.contains(&index)),
            None => text.to_string(),
        }
    }

    /// Replaces every `<escape>X` (X not a line break) with `X`.
    pub fn unescape<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.escape_re {
            Some(re) => re.replace_all(text, "$1"),
            None => Cow::Borrowed(text),
        }
    }

    fn set_escape(&mut self, value: &str) -> EchoformResult<()> {
        let escape: String = value.chars().take(1).collect();
        if !escape.is_empty() {
            let pattern = format!("{}([^{LINE_BREAK_CHARS}])", regex::escape(&escape));
            let re = Regex::new(&pattern).map_err(|e| {
                EchoformError::DelimiterError(format!("regular expression for option \"escape\" error: {e}"))
            })?;
            self.escape_re = Some(re);
        }
        self.options.set("escape", OptionValue::Str(escape));
        Ok(())
    }

    fn first_parse(&mut self, text: &str) -> EchoformResult<()> {
        let Some(statement) = parser::find_options_statement(text) else {
            return Ok(());
        };
        for item in statement.items() {
            let Some((name, value)) = parser::parse_option_item(item) else {
                continue;
            };
            self.first_pass_count += 1;
            let Some(value) = value else {
                continue;
            };
            if !FIRST_PASS_OPTIONS.contains(&name) {
                continue;
            }
            if name == "escape" {
                self.set_escape(value)?;
            } else {
                let value = self.unescape(value).into_owned();
                self.options.set(name, value);
            }
        }
        debug!("First options pass recognized {} item(s)", self.first_pass_count);
        Ok(())
    }

    fn second_parse(&mut self, text: &str) -> EchoformResult<()> {
        for name in ["ignore-head", "ignore-tail"] {
            if let Some(fragment) = self.options.get_str(name) {
                Regex::new(fragment).map_err(|e| {
                    EchoformError::DelimiterError(format!("regular expression for option \"{name}\" error: {e}"))
                })?;
            }
        }

        let scanner = self.delimiters().scanner()?;
        let tokens = scanner.tokenize(text);
        let block = parser::options_block(&tokens).ok_or_else(|| {
            EchoformError::StatementConsistencyError(
                "options statement found but no comment-wrapped options block matches the first parsing"
                    .to_string(),
            )
        })?;
        self.is_on_top = block.start == 0;

        let statements: Vec<OptionsStatement<'_>> = tokens[block]
            .iter()
            .filter_map(|token| match token.directive {
                Some(parser::Directive::Options(statement)) => Some(statement),
                _ => None,
            })
            .collect();

        for statement in statements {
            for item in statement.items() {
                let Some((name, value)) = parser::parse_option_item(item) else {
                    continue;
                };
                let value = match value {
                    None => OptionValue::Bool(true),
                    Some(v) if name == "escape" => OptionValue::Str(v.chars().take(1).collect()),
                    Some(v) => OptionValue::Str(self.unescape(v).into_owned()),
                };

                if FIRST_PASS_OPTIONS.contains(&name) {
                    if self.options.get(name) != Some(&value) {
                        return Err(EchoformError::StatementConsistencyError(format!(
                            "option conflicted with first parsing.\nFirst parsed count: {}\nFirst parsed: {name}={}\nGetting: {name}={value}",
                            self.first_pass_count,
                            self.options.get(name).map(ToString::to_string).unwrap_or_else(|| "undefined".to_string()),
                        )));
                    }
                } else {
                    self.options.set(name, value);
                }
            }
        }

        self.scanner = Some(scanner);
        Ok(())
    }
}

/// Loads caller variables from a JSON or YAML file.
///
/// # Arguments
/// * `path` - File to read; JSON is tried first, then YAML
///
/// # Errors
/// * `EchoformError::PathIoError` if the file cannot be read
/// * `EchoformError::ResourceError` if the content is neither a JSON nor a YAML mapping
pub fn load_vars_file<P: AsRef<Path>>(path: P) -> EchoformResult<Map> {
    let path = path.as_ref();
    debug!("Loading variables from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| EchoformError::path_io(path, e))?;

    let raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(_) => serde_yaml::from_str(&content).map_err(|e| {
            EchoformError::resource(path.display().to_string(), format!("invalid variables file: {e}"))
        })?,
    };

    match Value::from(raw) {
        Value::Map(map) => Ok(map),
        _ => Err(EchoformError::resource(
            path.display().to_string(),
            "variables file should contain a mapping",
        )),
    }
}
