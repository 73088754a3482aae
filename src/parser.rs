//! Directive syntax for echoform sources.
//!
//! Content is split into physical lines, each line is classified as either a
//! literal or one of the comment-wrapped directives (`.options`, `var`, `echo`,
//! `echo-end`), and the resulting token stream is grouped into options blocks
//! and echo blocks. Expression tokens (`{{ ... }}`) are located by
//! [`ExpressionScanner`].

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{BLANK_CHARS, LINE_BREAK_CHARS, NAME_CHARS, OPTIONS_MARKER, VAR_TYPES};
use crate::error::{EchoformError, EchoformResult};

/// One physical line of content.
///
/// `lead` is the line break preceding the line (empty for the first line), so
/// concatenating `lead + text` over all lines reproduces the content exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'t> {
    pub lead: &'t str,
    pub text: &'t str,
}

/// Splits content on `\r\n`, `\n` and `\r`.
pub fn split_lines(content: &str) -> Vec<Line<'_>> {
    let bytes = content.as_bytes();
    let mut lines = Vec::new();
    let mut lead = "";
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\r' | b'\n' => {
                let width = if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                lines.push(Line { lead, text: &content[start..i] });
                lead = &content[i..i + width];
                i += width;
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(Line { lead, text: &content[start..] });
    lines
}

/// Whether `c` may appear in option, variable and path-segment names.
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Escapes a delimiter for use inside a regular expression.
///
/// # Errors
/// * `EchoformError::DelimiterError` if the text contains blanks other than spaces and tabs
pub fn escape_fragment(text: &str, option_name: &str) -> EchoformResult<String> {
    if text.chars().any(|c| c.is_whitespace() && !is_blank(c)) {
        return Err(EchoformError::DelimiterError(format!(
            "option \"{option_name}\" should not contain blank characters other than spaces and tabs"
        )));
    }
    Ok(regex::escape(text))
}

/// The `.options` statement: a separator and the raw, still escaped item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsStatement<'t> {
    pub separator: char,
    pub items: &'t str,
}

impl<'t> OptionsStatement<'t> {
    /// Parses what follows the `.options` marker.
    ///
    /// The separator is the last character of the non-name run right after the
    /// marker; at least one character must follow it.
    pub fn parse(tail: &'t str) -> Option<Self> {
        let run_len = tail.find(is_name_char).unwrap_or(tail.len());
        let run = &tail[..run_len];
        let separator = run.chars().last()?;
        let items = &tail[run_len..];
        if items.is_empty() {
            return None;
        }
        Some(Self { separator, items })
    }

    /// Non-empty items, in order.
    pub fn items(&self) -> impl Iterator<Item = &'t str> {
        self.items.split(self.separator).filter(|item| !item.is_empty())
    }
}

/// Parses a single `name` or `name=value` option item.
pub fn parse_option_item(item: &str) -> Option<(&str, Option<&str>)> {
    let name_len = item.find(|c: char| !is_name_char(c)).unwrap_or(item.len());
    if name_len == 0 {
        return None;
    }
    let (name, rest) = item.split_at(name_len);
    if rest.is_empty() {
        Some((name, None))
    } else {
        rest.strip_prefix('=').map(|value| (name, Some(value)))
    }
}

/// Declaration operator of a `var` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`: failure aborts the pass
    Required,
    /// `~`: failure is recorded as a warning
    BestEffort,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '=' => Some(Operator::Required),
            '~' => Some(Operator::BestEffort),
            _ => None,
        }
    }
}

/// `var [<var-type> ]<name> (=|~) <uri>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarStatement<'t> {
    pub var_type: Option<&'t str>,
    pub name: &'t str,
    pub operator: Operator,
    pub uri: &'t str,
}

impl<'t> VarStatement<'t> {
    /// Parses the statement body following the `var` keyword.
    fn parse(tail: &'t str) -> Option<Self> {
        if !tail.starts_with(is_blank) {
            return None;
        }
        let tail = tail.trim_start_matches(is_blank);
        let (first, rest) = take_name(tail)?;
        let after_first = rest.trim_start_matches(is_blank);

        if let Some(statement) = Self::with_operator(None, first, after_first) {
            return Some(statement);
        }
        if rest.len() == after_first.len() || !VAR_TYPES.contains(&first) {
            return None;
        }
        let (name, rest) = take_name(after_first)?;
        Self::with_operator(Some(first), name, rest.trim_start_matches(is_blank))
    }

    fn with_operator(var_type: Option<&'t str>, name: &'t str, rest: &'t str) -> Option<Self> {
        let mut chars = rest.chars();
        let operator = Operator::from_char(chars.next()?)?;
        let uri = chars.as_str().trim();
        if uri.is_empty() {
            return None;
        }
        Some(Self { var_type, name, operator, uri })
    }
}

fn take_name(text: &str) -> Option<(&str, &str)> {
    let len = text.find(|c: char| !is_name_char(c)).unwrap_or(text.len());
    (len > 0).then(|| text.split_at(len))
}

/// A recognized directive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'t> {
    Options(OptionsStatement<'t>),
    Var(VarStatement<'t>),
    /// `echo [text]`; `indent` is the leading blank run of the line
    Echo { indent: &'t str, text: &'t str },
    EchoEnd,
}

/// A classified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'t> {
    pub line: Line<'t>,
    pub directive: Option<Directive<'t>>,
}

impl Token<'_> {
    pub fn is_options(&self) -> bool {
        matches!(self.directive, Some(Directive::Options(_)))
    }

    pub fn is_var(&self) -> bool {
        matches!(self.directive, Some(Directive::Var(_)))
    }

    pub fn is_echo(&self) -> bool {
        matches!(self.directive, Some(Directive::Echo { .. }))
    }

    pub fn is_echo_end(&self) -> bool {
        matches!(self.directive, Some(Directive::EchoEnd))
    }
}

/// Recognizes directive lines for one set of comment delimiters.
#[derive(Debug, Clone)]
pub struct DirectiveScanner {
    line: Regex,
}

impl DirectiveScanner {
    /// Builds the line pattern `<blank>*<ignore-head><comment-start><blank>*<body><comment-end><ignore-tail><blank>*`.
    ///
    /// `ignore_head` and `ignore_tail` are regular expression fragments, the
    /// comment delimiters are literals.
    pub fn new(
        comment_start: &str,
        comment_end: &str,
        ignore_head: &str,
        ignore_tail: &str,
    ) -> EchoformResult<Self> {
        let blank = format!("[{BLANK_CHARS}]");
        let mut pattern = format!("^(?P<indent>{blank}*)");
        if !ignore_head.is_empty() {
            pattern.push_str(&format!("(?:{ignore_head})"));
        }
        pattern.push_str(&escape_fragment(comment_start, "comment-start")?);
        pattern.push_str(&format!("{blank}*(?P<body>.*?)"));
        pattern.push_str(&escape_fragment(comment_end, "comment-end")?);
        if !ignore_tail.is_empty() {
            pattern.push_str(&format!("(?:{ignore_tail})"));
        }
        pattern.push_str(&format!("{blank}*$"));

        let line = Regex::new(&pattern).map_err(|e| {
            EchoformError::DelimiterError(format!("directive pattern \"{pattern}\" does not compile: {e}"))
        })?;
        Ok(Self { line })
    }

    /// Classifies a single line (without its line break).
    pub fn classify<'t>(&self, text: &'t str) -> Option<Directive<'t>> {
        let caps = self.line.captures(text)?;
        let indent = caps.name("indent").map_or("", |m| m.as_str());
        let body = caps.name("body").map_or("", |m| m.as_str());

        if let Some(tail) = body.strip_prefix(OPTIONS_MARKER) {
            return OptionsStatement::parse(tail).map(Directive::Options);
        }
        if body.trim_end_matches(is_blank) == "echo-end" {
            return Some(Directive::EchoEnd);
        }
        if let Some(tail) = body.strip_prefix("echo") {
            let mut chars = tail.chars();
            return match chars.next() {
                None => Some(Directive::Echo { indent, text: "" }),
                Some(c) if is_blank(c) => Some(Directive::Echo { indent, text: chars.as_str() }),
                Some(_) => None,
            };
        }
        body.strip_prefix("var").and_then(VarStatement::parse).map(Directive::Var)
    }

    /// Splits content into lines and classifies every line.
    pub fn tokenize<'t>(&self, content: &'t str) -> Vec<Token<'t>> {
        split_lines(content)
            .into_iter()
            .map(|line| Token { line, directive: self.classify(line.text) })
            .collect()
    }
}

/// `.options` marker followed by a separator run and the item list
static OPTIONS_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}([^{NAME_CHARS}{LINE_BREAK_CHARS}]+[^{LINE_BREAK_CHARS}]+)",
        regex::escape(OPTIONS_MARKER)
    ))
    .unwrap()
});

/// Finds the first `.options` statement anywhere in raw text, regardless of
/// comment wrapping.
pub fn find_options_statement(text: &str) -> Option<OptionsStatement<'_>> {
    OPTIONS_STATEMENT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|tail| OptionsStatement::parse(tail.as_str()))
}

/// Token range of the first run of consecutive options lines.
pub fn options_block(tokens: &[Token<'_>]) -> Option<Range<usize>> {
    let start = tokens.iter().position(Token::is_options)?;
    let len = tokens[start..].iter().take_while(|t| t.is_options()).count();
    Some(start..start + len)
}

/// An `echo` run followed by its body and a closing `echo-end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoBlock {
    /// Token indices of the consecutive `echo` lines
    pub open: Range<usize>,
    /// Token index of the `echo-end` line
    pub end: usize,
}

impl EchoBlock {
    /// Token indices of the literal body.
    pub fn body(&self) -> Range<usize> {
        self.open.end..self.end
    }
}

/// Groups tokens into echo blocks. An `echo` run without a later `echo-end`
/// is not a block.
pub fn echo_blocks(tokens: &[Token<'_>]) -> Vec<EchoBlock> {
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_echo() {
            i += 1;
            continue;
        }
        let open_end = i + tokens[i..].iter().take_while(|t| t.is_echo()).count();
        match tokens[open_end..].iter().position(Token::is_echo_end) {
            Some(offset) => {
                let end = open_end + offset;
                blocks.push(EchoBlock { open: i..open_end, end });
                i = end + 1;
            }
            None => break,
        }
    }
    blocks
}

/// Rebuilds content without the tokens rejected by `keep`.
///
/// When the very first line is dropped, one leading line break is removed from
/// the remainder so the output does not start with a blank line.
pub fn retain_lines<F>(tokens: &[Token<'_>], mut keep: F) -> String
where
    F: FnMut(usize, &Token<'_>) -> bool,
{
    let mut out = String::new();
    let mut dropped_top = false;

    for (index, token) in tokens.iter().enumerate() {
        if keep(index, token) {
            if dropped_top && out.is_empty() {
                out.push_str(token.line.text);
                dropped_top = false;
                continue;
            }
            out.push_str(token.line.lead);
            out.push_str(token.line.text);
        } else if index == 0 {
            dropped_top = true;
        }
    }
    out
}

/// One `{{ ... }}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionMatch<'t> {
    /// Full token text including the delimiters
    pub text: &'t str,
    /// The expression between the delimiters, without surrounding blanks
    pub expression: &'t str,
    pub range: Range<usize>,
}

/// Locates expression tokens for one pair of variable delimiters.
///
/// Grammar: `<var-start> [<path>( <path>)*] ( | <path>( <path>)*)* <var-end>`
/// where a path is a bare `:` or colon-joined name segments.
#[derive(Debug, Clone)]
pub struct ExpressionScanner {
    token: Regex,
    var_start: String,
    var_end: String,
}

impl ExpressionScanner {
    pub fn new(var_start: &str, var_end: &str) -> EchoformResult<Self> {
        let blank = format!("[{BLANK_CHARS}]");
        let key = format!("(?::|[{NAME_CHARS}]+(?::[{NAME_CHARS}]*)*)");
        let keys = format!("{key}(?:{blank}+{key})*");
        let pattern = format!(
            r"{start}{blank}*((?:{keys})?(?:{blank}*\|{blank}*{keys})*){blank}*{end}",
            start = escape_fragment(var_start, "var-start")?,
            end = escape_fragment(var_end, "var-end")?,
        );
        Ok(Self {
            token: Regex::new(&pattern)?,
            var_start: var_start.to_string(),
            var_end: var_end.to_string(),
        })
    }

    /// All non-overlapping expression tokens in `text`.
    pub fn find_iter<'s, 't>(&'s self, text: &'t str) -> impl Iterator<Item = ExpressionMatch<'t>> + 's
    where
        't: 's,
    {
        self.token.captures_iter(text).filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ExpressionMatch {
                text: whole.as_str(),
                expression: caps.get(1).map_or("", |m| m.as_str()),
                range: whole.range(),
            })
        })
    }

    /// Wraps a bare expression in the variable delimiters unless it already is.
    pub fn wrap(&self, expression: &str) -> String {
        if expression.len() >= self.var_start.len() + self.var_end.len()
            && expression.starts_with(&self.var_start)
            && expression.ends_with(&self.var_end)
        {
            expression.to_string()
        } else {
            format!("{}{}{}", self.var_start, expression, self.var_end)
        }
    }
}
