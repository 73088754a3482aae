//! Core processing orchestration for echoform.
//! Drives one pass over a source file: options, variable declarations, echo
//! blocks, expression evaluation, statement stripping and the idempotent
//! write.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::builtins::builtin_vars;
use crate::config::{InFileOptions, OptionSet};
use crate::constants::{IGNORE_VAR, OUTPUT_VAR};
use crate::error::{EchoformError, EchoformResult};
use crate::host::{hash_of, hash_of_file, resolve_path, Host};
use crate::loader::{ResourceContext, ResourceLoader, VarType};
use crate::parser::{self, Directive, ExpressionScanner, Operator, Token, VarStatement};
use crate::renderer::ExpressionRenderer;
use crate::value::{js_number, ActionOptions, Map, Value, Vars};

/// Caller input of one pass.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Source file, relative paths resolve against the working directory
    pub input: PathBuf,
    /// Explicit output file; statements are stripped when one is declared
    pub output: Option<PathBuf>,
    /// Keep directive statements even when writing elsewhere
    pub keep_statements: bool,
    /// Caller options, overridden by in-file options
    pub options: OptionSet,
    /// Caller variables, layered over the built-ins
    pub vars: Map,
}

impl ProcessOptions {
    pub fn new<P: Into<PathBuf>>(input: P) -> Self {
        Self { input: input.into(), ..Self::default() }
    }
}

/// Progress of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    Init,
    OptionsResolved,
    VarsResolved,
    EchoBlocksExtracted,
    PlaceholdersEvaluated,
    OutputSkipped,
    OutputWritten,
    Done,
}

/// Result of a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// `.ignore` resolved to `true`
    Ignored,
    /// The output already has the same content
    Unchanged,
    Written,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ignored => write!(f, "Ignored, do nothing."),
            Outcome::Unchanged => write!(f, "Same output exists, do nothing."),
            Outcome::Written => write!(f, "Output written."),
        }
    }
}

/// Per echo block log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EchoBlockInfo {
    /// Number of `echo` lines
    pub lines: usize,
    /// `(<length>) <expression>` per expression, grouped by `echo` line
    pub vars: Vec<Vec<String>>,
}

/// Human readable log of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Info {
    /// `(<kind>) <var-type> <name> = <uri>` per declaration
    pub var: Vec<String>,
    pub echo: Vec<EchoBlockInfo>,
}

/// Advisory anomalies collected during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Warning {
    /// A `~` declaration failed to resolve
    Declaration { statement: String, message: String },
    /// `.output` did not resolve to a non-empty string
    IgnoredOutputVar,
    /// The existing output could not be hashed
    HashComparison(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Declaration { statement, message } => {
                write!(f, "Declaration failed.\nFrom: {statement}\n{message}")
            }
            Warning::IgnoredOutputVar => write!(f, "Ignoring functional var \"{OUTPUT_VAR}\"."),
            Warning::HashComparison(message) => write!(f, "Compare output hash error.\n{message}"),
        }
    }
}

/// A line of the rewritten document.
#[derive(Debug, Clone)]
struct OutputLine {
    lead: String,
    text: String,
    /// Options, `var`, `echo` or `echo-end` directive
    statement: bool,
}

impl OutputLine {
    fn copy(token: &Token<'_>, statement: bool) -> Self {
        Self { lead: token.line.lead.to_string(), text: token.line.text.to_string(), statement }
    }
}

/// One expression found on an `echo` line.
#[derive(Debug, Clone)]
struct Replacement {
    source: String,
    expression: String,
    block: usize,
    line: usize,
    target: usize,
    placeholder: String,
}

/// Processes one source file.
pub struct TemplateProcessor<'h> {
    host: Host<'h>,
    request: ProcessOptions,
    options: OptionSet,
    info: Info,
    warnings: Vec<Warning>,
    state: State,
    input: PathBuf,
    source_dir: PathBuf,
    output: PathBuf,
    declared_output: bool,
    keep_statements: bool,
    content: String,
    sign: String,
}

impl<'h> TemplateProcessor<'h> {
    pub fn new(host: Host<'h>, request: ProcessOptions) -> Self {
        let input = resolve_path(&host.system.cwd, &request.input);
        let source_dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            host,
            keep_statements: request.keep_statements,
            request,
            options: OptionSet::new(),
            info: Info::default(),
            warnings: Vec::new(),
            state: State::Init,
            output: input.clone(),
            input,
            source_dir,
            declared_output: false,
            content: String::new(),
            sign: format!("{}{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple()),
        }
    }

    /// Runs the pass.
    ///
    /// # Returns
    /// * `EchoformResult<Outcome>` - Whether the output was written, unchanged or ignored
    ///
    /// # Errors
    /// * `EchoformError::DelimiterError` / `EchoformError::StatementConsistencyError` for bad options
    /// * `EchoformError::DeclarationError` when a `=` declaration fails
    /// * `EchoformError::ExpressionError` when an echo expression fails
    /// * `EchoformError::OutputConflictError` when the output would clobber the source
    ///   or is not a file
    /// * I/O errors from reading the source or writing the output
    pub fn process(&mut self) -> EchoformResult<Outcome> {
        let source = self.read_source()?;

        let in_file = InFileOptions::derive(&source, &self.request.options)?;
        self.apply_options(&in_file);
        self.state = State::OptionsResolved;
        debug!("Options resolved for {}", self.input.display());

        let delimiters = in_file.delimiters();
        let scanner = delimiters.scanner()?;
        let expressions = ExpressionScanner::new(&delimiters.var_start, &delimiters.var_end)?;
        let tokens = scanner.tokenize(&source);

        let mut vars = self.seed_vars();
        self.resolve_vars(&tokens, &in_file, &expressions, &mut vars)?;
        self.state = State::VarsResolved;
        debug!("Resolved {} declaration(s)", self.info.var.len());

        let (mut lines, replacements, echo_options) = self.extract_echo(&tokens, &in_file, &expressions);
        self.state = State::EchoBlocksExtracted;
        debug!("Extracted {} echo block(s)", self.info.echo.len());

        self.evaluate_placeholders(&vars, &mut lines, &replacements, &echo_options)?;
        self.state = State::PlaceholdersEvaluated;
        self.content = join_lines(&lines, false);

        if vars.get(IGNORE_VAR) == Some(&Value::Bool(true)) {
            debug!("\"{IGNORE_VAR}\" is true, skipping output");
            self.state = State::Done;
            return Ok(Outcome::Ignored);
        }

        self.resolve_output(&vars)?;
        if !self.keep_statements {
            self.content = join_lines(&lines, true);
        }

        let outcome = self.write_output()?;
        self.state = State::Done;
        Ok(outcome)
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Effective options, after merging the in-file statement.
    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn read_source(&self) -> EchoformResult<String> {
        let stat = self.host.fs.stat(&self.input)?;
        if !stat.is_file {
            return Err(EchoformError::path_io(
                &self.input,
                io::Error::new(io::ErrorKind::InvalidInput, "source is not a file"),
            ));
        }
        self.host.fs.read_text(&self.input)
    }

    fn apply_options(&mut self, in_file: &InFileOptions) {
        self.options = in_file.options().clone();

        if let Some(output) = &self.request.output {
            self.declared_output = true;
            self.output = resolve_path(&self.host.system.cwd, output);
        } else if let Some(output) = self.options.get_str("output").filter(|o| !o.is_empty()) {
            self.declared_output = true;
            self.output = resolve_path(&self.source_dir, output);
        }
        if self.options.get("keep-statements").is_some_and(|v| v.is_truthy()) {
            self.keep_statements = true;
        }
    }

    fn seed_vars(&self) -> Vars {
        let mut vars = Vars::from_map(builtin_vars(self.host.system, &self.options, &self.input, &self.output));
        vars.extend(self.request.vars.clone());
        vars
    }

    fn resolve_vars(
        &mut self,
        tokens: &[Token<'_>],
        in_file: &InFileOptions,
        expressions: &ExpressionScanner,
        vars: &mut Vars,
    ) -> EchoformResult<()> {
        let ctx = ResourceContext::new(self.host);

        for token in tokens {
            let Some(Directive::Var(statement)) = token.directive else {
                continue;
            };
            let uri = in_file.unescape(statement.uri).into_owned();

            match self.declare(&statement, &uri, &ctx, expressions, vars) {
                Ok((kind, var_type)) => {
                    debug!("Declared {} {} from {uri}", var_type, statement.name);
                    self.info.var.push(format!("({kind}) {var_type} {} = {uri}", statement.name));
                }
                Err(e) if statement.operator == Operator::Required => {
                    return Err(EchoformError::DeclarationError {
                        statement: token.line.text.trim().to_string(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("Declaration \"{}\" failed: {e}", statement.name);
                    self.warnings.push(Warning::Declaration {
                        statement: token.line.text.trim().to_string(),
                        message: e.to_string(),
                    });
                    self.info.var.push(format!(
                        "(error) {} {} = {uri}",
                        statement.var_type.unwrap_or("?"),
                        statement.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves one declaration into `vars`.
    ///
    /// # Returns
    /// * The resource kind (or `value` for pseudo types) and the effective var type
    fn declare(
        &self,
        statement: &VarStatement<'_>,
        uri: &str,
        ctx: &ResourceContext<'_>,
        expressions: &ExpressionScanner,
        vars: &mut Vars,
    ) -> EchoformResult<(&'static str, VarType)> {
        let name = statement.name;
        let mut var_type = statement.var_type.and_then(VarType::parse);

        if let Some((functional, example)) = functional_var(name) {
            if var_type != Some(VarType::Fn) && var_type != Some(functional) {
                return Err(EchoformError::InvalidDeclaration {
                    name: name.to_string(),
                    reason: format!("functional variable, should use like \"{example}\""),
                });
            }
            var_type = Some(functional);
        } else if var_type == Some(VarType::Fn) {
            return Err(EchoformError::InvalidDeclaration {
                name: name.to_string(),
                reason: "var type \"fn\" is only for functional variables".to_string(),
            });
        }

        let value = {
            let renderer = ExpressionRenderer::new(vars);
            if var_type == Some(VarType::Value) {
                Some(renderer.evaluate_value(expressions, uri)?)
            } else {
                None
            }
        };
        if let Some(value) = value {
            vars.insert(name, value);
            return Ok(("value", VarType::Value));
        }

        let text = ExpressionRenderer::new(vars).interpolate(expressions, uri)?;
        match var_type {
            Some(VarType::Number) => {
                vars.insert(name, Value::Number(js_number(&text)));
                Ok(("value", VarType::Number))
            }
            Some(VarType::String) => {
                vars.insert(name, Value::String(text));
                Ok(("value", VarType::String))
            }
            _ => {
                let loader = ResourceLoader::new(&text, var_type, &self.source_dir)?;
                let value = loader.load(ctx)?;
                vars.insert(name, value);
                Ok((loader.kind().as_str(), loader.var_type()))
            }
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("~~~echoform:{}#{index}~~~", self.sign)
    }

    /// Rebuilds the document, regenerating every echo body from its `echo`
    /// lines with placeholders in place of expressions.
    fn extract_echo(
        &mut self,
        tokens: &[Token<'_>],
        in_file: &InFileOptions,
        expressions: &ExpressionScanner,
    ) -> (Vec<OutputLine>, Vec<Replacement>, Vec<ActionOptions>) {
        let options_block = if in_file.first_pass_count() > 0 { parser::options_block(tokens) } else { None };
        let no_echo = self.options.is_true("no-echo");

        let mut lines = Vec::with_capacity(tokens.len());
        let mut replacements = Vec::new();
        let mut echo_options = Vec::new();
        let mut blocks = parser::echo_blocks(tokens).into_iter().peekable();
        let mut index = 0;

        while index < tokens.len() {
            let Some(block) = blocks.next_if(|b| b.open.start == index) else {
                let token = &tokens[index];
                let statement = token.is_var() || options_block.as_ref().is_some_and(|b| b.contains(&index));
                lines.push(OutputLine::copy(token, statement));
                index += 1;
                continue;
            };

            for token in &tokens[block.open.clone()] {
                lines.push(OutputLine::copy(token, true));
            }
            let end = &tokens[block.end];

            if !no_echo {
                let indent = match tokens[block.open.end - 1].directive {
                    Some(Directive::Echo { indent, .. }) => indent,
                    _ => "",
                };
                let line_breaks = end.line.lead;
                let block_index = self.info.echo.len();
                let mut block_info = EchoBlockInfo::default();

                for token in &tokens[block.open.clone()] {
                    let Some(Directive::Echo { text, .. }) = token.directive else {
                        continue;
                    };
                    let target = lines.len();
                    let mut generated = String::from(indent);
                    let mut last = 0;
                    for found in expressions.find_iter(text) {
                        let placeholder = self.placeholder(replacements.len());
                        generated.push_str(&text[last..found.range.start]);
                        generated.push_str(&placeholder);
                        last = found.range.end;
                        replacements.push(Replacement {
                            source: found.text.to_string(),
                            expression: found.expression.to_string(),
                            block: block_index,
                            line: block_info.vars.len(),
                            target,
                            placeholder,
                        });
                    }
                    generated.push_str(&text[last..]);

                    block_info.lines += 1;
                    block_info.vars.push(Vec::new());
                    lines.push(OutputLine { lead: line_breaks.to_string(), text: generated, statement: false });
                }

                self.info.echo.push(block_info);
                echo_options.push(ActionOptions::new(indent, line_breaks));
            }

            lines.push(OutputLine::copy(end, true));
            index = block.end + 1;
        }

        (lines, replacements, echo_options)
    }

    fn evaluate_placeholders(
        &mut self,
        vars: &Vars,
        lines: &mut [OutputLine],
        replacements: &[Replacement],
        echo_options: &[ActionOptions],
    ) -> EchoformResult<()> {
        let renderer = ExpressionRenderer::new(vars);
        for replacement in replacements {
            let options = &echo_options[replacement.block];
            let rendered = renderer.evaluate(&replacement.source, &replacement.expression, options)?;
            let text = rendered.text(options);

            self.info.echo[replacement.block].vars[replacement.line]
                .push(format!("({}) {}", text.chars().count(), rendered.expression));
            let line = &mut lines[replacement.target];
            line.text = line.text.replacen(&replacement.placeholder, &text, 1);
        }
        Ok(())
    }

    fn resolve_output(&mut self, vars: &Vars) -> EchoformResult<()> {
        match vars.get(OUTPUT_VAR) {
            Some(Value::String(output)) if !output.is_empty() => {
                self.declared_output = true;
                self.output = resolve_path(&self.source_dir, output);
            }
            Some(_) => {
                warn!("Ignoring functional var \"{OUTPUT_VAR}\"");
                self.warnings.push(Warning::IgnoredOutputVar);
            }
            None => {}
        }

        if !self.declared_output {
            self.keep_statements = true;
            return Ok(());
        }

        let same_as_source = self.output.to_string_lossy().to_lowercase()
            == self.input.to_string_lossy().to_lowercase();
        if same_as_source && !self.keep_statements {
            return Err(EchoformError::OutputConflictError(format!(
                "output \"{}\" can't override the source file",
                self.output.display()
            )));
        }

        match self.host.fs.stat(&self.output) {
            Ok(stat) if !stat.is_file => Err(EchoformError::OutputConflictError(format!(
                "output \"{}\" exists but is not a file",
                self.output.display()
            ))),
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    fn write_output(&mut self) -> EchoformResult<Outcome> {
        let fs = self.host.fs;
        match hash_of_file(fs, &self.output) {
            Ok(existing) if existing == hash_of(&self.content) => {
                debug!("{} is up to date", self.output.display());
                self.state = State::OutputSkipped;
                return Ok(Outcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Cannot hash {}: {e}", self.output.display());
                self.warnings.push(Warning::HashComparison(e.to_string()));
            }
        }

        fs.write_text(&self.output, &self.content)?;
        debug!("Wrote {}", self.output.display());
        self.state = State::OutputWritten;
        Ok(Outcome::Written)
    }
}

/// Functional type and usage example of a reserved variable.
fn functional_var(name: &str) -> Option<(VarType, &'static str)> {
    match name {
        OUTPUT_VAR => Some((VarType::String, "var fn .output = output-file-path")),
        IGNORE_VAR => Some((VarType::Value, "var fn .ignore = true")),
        _ => None,
    }
}

/// Joins output lines, dropping statements when `strip` is set. When the first
/// line is dropped the next kept line loses its leading line break.
fn join_lines(lines: &[OutputLine], strip: bool) -> String {
    let mut out = String::new();
    let mut dropped_top = false;
    for (index, line) in lines.iter().enumerate() {
        if strip && line.statement {
            dropped_top |= index == 0;
            continue;
        }
        if !(dropped_top && out.is_empty()) {
            out.push_str(&line.lead);
        }
        dropped_top = false;
        out.push_str(&line.text);
    }
    out
}
