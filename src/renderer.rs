//! Expression evaluation for echoform.
//! Evaluates `{{ inputs | action args }}` pipelines against the variable store.
use std::borrow::Cow;

use log::debug;

use crate::error::{EchoformError, EchoformResult};
use crate::parser::{split_lines, ExpressionScanner};
use crate::value::{ActionOptions, Call, Value, Vars};

/// Result of evaluating one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Normalized expression: stages joined by ` | `, blank runs collapsed
    pub expression: String,
    pub value: Value,
}

impl Rendered {
    /// Display text of the value: empty when undefined, otherwise stringified
    /// with line breaks and indent applied.
    pub fn text(&self, options: &ActionOptions) -> String {
        match &self.value {
            Value::Undefined => String::new(),
            value => set_indent(options, &value.to_string()),
        }
    }
}

/// Rewrites every line break in `text` to `options.line_breaks` followed by
/// `options.indent`. Without a line break token the text is left alone.
pub fn set_indent(options: &ActionOptions, text: &str) -> String {
    if options.line_breaks.is_empty() {
        return text.to_string();
    }
    let separator = format!("{}{}", options.line_breaks, options.indent);
    split_lines(text).iter().map(|line| line.text).collect::<Vec<_>>().join(&separator)
}

/// A pipeline input or argument.
enum Arg<'v> {
    /// An empty input: dropped from the action call
    Missing,
    Value(Cow<'v, Value>),
}

/// Evaluates expressions against a variable store.
pub struct ExpressionRenderer<'v> {
    vars: &'v Vars,
}

impl<'v> ExpressionRenderer<'v> {
    pub fn new(vars: &'v Vars) -> Self {
        Self { vars }
    }

    /// Evaluates one expression.
    ///
    /// # Arguments
    /// * `source` - Full token text, used in error messages
    /// * `expression` - Text between the variable delimiters
    /// * `options` - Indent and line break passed to every action
    ///
    /// # Returns
    /// * `EchoformResult<Rendered>` - The unstringified final value
    ///
    /// # Errors
    /// * `EchoformError::ExpressionError` if an action is not a function, an action
    ///   fails, or a stage uses `:` more than once
    pub fn evaluate(&self, source: &str, expression: &str, options: &ActionOptions) -> EchoformResult<Rendered> {
        let stages: Vec<&str> = expression.split('|').map(|s| s.trim_matches([' ', '\t'])).collect();
        let display = stages.iter().map(|s| collapse_blanks(s)).collect::<Vec<_>>().join(" | ");

        let mut running = self.read_arg(tokens(stages[0]).next().unwrap_or_default());

        for stage in &stages[1..] {
            let mut stage_tokens = tokens(stage);
            let name = stage_tokens.next().unwrap_or_default();

            let mut args = Vec::new();
            let mut uses_running = false;
            for token in stage_tokens {
                if token != ":" {
                    if let Arg::Value(value) = self.read_arg(token) {
                        args.push(value.into_owned());
                    }
                    continue;
                }
                if uses_running {
                    return Err(EchoformError::expression(
                        source,
                        format!("action \"{name}\" uses the running value \":\" more than once"),
                    ));
                }
                uses_running = true;
                if let Arg::Value(value) = &running {
                    args.push(value.clone().into_owned());
                }
            }
            if !uses_running {
                if let Arg::Value(value) = running {
                    args.push(value.into_owned());
                }
            }

            let lookup = self.vars.read(name);
            let Some((function, this)) = lookup
                .as_ref()
                .and_then(|l| l.value.as_function().map(|f| (f.clone(), l.parent)))
            else {
                return Err(EchoformError::expression(source, format!("action \"{name}\" should be function")));
            };

            let call = Call { options, this };
            let value = function.call(&call, args).map_err(|e| {
                EchoformError::expression(source, format!("execute action \"{name}\" error: {e:#}"))
            })?;
            running = Arg::Value(Cow::Owned(value));
        }

        let value = match running {
            Arg::Missing => Value::Undefined,
            Arg::Value(value) => value.into_owned(),
        };
        debug!("Evaluated {source} to {value:?}");
        Ok(Rendered { expression: display, value })
    }

    /// Evaluates every expression token in `text` and splices the display
    /// text back, with no indent or line break rewriting.
    pub fn interpolate(&self, scanner: &ExpressionScanner, text: &str) -> EchoformResult<String> {
        let options = ActionOptions::default();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for token in scanner.find_iter(text) {
            let rendered = self.evaluate(token.text, token.expression, &options)?;
            out.push_str(&text[last..token.range.start]);
            out.push_str(&rendered.text(&options));
            last = token.range.end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Evaluates `expression`, bare or already wrapped in the variable
    /// delimiters, keeping the value unstringified.
    ///
    /// # Errors
    /// * `EchoformError::ExpressionError` if the text is not a variable expression
    pub fn evaluate_value(&self, scanner: &ExpressionScanner, expression: &str) -> EchoformResult<Value> {
        let wrapped = scanner.wrap(expression);
        let token = scanner
            .find_iter(&wrapped)
            .next()
            .ok_or_else(|| EchoformError::expression(expression, "var type value should be a variable expression"))?;
        Ok(self.evaluate(token.text, token.expression, &ActionOptions::default())?.value)
    }

    fn read_arg(&self, token: &str) -> Arg<'v> {
        match token {
            "" => Arg::Missing,
            ":" => Arg::Value(Cow::Owned(Value::Undefined)),
            path => match self.vars.read(path) {
                Some(lookup) => Arg::Value(lookup.value),
                None => Arg::Value(Cow::Owned(Value::Undefined)),
            },
        }
    }
}

fn tokens(stage: &str) -> impl Iterator<Item = &str> {
    stage.split([' ', '\t']).filter(|t| !t.is_empty())
}

fn collapse_blanks(text: &str) -> String {
    tokens(text).collect::<Vec<_>>().join(" ")
}
