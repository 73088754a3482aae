//! Line-list resources.
//!
//! A list file may carry its own `.options` statement:
//! `ignore-mark=<prefix>` (default `#`), `keep-blank-lines`, `keep-duplicate`
//! and `no-trim`.

use crate::config::{InFileOptions, OptionSet, OptionValue};
use crate::error::EchoformResult;
use crate::parser::split_lines;

/// Splits list content into items.
///
/// # Errors
/// * Any error of deriving the list's own options
pub fn parse_list(content: &str) -> EchoformResult<Vec<String>> {
    let in_file = InFileOptions::derive(content, &OptionSet::new())?;
    let options = in_file.options();

    let ignore_mark = match options.get("ignore-mark") {
        Some(OptionValue::Str(mark)) => mark.as_str(),
        Some(OptionValue::Bool(_)) => "",
        None => "#",
    };
    let keep_blank_lines = options.get("keep-blank-lines").is_some_and(OptionValue::is_truthy);
    let keep_duplicate = options.is_true("keep-duplicate");
    let trim = !options.get("no-trim").is_some_and(OptionValue::is_truthy);

    let content = in_file.remove_options(content);
    let mut items: Vec<String> = Vec::new();
    for line in split_lines(content.trim()) {
        if !ignore_mark.is_empty() && line.text.starts_with(ignore_mark) {
            continue;
        }
        let item = if trim { line.text.trim() } else { line.text };
        if !keep_blank_lines && item.is_empty() {
            continue;
        }
        if keep_duplicate || !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_list() {
        let items = parse_list("  b \n# note\n\na\nb\r\n").unwrap();
        assert_eq!(items, vec!["b", "a"]);
    }

    #[test]
    fn test_list_options() {
        let content = "// .options |ignore-mark=;|keep-duplicate|keep-blank-lines\na\n;x\n\na";
        let items = parse_list(content).unwrap();
        assert_eq!(items, vec!["a", "", "a"]);
    }
}
