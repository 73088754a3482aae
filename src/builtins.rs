//! Built-in variables available to every source file.
//!
//! Besides literals and the `json`/`print`/`escape` actions this module
//! provides small helper packs (`path`, `url`, `Date`) and the process
//! snapshot (`env`, `process`).

use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use url::Url;

use crate::config::{self, OptionSet};
use crate::host::SystemSnapshot;
use crate::value::{js_number, Computed, Function, Map, Value};

/// Builds the built-in variable set of one pass.
///
/// # Arguments
/// * `system` - Snapshot backing `env` and `process`
/// * `options` - Effective options, exposed as `options` and used by `escape`
/// * `input` - Absolute source path
/// * `output` - Output path known before any `.output` declaration
pub fn builtin_vars(system: &SystemSnapshot, options: &OptionSet, input: &Path, output: &Path) -> Map {
    let mut vars = Map::new();

    vars.insert("json".into(), Function::action(json).into());
    vars.insert("print".into(), Function::action(|args| Ok(Value::String(concat(&args)))).into());

    let escape_char = options.get_str("escape").and_then(|s| s.chars().next());
    vars.insert(
        "escape".into(),
        Function::action(move |args| {
            let text = concat(&args);
            Ok(Value::String(match escape_char {
                Some(c) => config::escape(&text, c),
                None => text,
            }))
        })
        .into(),
    );

    vars.insert("null".into(), Value::Null);
    vars.insert("undefined".into(), Value::Undefined);
    vars.insert("true".into(), Value::Bool(true));
    vars.insert("false".into(), Value::Bool(false));
    vars.insert("number".into(), Value::Computed(Computed(|key| Value::Number(js_number(key)))));
    vars.insert("string".into(), Value::Computed(Computed(|key| Value::String(key.to_string()))));

    vars.insert("env".into(), string_map(system.env.iter(), false));
    let mut process = Map::new();
    process.insert("env".into(), string_map(system.env.iter(), true));
    process.insert("arch".into(), system.arch.as_str().into());
    process.insert("platform".into(), system.platform.as_str().into());
    process.insert("versions".into(), string_map(system.versions.iter(), false));
    process.insert("cwd".into(), system.cwd.display().to_string().into());
    vars.insert("process".into(), process.into());

    let mut options = options.to_value_map();
    options.insert("input".into(), input.display().to_string().into());
    options.insert("output".into(), output.display().to_string().into());
    vars.insert("options".into(), options.into());

    vars.insert("path".into(), path_pack(system.cwd.display().to_string()).into());
    vars.insert("url".into(), url_pack().into());
    vars.insert("Date".into(), date_pack().into());

    vars
}

fn string_map<'a, I>(entries: I, lowercase: bool) -> Value
where
    I: Iterator<Item = (&'a String, &'a String)>,
{
    let map: Map = entries
        .map(|(k, v)| {
            let key = if lowercase { k.to_lowercase() } else { k.clone() };
            (key, Value::String(v.clone()))
        })
        .collect();
    Value::Map(map)
}

/// Concatenates arguments like `Array.prototype.join('')`.
fn concat(args: &[Value]) -> String {
    args.iter()
        .filter(|v| !matches!(v, Value::Undefined | Value::Null))
        .map(ToString::to_string)
        .collect()
}

static UNDEFINED: Value = Value::Undefined;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> anyhow::Result<&'a str> {
    match arg(args, index) {
        Value::String(s) => Ok(s),
        other => bail!("The \"{name}\" argument must be of type string, received {other}"),
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::String(s) => js_number(s),
        _ => f64::NAN,
    }
}

/// `JSON.stringify(value, replacer, space)`; the replacer is ignored.
fn json(args: Vec<Value>) -> anyhow::Result<Value> {
    let Some(json) = arg(&args, 0).to_json() else {
        return Ok(Value::Undefined);
    };

    let indent = match arg(&args, 2) {
        Value::Number(n) if *n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Value::String(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(Value::String(serde_json::to_string(&json)?));
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut serializer)?;
    Ok(Value::String(String::from_utf8(buf)?))
}

fn path_pack(cwd: String) -> Map {
    let mut pack = Map::new();
    pack.insert(
        "join".into(),
        Function::action(|args| {
            let parts = (0..args.len())
                .map(|i| str_arg(&args, i, "path"))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let joined = parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("/");
            Ok(normalize(&joined).into())
        })
        .into(),
    );
    pack.insert(
        "resolve".into(),
        Function::action(move |args| {
            let mut resolved = cwd.clone();
            for i in 0..args.len() {
                let part = str_arg(&args, i, "path")?;
                if part.starts_with('/') {
                    resolved = part.to_string();
                } else if !part.is_empty() {
                    resolved = format!("{resolved}/{part}");
                }
            }
            Ok(trim_trailing_slash(normalize(&resolved)).into())
        })
        .into(),
    );
    pack.insert(
        "normalize".into(),
        Function::action(|args| Ok(normalize(str_arg(&args, 0, "path")?).into())).into(),
    );
    pack.insert(
        "dirname".into(),
        Function::action(|args| Ok(dirname(str_arg(&args, 0, "path")?).into())).into(),
    );
    pack.insert(
        "basename".into(),
        Function::action(|args| {
            let base = basename(str_arg(&args, 0, "path")?);
            let stripped = match arg(&args, 1) {
                Value::String(ext) if base != ext.as_str() => base.strip_suffix(ext.as_str()).unwrap_or(base),
                _ => base,
            };
            Ok(stripped.into())
        })
        .into(),
    );
    pack.insert(
        "extname".into(),
        Function::action(|args| Ok(extname(str_arg(&args, 0, "path")?).into())).into(),
    );
    pack.insert(
        "isAbsolute".into(),
        Function::action(|args| Ok(str_arg(&args, 0, "path")?.starts_with('/').into())).into(),
    );
    pack.insert("sep".into(), "/".into());
    pack.insert("delimiter".into(), ":".into());
    pack
}

/// POSIX `path.normalize`.
fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if !absolute => segments.push(".."),
                _ => {}
            },
            other => segments.push(other),
        }
    }

    let mut out = segments.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if out.is_empty() {
        return if absolute { "/" } else { "." }.to_string();
    }
    if path.ends_with('/') && !out.ends_with('/') {
        out.push('/');
    }
    out
}

fn trim_trailing_slash(path: String) -> String {
    if path.len() > 1 && path.ends_with('/') {
        path[..path.len() - 1].to_string()
    } else {
        path
    }
}

fn dirname(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.starts_with('/') { "/" } else { "." }.to_string();
    }
    match trimmed.rfind('/') {
        None => ".".to_string(),
        Some(index) => {
            let dir = trimmed[..index].trim_end_matches('/');
            if dir.is_empty() { "/" } else { dir }.to_string()
        }
    }
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or_default()
}

fn extname(path: &str) -> String {
    let base = basename(path);
    match base.rfind('.') {
        Some(index) if index > 0 => base[index..].to_string(),
        _ => String::new(),
    }
}

fn url_pack() -> Map {
    let mut pack = Map::new();
    pack.insert("parse".into(), Function::action(|args| parse_url(str_arg(&args, 0, "url")?)).into());
    pack.insert("format".into(), Function::action(|args| format_url(arg(&args, 0))).into());
    pack.insert(
        "resolve".into(),
        Function::action(|args| resolve_url(str_arg(&args, 0, "from")?, str_arg(&args, 1, "to")?)).into(),
    );
    pack.insert(
        "domainToASCII".into(),
        Function::action(|args| Ok(url::quirks::domain_to_ascii(str_arg(&args, 0, "domain")?).into())).into(),
    );
    pack.insert(
        "domainToUnicode".into(),
        Function::action(|args| {
            Ok(url::quirks::domain_to_unicode(str_arg(&args, 0, "domain")?).into())
        })
        .into(),
    );
    pack
}

fn optional(text: &str, prefix: &str) -> Value {
    if text.is_empty() {
        Value::Null
    } else {
        Value::String(format!("{prefix}{text}"))
    }
}

fn parse_url(text: &str) -> anyhow::Result<Value> {
    let url = Url::parse(text).with_context(|| format!("Invalid URL \"{text}\""))?;
    let hostname = url.host_str().unwrap_or_default().to_string();
    let port = url.port().map(|p| p.to_string()).unwrap_or_default();
    let host = if port.is_empty() { hostname.clone() } else { format!("{hostname}:{port}") };
    let auth = match (url.username(), url.password()) {
        ("", None) => String::new(),
        (user, None) => user.to_string(),
        (user, Some(password)) => format!("{user}:{password}"),
    };
    let query = url.query().unwrap_or_default();

    let mut parsed = Map::new();
    parsed.insert("protocol".into(), format!("{}:", url.scheme()).into());
    parsed.insert("slashes".into(), url.has_authority().into());
    parsed.insert("auth".into(), optional(&auth, ""));
    parsed.insert("host".into(), optional(&host, ""));
    parsed.insert("port".into(), optional(&port, ""));
    parsed.insert("hostname".into(), optional(&hostname, ""));
    parsed.insert("hash".into(), optional(url.fragment().unwrap_or_default(), "#"));
    parsed.insert("search".into(), optional(query, "?"));
    parsed.insert("query".into(), optional(query, ""));
    parsed.insert("pathname".into(), url.path().into());
    parsed.insert("path".into(), format!("{}{}", url.path(), optional(query, "?").as_str().unwrap_or_default()).into());
    parsed.insert("href".into(), url.as_str().into());
    Ok(parsed.into())
}

fn format_url(value: &Value) -> anyhow::Result<Value> {
    let parts = match value {
        Value::String(text) => {
            return Ok(Url::parse(text).map_or_else(|_| text.clone(), String::from).into());
        }
        Value::Map(parts) => parts,
        other => bail!("The \"urlObject\" argument must be a string or an object, received {other}"),
    };
    let part = |name: &str| parts.get(name).and_then(Value::as_str).unwrap_or_default();

    let mut out = String::new();
    let protocol = part("protocol");
    if !protocol.is_empty() {
        out.push_str(protocol);
        if !protocol.ends_with(':') {
            out.push(':');
        }
    }
    let host = match (part("host"), part("hostname"), part("port")) {
        ("", "", _) => String::new(),
        ("", hostname, "") => hostname.to_string(),
        ("", hostname, port) => format!("{hostname}:{port}"),
        (host, _, _) => host.to_string(),
    };
    if !host.is_empty() || matches!(parts.get("slashes"), Some(Value::Bool(true))) {
        out.push_str("//");
        if !part("auth").is_empty() {
            out.push_str(part("auth"));
            out.push('@');
        }
        out.push_str(&host);
    }
    out.push_str(part("pathname"));
    let search = part("search");
    if !search.is_empty() && !search.starts_with('?') {
        out.push('?');
    }
    out.push_str(search);
    let hash = part("hash");
    if !hash.is_empty() && !hash.starts_with('#') {
        out.push('#');
    }
    out.push_str(hash);
    Ok(out.into())
}

fn resolve_url(from: &str, to: &str) -> anyhow::Result<Value> {
    if let Ok(base) = Url::parse(from) {
        return Ok(base.join(to)?.as_str().into());
    }
    let base = Url::parse("resolve://")?.join(from)?;
    let resolved = base.join(to)?;
    if resolved.scheme() != "resolve" {
        return Ok(resolved.as_str().into());
    }
    let mut out = resolved.path().to_string();
    if let Some(query) = resolved.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = resolved.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    if !from.starts_with('/') {
        out = out.trim_start_matches('/').to_string();
    }
    Ok(out.into())
}

fn date_pack() -> Map {
    let mut pack = Map::new();
    pack.insert(
        "now".into(),
        Function::action(|_| Ok(Value::Number(Utc::now().timestamp_millis() as f64))).into(),
    );
    pack.insert("UTC".into(), Function::action(|args| Ok(Value::Number(utc(&args)))).into());
    pack.insert(
        "parse".into(),
        Function::action(|args| Ok(Value::Number(parse_date(&arg(&args, 0).to_string())))).into(),
    );
    pack.insert(
        "new".into(),
        Function::action(|args| {
            let millis = match args.as_slice() {
                [] => Utc::now().timestamp_millis() as f64,
                [Value::String(text)] => parse_date(text),
                [single] => to_number(single),
                _ => utc(&args),
            };
            Ok(Value::String(format_date(millis)))
        })
        .into(),
    );
    pack
}

/// Largest absolute time value a date can hold, in milliseconds
const MAX_TIME_MS: f64 = 8.64e15;

/// `Date.UTC(year, monthIndex, day, hours, minutes, seconds, ms)`
fn utc(args: &[Value]) -> f64 {
    let defaults = [f64::NAN, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    let mut fields = [0.0; 7];
    for (i, field) in fields.iter_mut().enumerate() {
        *field = args.get(i).map_or(defaults[i], to_number);
    }
    if fields.iter().any(|f| !f.is_finite()) {
        return f64::NAN;
    }
    let [year, month, day, hours, minutes, seconds, millis] = fields.map(f64::trunc);

    let year = if (0.0..=99.0).contains(&year) { year + 1900.0 } else { year };
    let year = year + (month / 12.0).floor();
    let month = month.rem_euclid(12.0) as u32 + 1;
    if year.abs() > f64::from(i32::MAX) {
        return f64::NAN;
    }
    let Some(start) = NaiveDate::from_ymd_opt(year as i32, month, 1).and_then(|d| d.and_hms_opt(0, 0, 0)) else {
        return f64::NAN;
    };

    let time = Utc.from_utc_datetime(&start).timestamp_millis() as f64
        + (day - 1.0) * 86_400_000.0
        + hours * 3_600_000.0
        + minutes * 60_000.0
        + seconds * 1_000.0
        + millis;
    if time.abs() > MAX_TIME_MS {
        f64::NAN
    } else {
        time
    }
}

/// `Date.parse`: RFC 3339, RFC 2822 and plain dates, read as UTC.
fn parse_date(text: &str) -> f64 {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return dt.timestamp_millis() as f64;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return dt.timestamp_millis() as f64;
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, format) {
            return Utc.from_utc_datetime(&ndt).timestamp_millis() as f64;
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(f64::NAN, |ndt| Utc.from_utc_datetime(&ndt).timestamp_millis() as f64)
}

fn format_date(millis: f64) -> String {
    if !millis.is_finite() || millis.abs() > MAX_TIME_MS {
        return "Invalid Date".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(millis as i64).map_or_else(
        || "Invalid Date".to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_paths() {
        assert_eq!(normalize("a/./b/../c/"), "a/c/");
        assert_eq!(normalize("/../x"), "/x");
        assert_eq!(normalize("../x"), "../x");
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("file"), ".");
        assert_eq!(dirname("/file"), "/");
        assert_eq!(extname("index.coffee.md"), ".md");
        assert_eq!(extname(".bashrc"), "");
    }

    #[test]
    fn test_utc_overflowing_month() {
        let args = [Value::from(2020.0), Value::from(12.0), Value::from(1.0)];
        assert_eq!(format_date(utc(&args)), "2021-01-01T00:00:00.000Z");
        assert!(utc(&[]).is_nan());
    }

    #[test]
    fn test_utc_out_of_range_is_nan() {
        let huge_day = [Value::from(2000.0), Value::from(0.0), Value::from(1e17)];
        assert!(utc(&huge_day).is_nan());
        let huge_year = [Value::from(1e300)];
        assert!(utc(&huge_year).is_nan());
        assert_eq!(format_date(utc(&huge_day)), "Invalid Date");
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("1970-01-02"), 86_400_000.0);
        assert_eq!(parse_date("1970-01-01T00:00:01Z"), 1_000.0);
        assert!(parse_date("yesterday").is_nan());
    }

    #[test]
    fn test_json_indent() {
        let mut map = Map::new();
        map.insert("a".into(), Value::from(1.0));
        let out = json(vec![Value::Map(map), Value::Null, Value::from(2.0)]).unwrap();
        assert_eq!(out, Value::from("{\n  \"a\": 1\n}"));
        assert_eq!(json(vec![Value::Undefined]).unwrap(), Value::Undefined);
    }
}
