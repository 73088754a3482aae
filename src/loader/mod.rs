//! Resource loading for `var` statements.
//! Classifies a URI as a local file, a network resource or a module, reads it
//! through the host collaborators and converts the content according to the
//! declared var type.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use regex::Regex;

use crate::constants::MAX_PACK_DEPTH;
use crate::error::{EchoformError, EchoformResult};
use crate::host::{resolve_path, FileStat, Host, HttpResponse};
use crate::value::{Map, Value};

pub mod list;
pub mod pack;

/// Declared interpretation of a resolved resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Text,
    Json,
    List,
    Stat,
    Pack,
    Get,
    /// Variable expression, no I/O
    Value,
    /// `Number(uri)`, no I/O
    Number,
    /// URI text verbatim, no I/O
    String,
    /// Marker for functional variables
    Fn,
}

impl VarType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "text" => VarType::Text,
            "json" => VarType::Json,
            "list" => VarType::List,
            "stat" => VarType::Stat,
            "pack" => VarType::Pack,
            "get" => VarType::Get,
            "value" => VarType::Value,
            "number" => VarType::Number,
            "string" => VarType::String,
            "fn" => VarType::Fn,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VarType::Text => "text",
            VarType::Json => "json",
            VarType::List => "list",
            VarType::Stat => "stat",
            VarType::Pack => "pack",
            VarType::Get => "get",
            VarType::Value => "value",
            VarType::Number => "number",
            VarType::String => "string",
            VarType::Fn => "fn",
        }
    }

    /// Whether the type is read from a resource, as opposed to the pseudo
    /// types handled by the processor.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            VarType::Text | VarType::Json | VarType::List | VarType::Stat | VarType::Pack | VarType::Get
        )
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Local file system path
    File,
    /// `http:` or `https:` URL
    Http,
    /// Trusted module loaded through the module loader
    Module,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Http => "http",
            ResourceKind::Module => "module",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a URI.
///
/// A single letter before the first colon is a drive letter, `http`/`https`
/// select the network, any other scheme is not a resource. Text without a
/// colon is a file path.
pub fn classify(uri: &str) -> Option<ResourceKind> {
    if uri.is_empty() || uri.starts_with(char::is_whitespace) {
        return None;
    }
    match uri.find(':') {
        None => Some(ResourceKind::File),
        Some(0) => None,
        Some(1) => uri.starts_with(|c: char| c.is_ascii_alphabetic()).then_some(ResourceKind::File),
        Some(index) => match &uri[..index] {
            "http" | "https" => Some(ResourceKind::Http),
            _ => None,
        },
    }
}

/// Var type named by a file's basename, as in `json.config.txt`.
///
/// Hidden files and names with fewer than three dot-separated parts carry no
/// identity type, nor do names whose first part is not a resource var type.
pub fn identity_var_type(path: &Path) -> Option<VarType> {
    let basename = path.file_name()?.to_string_lossy().to_lowercase();
    let parts: Vec<&str> = basename.split('.').collect();
    if parts[0].is_empty() || parts.len() < 3 {
        return None;
    }
    VarType::parse(parts[0]).filter(VarType::is_resource)
}

/// Shared state of all loaders of one pass: the host, the HTTP cache and the
/// stack of resources being resolved.
pub struct ResourceContext<'h> {
    host: Host<'h>,
    http_cache: RefCell<HashMap<String, HttpResponse>>,
    stack: RefCell<Vec<String>>,
}

impl<'h> ResourceContext<'h> {
    pub fn new(host: Host<'h>) -> Self {
        Self { host, http_cache: RefCell::new(HashMap::new()), stack: RefCell::new(Vec::new()) }
    }

    pub fn host(&self) -> Host<'h> {
        self.host
    }

    /// Fetches `url`, answering repeated requests from the cache.
    pub fn fetch(&self, url: &str) -> EchoformResult<HttpResponse> {
        if let Some(response) = self.http_cache.borrow().get(url) {
            debug!("HTTP cache hit for {url}");
            return Ok(response.clone());
        }
        let response = self.host.http.get(url)?;
        self.http_cache.borrow_mut().insert(url.to_string(), response.clone());
        Ok(response)
    }

    fn enter(&self, uri: &str) -> EchoformResult<StackGuard<'_>> {
        let mut stack = self.stack.borrow_mut();
        if stack.iter().any(|u| u == uri) {
            return Err(EchoformError::resource(uri, format!("cyclic resource reference: {} -> {uri}", stack.join(" -> "))));
        }
        if stack.len() >= MAX_PACK_DEPTH {
            return Err(EchoformError::resource(uri, format!("resources nested deeper than {MAX_PACK_DEPTH} levels")));
        }
        stack.push(uri.to_string());
        Ok(StackGuard { stack: &self.stack })
    }
}

struct StackGuard<'s> {
    stack: &'s RefCell<Vec<String>>,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Loads one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLoader {
    kind: ResourceKind,
    uri: String,
    path: Option<PathBuf>,
    var_type: VarType,
}

impl ResourceLoader {
    /// Prepares a loader.
    ///
    /// # Arguments
    /// * `uri` - Interpolated resource URI
    /// * `var_type` - Declared var type; when omitted a file's identity type
    ///   applies, then `text`
    /// * `base_dir` - Directory relative file paths resolve against
    ///
    /// # Errors
    /// * `EchoformError::ResourceError` if the URI is not a resource or the var type is
    ///   not a resource var type
    pub fn new(uri: &str, var_type: Option<VarType>, base_dir: &Path) -> EchoformResult<Self> {
        let mut kind =
            classify(uri).ok_or_else(|| EchoformError::resource(uri, "not a resource URI"))?;

        let path = (kind == ResourceKind::File).then(|| resolve_path(base_dir, uri));
        let var_type = var_type
            .or_else(|| path.as_deref().and_then(identity_var_type))
            .unwrap_or(VarType::Text);
        if !var_type.is_resource() {
            return Err(EchoformError::resource(uri, format!("unknown resource var type \"{var_type}\"")));
        }
        if kind == ResourceKind::File && matches!(var_type, VarType::Pack | VarType::Get) {
            kind = ResourceKind::Module;
        }

        let uri = match &path {
            Some(path) => path.display().to_string(),
            None => uri.to_string(),
        };
        Ok(Self { kind, uri, path, var_type })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn var_type(&self) -> VarType {
        self.var_type
    }

    /// Absolute path for file and module resources, the URL otherwise.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Reads the resource and converts it according to the var type.
    ///
    /// # Errors
    /// * `EchoformError::ResourceError` wrapping read, fetch, parse or load failures,
    ///   failing getters and cyclic pack references
    pub fn load(&self, ctx: &ResourceContext<'_>) -> EchoformResult<Value> {
        let _guard = ctx.enter(&self.uri)?;
        debug!("Loading {} resource {} as {}", self.kind, self.uri, self.var_type);
        let host = ctx.host();

        if self.kind == ResourceKind::Module {
            let path = self.path.as_deref().unwrap_or(Path::new(&self.uri));
            let exports = host.modules.load(path).map_err(|e| {
                EchoformError::resource(&self.uri, format!("load module error: {e:#}"))
            })?;
            return match self.var_type {
                VarType::Get => pack::run_get(&self.uri, exports),
                _ => {
                    let base_dir = path.parent().unwrap_or(Path::new(""));
                    pack::build(&self.uri, exports, ctx, base_dir)
                }
            };
        }

        if self.var_type == VarType::Stat {
            return match self.kind {
                ResourceKind::Http => Ok(headers_map(&self.fetch(ctx)?)),
                _ => Ok(stat_map(&self.read_stat(ctx)?)),
            };
        }

        let content = match self.kind {
            ResourceKind::Http => self.fetch(ctx)?.body,
            _ => self.read_text(ctx)?,
        };

        match self.var_type {
            VarType::Json => parse_json(&content)
                .map_err(|e| EchoformError::resource(&self.uri, format!("parse as json error: {e}"))),
            VarType::List => {
                let items = list::parse_list(&content)
                    .map_err(|e| EchoformError::resource(&self.uri, format!("parse as list error: {e}")))?;
                Ok(Value::List(items.into_iter().map(Value::String).collect()))
            }
            _ => Ok(Value::String(content)),
        }
    }

    fn fetch(&self, ctx: &ResourceContext<'_>) -> EchoformResult<HttpResponse> {
        ctx.fetch(&self.uri).map_err(|e| EchoformError::resource(&self.uri, e))
    }

    fn file_path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(&self.uri))
    }

    fn read_text(&self, ctx: &ResourceContext<'_>) -> EchoformResult<String> {
        ctx.host()
            .fs
            .read_text(self.file_path())
            .map_err(|e| EchoformError::resource(&self.uri, format!("read file error: {e}")))
    }

    fn read_stat(&self, ctx: &ResourceContext<'_>) -> EchoformResult<FileStat> {
        ctx.host()
            .fs
            .stat(self.file_path())
            .map_err(|e| EchoformError::resource(&self.uri, format!("stat file error: {e}")))
    }
}

static JSONP_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:;\s*)*(?:(?:[a-z_$][\w$]*)?\s*\()?").unwrap());

static JSONP_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\)?(?:\s*;)*\s*$").unwrap());

/// Parses JSON, tolerating a JSONP `callback( ... );` wrapping.
pub fn parse_json(content: &str) -> std::result::Result<Value, serde_json::Error> {
    let mut text = content;
    if let Some(m) = JSONP_HEAD.find(text) {
        text = &text[m.end()..];
    }
    if let Some(m) = JSONP_TAIL.find(text) {
        text = &text[..m.start()];
    }
    serde_json::from_str::<serde_json::Value>(text).map(Value::from)
}

fn stat_map(stat: &FileStat) -> Value {
    let mut map = Map::new();
    map.insert("isFile".into(), stat.is_file.into());
    map.insert("isDirectory".into(), stat.is_directory.into());
    map.insert("size".into(), Value::Number(stat.size as f64));
    if let Some(modified) = stat.modified {
        let modified: DateTime<Utc> = modified.into();
        map.insert("mtimeMs".into(), Value::Number(modified.timestamp_millis() as f64));
        map.insert("mtime".into(), modified.to_rfc3339_opts(SecondsFormat::Millis, true).into());
    }
    Value::Map(map)
}

fn headers_map(response: &HttpResponse) -> Value {
    Value::Map(
        response
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect(),
    )
}
