//! External collaborators consumed by the processor: file system, network,
//! module loading, process snapshot and content hashing.
//!
//! Each collaborator is a trait; the processor only sees them through [`Host`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context};
use indexmap::IndexMap;
use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use sha2::{Digest, Sha512};

use crate::error::{EchoformError, EchoformResult};
use crate::value::Value;

/// Default timeout for resource requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with resource requests
pub const USER_AGENT: &str = concat!("echoform/", env!("CARGO_PKG_VERSION"));

/// Metadata of a file system entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// File system access.
pub trait FileSystem {
    fn read_text(&self, path: &Path) -> EchoformResult<String>;

    fn read_bytes(&self, path: &Path) -> EchoformResult<Vec<u8>>;

    /// Writes `content`, creating missing parent directories.
    fn write_text(&self, path: &Path, content: &str) -> EchoformResult<()>;

    fn stat(&self, path: &Path) -> EchoformResult<FileStat>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn read_text(&self, path: &Path) -> EchoformResult<String> {
        std::fs::read_to_string(path).map_err(|e| EchoformError::path_io(path, e))
    }

    fn read_bytes(&self, path: &Path) -> EchoformResult<Vec<u8>> {
        std::fs::read(path).map_err(|e| EchoformError::path_io(path, e))
    }

    fn write_text(&self, path: &Path, content: &str) -> EchoformResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EchoformError::path_io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| EchoformError::path_io(path, e))
    }

    fn stat(&self, path: &Path) -> EchoformResult<FileStat> {
        let metadata = std::fs::metadata(path).map_err(|e| EchoformError::path_io(path, e))?;
        Ok(FileStat {
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// A successful (status 200) response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: IndexMap<String, String>,
    pub body: String,
}

/// Network access for `http:`/`https:` resources.
pub trait HttpClient {
    /// Fetches `url`. Any status other than 200 is an error.
    fn get(&self, url: &str) -> EchoformResult<HttpResponse>;
}

/// [`HttpClient`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Builds a client with [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    /// * `EchoformError::HttpClientError` if the TLS backend cannot be initialized
    pub fn new() -> EchoformResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> EchoformResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> EchoformResult<HttpResponse> {
        debug!("GET {url}");
        let failed = |status: Option<u16>, reason: String| EchoformError::HttpError {
            url: url.to_string(),
            status,
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| failed(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(failed(Some(status.as_u16()), format!("status code {}", status.as_u16())));
        }

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let body = response.text().map_err(|e| failed(Some(status.as_u16()), e.to_string()))?;

        Ok(HttpResponse { status: status.as_u16(), headers, body })
    }
}

/// Loads the exports of a trusted module file.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> anyhow::Result<Value>;
}

/// Module exports registered from Rust, keyed by absolute path.
///
/// Paths without a registration fall back to data modules: `.json`, `.yaml`
/// and `.yml` files are parsed into their exports.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    natives: HashMap<PathBuf, Value>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `exports` for the module at `path`.
    pub fn register<P: AsRef<Path>, V: Into<Value>>(&mut self, path: P, exports: V) -> &mut Self {
        self.natives.insert(normalize_path(path.as_ref()), exports.into());
        self
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, path: &Path) -> anyhow::Result<Value> {
        let path = normalize_path(path);
        if let Some(exports) = self.natives.get(&path) {
            debug!("Loaded native module {}", path.display());
            return Ok(exports.clone());
        }

        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        let content = || {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Cannot find module \"{}\"", path.display()))
        };
        let exports: serde_json::Value = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content()?)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content()?)?,
            _ => bail!("Cannot find module \"{}\"", path.display()),
        };
        debug!("Loaded data module {}", path.display());
        Ok(Value::from(exports))
    }
}

/// Read-only snapshot of the process environment exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    pub env: IndexMap<String, String>,
    pub arch: String,
    pub platform: String,
    pub versions: IndexMap<String, String>,
    pub cwd: PathBuf,
}

impl SystemSnapshot {
    /// Captures the current process state.
    pub fn capture() -> Self {
        let mut versions = IndexMap::new();
        versions.insert("echoform".to_string(), env!("CARGO_PKG_VERSION").to_string());
        Self {
            env: std::env::vars().collect(),
            arch: std::env::consts::ARCH.to_string(),
            platform: std::env::consts::OS.to_string(),
            versions,
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }
}

/// The collaborators of one processing pass.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub fs: &'a dyn FileSystem,
    pub http: &'a dyn HttpClient,
    pub modules: &'a dyn ModuleLoader,
    pub system: &'a SystemSnapshot,
}

/// Hex SHA-512 digest of `content`.
pub fn hash_of(content: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-512 digest of the file at `path`.
pub fn hash_of_file(fs: &dyn FileSystem, path: &Path) -> EchoformResult<String> {
    let mut hasher = Sha512::new();
    hasher.update(fs.read_bytes(path)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lexically normalizes a path, resolving `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolves `path` against `base`, like `path.resolve(base, path)`.
pub fn resolve_path<P: AsRef<Path>>(base: &Path, path: P) -> PathBuf {
    normalize_path(&base.join(path))
}

/// Describes an unexpected exports shape.
pub(crate) fn exports_error(expected: &str, found: &Value) -> anyhow::Error {
    let found = match found {
        Value::Undefined => "undefined",
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "array",
        Value::Map(_) | Value::Computed(_) => "object",
        Value::Function(_) => "function",
    };
    anyhow!("{expected}, found {found}")
}
