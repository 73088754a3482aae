use std::cell::Cell;
use std::collections::HashMap;
use std::fs;

use echoform::error::{EchoformError, EchoformResult};
use echoform::host::{Host, HttpClient, HttpResponse, LocalFileSystem, ModuleRegistry, SystemSnapshot};
use echoform::loader::list::parse_list;
use echoform::loader::{ResourceContext, ResourceKind, ResourceLoader, VarType};
use echoform::value::{Function, Map, Value};
use tempfile::TempDir;

#[derive(Default)]
struct FakeHttp {
    pages: HashMap<String, HttpResponse>,
    calls: Cell<usize>,
}

impl FakeHttp {
    fn with_page(mut self, url: &str, body: &str) -> Self {
        let mut headers = indexmap::IndexMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self.pages.insert(url.to_string(), HttpResponse { status: 200, headers, body: body.to_string() });
        self
    }
}

impl HttpClient for FakeHttp {
    fn get(&self, url: &str) -> EchoformResult<HttpResponse> {
        self.calls.set(self.calls.get() + 1);
        self.pages.get(url).cloned().ok_or_else(|| EchoformError::HttpError {
            url: url.to_string(),
            status: Some(404),
            reason: "status code 404".to_string(),
        })
    }
}

fn load(host: Host<'_>, uri: &str, var_type: Option<VarType>, base: &std::path::Path) -> EchoformResult<Value> {
    let ctx = ResourceContext::new(host);
    ResourceLoader::new(uri, var_type, base)?.load(&ctx)
}

#[test]
fn test_loader_classification() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();

    let loader = ResourceLoader::new("./a.txt", None, base).unwrap();
    assert_eq!(loader.kind(), ResourceKind::File);
    assert_eq!(loader.var_type(), VarType::Text);
    assert_eq!(loader.uri(), base.join("a.txt").display().to_string());

    let loader = ResourceLoader::new("https://x.test/a", Some(VarType::Json), base).unwrap();
    assert_eq!(loader.kind(), ResourceKind::Http);
    assert_eq!(loader.uri(), "https://x.test/a");

    let loader = ResourceLoader::new("./lib.pack", Some(VarType::Pack), base).unwrap();
    assert_eq!(loader.kind(), ResourceKind::Module);

    let loader = ResourceLoader::new("./json.settings.txt", None, base).unwrap();
    assert_eq!(loader.var_type(), VarType::Json);

    let loader = ResourceLoader::new("./json.settings.txt", Some(VarType::Text), base).unwrap();
    assert_eq!(loader.var_type(), VarType::Text);

    assert!(matches!(ResourceLoader::new("ftp://x.test/a", None, base), Err(EchoformError::ResourceError { .. })));
    assert!(ResourceLoader::new("./a.txt", Some(VarType::Value), base).is_err());
}

#[test]
fn test_load_file_resources() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();
    fs::write(base.join("a.txt"), "line one\nline two\n").unwrap();
    fs::write(base.join("cfg.json"), r#"{"server": {"port": 8080}}"#).unwrap();
    fs::write(base.join("items.list"), "b\n# skipped\na\n\nb\n").unwrap();

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let modules = ModuleRegistry::new();
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    assert_eq!(load(host, "a.txt", None, base).unwrap(), Value::from("line one\nline two\n"));

    let cfg = load(host, "./cfg.json", Some(VarType::Json), base).unwrap();
    let port = cfg.get_key("server").and_then(|s| s.get_key("port").map(|p| p.into_owned()));
    assert_eq!(port, Some(Value::Number(8080.0)));

    let items = load(host, "./items.list", Some(VarType::List), base).unwrap();
    assert_eq!(items, Value::List(vec![Value::from("b"), Value::from("a")]));

    let stat = load(host, "./a.txt", Some(VarType::Stat), base).unwrap();
    let stat = stat.as_map().unwrap();
    assert_eq!(stat.get("isFile"), Some(&Value::Bool(true)));
    assert_eq!(stat.get("size"), Some(&Value::Number(18.0)));
    assert!(stat.contains_key("mtime"));

    let err = load(host, "./missing.txt", None, base).unwrap_err();
    assert!(err.to_string().contains("read file error"));

    fs::write(base.join("broken.json"), "{").unwrap();
    let err = load(host, "./broken.json", Some(VarType::Json), base).unwrap_err();
    assert!(err.to_string().contains("parse as json error"));
}

#[test]
fn test_load_http_resources() {
    let temp_dir = TempDir::new().unwrap();
    let system = SystemSnapshot::default();
    let http = FakeHttp::default().with_page("https://x.test/data", "callback({\"v\": \"x\"});");
    let modules = ModuleRegistry::new();
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };
    let ctx = ResourceContext::new(host);

    let json = ResourceLoader::new("https://x.test/data", Some(VarType::Json), temp_dir.path()).unwrap();
    let value = json.load(&ctx).unwrap();
    assert_eq!(value.get_key("v").map(|v| v.into_owned()), Some(Value::from("x")));

    let stat = ResourceLoader::new("https://x.test/data", Some(VarType::Stat), temp_dir.path()).unwrap();
    let headers = stat.load(&ctx).unwrap();
    assert_eq!(headers.get_key("content-type").map(|v| v.into_owned()), Some(Value::from("application/json")));
    assert_eq!(http.calls.get(), 1);

    let missing = ResourceLoader::new("https://x.test/missing", None, temp_dir.path()).unwrap();
    let err = missing.load(&ctx).unwrap_err();
    assert!(err.to_string().contains("status code 404"));
}

#[test]
fn test_get_module() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();
    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let mut modules = ModuleRegistry::new();
    modules
        .register(base.join("answer.get"), Function::action(|_| Ok(Value::Number(42.0))))
        .register(base.join("plain.get"), Value::from("not a function"));
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    assert_eq!(load(host, "./answer.get", Some(VarType::Get), base).unwrap(), Value::Number(42.0));

    let err = load(host, "./plain.get", Some(VarType::Get), base).unwrap_err();
    assert!(err.to_string().contains("found string"));

    let err = load(host, "./unknown.get", Some(VarType::Get), base).unwrap_err();
    assert!(err.to_string().contains("Cannot find module"));
}

#[test]
fn test_pack_module() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();
    fs::create_dir(base.join("lib")).unwrap();
    fs::write(base.join("lib/hello.txt"), "hi").unwrap();

    let mut exports = Map::new();
    exports.insert("text greeting".into(), "./hello.txt".into());
    exports.insert("version".into(), Value::Number(2.0));
    exports.insert(
        "get loud".into(),
        Function::getter(|this| {
            let greeting = this.and_then(|m| m.get("greeting")).and_then(Value::as_str).unwrap_or_default();
            Ok(Value::String(greeting.to_uppercase()))
        })
        .into(),
    );
    exports.insert("text note".into(), "ftp://not.a/resource".into());

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let mut modules = ModuleRegistry::new();
    modules.register(base.join("lib/greet.pack"), exports);
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let pack = load(host, "./lib/greet.pack", Some(VarType::Pack), base).unwrap();
    let pack = pack.as_map().unwrap();
    assert_eq!(pack.get("greeting"), Some(&Value::from("hi")));
    assert_eq!(pack.get("version"), Some(&Value::Number(2.0)));
    assert_eq!(pack.get("loud"), Some(&Value::from("HI")));
    assert_eq!(pack.get("text note"), Some(&Value::from("ftp://not.a/resource")));
}

#[test]
fn test_cyclic_pack() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();

    let mut a = Map::new();
    a.insert("pack b".into(), "./b.pack".into());
    let mut b = Map::new();
    b.insert("pack a".into(), "./a.pack".into());

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let mut modules = ModuleRegistry::new();
    modules.register(base.join("a.pack"), a).register(base.join("b.pack"), b);
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let err = load(host, "./a.pack", Some(VarType::Pack), base).unwrap_err();
    assert!(err.to_string().contains("cyclic resource reference"));
}

#[test]
fn test_data_module_fallback() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();
    fs::write(base.join("site.yaml"), "title: Docs\nlinks:\n  - a\n  - b\n").unwrap();

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let modules = ModuleRegistry::new();
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let pack = load(host, "./site.yaml", Some(VarType::Pack), base).unwrap();
    assert_eq!(pack.get_key("title").map(|v| v.into_owned()), Some(Value::from("Docs")));
    assert_eq!(pack.get_key("links").map(|v| v.to_string()), Some("a,b".to_string()));
}

#[test]
fn test_list_options() {
    let items = parse_list("// .options |no-trim|ignore-mark=--\nx  a\n-- note\n  a \nend\n").unwrap();
    assert_eq!(items, vec!["x  a", "  a ", "end"]);
}

#[test]
fn test_failing_getter_aborts_pack() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();

    let mut exports = Map::new();
    exports.insert("name".into(), "demo".into());
    exports.insert("get broken".into(), Function::getter(|_| anyhow::bail!("no value")).into());

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let mut modules = ModuleRegistry::new();
    modules.register(base.join("broken.pack"), exports);
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let err = load(host, "./broken.pack", Some(VarType::Pack), base).unwrap_err();
    assert!(matches!(err, EchoformError::ResourceError { .. }));
    assert!(err.to_string().contains("execute \"get broken\" error: no value"));
}

#[test]
fn test_pack_depth_limit() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path();

    let system = SystemSnapshot::default();
    let http = FakeHttp::default();
    let mut modules = ModuleRegistry::new();
    for i in 0..17 {
        let mut exports = Map::new();
        exports.insert("pack next".into(), format!("./p{}.pack", i + 1).into());
        modules.register(base.join(format!("p{i}.pack")), exports);
    }
    let mut leaf = Map::new();
    leaf.insert("done".into(), Value::Bool(true));
    modules.register(base.join("p17.pack"), leaf);
    let host = Host { fs: &LocalFileSystem, http: &http, modules: &modules, system: &system };

    let err = load(host, "./p0.pack", Some(VarType::Pack), base).unwrap_err();
    assert!(err.to_string().contains("nested deeper than 16"));

    let shallow = load(host, "./p10.pack", Some(VarType::Pack), base).unwrap();
    let mut depth = 0;
    let mut current = shallow;
    while let Some(next) = current.get_key("next").map(|v| v.into_owned()) {
        depth += 1;
        current = next;
    }
    assert_eq!(depth, 7);
    assert_eq!(current.get_key("done").map(|v| v.into_owned()), Some(Value::Bool(true)));
}
