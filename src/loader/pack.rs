//! Pack and get resources built from module exports.
//!
//! A pack export named `"<var-type> <name>"` declares a nested resource (or,
//! for `get`, a getter evaluated once the pack is built). Other exports are
//! copied through; functions among them see their sibling entries through the
//! call's `this` when invoked from an expression.

use std::path::Path;

use log::debug;

use crate::error::{EchoformError, EchoformResult};
use crate::host::exports_error;
use crate::loader::{classify, ResourceContext, ResourceLoader, VarType};
use crate::parser::is_name_char;
use crate::value::{ActionOptions, Call, Function, Map, Value};

/// Splits a `"<var-type> <name>"` export name.
pub fn parse_typed_name(name: &str) -> Option<(VarType, &str)> {
    let (var_type, var_name) = name.split_once(' ')?;
    let var_type = VarType::parse(var_type).filter(VarType::is_resource)?;
    (!var_name.is_empty() && var_name.chars().all(is_name_char)).then_some((var_type, var_name))
}

/// Builds a pack from module exports.
///
/// Exports that are not a mapping are returned verbatim.
///
/// # Arguments
/// * `uri` - Module path, used in error messages
/// * `exports` - Module exports
/// * `ctx` - Context for nested resources
/// * `base_dir` - Directory nested relative paths resolve against
pub fn build(uri: &str, exports: Value, ctx: &ResourceContext<'_>, base_dir: &Path) -> EchoformResult<Value> {
    let exports = match exports {
        Value::Map(exports) => exports,
        other => return Ok(other),
    };

    let mut result = Map::new();
    let mut getters = Vec::new();

    for (name, value) in exports {
        let typed = parse_typed_name(&name).map(|(var_type, var_name)| (var_type, var_name.to_string()));
        match (typed, value) {
            (Some((VarType::Get, var_name)), Value::Function(getter)) => {
                result.insert(var_name.clone(), Value::Undefined);
                getters.push((var_name, getter));
            }
            (Some((VarType::Get, _)), value) => {
                return Err(EchoformError::resource(
                    uri,
                    format!("\"{name}\": {}", exports_error("var type \"get\" uses for function", &value)),
                ));
            }
            (Some((var_type, var_name)), Value::String(nested)) if classify(&nested).is_some() => {
                debug!("Resolving pack entry \"{name}\" of {uri}");
                let loaded = ResourceLoader::new(&nested, Some(var_type), base_dir)
                    .and_then(|loader| loader.load(ctx))
                    .map_err(|e| EchoformError::resource(uri, format!("load \"{name}\" error: {e}")))?;
                result.insert(var_name, loaded);
            }
            (_, value) => {
                result.insert(name, value);
            }
        }
    }

    run_getters(uri, result, getters).map(Value::Map)
}

/// Runs deferred getters against the finished pack and stores their values in
/// place of the placeholder entries.
///
/// Every getter sees the pack as it was before any getter ran.
pub fn run_getters(uri: &str, mut pack: Map, getters: Vec<(String, Function)>) -> EchoformResult<Map> {
    let options = ActionOptions::default();
    let mut overlay = Vec::with_capacity(getters.len());

    for (name, getter) in getters {
        let call = Call { options: &options, this: Some(&pack) };
        let value = getter
            .call(&call, Vec::new())
            .map_err(|e| EchoformError::resource(uri, format!("execute \"get {name}\" error: {e:#}")))?;
        overlay.push((name, value));
    }

    for (name, value) in overlay {
        pack.insert(name, value);
    }
    Ok(pack)
}

/// Resolves a `get` resource: the exports must be a function, its return value
/// is the result.
pub fn run_get(uri: &str, exports: Value) -> EchoformResult<Value> {
    let getter = match exports {
        Value::Function(getter) => getter,
        other => {
            return Err(EchoformError::resource(
                uri,
                exports_error("var type \"get\" uses for module which exports as function", &other),
            ));
        }
    };
    let options = ActionOptions::default();
    getter
        .call(&Call { options: &options, this: None }, Vec::new())
        .map_err(|e| EchoformError::resource(uri, format!("parse as var type \"get\" error: {e:#}")))
}
