// Environment variable overlay

use crate::loader::merge;
use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::env;

/// Prefix of Conveyor environment variables.
pub const DEFAULT_PREFIX: &str = "CONVEYOR";

/// Separator between nested keys, e.g. `CONVEYOR_QUEUE__CONCURRENCY`.
pub const NESTING_SEPARATOR: &str = "__";

/// Environment variable loader
///
/// Maps `PREFIX_SECTION__KEY=value` onto the `section.key` path of a JSON
/// configuration tree. Values replacing a string keep their raw text; anything
/// else is parsed as JSON first, so `8`, `true` and `[100, 200]` land as a
/// number, a bool and an array.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefixed variables from the process environment, as key paths.
    pub fn load(&self) -> Vec<(Vec<String>, String)> {
        self.collect(process_vars())
    }

    /// Prefixed variables from `vars`, as key paths sorted by name.
    pub fn collect(
        &self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Vec<(Vec<String>, String)> {
        let head = format!("{}_", self.prefix);
        let mut found: Vec<(Vec<String>, String)> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(&head)?;
                let path: Vec<String> = rest
                    .split(NESTING_SEPARATOR)
                    .map(str::to_lowercase)
                    .collect();
                if path.iter().any(String::is_empty) {
                    return None;
                }
                Some((path, value))
            })
            .collect();
        found.sort();
        found
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = format!("{}_{}", self.prefix, key.to_uppercase());
        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Overlay the process environment onto `base`.
    pub fn apply(&self, base: &mut Value) -> usize {
        apply_paths(base, self.load())
    }

    /// Overlay `vars` onto `base`, returning how many values were applied.
    pub fn apply_vars(
        &self,
        base: &mut Value,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> usize {
        apply_paths(base, self.collect(vars))
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Process environment, skipping entries that are not valid unicode.
pub fn process_vars() -> impl Iterator<Item = (String, String)> {
    env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

fn apply_paths(base: &mut Value, paths: Vec<(Vec<String>, String)>) -> usize {
    let count = paths.len();
    for (path, raw) in paths {
        let leaf = coerce(lookup(base, &path), raw);
        let overlay = path.iter().rev().fold(leaf, |inner, key| {
            let mut map = Map::new();
            map.insert(key.clone(), inner);
            Value::Object(map)
        });
        merge(base, overlay);
    }
    count
}

fn lookup<'a>(node: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(node, |node, key| node.get(key))
}

fn coerce(existing: Option<&Value>, raw: String) -> Value {
    if matches!(existing, Some(Value::String(_))) {
        return Value::String(raw);
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}
