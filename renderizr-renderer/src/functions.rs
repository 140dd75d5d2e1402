//! Functions available to every template.
//!
//! Two groups are registered on each engine:
//!
//! | group   | functions                                                                   |
//! |---------|-----------------------------------------------------------------------------|
//! | lookup  | `get`, `gets`, `getv`, `getvs`, `ls`, `lsdir`, `exists`                     |
//! | helpers | `base`, `dir`, `split`, `join`, `toUpper`, `toLower`, `contains`, `replace`, `getenv`, `datetime`, `json`, `jsonArray` |
//!
//! Tera only supports named arguments, e.g. `{{ getv(key="/db/host", default="localhost") }}`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tera::Tera;

use crate::snapshot::KvSnapshot;

type Args = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn required_str<'a>(args: &'a Args, func: &str, name: &str) -> tera::Result<&'a str> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(tera::Error::msg(format!(
            "`{func}`: argument `{name}` must be a string, got {other}"
        ))),
        None => Err(tera::Error::msg(format!(
            "`{func}`: missing argument `{name}`"
        ))),
    }
}

fn optional_str<'a>(args: &'a Args, func: &str, name: &str) -> tera::Result<Option<&'a str>> {
    match args.get(name) {
        None => Ok(None),
        Some(_) => required_str(args, func, name).map(Some),
    }
}

fn pattern_err(func: &str, pattern: &str, err: glob::PatternError) -> tera::Error {
    tera::Error::msg(format!("`{func}`: invalid pattern {pattern:?}: {err}"))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register lookup functions bound to `snapshot` plus the helper set.
pub fn register(tera: &mut Tera, snapshot: Arc<KvSnapshot>) {
    register_lookups(tera, snapshot);
    register_helpers(tera);
}

fn pair_value(key: &str, value: &str) -> Value {
    json!({ "key": key, "value": value })
}

fn register_lookups(tera: &mut Tera, snapshot: Arc<KvSnapshot>) {
    let kv = snapshot.clone();
    tera.register_function("get", move |args: &Args| {
        let key = required_str(args, "get", "key")?;
        kv.get(key)
            .map(|value| pair_value(key, value))
            .ok_or_else(|| tera::Error::msg(format!("key does not exist: {key}")))
    });

    let kv = snapshot.clone();
    tera.register_function("gets", move |args: &Args| {
        let pattern = required_str(args, "gets", "pattern")?;
        let pairs: Vec<Value> = kv
            .matching(pattern)
            .map_err(|e| pattern_err("gets", pattern, e))?
            .into_iter()
            .map(|(k, v)| pair_value(k, v))
            .collect();
        Ok(Value::Array(pairs))
    });

    let kv = snapshot.clone();
    tera.register_function("getv", move |args: &Args| {
        let key = required_str(args, "getv", "key")?;
        if let Some(value) = kv.get(key) {
            return Ok(Value::String(value.to_string()));
        }
        match optional_str(args, "getv", "default")? {
            Some(default) => Ok(Value::String(default.to_string())),
            None => Err(tera::Error::msg(format!("key does not exist: {key}"))),
        }
    });

    let kv = snapshot.clone();
    tera.register_function("getvs", move |args: &Args| {
        let pattern = required_str(args, "getvs", "pattern")?;
        let values: Vec<Value> = kv
            .matching(pattern)
            .map_err(|e| pattern_err("getvs", pattern, e))?
            .into_iter()
            .map(|(_, v)| Value::String(v.to_string()))
            .collect();
        Ok(Value::Array(values))
    });

    let kv = snapshot.clone();
    tera.register_function("ls", move |args: &Args| {
        let path = required_str(args, "ls", "path")?;
        Ok(json!(kv.list(path)))
    });

    let kv = snapshot.clone();
    tera.register_function("lsdir", move |args: &Args| {
        let path = required_str(args, "lsdir", "path")?;
        Ok(json!(kv.list_dirs(path)))
    });

    let kv = snapshot;
    tera.register_function("exists", move |args: &Args| {
        let key = required_str(args, "exists", "key")?;
        Ok(Value::Bool(kv.exists(key)))
    });
}

fn register_helpers(tera: &mut Tera) {
    tera.register_function("base", |args: &Args| {
        Ok(Value::String(base(required_str(args, "base", "path")?)))
    });
    tera.register_function("dir", |args: &Args| {
        Ok(Value::String(dir(required_str(args, "dir", "path")?)))
    });
    tera.register_function("split", |args: &Args| {
        let s = required_str(args, "split", "s")?;
        let sep = required_str(args, "split", "sep")?;
        let parts: Vec<&str> = if sep.is_empty() {
            // Empty separator splits into characters.
            s.char_indices().map(|(i, c)| &s[i..i + c.len_utf8()]).collect()
        } else {
            s.split(sep).collect()
        };
        Ok(json!(parts))
    });
    tera.register_function("join", |args: &Args| {
        let sep = required_str(args, "join", "sep")?;
        match args.get("items") {
            Some(Value::Array(items)) => Ok(Value::String(
                items.iter().map(display).collect::<Vec<_>>().join(sep),
            )),
            _ => Err(tera::Error::msg("`join`: argument `items` must be an array")),
        }
    });
    tera.register_function("toUpper", |args: &Args| {
        Ok(Value::String(required_str(args, "toUpper", "s")?.to_uppercase()))
    });
    tera.register_function("toLower", |args: &Args| {
        Ok(Value::String(required_str(args, "toLower", "s")?.to_lowercase()))
    });
    tera.register_function("contains", |args: &Args| {
        let s = required_str(args, "contains", "s")?;
        let substr = required_str(args, "contains", "substr")?;
        Ok(Value::Bool(s.contains(substr)))
    });
    tera.register_function("replace", |args: &Args| {
        let s = required_str(args, "replace", "s")?;
        let old = required_str(args, "replace", "old")?;
        let new = required_str(args, "replace", "new")?;
        let n = args.get("n").and_then(Value::as_i64).unwrap_or(-1);
        let replaced = if n < 0 {
            s.replace(old, new)
        } else {
            s.replacen(old, new, n as usize)
        };
        Ok(Value::String(replaced))
    });
    tera.register_function("getenv", |args: &Args| {
        let key = required_str(args, "getenv", "key")?;
        let default = optional_str(args, "getenv", "default")?.unwrap_or("");
        Ok(Value::String(
            std::env::var(key).unwrap_or_else(|_| default.to_string()),
        ))
    });
    tera.register_function("datetime", |args: &Args| {
        let now = chrono::Local::now();
        let formatted = match optional_str(args, "datetime", "format")? {
            Some(format) => now.format(format).to_string(),
            None => now.to_rfc3339(),
        };
        Ok(Value::String(formatted))
    });
    tera.register_function("json", |args: &Args| {
        let data = required_str(args, "json", "data")?;
        serde_json::from_str::<Map<String, Value>>(data)
            .map(Value::Object)
            .map_err(|e| tera::Error::msg(format!("`json`: {e}")))
    });
    tera.register_function("jsonArray", |args: &Args| {
        let data = required_str(args, "jsonArray", "data")?;
        serde_json::from_str::<Vec<Value>>(data)
            .map(Value::Array)
            .map_err(|e| tera::Error::msg(format!("`jsonArray`: {e}")))
    });
}

// ---------------------------------------------------------------------------
// Slash-path helpers
// ---------------------------------------------------------------------------

/// Last element of a slash-separated path; `"."` for empty, `"/"` for root.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything but the last element of a slash-separated path.
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        None => ".".to_string(),
        Some(idx) => {
            let parent = path[..idx].trim_end_matches('/');
            if parent.is_empty() {
                "/".to_string()
            } else {
                parent.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_and_dir_follow_slash_path_rules() {
        assert_eq!(base("/etc/nginx/nginx.conf"), "nginx.conf");
        assert_eq!(base("/etc/nginx/"), "nginx");
        assert_eq!(base("///"), "/");
        assert_eq!(base(""), ".");
        assert_eq!(dir("/etc/nginx/nginx.conf"), "/etc/nginx");
        assert_eq!(dir("/etc"), "/");
        assert_eq!(dir("nginx.conf"), ".");
    }
}
