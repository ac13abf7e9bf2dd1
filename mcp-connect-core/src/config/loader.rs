//! Backend definition loading, `${VAR}` interpolation and validation.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use super::defaults::MAX_INTERPOLATION_DEPTH;
use super::error::ConfigError;
use super::schema::{GatewayConfig, ServerConfig};

/// Variable lookup used during interpolation.
///
/// Production code passes `|name| std::env::var(name).ok()`; tests pass a
/// fixed map so they never touch the process environment.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the `MCP_SERVERS` JSON object into server definitions.
///
/// An empty or whitespace-only value yields no servers.
///
/// # Errors
///
/// Returns `InvalidServersJson` for unparsable JSON, `InvalidServer` for a
/// definition that is not an object or lacks a command, and
/// `MissingEnvVar` for an unresolved `${VAR}`.
pub fn parse_servers_json(
    raw: &str,
    lookup: EnvLookup<'_>,
) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(ConfigError::InvalidServersJson)?;
    servers_from_value(value, "MCP_SERVERS", lookup)
}

/// Load the `servers` map from a YAML configuration file.
///
/// # Errors
///
/// Returns `ConfigFileNotFound`, `EmptyConfigFile`, `ParseError`, or any
/// interpolation/definition error from the servers it contains.
pub fn load_servers_file(
    path: &Path,
    lookup: EnvLookup<'_>,
) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let document: Value = serde_saphyr::from_str(&contents)?;
    match document {
        Value::Object(mut root) => match root.remove("servers") {
            Some(servers) => servers_from_value(servers, "servers", lookup),
            None => Ok(BTreeMap::new()),
        },
        _ => Err(ConfigError::InvalidValue {
            field: "config".to_string(),
            reason: "top level must be a mapping".to_string(),
        }),
    }
}

/// Merge two server maps; entries in `overlay` replace those in `base`.
pub fn merge_servers(
    mut base: BTreeMap<String, ServerConfig>,
    overlay: BTreeMap<String, ServerConfig>,
) -> BTreeMap<String, ServerConfig> {
    base.extend(overlay);
    base
}

fn servers_from_value(
    mut value: Value,
    field: &str,
    lookup: EnvLookup<'_>,
) -> Result<BTreeMap<String, ServerConfig>, ConfigError> {
    interpolate_value(&mut value, field, lookup)?;

    let Value::Object(entries) = value else {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "expected an object keyed by server id".to_string(),
        });
    };

    entries
        .into_iter()
        .map(|(id, definition)| {
            if !definition.is_object() {
                return Err(ConfigError::InvalidServer {
                    id,
                    reason: "definition must be an object".to_string(),
                });
            }
            match serde_json::from_value::<ServerConfig>(definition) {
                Ok(server) => Ok((id, server)),
                Err(e) => Err(ConfigError::InvalidServer {
                    id,
                    reason: e.to_string(),
                }),
            }
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Interpolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Resolve `${VAR}` and `${VAR:-default}` in every string leaf of `value`.
///
/// Walks objects and arrays depth-first; numbers, booleans and null are left
/// alone. Object keys are not interpolated.
///
/// # Errors
///
/// `MissingEnvVar` names the first unresolved variable and the dotted path of
/// the string holding it. `NestingTooDeep` if the walk exceeds
/// [`MAX_INTERPOLATION_DEPTH`].
pub fn interpolate_value(
    value: &mut Value,
    field: &str,
    lookup: EnvLookup<'_>,
) -> Result<(), ConfigError> {
    walk(value, field.to_string(), 0, lookup)
}

fn walk(value: &mut Value, path: String, depth: usize, lookup: EnvLookup<'_>) -> Result<(), ConfigError> {
    if depth > MAX_INTERPOLATION_DEPTH {
        return Err(ConfigError::NestingTooDeep {
            field: path,
            max_depth: MAX_INTERPOLATION_DEPTH,
        });
    }

    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute(s, &path, lookup)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, format!("{path}[{i}]"), depth + 1, lookup)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                walk(item, format!("{path}.{key}"), depth + 1, lookup)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn substitute(content: &str, field: &str, lookup: EnvLookup<'_>) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in ENV_VAR_PATTERN.captures_iter(content) {
        let (Some(full), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let replacement = match (lookup(name.as_str()), cap.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                return Err(ConfigError::MissingEnvVar {
                    var: name.as_str().to_string(),
                    field: field.to_string(),
                });
            }
        };
        result.push_str(&content[last..full.start()]);
        result.push_str(&replacement);
        last = full.end();
    }

    result.push_str(&content[last..]);
    Ok(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a resolved configuration.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.listen.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: "PORT".to_string(),
            reason: "must be non-zero".to_string(),
        });
    }

    let durations = [
        ("STREAM_SESSION_TTL_MS", config.streamable.session_ttl),
        ("BRIDGE_CACHE_TTL_MS", config.bridge.cache_ttl),
        ("BRIDGE_REQUEST_TIMEOUT_MS", config.bridge.request_timeout),
    ];
    for (field, duration) in durations {
        if duration.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
    }

    for (id, server) in &config.streamable.servers {
        if id.is_empty() || id.contains('/') {
            return Err(ConfigError::InvalidServerId { id: id.clone() });
        }
        if server.command.trim().is_empty() {
            return Err(ConfigError::InvalidServer {
                id: id.clone(),
                reason: "missing command".to_string(),
            });
        }
    }

    Ok(())
}
