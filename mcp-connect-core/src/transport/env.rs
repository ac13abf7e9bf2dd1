//! Launch environment for backend processes.
//!
//! Backends do not inherit the gateway's full environment (which holds the
//! bearer token and anything else the operator exported). They get a small
//! whitelist of variables needed to locate executables and a home directory,
//! overlaid with the per-server `env` map.

use std::collections::BTreeMap;

#[cfg(not(windows))]
const INHERITED_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const INHERITED_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Build the backend environment from the whitelist plus `overrides`.
///
/// Inherited values that look like shell function exports (`()` prefix) are
/// skipped.
pub fn build_environment(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    build_environment_with(overrides, |name| std::env::var(name).ok())
}

/// [`build_environment`] with an explicit lookup for the inherited values.
pub fn build_environment_with<F>(
    overrides: &BTreeMap<String, String>,
    lookup: F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env: BTreeMap<String, String> = INHERITED_VARS
        .iter()
        .filter_map(|name| {
            lookup(name)
                .filter(|value| !value.starts_with("()"))
                .map(|value| (name.to_string(), value))
        })
        .collect();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Mask a secret for logging: `***` followed by at most the last 4 chars.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("***{tail}")
}

/// Mask every value of an environment map for logging.
pub fn mask_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(k, v)| (k.clone(), mask_value(v)))
        .collect()
}
