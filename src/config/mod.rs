//! Configuration parsing module
//!
//! Handles the JSON5 config file with `$include` directives and environment
//! variable substitution, then builds the typed [`PolicyConfig`] and
//! [`ServerSettings`] the relay runs with. The file is read once at startup.
//!
//! ## Shared host lists
//!
//! A fleet of relays usually permits the same hosts. `$include` pulls such a
//! list in from a file next to (or referenced from) the config:
//!
//! ```text
//! {
//!   policy: {
//!     mediaHosts: { "$include": "./media-hosts.txt" },
//!     iframeHosts: { "$include": ["./iframe-hosts.txt", "./partners.txt"] },
//!   },
//! }
//! ```
//!
//! A `.txt` include is a host list, one entry per line with `#` comments, and
//! becomes a JSON array. Any other include is parsed as JSON5. Lists from
//! several files are unioned; keys written next to `$include` win.

pub mod defaults;
pub mod policy;

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::map::Entry;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

pub use policy::{MimeTable, PolicyConfig};

/// Maximum depth for $include directives to prevent infinite recursion
const MAX_INCLUDE_DEPTH: usize = 10;

/// Config file name inside the state directory
const CONFIG_FILE_NAME: &str = "media-relay.json5";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Circular include detected: {path}")]
    CircularInclude { path: String },

    #[error("Include depth exceeded (max {max}): {path}")]
    IncludeDepthExceeded { path: String, max: usize },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Include file not found: {path}")]
    IncludeNotFound { path: String },

    #[error("Include directive must be a string or array of strings at {path}")]
    InvalidIncludeDirective { path: String },

    #[error("Included file must be an object when merged with sibling keys at {path}")]
    IncludeMustBeObject { path: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Get the config file path.
/// Priority: MEDIA_RELAY_CONFIG_PATH > MEDIA_RELAY_STATE_DIR/media-relay.json5
/// > ~/.media-relay/media-relay.json5
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("MEDIA_RELAY_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    if let Ok(state_dir) = env::var("MEDIA_RELAY_STATE_DIR") {
        return PathBuf::from(state_dir).join(CONFIG_FILE_NAME);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".media-relay")
        .join(CONFIG_FILE_NAME)
}

/// Load the config from the default location.
pub fn load_config() -> Result<Value, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load config from an explicit path.
///
/// A missing file is not an error: the result is the full set of defaults.
/// Otherwise the file is parsed, `$include` fragments are spliced in, `${VAR}`
/// references are expanded, and defaults fill in whatever is still missing.
pub fn load_config_from(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        debug!(target: "config", path = %path.display(), "config file not found, using defaults");
        let mut empty = Value::Object(Map::new());
        defaults::apply_defaults(&mut empty);
        return Ok(empty);
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut value = parse_json5(&content, path)?;
    IncludeResolver::new(path).splice(&mut value, path, 0)?;
    expand_env(&mut value)?;

    defaults::apply_defaults(&mut value);

    Ok(value)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Splices `$include` fragments into a config tree.
///
/// `chain` holds the files currently being expanded, so a file that includes
/// itself (directly or through others) fails while the same host list may
/// still be included from several places.
struct IncludeResolver {
    chain: HashSet<PathBuf>,
}

impl IncludeResolver {
    fn new(root: &Path) -> Self {
        let mut chain = HashSet::new();
        chain.insert(canonical(root));
        Self { chain }
    }

    fn splice(&mut self, value: &mut Value, from: &Path, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ConfigError::IncludeDepthExceeded {
                path: from.display().to_string(),
                max: MAX_INCLUDE_DEPTH,
            });
        }

        if let Value::Object(obj) = value {
            if let Some(directive) = obj.remove("$include") {
                let siblings = std::mem::take(obj);
                *value = self.fragment(&directive, siblings, from, depth)?;
            }
        }

        match value {
            Value::Object(obj) => obj
                .values_mut()
                .try_for_each(|v| self.splice(v, from, depth)),
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|v| self.splice(v, from, depth)),
            _ => Ok(()),
        }
    }

    /// Build the value that replaces an object carrying `$include`.
    fn fragment(
        &mut self,
        directive: &Value,
        siblings: Map<String, Value>,
        from: &Path,
        depth: usize,
    ) -> Result<Value, ConfigError> {
        let mut fragment: Option<Value> = None;
        for target in include_targets(directive, from)? {
            let loaded = self.load(from, target, depth)?;
            fragment = Some(match fragment.take() {
                Some(mut acc) => {
                    merge_layer(&mut acc, loaded);
                    acc
                }
                None => loaded,
            });
        }

        let mut fragment = fragment.unwrap_or_else(|| Value::Object(Map::new()));
        if !siblings.is_empty() {
            if !fragment.is_object() {
                return Err(ConfigError::IncludeMustBeObject {
                    path: from.display().to_string(),
                });
            }
            merge_layer(&mut fragment, Value::Object(siblings));
        }
        Ok(fragment)
    }

    fn load(&mut self, from: &Path, target: &str, depth: usize) -> Result<Value, ConfigError> {
        let path = from.parent().unwrap_or(Path::new(".")).join(target);
        if !path.exists() {
            return Err(ConfigError::IncludeNotFound {
                path: path.display().to_string(),
            });
        }

        let key = canonical(&path);
        if !self.chain.insert(key.clone()) {
            return Err(ConfigError::CircularInclude {
                path: path.display().to_string(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut loaded = if is_host_list(&path) {
            parse_host_list(&content)
        } else {
            parse_json5(&content, &path)?
        };
        self.splice(&mut loaded, &path, depth + 1)?;

        self.chain.remove(&key);
        debug!(target: "config", include = %path.display(), "spliced include");
        Ok(loaded)
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// `$include` takes one path or a list of paths.
fn include_targets<'a>(directive: &'a Value, from: &Path) -> Result<Vec<&'a str>, ConfigError> {
    let invalid = || ConfigError::InvalidIncludeDirective {
        path: from.display().to_string(),
    };

    match directive {
        Value::String(s) => Ok(vec![s.as_str()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn is_host_list(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
}

/// Plain-text host list: one entry per line, `#` starts a comment.
fn parse_host_list(content: &str) -> Value {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| Value::String(entry.to_string()))
        .collect()
}

/// Lay `layer` over `base`.
///
/// Objects merge key by key and scalars from `layer` win. Arrays are unioned
/// in order, so host lists from several files combine without duplicates.
fn merge_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.entry(key) {
                    Entry::Occupied(mut slot) => merge_layer(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(layer)) => {
            for item in layer {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Expand `${VAR}` references in every string of the tree.
fn expand_env(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) if s.contains('$') => {
            *s = expand_env_in_str(s)?;
            Ok(())
        }
        Value::Object(obj) => obj.values_mut().try_for_each(expand_env),
        Value::Array(items) => items.iter_mut().try_for_each(expand_env),
        _ => Ok(()),
    }
}

/// Expand `${VAR}` (names are `[A-Z_][A-Z0-9_]*`) in one string.
/// `$${VAR}` yields the literal `${VAR}`.
fn expand_env_in_str(s: &str) -> Result<String, ConfigError> {
    static ENV_REF: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$(\$?)\{([A-Z_][A-Z0-9_]*)\}").unwrap());

    let mut missing: Option<String> = None;
    let expanded = ENV_REF.replace_all(s, |caps: &Captures<'_>| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{}}}", name);
        }
        env::var(name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar { var }),
        None => Ok(expanded.into_owned()),
    }
}

/// Validation error with path context
#[derive(Debug)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Validate a config value against basic structural expectations.
/// Returns a list of validation issues (empty if valid). These are warnings;
/// values that would make the relay unusable are rejected by
/// [`build_policy`] / [`build_server_settings`] instead.
pub fn validate_config(config: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Value::Object(obj) = config else {
        issues.push(ValidationIssue {
            path: ".".to_string(),
            message: "Config root must be an object".to_string(),
        });
        return issues;
    };

    let known_keys = ["server", "policy", "logging"];
    for key in obj.keys() {
        if !known_keys.contains(&key.as_str()) {
            issues.push(ValidationIssue {
                path: format!(".{}", key),
                message: format!("Unknown configuration key: {}", key),
            });
        }
    }

    if let Some(Value::Object(server)) = obj.get("server") {
        if let Some(port) = server.get("port") {
            if !port.is_u64() {
                issues.push(ValidationIssue {
                    path: ".server.port".to_string(),
                    message: "port must be a number".to_string(),
                });
            }
        }
    }

    if let Some(Value::Object(policy)) = obj.get("policy") {
        for key in ["mediaHosts", "iframeHosts"] {
            if let Some(Value::Array(hosts)) = policy.get(key) {
                for (i, host) in hosts.iter().enumerate() {
                    let bad = match host.as_str() {
                        Some(s) => s.trim().is_empty() || s.contains('/'),
                        None => true,
                    };
                    if bad {
                        issues.push(ValidationIssue {
                            path: format!(".policy.{}[{}]", key, i),
                            message: "host entry must be a bare hostname".to_string(),
                        });
                    }
                }
            }
        }
    }

    issues
}

/// Build the typed policy from a loaded config value.
pub fn build_policy(config: &Value) -> Result<PolicyConfig, ConfigError> {
    let section = config
        .get("policy")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let policy: PolicyConfig =
        serde_json::from_value(section).map_err(|e| ConfigError::ValidationError {
            path: ".policy".to_string(),
            message: e.to_string(),
        })?;
    policy.validate()?;
    Ok(policy)
}

/// Listener settings from the `server` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    defaults::DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    defaults::DEFAULT_PORT
}

impl ServerSettings {
    /// Socket address to listen on
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| ConfigError::ValidationError {
                path: ".server.bind".to_string(),
                message: format!("not an IP address: {}", self.bind),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Build listener settings from a loaded config value.
pub fn build_server_settings(config: &Value) -> Result<ServerSettings, ConfigError> {
    let Some(section) = config.get("server") else {
        return Ok(ServerSettings::default());
    };
    let settings: ServerSettings =
        serde_json::from_value(section.clone()).map_err(|e| ConfigError::ValidationError {
            path: ".server".to_string(),
            message: e.to_string(),
        })?;
    settings.socket_addr()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn create_temp_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_json5_basic() {
        let content = r#"{
            // allow-list for the staging relay
            "policy": { "maxBytes": 1024, },
            server: { port: 9000 },
        }"#;

        let result = parse_json5(content, Path::new("test.json5")).unwrap();

        assert_eq!(result["policy"]["maxBytes"], 1024);
        assert_eq!(result["server"]["port"], 9000);
    }

    #[test]
    fn test_parse_json5_error() {
        let result = parse_json5("{ invalid json }", Path::new("test.json5"));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_env_var_substitution() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("TEST_RELAY_HOST", "cdn.example.com");

        let result = expand_env_in_str("img.${TEST_RELAY_HOST}").unwrap();
        assert_eq!(result, "img.cdn.example.com");

        env::remove_var("TEST_RELAY_HOST");
    }

    #[test]
    fn test_env_var_escaped() {
        let result = expand_env_in_str("$${ESCAPED_VAR}").unwrap();
        assert_eq!(result, "${ESCAPED_VAR}");
    }

    #[test]
    fn test_env_var_missing() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("NONEXISTENT_VAR_12345");
        let result = expand_env_in_str("${NONEXISTENT_VAR_12345}");

        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar { var }) if var == "NONEXISTENT_VAR_12345")
        );
    }

    #[test]
    fn test_merge_layer_objects() {
        let mut base = serde_json::json!({ "a": 1, "b": { "c": 2, "d": 3 } });
        let overlay = serde_json::json!({ "b": { "d": 4, "e": 5 }, "f": 6 });

        merge_layer(&mut base, overlay);

        assert_eq!(base["a"], 1);
        assert_eq!(base["b"]["c"], 2);
        assert_eq!(base["b"]["d"], 4);
        assert_eq!(base["b"]["e"], 5);
        assert_eq!(base["f"], 6);
    }

    #[test]
    fn test_include_extends_host_list() {
        let dir = TempDir::new().unwrap();

        create_temp_config(
            &dir,
            "hosts.json5",
            r#"{ "policy": { "mediaHosts": ["a.example.com"] } }"#,
        );
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{
                "$include": "./hosts.json5",
                "policy": { "mediaHosts": ["b.example.com"] }
            }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        assert_eq!(
            config["policy"]["mediaHosts"],
            serde_json::json!(["a.example.com", "b.example.com"])
        );
    }

    #[test]
    fn test_include_multiple_files() {
        let dir = TempDir::new().unwrap();

        create_temp_config(&dir, "a.json5", r#"{ "server": { "port": 9100 } }"#);
        create_temp_config(&dir, "b.json5", r#"{ "policy": { "maxBytes": 2048 } }"#);
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{ "$include": ["./a.json5", "./b.json5"] }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        assert_eq!(config["server"]["port"], 9100);
        assert_eq!(config["policy"]["maxBytes"], 2048);
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();

        create_temp_config(&dir, "a.json5", r#"{ "$include": "./b.json5", "a": 1 }"#);
        create_temp_config(&dir, "b.json5", r#"{ "$include": "./a.json5", "b": 2 }"#);

        let result = load_config_from(&dir.path().join("a.json5"));
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_include_not_found() {
        let dir = TempDir::new().unwrap();
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{ "$include": "./nonexistent.json5" }"#,
        );

        let result = load_config_from(&main_path);
        assert!(matches!(result, Err(ConfigError::IncludeNotFound { .. })));
    }

    #[test]
    fn test_include_invalid_directive() {
        let dir = TempDir::new().unwrap();
        let main_path = create_temp_config(&dir, "main.json5", r#"{ "$include": [1, 2] }"#);

        let result = load_config_from(&main_path);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidIncludeDirective { .. })
        ));
    }

    #[test]
    fn test_include_plain_text_host_list() {
        let dir = TempDir::new().unwrap();

        create_temp_config(
            &dir,
            "media-hosts.txt",
            "# shared with the edge relays\ni.imgur.com\n\n*.redd.it   # previews\n",
        );
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{ policy: { mediaHosts: { "$include": "./media-hosts.txt" } } }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        assert_eq!(
            config["policy"]["mediaHosts"],
            serde_json::json!(["i.imgur.com", "*.redd.it"])
        );

        let policy = build_policy(&config).unwrap();
        assert_eq!(policy.media_hosts, vec!["i.imgur.com", "*.redd.it"]);
    }

    #[test]
    fn test_include_host_lists_are_unioned() {
        let dir = TempDir::new().unwrap();

        create_temp_config(&dir, "base.txt", "i.imgur.com\nmedia.giphy.com\n");
        create_temp_config(&dir, "extra.txt", "media.giphy.com\ncdn.example.com\n");
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{ policy: { mediaHosts: { "$include": ["./base.txt", "./extra.txt"] } } }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        assert_eq!(
            config["policy"]["mediaHosts"],
            serde_json::json!(["i.imgur.com", "media.giphy.com", "cdn.example.com"])
        );
    }

    #[test]
    fn test_same_host_list_included_twice_is_not_circular() {
        let dir = TempDir::new().unwrap();

        create_temp_config(&dir, "shared.txt", "cdn.example.com\n");
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{
                policy: {
                    mediaHosts: { "$include": "./shared.txt" },
                    iframeHosts: { "$include": "./shared.txt" },
                }
            }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        assert_eq!(config["policy"]["mediaHosts"], serde_json::json!(["cdn.example.com"]));
        assert_eq!(config["policy"]["iframeHosts"], serde_json::json!(["cdn.example.com"]));
    }

    #[test]
    fn test_host_list_cannot_merge_with_sibling_keys() {
        let dir = TempDir::new().unwrap();

        create_temp_config(&dir, "hosts.txt", "cdn.example.com\n");
        let main_path = create_temp_config(
            &dir,
            "main.json5",
            r#"{ policy: { "$include": "./hosts.txt", maxBytes: 1024 } }"#,
        );

        let result = load_config_from(&main_path);
        assert!(matches!(result, Err(ConfigError::IncludeMustBeObject { .. })));
    }

    #[test]
    fn test_include_depth_limit() {
        let dir = TempDir::new().unwrap();

        for i in 0..12 {
            let next = if i < 11 {
                format!(r#"{{ "$include": "./{}.json5", "level": {} }}"#, i + 1, i)
            } else {
                format!(r#"{{ "level": {} }}"#, i)
            };
            create_temp_config(&dir, &format!("{}.json5", i), &next);
        }

        let result = load_config_from(&dir.path().join("0.json5"));
        assert!(matches!(
            result,
            Err(ConfigError::IncludeDepthExceeded { .. })
        ));
    }

    #[test]
    fn test_config_not_exists_returns_defaults() {
        let result = load_config_from(Path::new("/nonexistent/path/media-relay.json5")).unwrap();

        assert_eq!(result["server"]["port"], defaults::DEFAULT_PORT);
        assert_eq!(result["server"]["bind"], "127.0.0.1");
        assert_eq!(result["policy"]["maxBytes"], defaults::DEFAULT_MAX_BYTES);
    }

    #[test]
    fn test_env_substitution_in_policy() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("TEST_RELAY_CDN", "media.example.net");

        let dir = TempDir::new().unwrap();
        let main_path = create_temp_config(
            &dir,
            "config.json5",
            r#"{ policy: { mediaHosts: ["${TEST_RELAY_CDN}"] } }"#,
        );

        let config = load_config_from(&main_path).unwrap();
        let policy = build_policy(&config).unwrap();
        assert_eq!(policy.media_hosts, vec!["media.example.net".to_string()]);

        env::remove_var("TEST_RELAY_CDN");
    }

    #[test]
    fn test_validation_unknown_key() {
        let config = serde_json::json!({
            "server": { "port": 8787 },
            "unknownKey": "value"
        });

        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].path.contains("unknownKey"));
    }

    #[test]
    fn test_validation_known_keys_pass() {
        let config = serde_json::json!({
            "server": { "port": 8787 },
            "policy": { "mediaHosts": ["*.example.com"] },
            "logging": { "level": "debug" }
        });

        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_validation_invalid_port_type() {
        let config = serde_json::json!({ "server": { "port": "not-a-number" } });

        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("port must be a number"));
    }

    #[test]
    fn test_validation_host_entry_with_path() {
        let config = serde_json::json!({
            "policy": { "iframeHosts": ["www.youtube.com", "https://evil.com/x"] }
        });

        let issues = validate_config(&config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, ".policy.iframeHosts[1]");
    }

    #[test]
    fn test_build_policy_rejects_zero_max_bytes() {
        let config = serde_json::json!({ "policy": { "maxBytes": 0 } });
        let err = build_policy(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref path, .. } if path == ".policy.maxBytes"));
    }

    #[test]
    fn test_build_policy_rejects_wrong_type() {
        let config = serde_json::json!({ "policy": { "maxBytes": "lots" } });
        assert!(matches!(
            build_policy(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_build_server_settings() {
        let config = serde_json::json!({ "server": { "bind": "0.0.0.0", "port": 9000 } });
        let settings = build_server_settings(&config).unwrap();
        assert_eq!(settings.socket_addr().unwrap().to_string(), "0.0.0.0:9000");

        let defaults = build_server_settings(&serde_json::json!({})).unwrap();
        assert_eq!(defaults, ServerSettings::default());
    }

    #[test]
    fn test_build_server_settings_rejects_hostname_bind() {
        let config = serde_json::json!({ "server": { "bind": "localhost" } });
        assert!(build_server_settings(&config).is_err());
    }

    #[test]
    fn test_get_config_path_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("MEDIA_RELAY_STATE_DIR");
        env::set_var("MEDIA_RELAY_CONFIG_PATH", "/custom/path/relay.json5");

        assert_eq!(get_config_path(), PathBuf::from("/custom/path/relay.json5"));

        env::remove_var("MEDIA_RELAY_CONFIG_PATH");
    }

    #[test]
    fn test_get_config_path_state_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("MEDIA_RELAY_CONFIG_PATH");
        env::set_var("MEDIA_RELAY_STATE_DIR", "/custom/state");

        assert_eq!(
            get_config_path(),
            PathBuf::from("/custom/state/media-relay.json5")
        );

        env::remove_var("MEDIA_RELAY_STATE_DIR");
    }

    #[test]
    fn test_get_config_path_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("MEDIA_RELAY_CONFIG_PATH");
        env::remove_var("MEDIA_RELAY_STATE_DIR");

        assert!(get_config_path().ends_with(".media-relay/media-relay.json5"));
    }
}
