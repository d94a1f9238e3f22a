pub mod config;
pub mod models;
pub mod users;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Supervisor-level settings: where the binary and the generated files
/// live, and how many restarts a failing child gets.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Restart attempts for a failing child, clamped to 0..=10.
    pub restart: u32,
    pub binary: PathBuf,
    pub settings_dir: PathBuf,
    pub secrets_dir: PathBuf,
}

impl SupervisorSettings {
    /// Load from the environment. The secrets directory is resolved first so
    /// its `.config.env` can seed the rest of the process environment.
    pub fn from_env() -> Self {
        let secrets_dir = env::var("SECRETS_PATH")
            .or_else(|_| env::var("secrets_path"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        dotenvy::from_path(secrets_dir.join(".config.env")).ok();

        let restart = env::var("RESTART")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
            .min(10);

        Self {
            restart,
            binary: env::var("FILEBROWSER_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./filebrowser")),
            settings_dir: env::var("SETTINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("settings")),
            secrets_dir,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.settings_dir.join("config.json")
    }

    pub fn users_path(&self) -> PathBuf {
        self.settings_dir.join("users.json")
    }

    /// The database the child creates next to its binary.
    pub fn child_db(&self) -> PathBuf {
        self.binary.with_file_name(crate::constants::CHILD_DB)
    }
}

/// Case-insensitive key lookup in a parsed env file.
pub(crate) fn lookup(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.clone())
}

/// Read a prefixed environment variable, trying the uppercase spelling
/// first, then the exact lowercase one.
pub(crate) fn env_value(prefix: &str, key: &str) -> Option<String> {
    let name = format!("{prefix}{key}");
    env::var(name.to_uppercase())
        .or_else(|_| env::var(&name))
        .ok()
}

pub(crate) fn env_flag(prefix: &str, key: &str, default: bool) -> bool {
    env_value(prefix, key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Lists arrive either as a JSON array or as a comma-separated string.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
        return items;
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_json_and_csv() {
        assert_eq!(parse_list(r#"["a", "b"]"#), vec!["a", "b"]);
        assert_eq!(parse_list("a, b ,c"), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let vars: HashMap<String, String> =
            [("username".to_string(), "alice".to_string())].into();
        assert_eq!(lookup(&vars, "USERNAME"), Some("alice".to_string()));
        assert_eq!(lookup(&vars, "missing"), None);
    }
}
