use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::error::WardenError;
use crate::settings::models::{Listing, Log, Perm, Sorting, Theme, default_perm};
use crate::settings::{env_flag, env_value, parse_list};

/// Custom branding shown by the child. Environment prefix `branding_`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub name: String,
    pub disable_external: bool,
    pub disable_used_percentage: bool,
    /// Directory with custom.css / replacement logos. Empty disables it.
    pub files: String,
    pub theme: Theme,
    pub color: String,
}

impl Branding {
    fn from_env() -> Result<Self, WardenError> {
        Ok(Self {
            name: env_value("branding_", "name").unwrap_or_else(|| "filewarden".to_string()),
            disable_external: env_flag("branding_", "disable_external", false),
            disable_used_percentage: env_flag("branding_", "disable_used_percentage", false),
            files: env_value("branding_", "files").unwrap_or_default(),
            theme: parse_or_default("branding_", "theme")?,
            color: env_value("branding_", "color").unwrap_or_default(),
        })
    }
}

/// Chunked-upload settings. Environment prefix `tus_`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tus {
    pub chunk_size: u64,
    pub retry_count: u32,
}

impl Tus {
    fn from_env() -> Result<Self, WardenError> {
        Ok(Self {
            chunk_size: parse_number("tus_", "chunk_size")?.unwrap_or(10 * 1024 * 1024),
            retry_count: parse_number("tus_", "retry_count")?.unwrap_or(5),
        })
    }
}

/// Per-user defaults applied by the child. Environment prefix `defaults_`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    pub scope: String,
    pub locale: String,
    pub view_mode: Listing,
    pub single_click: bool,
    pub sorting: Sorting,
    pub perm: Perm,
    pub commands: Vec<String>,
    pub hide_dotfiles: bool,
    pub date_format: bool,
}

impl Defaults {
    fn from_env() -> Result<Self, WardenError> {
        Ok(Self {
            scope: env_value("defaults_", "scope").unwrap_or_else(|| ".".to_string()),
            locale: env_value("defaults_", "locale").unwrap_or_else(|| "en".to_string()),
            view_mode: parse_or_default("defaults_", "view_mode")?,
            single_click: env_flag("defaults_", "single_click", false),
            sorting: Sorting {
                by: parse_or_default("defaults_", "sorting_by")?,
                asc: env_flag("defaults_", "sorting_asc", false),
            },
            perm: default_perm(),
            commands: parse_list(&env_value("defaults_", "commands").unwrap_or_default()),
            hide_dotfiles: env_flag("defaults_", "hide_dotfiles", true),
            date_format: env_flag("defaults_", "date_format", false),
        })
    }
}

/// Shell hooks run by the child around file events. Environment prefix
/// `commands_`.
#[derive(Debug, Clone, Serialize)]
pub struct Commands {
    pub after_copy: Vec<String>,
    pub after_delete: Vec<String>,
    pub after_rename: Vec<String>,
    pub after_save: Vec<String>,
    pub after_upload: Vec<String>,
    pub before_copy: Vec<String>,
    pub before_delete: Vec<String>,
    pub before_rename: Vec<String>,
    pub before_save: Vec<String>,
    pub before_upload: Vec<String>,
}

impl Commands {
    fn from_env() -> Self {
        let load = |key: &str| parse_list(&env_value("commands_", key).unwrap_or_default());
        Self {
            after_copy: load("after_copy"),
            after_delete: load("after_delete"),
            after_rename: load("after_rename"),
            after_save: load("after_save"),
            after_upload: load("after_upload"),
            before_copy: load("before_copy"),
            before_delete: load("before_delete"),
            before_rename: load("before_rename"),
            before_save: load("before_save"),
            before_upload: load("before_upload"),
        }
    }
}

/// The reCAPTCHA triple. Present only when configured.
#[derive(Debug, Clone, Serialize)]
pub struct ReCaptcha {
    pub host: String,
    pub key: String,
    pub secret: String,
}

/// The child's `auther` section. Environment prefix `auth_`.
#[derive(Debug, Clone, Serialize)]
pub struct Auther {
    pub recaptcha: Option<ReCaptcha>,
}

impl Auther {
    fn from_env() -> Self {
        let host = env_value("auth_", "recaptcha_host");
        let key = env_value("auth_", "recaptcha_key");
        let secret = env_value("auth_", "recaptcha_secret");
        let recaptcha = match (host, key, secret) {
            (Some(host), Some(key), Some(secret)) => Some(ReCaptcha { host, key, secret }),
            _ => None,
        };
        Self { recaptcha }
    }
}

/// The child's `server` section. Unprefixed environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Server {
    pub root: PathBuf,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub socket: String,
    #[serde(rename = "tlsKey")]
    pub tls_key: String,
    #[serde(rename = "tlsCert")]
    pub tls_cert: String,
    pub port: u16,
    pub address: String,
    pub log: Log,
    #[serde(rename = "enableThumbnails")]
    pub enable_thumbnails: bool,
    #[serde(rename = "resizePreview")]
    pub resize_preview: bool,
    #[serde(rename = "enableExec")]
    pub enable_exec: bool,
    #[serde(rename = "typeDetectionByHeader")]
    pub type_detection_by_header: bool,
    #[serde(rename = "authHook")]
    pub auth_hook: String,
    #[serde(rename = "tokenExpirationTime")]
    pub token_expiration_time: String,
}

impl Server {
    fn from_env() -> Result<Self, WardenError> {
        let port: u16 = parse_number("", "port")?.unwrap_or(8080);
        if port == 0 {
            return Err(WardenError::Config("PORT must be a positive integer".to_string()));
        }
        Ok(Self {
            root: env_value("", "root")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            base_url: env_value("", "base_url").unwrap_or_default(),
            socket: env_value("", "socket").unwrap_or_default(),
            tls_key: env_value("", "tls_key").unwrap_or_default(),
            tls_cert: env_value("", "tls_cert").unwrap_or_default(),
            port,
            address: env_value("", "address").unwrap_or_else(|| "127.0.0.1".to_string()),
            log: parse_or_default("", "log")?,
            enable_thumbnails: env_flag("", "enable_thumbnails", false),
            resize_preview: env_flag("", "resize_preview", false),
            enable_exec: env_flag("", "enable_exec", false),
            type_detection_by_header: env_flag("", "type_detection_by_header", false),
            auth_hook: env_value("", "auth_hook").unwrap_or_default(),
            token_expiration_time: env_value("", "token_expiration_time").unwrap_or_default(),
        })
    }
}

/// The child's `settings` section. Unprefixed environment variables apart
/// from the nested sub-records.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub signup: bool,
    #[serde(rename = "createUserDir")]
    pub create_user_dir: bool,
    #[serde(rename = "userHomeBasePath")]
    pub user_home_base_path: String,
    pub defaults: Defaults,
    #[serde(rename = "authMethod")]
    pub auth_method: String,
    #[serde(rename = "authHeader")]
    pub auth_header: String,
    pub branding: Branding,
    pub tus: Tus,
    pub commands: Commands,
    /// Shell allow-list. The trailing underscore is stripped when the JSON
    /// is materialized for the child.
    #[serde(rename = "shell_")]
    pub shell: Vec<String>,
    pub rules: Vec<String>,
}

impl Settings {
    fn from_env() -> Result<Self, WardenError> {
        Ok(Self {
            signup: env_flag("", "signup", false),
            create_user_dir: env_flag("", "create_user_dir", false),
            user_home_base_path: env_value("", "user_home_base_path").unwrap_or_default(),
            defaults: Defaults::from_env()?,
            auth_method: env_value("", "auth_method").unwrap_or_else(|| "json".to_string()),
            auth_header: env_value("", "auth_header").unwrap_or_default(),
            branding: Branding::from_env()?,
            tus: Tus::from_env()?,
            commands: Commands::from_env(),
            shell: parse_list(&env_value("", "shell").unwrap_or_default()),
            rules: parse_list(&env_value("", "rules").unwrap_or_default()),
        })
    }
}

/// All three child config sections, nested the way `config import` expects.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSettings {
    pub settings: Settings,
    pub server: Server,
    pub auther: Auther,
}

impl ConfigSettings {
    pub fn from_env() -> Result<Self, WardenError> {
        let mut config = Self {
            settings: Settings::from_env()?,
            server: Server::from_env()?,
            auther: Auther::from_env(),
        };
        config.resolve_user_home()?;
        Ok(config)
    }

    /// When user directories are auto-created, the base path must resolve to
    /// a directory. An unset base path defaults to `<root>/users`.
    fn resolve_user_home(&mut self) -> Result<(), WardenError> {
        if !self.settings.create_user_dir {
            return Ok(());
        }
        if self.settings.user_home_base_path.is_empty() {
            let derived = self.server.root.join("users");
            std::fs::create_dir_all(&derived)?;
            info!("User home base path defaulted to {}", derived.display());
            self.settings.user_home_base_path = derived.to_string_lossy().into_owned();
        } else if !PathBuf::from(&self.settings.user_home_base_path).is_dir() {
            return Err(WardenError::Config(format!(
                "USER_HOME_BASE_PATH {:?} does not resolve to a directory",
                self.settings.user_home_base_path
            )));
        }
        Ok(())
    }
}

fn parse_or_default<T>(prefix: &str, key: &str) -> Result<T, WardenError>
where
    T: Default + std::str::FromStr<Err = String>,
{
    match env_value(prefix, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e: String| WardenError::Config(format!("{prefix}{key}: {e}"))),
        None => Ok(T::default()),
    }
}

fn parse_number<T>(prefix: &str, key: &str) -> Result<Option<T>, WardenError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_value(prefix, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| WardenError::Config(format!("{prefix}{key}: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_serialize_child_keys() {
        let settings = Settings {
            signup: false,
            create_user_dir: false,
            user_home_base_path: String::new(),
            defaults: Defaults {
                scope: ".".into(),
                locale: "en".into(),
                view_mode: Listing::List,
                single_click: false,
                sorting: Sorting::default(),
                perm: default_perm(),
                commands: vec![],
                hide_dotfiles: true,
                date_format: false,
            },
            auth_method: "json".into(),
            auth_header: String::new(),
            branding: Branding {
                name: "filewarden".into(),
                disable_external: false,
                disable_used_percentage: false,
                files: String::new(),
                theme: Theme::Blank,
                color: String::new(),
            },
            tus: Tus {
                chunk_size: 10 * 1024 * 1024,
                retry_count: 5,
            },
            commands: Commands {
                after_copy: vec![],
                after_delete: vec![],
                after_rename: vec![],
                after_save: vec![],
                after_upload: vec![],
                before_copy: vec![],
                before_delete: vec![],
                before_rename: vec![],
                before_save: vec![],
                before_upload: vec![],
            },
            shell: vec!["bash".into(), "-c".into()],
            rules: vec![],
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert!(value.get("createUserDir").is_some());
        assert!(value.get("authMethod").is_some());
        assert!(value.get("shell_").is_some());
        assert_eq!(value["defaults"]["viewMode"], "list");
    }
}
