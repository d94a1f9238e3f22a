use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::EnvConfig;
use crate::constants::{
    PROXY_JOIN_GRACE, PROXY_KILL_ATTEMPTS, PROXY_KILL_INTERVAL, RESTART_COOLDOWN,
};
use crate::error::WardenError;
use crate::proxy::{self, Destination};
use crate::settings::config::ConfigSettings;
use crate::settings::models::{Log, admin_perm, default_perm};
use crate::settings::users::{UserProfile, load_profiles};
use crate::settings::SupervisorSettings;

/// The child's default log lines open with `YYYY/MM/DD HH:MM:SS `; our own
/// logger already stamps records, so that prefix is stripped on relay.
static CHILD_LOG_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2} ").expect("invalid log prefix pattern")
});

fn strip_child_prefix(line: &str) -> String {
    CHILD_LOG_PREFIX.replace(line, "").trim().to_string()
}

/// How one run of the child ended.
enum ChildExit {
    Clean,
    Failed(i32),
    Interrupted,
}

/// Handle to the proxy engine running on its own thread with its own
/// runtime. Shutdown is requested over the watch channel; the thread is
/// then joined with a bounded grace.
struct ProxyHandle {
    thread: std::thread::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Orchestrates the filebrowser binary: materializes its configuration,
/// imports it through the child's CLI, runs the child as a subprocess and
/// fronts it with the proxy engine when enabled. Guarantees cleanup on all
/// exit paths.
pub struct Supervisor {
    settings: SupervisorSettings,
    config: ConfigSettings,
    profiles: Vec<UserProfile>,
    proxy: bool,
    proxy_env: Option<EnvConfig>,
    extra: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(proxy: bool, extra: Option<PathBuf>) -> Result<Self, WardenError> {
        let settings = SupervisorSettings::from_env();
        if !settings.binary.is_file() {
            return Err(WardenError::MissingBinary(settings.binary));
        }
        std::fs::create_dir_all(&settings.settings_dir)?;

        let mut config = ConfigSettings::from_env()?;
        // The child's log output flows through our logger.
        config.server.log = Log::Stdout;

        let profiles = load_profiles(&settings.secrets_dir)?;
        if profiles.is_empty() {
            return Err(WardenError::Config(format!(
                "No user profiles found: place *user*.env files in {}",
                settings.secrets_dir.display()
            )));
        }

        let proxy_env = if proxy { Some(EnvConfig::from_env()?) } else { None };

        Ok(Self {
            settings,
            config,
            profiles,
            proxy,
            proxy_env,
            extra,
        })
    }

    // -----------------------------------------------------------------
    // Configuration materialization
    // -----------------------------------------------------------------

    /// Write `users.json` for the child and return the credential map the
    /// proxy verifies hashed logins against.
    pub fn create_users(&self) -> Result<HashMap<String, String>, WardenError> {
        let mut final_settings = Vec::with_capacity(self.profiles.len());
        let mut auth_map = HashMap::new();

        for (idx, profile) in self.profiles.iter().enumerate() {
            let mut profile = profile.clone();
            profile.perm = Some(if profile.authentication.admin {
                admin_perm()
            } else {
                default_perm()
            });
            auth_map.insert(
                profile.authentication.username.clone(),
                profile.authentication.password.clone(),
            );

            let hashed = bcrypt::hash(&profile.authentication.password, bcrypt::DEFAULT_COST)?;
            if !bcrypt::verify(&profile.authentication.password, &hashed)? {
                return Err(WardenError::Config(format!(
                    "Password hash validation failed for {:?}",
                    profile.authentication.username
                )));
            }
            profile.authentication.password = hashed;

            final_settings.push(flatten_profile(&profile, idx + 1)?);
        }

        std::fs::write(
            self.settings.users_path(),
            serde_json::to_string_pretty(&final_settings)?,
        )?;
        Ok(auth_map)
    }

    /// Write `config.json` for the child. Running this twice produces
    /// byte-identical output.
    pub fn create_config(&self) -> Result<(), WardenError> {
        let value = build_config_json(&self.config, self.proxy, self.extra_overrides()?)?;
        std::fs::write(
            self.settings.config_path(),
            serde_json::to_string_pretty(&value)?,
        )?;
        Ok(())
    }

    /// The optional extra-overrides document: an explicit `--extra` path, or
    /// an `extra.(json|yaml)` file next to the generated configs.
    fn extra_overrides(&self) -> Result<Option<Value>, WardenError> {
        let path = match &self.extra {
            Some(path) => path.clone(),
            None => {
                let json = self.settings.settings_dir.join("extra.json");
                let yaml = self.settings.settings_dir.join("extra.yaml");
                if json.is_file() {
                    json
                } else if yaml.is_file() {
                    yaml
                } else {
                    return Ok(None);
                }
            }
        };
        let raw = std::fs::read_to_string(&path)?;
        let value = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml::from_str::<Value>(&raw)?
        };
        Ok(Some(value))
    }

    // -----------------------------------------------------------------
    // Child CLI imports
    // -----------------------------------------------------------------

    async fn run_import(&self, args: &[&str], what: &str) -> Result<(), WardenError> {
        let output = Command::new(&self.settings.binary)
            .args(args)
            .output()
            .await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = strip_child_prefix(line);
            if !line.is_empty() {
                info!("{line}");
            }
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            let line = strip_child_prefix(line);
            if !line.is_empty() {
                warn!("{line}");
            }
        }
        if !output.status.success() {
            return Err(WardenError::Import {
                what: what.to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    pub async fn import_config(&self) -> Result<(), WardenError> {
        let path = self.settings.config_path();
        info!("Importing configuration from {}", path.display());
        self.create_config()?;
        let path_str = path.to_string_lossy().into_owned();
        self.run_import(&["config", "import", &path_str], "Configuration import")
            .await
    }

    pub async fn import_users(&self) -> Result<HashMap<String, String>, WardenError> {
        let path = self.settings.users_path();
        info!("Importing user profiles from {}", path.display());
        let auth_map = self.create_users()?;
        let path_str = path.to_string_lossy().into_owned();
        self.run_import(&["users", "import", &path_str], "User profile import")
            .await?;
        Ok(auth_map)
    }

    // -----------------------------------------------------------------
    // Child lifecycle
    // -----------------------------------------------------------------

    /// Run the child once, relaying its output, until it exits or the
    /// process receives an interrupt.
    async fn run_child(&self) -> Result<ChildExit, WardenError> {
        info!(
            "Initiating filebrowser on http://{}:{}",
            self.config.server.address, self.config.server.port
        );
        let mut child = Command::new(&self.settings.binary)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = strip_child_prefix(&line);
                    if !line.is_empty() {
                        info!("{line}");
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = strip_child_prefix(&line);
                    if !line.is_empty() {
                        warn!("{line}");
                    }
                }
            });
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(ChildExit::Clean)
                } else {
                    Ok(ChildExit::Failed(status.code().unwrap_or(-1)))
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping filebrowser");
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop filebrowser: {e}");
                }
                Ok(ChildExit::Interrupted)
            }
        }
    }

    /// Keep the child alive through up to `restart` failures with a short
    /// cool-down in between. Interrupts always break out cleanly.
    async fn run_server(&self, restart: u32) -> Result<(), WardenError> {
        let mut attempts = 0;
        loop {
            match self.run_child().await? {
                ChildExit::Clean | ChildExit::Interrupted => return Ok(()),
                ChildExit::Failed(code) => {
                    error!("filebrowser exited with status {code}");
                    if attempts >= restart {
                        return Err(WardenError::RestartsExhausted(attempts));
                    }
                    attempts += 1;
                    warn!("Restarting filebrowser (attempt {attempts}/{restart})");
                    tokio::time::sleep(RESTART_COOLDOWN).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------

    /// Full orchestration: clean start, import config and users, spawn the
    /// proxy when enabled, run the child under the restart policy, and tear
    /// everything down at the end.
    pub async fn start(&self) -> Result<(), WardenError> {
        self.run(self.settings.restart).await
    }

    /// Service mode: same orchestration with the restart budget maxed out.
    pub async fn start_service(&self) -> Result<(), WardenError> {
        self.run(10).await
    }

    /// Containerized mode is handled by external tooling.
    pub fn start_container(&self) -> Result<(), WardenError> {
        Err(WardenError::Unsupported("Containerized mode"))
    }

    async fn run(&self, restart: u32) -> Result<(), WardenError> {
        // Clean start: a stale child database would shadow the imports.
        let child_db = self.settings.child_db();
        if child_db.is_file() {
            std::fs::remove_file(&child_db)?;
            info!("Removed stale child database {}", child_db.display());
        }

        // Import failures are fatal, but still leave a clean slate behind.
        if let Err(e) = self.import_config().await {
            self.cleanup(true);
            return Err(e);
        }
        let auth_map = match self.import_users().await {
            Ok(auth_map) => auth_map,
            Err(e) => {
                self.cleanup(true);
                return Err(e);
            }
        };

        let proxy_handle = if self.proxy {
            let env = self
                .proxy_env
                .clone()
                .ok_or_else(|| WardenError::Config("Proxy settings were not loaded".into()))?;
            let destination = Destination {
                url: format!(
                    "http://{}:{}",
                    self.config.server.address, self.config.server.port
                ),
                auth_map,
            };
            Some(spawn_proxy(env, destination)?)
        } else {
            None
        };

        let result = self.run_server(restart).await;

        match proxy_handle {
            Some(handle) => self.exit_process(handle).await,
            None => self.cleanup(true),
        }
        result
    }

    /// Stop the proxy scheduling domain: graceful drain, bounded join, a
    /// handful of forceful checks, then cleanup regardless.
    async fn exit_process(&self, handle: ProxyHandle) {
        let _ = handle.shutdown.send(true);

        let grace = tokio::time::Instant::now() + PROXY_JOIN_GRACE;
        while !handle.thread.is_finished() && tokio::time::Instant::now() < grace {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let mut attempts = 0;
        while !handle.thread.is_finished() && attempts < PROXY_KILL_ATTEMPTS {
            attempts += 1;
            tokio::time::sleep(PROXY_KILL_INTERVAL).await;
        }
        if handle.thread.is_finished() {
            let _ = handle.thread.join();
            info!("Proxy engine joined");
        } else {
            warn!("Proxy engine is still alive after {attempts} termination attempt(s)");
        }

        self.cleanup(true);
    }

    /// Delete the child database, the block store (when the proxy ran) and
    /// the generated JSONs. Missing files are fine.
    pub fn cleanup(&self, log: bool) {
        let mut targets = vec![
            self.settings.child_db(),
            self.settings.config_path(),
            self.settings.users_path(),
        ];
        if let Some(env) = &self.proxy_env {
            targets.push(env.database.clone());
        }
        for path in targets {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    if log {
                        info!("Removed {}", path.display());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} was already gone", path.display());
                }
                Err(e) => warn!("Failed to remove {}: {e}", path.display()),
            }
        }
    }
}

/// Launch the proxy engine in its own scheduling domain: a dedicated thread
/// running a runtime sized by the configured worker count.
fn spawn_proxy(env: EnvConfig, destination: Destination) -> Result<ProxyHandle, WardenError> {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let workers = env.workers.max(1);
    let thread = std::thread::Builder::new()
        .name("proxy".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(workers)
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to build the proxy runtime: {e}");
                    return;
                }
            };
            if let Err(e) = runtime.block_on(proxy::serve(env, destination, shutdown_rx)) {
                error!("Proxy engine failed: {e}");
            }
        })?;
    Ok(ProxyHandle { thread, shutdown })
}

/// Strip every trailing underscore from object keys, recursively. Keys like
/// `shell_` exist to dodge reserved names and the child expects them bare.
pub fn remove_trailing_underscore(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    (
                        key.trim_end_matches('_').to_string(),
                        remove_trailing_underscore(value),
                    )
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(remove_trailing_underscore).collect())
        }
        other => other,
    }
}

/// Shallow-merge the recognized top-level sections of an extra-overrides
/// document into the generated config.
fn shallow_merge(config: &mut Value, extra: &Value) {
    for section in ["server", "auther", "settings"] {
        if let (Some(target), Some(source)) = (
            config.get_mut(section).and_then(Value::as_object_mut),
            extra.get(section).and_then(Value::as_object),
        ) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// The child's `config.json`: normalized optionals, proxy-mode auth
/// overrides, stripped trailing underscores, extra overrides merged last.
fn build_config_json(
    config: &ConfigSettings,
    proxy: bool,
    extra: Option<Value>,
) -> Result<Value, WardenError> {
    let mut config = config.clone();
    if config.settings.branding.files == "." {
        config.settings.branding.files = String::new();
    }
    if proxy {
        // The child must trust the proxy's rewritten authorization header.
        config.settings.auth_method = "json".to_string();
        config.settings.auth_header = String::new();
    }

    let mut value = serde_json::to_value(&config)?;
    value["server"]["port"] = Value::String(config.server.port.to_string());
    let mut value = remove_trailing_underscore(value);
    if let Some(extra) = extra {
        shallow_merge(&mut value, &extra);
    }
    Ok(value)
}

/// Flatten one profile for `users.json`: a 1-based id, the authentication
/// fields (minus the preset-selector `admin` flag) and the remaining
/// profile fields, all at the top level.
fn flatten_profile(profile: &UserProfile, id: usize) -> Result<Value, WardenError> {
    let value = serde_json::to_value(profile)?;
    let Value::Object(mut fields) = value else {
        return Err(WardenError::Config("User profile did not serialize to an object".into()));
    };

    let mut user = Map::new();
    user.insert("id".to_string(), Value::from(id as u64));
    if let Some(Value::Object(mut authentication)) = fields.remove("authentication") {
        authentication.remove("admin");
        for (key, value) in authentication {
            user.insert(key, value);
        }
    }
    for (key, value) in fields {
        user.insert(key, value);
    }
    Ok(Value::Object(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::models::{Listing, Sorting, Theme};
    use crate::settings::users::Authentication;
    use crate::settings::config::{Auther, Branding, Commands, Defaults, Server, Settings, Tus};
    use serde_json::json;

    fn sample_config() -> ConfigSettings {
        ConfigSettings {
            settings: Settings {
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
                auth_method: "proxy".into(),
                auth_header: "X-Auth".into(),
                branding: Branding {
                    name: "filewarden".into(),
                    disable_external: false,
                    disable_used_percentage: false,
                    files: ".".into(),
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
                shell: vec!["bash".into()],
                rules: vec![],
            },
            server: Server {
                root: "/srv/files".into(),
                base_url: String::new(),
                socket: String::new(),
                tls_key: String::new(),
                tls_cert: String::new(),
                port: 8080,
                address: "127.0.0.1".into(),
                log: Log::Stdout,
                enable_thumbnails: false,
                resize_preview: false,
                enable_exec: false,
                type_detection_by_header: false,
                auth_hook: String::new(),
                token_expiration_time: String::new(),
            },
            auther: Auther { recaptcha: None },
        }
    }

    fn sample_profile(username: &str, admin: bool) -> UserProfile {
        UserProfile {
            authentication: Authentication {
                username: username.into(),
                password: "S3cret!pass".into(),
                admin,
            },
            scope: "/".into(),
            locale: "en".into(),
            lock_password: !admin,
            view_mode: Listing::List,
            single_click: false,
            perm: None,
            commands: vec![],
            sorting: Sorting::default(),
            rules: vec![],
            hide_dotfiles: !admin,
            date_format: false,
        }
    }

    #[test]
    fn test_strip_child_prefix() {
        assert_eq!(
            strip_child_prefix("2024/01/15 10:30:00 Listening on 127.0.0.1:8080"),
            "Listening on 127.0.0.1:8080"
        );
        assert_eq!(strip_child_prefix("no prefix here"), "no prefix here");
    }

    #[test]
    fn test_remove_trailing_underscore_recursive_and_idempotent() {
        let input = json!({
            "shell_": ["bash"],
            "nested": {"key__": 1, "plain": 2},
            "list": [{"inner_": true}]
        });
        let once = remove_trailing_underscore(input.clone());
        assert_eq!(
            once,
            json!({
                "shell": ["bash"],
                "nested": {"key": 1, "plain": 2},
                "list": [{"inner": true}]
            })
        );
        assert_eq!(remove_trailing_underscore(once.clone()), once);
    }

    #[test]
    fn test_build_config_json_normalizes_and_forces_proxy_auth() {
        let value = build_config_json(&sample_config(), true, None).unwrap();
        assert_eq!(value["server"]["port"], "8080");
        assert_eq!(value["settings"]["branding"]["files"], "");
        assert_eq!(value["settings"]["authMethod"], "json");
        assert_eq!(value["settings"]["authHeader"], "");
        assert!(value["settings"].get("shell").is_some());
        assert!(value["settings"].get("shell_").is_none());
    }

    #[test]
    fn test_build_config_json_keeps_auth_without_proxy() {
        let value = build_config_json(&sample_config(), false, None).unwrap();
        assert_eq!(value["settings"]["authMethod"], "proxy");
        assert_eq!(value["settings"]["authHeader"], "X-Auth");
    }

    #[test]
    fn test_build_config_json_is_idempotent() {
        let first = serde_json::to_string_pretty(
            &build_config_json(&sample_config(), true, None).unwrap(),
        )
        .unwrap();
        let second = serde_json::to_string_pretty(
            &build_config_json(&sample_config(), true, None).unwrap(),
        )
        .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_extra_overrides_shallow_merge() {
        let extra = json!({
            "server": {"port": "9999", "address": "0.0.0.0"},
            "settings": {"signup": true},
            "ignored": {"key": 1}
        });
        let value = build_config_json(&sample_config(), false, Some(extra)).unwrap();
        assert_eq!(value["server"]["port"], "9999");
        assert_eq!(value["server"]["address"], "0.0.0.0");
        assert_eq!(value["settings"]["signup"], true);
        assert!(value.get("ignored").is_none());
        // Untouched keys survive the merge
        assert_eq!(value["server"]["root"], "/srv/files");
    }

    #[test]
    fn test_flatten_profile_shape() {
        let profile = sample_profile("alice", true);
        let value = flatten_profile(&profile, 1).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["username"], "alice");
        assert!(value.get("admin").is_none());
        assert!(value.get("authentication").is_none());
        assert_eq!(value["scope"], "/");
        assert!(value.get("lockPassword").is_some());
    }

    #[test]
    fn test_users_get_unique_one_based_ids_in_order() {
        let profiles = vec![
            sample_profile("alice", true),
            sample_profile("bob", false),
            sample_profile("carol", false),
        ];
        let flattened: Vec<Value> = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| flatten_profile(p, idx + 1).unwrap())
            .collect();
        let ids: Vec<u64> = flattened.iter().map(|v| v["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(flattened[1]["username"], "bob");
    }
}
