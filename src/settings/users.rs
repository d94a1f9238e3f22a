use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::error::WardenError;
use crate::settings::models::{Listing, Perm, Sorting};
use crate::settings::{lookup, parse_list};

/// Identity block of a user profile. The `admin` flag picks the permission
/// preset and is stripped before the profile is written for the child.
#[derive(Debug, Clone, Serialize)]
pub struct Authentication {
    pub username: String,
    pub password: String,
    pub admin: bool,
}

/// One user profile, serialized with the child's camelCase field names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub authentication: Authentication,
    pub scope: String,
    pub locale: String,
    pub lock_password: bool,
    pub view_mode: Listing,
    pub single_click: bool,
    pub perm: Option<Perm>,
    pub commands: Vec<String>,
    pub sorting: Sorting,
    pub rules: Vec<String>,
    pub hide_dotfiles: bool,
    pub date_format: bool,
}

/// A password is considered strong when it has at least 8 characters, one
/// digit, one uppercase letter, one lowercase letter and one symbol.
pub fn complexity_checker(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Minimum password length is 8".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must include an integer".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("Password must include at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("Password must include at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_punctuation() || c == ' ') {
        return Err("Password must contain at least one special character".to_string());
    }
    Ok(())
}

impl UserProfile {
    /// Build a profile from the key/value pairs of one `*user*.env` file.
    fn from_vars(vars: &HashMap<String, String>, source: &Path) -> Result<Self, WardenError> {
        let username = lookup(vars, "USERNAME").ok_or_else(|| {
            WardenError::Config(format!("{}: missing USERNAME", source.display()))
        })?;
        let password = lookup(vars, "PASSWORD").ok_or_else(|| {
            WardenError::Config(format!("{}: missing PASSWORD", source.display()))
        })?;
        complexity_checker(&password)
            .map_err(|e| WardenError::Config(format!("{}: {e}", source.display())))?;

        let parse_flag = |key: &str| {
            lookup(vars, key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let view_mode = match lookup(vars, "VIEW_MODE") {
            Some(raw) => raw
                .parse()
                .map_err(|e| WardenError::Config(format!("{}: {e}", source.display())))?,
            None => Listing::default(),
        };
        let sorting = Sorting {
            by: match lookup(vars, "SORTING_BY") {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| WardenError::Config(format!("{}: {e}", source.display())))?,
                None => Default::default(),
            },
            asc: parse_flag("SORTING_ASC"),
        };

        Ok(Self {
            authentication: Authentication {
                username,
                password,
                admin: parse_flag("ADMIN"),
            },
            scope: lookup(vars, "SCOPE").unwrap_or_else(|| "/".to_string()),
            locale: lookup(vars, "LOCALE").unwrap_or_else(|| "en".to_string()),
            lock_password: parse_flag("LOCK_PASSWORD"),
            view_mode,
            single_click: parse_flag("SINGLE_CLICK"),
            perm: None,
            commands: parse_list(lookup(vars, "COMMANDS").as_deref().unwrap_or_default()),
            sorting,
            rules: parse_list(lookup(vars, "RULES").as_deref().unwrap_or_default()),
            hide_dotfiles: parse_flag("HIDE_DOTFILES"),
            date_format: parse_flag("DATE_FORMAT"),
        })
    }
}

/// Load user profiles from `*user*.env` files in the secrets directory.
///
/// Files are visited in name order so the 1-based ids assigned later are
/// stable. Non-admin users cannot reset passwords or view dot files, and a
/// non-admin scoped to the root directory gets a loud warning.
pub fn load_profiles(secrets_dir: &Path) -> Result<Vec<UserProfile>, WardenError> {
    let mut paths: Vec<_> = std::fs::read_dir(secrets_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.contains("user") && name.ends_with(".env")
        })
        .collect();
    paths.sort();

    let mut profiles = Vec::new();
    for path in paths {
        let vars: HashMap<String, String> = dotenvy::from_path_iter(&path)
            .map_err(|e| WardenError::Config(format!("{}: {e}", path.display())))?
            .collect::<Result<_, _>>()
            .map_err(|e| WardenError::Config(format!("{}: {e}", path.display())))?;
        let mut profile = UserProfile::from_vars(&vars, &path)?;
        if !profile.authentication.admin {
            profile.lock_password = true;
            profile.hide_dotfiles = true;
            if profile.scope == "/" {
                warn!(
                    "User {:?} is not an admin, but has permissions to the root directory",
                    profile.authentication.username
                );
            }
        }
        profiles.push(profile);
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_complexity_checker() {
        assert!(complexity_checker("Str0ng!pass").is_ok());
        assert!(complexity_checker("short1!").is_err());
        assert!(complexity_checker("nodigits!A").is_err());
        assert!(complexity_checker("NOLOWER1!").is_err());
        assert!(complexity_checker("noupper1!").is_err());
        assert!(complexity_checker("NoSymbol11").is_err());
    }

    fn write_env(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_profiles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_env(
            dir.path(),
            "b_user.env",
            "USERNAME=bob\nPASSWORD=B0b!secret\nADMIN=false\n",
        );
        write_env(
            dir.path(),
            "a_user.env",
            "USERNAME=alice\nPASSWORD=Al1ce!secret\nADMIN=true\n",
        );
        write_env(dir.path(), "notes.txt", "USERNAME=ignored\n");

        let profiles = load_profiles(dir.path()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].authentication.username, "alice");
        assert_eq!(profiles[1].authentication.username, "bob");
    }

    #[test]
    fn test_non_admin_hardening() {
        let dir = tempfile::tempdir().unwrap();
        write_env(
            dir.path(),
            "user.env",
            "USERNAME=bob\nPASSWORD=B0b!secret\nADMIN=false\nLOCK_PASSWORD=false\nHIDE_DOTFILES=false\n",
        );
        let profiles = load_profiles(dir.path()).unwrap();
        assert!(profiles[0].lock_password);
        assert!(profiles[0].hide_dotfiles);
    }

    #[test]
    fn test_weak_password_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_env(dir.path(), "user.env", "USERNAME=bob\nPASSWORD=weak\n");
        assert!(load_profiles(dir.path()).is_err());
    }

    #[test]
    fn test_profile_serializes_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        write_env(
            dir.path(),
            "user.env",
            "USERNAME=bob\nPASSWORD=B0b!secret\nVIEW_MODE=mosaic\n",
        );
        let profiles = load_profiles(dir.path()).unwrap();
        let value = serde_json::to_value(&profiles[0]).unwrap();
        assert_eq!(value["viewMode"], "mosaic");
        assert!(value.get("lockPassword").is_some());
        assert!(value.get("hideDotfiles").is_some());
    }
}
