use std::str::FromStr;

use serde::Serialize;

/// Log sink understood by the filebrowser binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Log {
    #[default]
    Stdout,
    File,
}

impl FromStr for Log {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "file" => Ok(Self::File),
            other => Err(format!("unknown log sink {other:?}")),
        }
    }
}

/// Branding theme. Blank defers to the system default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    #[serde(rename = "")]
    Blank,
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "" => Ok(Self::Blank),
            other => Err(format!("unknown theme {other:?}")),
        }
    }
}

/// Directory listing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Listing {
    #[default]
    List,
    Mosaic,
    Gallery,
}

impl FromStr for Listing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "mosaic" => Ok(Self::Mosaic),
            "gallery" => Ok(Self::Gallery),
            other => Err(format!("unknown view mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Size,
    Modified,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "modified" => Ok(Self::Modified),
            other => Err(format!("unknown sort key {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Sorting {
    pub by: SortBy,
    pub asc: bool,
}

/// Capability set the child assigns per user. Always applied wholesale from
/// one of the two presets below; there are no per-flag overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Perm {
    pub admin: bool,
    pub execute: bool,
    pub create: bool,
    pub rename: bool,
    pub modify: bool,
    pub delete: bool,
    pub share: bool,
    pub download: bool,
}

/// Full capability set for administrators.
pub fn admin_perm() -> Perm {
    Perm {
        admin: true,
        execute: true,
        create: true,
        rename: true,
        modify: true,
        delete: true,
        share: true,
        download: true,
    }
}

/// Restricted capability set for regular users.
pub fn default_perm() -> Perm {
    Perm {
        admin: false,
        execute: true,
        create: true,
        rename: false,
        modify: false,
        delete: false,
        share: false,
        download: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_preset_applies() {
        let admin = admin_perm();
        let user = default_perm();
        assert!(admin.admin && admin.rename && admin.delete);
        assert!(!user.admin && !user.rename && !user.delete);
        assert!(user.execute && user.create && user.download);
    }

    #[test]
    fn test_theme_blank_serializes_empty() {
        assert_eq!(serde_json::to_string(&Theme::Blank).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("mosaic".parse::<Listing>().unwrap(), Listing::Mosaic);
        assert_eq!("MODIFIED".parse::<SortBy>().unwrap(), SortBy::Modified);
        assert!("spiral".parse::<Listing>().is_err());
    }
}
