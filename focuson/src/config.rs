use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use focuson_ipc::SessionKind;
use serde::Deserialize;

use crate::badge::Rgb;
use crate::timer::Remaining;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub durations: Durations,
    pub badge: BadgeConfig,
    pub daemon: DaemonConfig,
    pub notifications: NotificationConfig,
    pub interception: InterceptionConfig,
}

/// Session lengths in whole minutes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Durations {
    pub focus: u32,
    pub short_break: u32,
    pub long_break: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BadgeConfig {
    #[serde(deserialize_with = "hex_to_rgb")]
    pub color: Rgb,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub tick_millis: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
    #[default]
    Granted,
    Denied,
    /// Not decided yet; behaves like `Denied` until granted.
    Default,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NotificationConfig {
    pub permission: NotificationPermission,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InterceptionConfig {
    /// Where "go back" lands when the tab has no history.
    pub neutral_page: String,
}

impl Default for Durations {
    fn default() -> Self {
        Self {
            focus: 25,
            short_break: 5,
            long_break: 15,
        }
    }
}

impl Durations {
    pub fn minutes(&self, kind: SessionKind) -> u32 {
        match kind {
            SessionKind::Focus => self.focus,
            SessionKind::ShortBreak => self.short_break,
            SessionKind::LongBreak => self.long_break,
        }
    }

    pub fn remaining(&self, kind: SessionKind) -> Remaining {
        Remaining::new(self.minutes(kind), 0)
    }
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            color: Rgb(0x19, 0x76, 0xd2),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(focuson_ipc::SOCKET_PATH),
            tick_millis: 1000,
        }
    }
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            neutral_page: "chrome://newtab/".to_string(),
        }
    }
}

fn hex_to_rgb<'de, D>(deserializer: D) -> Result<Rgb, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    if !s.is_ascii() || !s.starts_with('#') || s.len() != 7 {
        return Err(serde::de::Error::custom("invalid hex color format"));
    }
    let r = u8::from_str_radix(&s[1..3], 16).map_err(serde::de::Error::custom)?;
    let g = u8::from_str_radix(&s[3..5], 16).map_err(serde::de::Error::custom)?;
    let b = u8::from_str_radix(&s[5..7], 16).map_err(serde::de::Error::custom)?;
    Ok(Rgb(r, g, b))
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;
        Self::parse(&config_str).with_context(|| format!("Invalid config file at {:?}", path))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for kind in SessionKind::ALL {
            if self.durations.minutes(kind) == 0 {
                bail!("duration for {} must be at least one minute", kind);
            }
        }
        if self.daemon.tick_millis == 0 {
            bail!("daemon.tick_millis must be positive");
        }
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "focuson", "FocusOn")
}

pub fn load_config() -> Result<Config> {
    match project_dirs() {
        Some(proj_dirs) => {
            let path = proj_dirs.config_dir().join("focuson.toml");
            if path.exists() {
                Config::from_path(&path)
            } else {
                Ok(Config::default())
            }
        }
        None => Ok(Config::default()),
    }
}

/// Directory holding the shared store and the popup mirror.
pub fn data_dir() -> Result<PathBuf> {
    let proj_dirs =
        project_dirs().ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    let dir = proj_dirs.data_dir();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create data directory {:?}", dir))?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.durations, Durations::default());
        assert_eq!(config.badge.color, Rgb(0x19, 0x76, 0xd2));
        assert_eq!(config.daemon.tick_millis, 1000);
        assert_eq!(config.notifications.permission, NotificationPermission::Granted);
        assert_eq!(config.interception.neutral_page, "chrome://newtab/");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r##"
            [durations]
            focus = 50

            [badge]
            color = "#ff8800"

            [notifications]
            permission = "default"
            "##,
        )
        .unwrap();
        assert_eq!(config.durations.focus, 50);
        assert_eq!(config.durations.short_break, 5);
        assert_eq!(config.durations.remaining(SessionKind::Focus), Remaining::new(50, 0));
        assert_eq!(config.badge.color, Rgb(0xff, 0x88, 0x00));
        assert_eq!(config.notifications.permission, NotificationPermission::Default);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Config::parse("[badge]\ncolor = \"blue\"").is_err());
        assert!(Config::parse("[durations]\nlong_break = 0").is_err());
    }

    #[test]
    fn non_ascii_color_is_an_error_not_a_panic() {
        assert!(Config::parse("[badge]\ncolor = \"#aébcd\"").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focuson.toml");
        fs::write(&path, "[daemon]\nsocket_path = \"/tmp/other.sock\"\n").unwrap();
        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.daemon.socket_path, PathBuf::from("/tmp/other.sock"));
    }
}
