/*
 * aurtree - AUR packages kept as git subtrees, built only when needed.
 * Copyright (C) 2025  compiledkernel-idk and pacboost contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Configuration management with validation and defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, Result};

/// Main configuration structure for aurtree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the git repository holding one subtree per package base
    pub root: PathBuf,

    /// Sync databases consulted for foreign capabilities
    pub repos: Vec<String>,

    /// AUR endpoints
    pub aur: AurConfig,

    /// makepkg / pacman settings
    pub build: BuildConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("aurtree"),
            repos: vec![
                "core".to_string(),
                "extra".to_string(),
                "multilib".to_string(),
            ],
            aur: AurConfig::default(),
            build: BuildConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// AUR-specific configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AurConfig {
    /// AUR RPC base URL
    pub rpc_url: String,

    /// Base URL of the AUR git remotes (`<git_url>/<pkgbase>.git`)
    pub git_url: String,
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://aur.archlinux.org/rpc/".to_string(),
            git_url: "https://aur.archlinux.org/".to_string(),
        }
    }
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Package extension produced by makepkg, without the leading dot
    pub pkgext: String,

    /// Machine architecture (empty = detect)
    pub arch: String,

    /// Pass --noconfirm to pacman
    pub noconfirm: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pkgext: "pkg.tar.zst".to_string(),
            arch: String::new(),
            noconfirm: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (empty = no file logging)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. /etc/aurtree/aurtree.toml (system-wide)
    /// 2. ~/.config/aurtree/config.toml (user)
    /// 3. Environment variables (AURTREE_*)
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let system_config = Path::new("/etc/aurtree/aurtree.toml");
        if system_config.exists() {
            config = config.merge(Self::from_file(system_config)?);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("aurtree").join("config.toml");
            if user_config.exists() {
                config = config.merge(Self::from_file(&user_config)?);
            }
        }

        Ok(config.apply_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Parse a single configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|e| Error::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Merge another config into this one (other takes precedence for non-default values)
    fn merge(mut self, other: Config) -> Self {
        let default = Config::default();

        if other.root != default.root {
            self.root = other.root;
        }
        if other.repos != default.repos {
            self.repos = other.repos;
        }

        self.aur = self.aur.merge(other.aur);
        self.build = self.build.merge(other.build);

        if other.logging.level != default.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }

        self
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("AURTREE_ROOT") {
            self.root = PathBuf::from(val);
        }

        if let Some(val) = var("AURTREE_RPC_URL") {
            self.aur.rpc_url = val;
        }

        if let Some(val) = var("AURTREE_NOCONFIRM") {
            self.build.noconfirm = val == "1" || val.to_lowercase() == "true";
        }

        if let Some(val) = var("AURTREE_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::Config { message });

        if self.repos.is_empty() {
            return invalid("at least one sync repository is required".to_string());
        }
        if let Err(e) = Url::parse(&self.aur.rpc_url) {
            return invalid(format!("invalid rpc_url '{}': {}", self.aur.rpc_url, e));
        }
        if let Err(e) = Url::parse(&self.aur.git_url) {
            return invalid(format!("invalid git_url '{}': {}", self.aur.git_url, e));
        }
        if !self.build.pkgext.starts_with("pkg.tar") {
            return invalid(format!(
                "pkgext must start with 'pkg.tar', got '{}'",
                self.build.pkgext
            ));
        }
        Ok(())
    }

    /// The architecture packages are built for, asking the kernel if unset
    pub fn machine_arch(&self) -> String {
        if self.build.arch.is_empty() {
            uname_machine().unwrap_or_else(|| std::env::consts::ARCH.to_string())
        } else {
            self.build.arch.clone()
        }
    }
}

/// Hardware name from uname(2), what pacman's `Architecture = auto` uses
fn uname_machine() -> Option<String> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    // uname NUL-terminates every field
    let machine = unsafe { std::ffi::CStr::from_ptr(uts.machine.as_ptr()) };
    Some(machine.to_string_lossy().into_owned()).filter(|m| !m.is_empty())
}

impl AurConfig {
    fn merge(mut self, other: AurConfig) -> Self {
        let default = AurConfig::default();

        if other.rpc_url != default.rpc_url {
            self.rpc_url = other.rpc_url;
        }
        if other.git_url != default.git_url {
            self.git_url = other.git_url;
        }

        self
    }
}

impl BuildConfig {
    fn merge(mut self, other: BuildConfig) -> Self {
        let default = BuildConfig::default();

        if other.pkgext != default.pkgext {
            self.pkgext = other.pkgext;
        }
        if other.arch != default.arch {
            self.arch = other.arch;
        }
        if other.noconfirm != default.noconfirm {
            self.noconfirm = other.noconfirm;
        }

        self
    }
}
