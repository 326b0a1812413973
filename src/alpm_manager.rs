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

use alpm::{Alpm, LogLevel, PackageReason, SigLevel};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Why a package is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Explicit,
    Dependency,
}

/// Read-only view of the system package databases
pub trait SystemDb {
    /// Version of `name` in the local database
    fn installed_version(&self, name: &str) -> Option<String>;

    /// Install reason of `name` in the local database
    fn install_reason(&self, name: &str) -> Option<InstallReason>;

    /// Every package name and provided capability in the sync databases.
    /// Provided entries may still carry a version (`libfoo.so=1-64`).
    fn sync_names_and_provides(&self) -> HashSet<String>;
}

pub struct AlpmManager {
    pub handle: Alpm,
}

impl AlpmManager {
    pub fn new(repos: &[String]) -> Result<Self> {
        let root = "/";
        let dbpath = "/var/lib/pacman";

        let mut handle = Alpm::new(root, dbpath).map_err(|e| Error::Config {
            message: format!("failed to initialize libalpm: {}", e),
        })?;

        handle.set_log_cb((), |level, msg, _| {
            if level.contains(LogLevel::ERROR) {
                tracing::error!("alpm: {}", msg.trim_end());
            } else if level.contains(LogLevel::WARNING) {
                tracing::warn!("alpm: {}", msg.trim_end());
            }
        });

        for repo in repos {
            handle
                .register_syncdb_mut(repo.as_str(), SigLevel::DATABASE_OPTIONAL)
                .map_err(|e| Error::Config {
                    message: format!("failed to register sync database {}: {}", repo, e),
                })?;
        }

        Ok(Self { handle })
    }
}

impl SystemDb for AlpmManager {
    fn installed_version(&self, name: &str) -> Option<String> {
        self.handle
            .localdb()
            .pkg(name)
            .ok()
            .map(|p| p.version().as_str().to_string())
    }

    fn install_reason(&self, name: &str) -> Option<InstallReason> {
        self.handle.localdb().pkg(name).ok().map(|p| match p.reason() {
            PackageReason::Explicit => InstallReason::Explicit,
            PackageReason::Depend => InstallReason::Dependency,
        })
    }

    fn sync_names_and_provides(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for db in self.handle.syncdbs() {
            for pkg in db.pkgs() {
                names.insert(pkg.name().to_string());
                names.extend(pkg.provides().iter().map(|dep| dep.to_string()));
            }
        }
        names
    }
}
