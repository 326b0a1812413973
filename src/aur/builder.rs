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

//! makepkg and pacman invocation.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{Error, Result};

/// Build-tool operations on one package directory
pub trait BuildTool {
    /// Render `.SRCINFO` text for `description`
    fn render_metadata(&self, dir: &Path, description: &Path) -> Result<String>;

    /// Produce artifacts from `description`
    fn build(&self, dir: &Path, description: &Path) -> Result<()>;

    /// Install built artifacts with the system package manager
    fn install_artifacts(
        &self,
        dir: &Path,
        artifacts: &[PathBuf],
        as_dependency: bool,
        no_confirm: bool,
    ) -> Result<()>;
}

/// makepkg-backed build tool
pub struct Makepkg {
    /// Number of parallel make jobs
    make_jobs: usize,
    /// Extension for built packages, e.g. `pkg.tar.zst`
    pkgext: String,
    /// Do not ask pacman for confirmation when syncing repo dependencies
    noconfirm: bool,
}

impl Makepkg {
    /// Create a builder from configuration
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            make_jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            pkgext: config.pkgext.clone(),
            noconfirm: config.noconfirm,
        }
    }

    fn makepkg(&self, dir: &Path, description: &Path) -> Command {
        let mut cmd = Command::new("makepkg");
        cmd.arg("-p").arg(description);
        cmd.env("MAKEFLAGS", format!("-j{}", self.make_jobs));
        cmd.env("PKGEXT", format!(".{}", self.pkgext));
        cmd.env("PKGDEST", dir);
        cmd.current_dir(dir);
        cmd
    }
}

impl BuildTool for Makepkg {
    fn render_metadata(&self, dir: &Path, description: &Path) -> Result<String> {
        output_checked(self.makepkg(dir, description).arg("--printsrcinfo"))
    }

    fn build(&self, dir: &Path, description: &Path) -> Result<()> {
        let mut cmd = self.makepkg(dir, description);
        cmd.args(["--syncdeps", "--force"]);
        if self.noconfirm {
            cmd.arg("--noconfirm");
        }
        run_checked(&mut cmd)
    }

    fn install_artifacts(
        &self,
        dir: &Path,
        artifacts: &[PathBuf],
        as_dependency: bool,
        no_confirm: bool,
    ) -> Result<()> {
        run_checked(&mut install_command(dir, artifacts, as_dependency, no_confirm))
    }
}

fn install_command(
    dir: &Path,
    artifacts: &[PathBuf],
    as_dependency: bool,
    no_confirm: bool,
) -> Command {
    let mut cmd = Command::new("sudo");
    cmd.args(["pacman", "-U"]);
    if as_dependency {
        cmd.arg("--asdeps");
    }
    if no_confirm {
        cmd.arg("--noconfirm");
    }
    cmd.args(artifacts);
    cmd.current_dir(dir);
    cmd
}

/// Render a command line for error messages
fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn working_dir(cmd: &Command) -> PathBuf {
    cmd.get_current_dir()
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
}

fn spawn_failed(cmd: &Command) -> Error {
    Error::ExternalCommand {
        command: describe(cmd),
        cwd: working_dir(cmd),
        code: None,
    }
}

/// Run a command with inherited stdio, failing on a non-zero exit
pub(crate) fn run_checked(cmd: &mut Command) -> Result<()> {
    debug!(command = %describe(cmd), "running");
    let status = cmd
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|_| spawn_failed(cmd))?;

    if !status.success() {
        return Err(Error::ExternalCommand {
            command: describe(cmd),
            cwd: working_dir(cmd),
            code: status.code(),
        });
    }
    Ok(())
}

/// Run a command and capture its standard output
pub(crate) fn output_checked(cmd: &mut Command) -> Result<String> {
    debug!(command = %describe(cmd), "capturing");
    let output = cmd
        .stderr(Stdio::inherit())
        .output()
        .map_err(|_| spawn_failed(cmd))?;

    if !output.status.success() {
        return Err(Error::ExternalCommand {
            command: describe(cmd),
            cwd: working_dir(cmd),
            code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
