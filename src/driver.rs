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

//! Top-level orchestration of a run.

use tracing::{info, warn};

use crate::alpm_manager::InstallReason;
use crate::aur::resolver::fill_remote_metadata;
use crate::context::Context;
use crate::error::{Operation, Result};
use crate::package::PackageId;

/// Phases requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub download: bool,
    pub build: bool,
    pub install: bool,
}

impl Phases {
    /// Selected phases; none selected means all of them
    pub fn from_flags(download: bool, build: bool, install: bool) -> Self {
        if !download && !build && !install {
            return Self::all();
        }
        Self {
            download,
            build,
            install,
        }
    }

    pub fn all() -> Self {
        Self {
            download: true,
            build: true,
            install: true,
        }
    }

    fn operations(&self) -> Vec<Operation> {
        [
            (self.download, Operation::Download),
            (self.build, Operation::Build),
            (self.install, Operation::Install),
        ]
        .into_iter()
        .filter_map(|(selected, op)| selected.then_some(op))
        .collect()
    }
}

/// Result of the requested phases for one top-level package
#[derive(Debug, Clone)]
pub struct Outcome {
    pub name: String,
    pub completed: Vec<Operation>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Register `targets` as explicit and resolve their AUR dependency closure
pub async fn resolve(ctx: &Context, targets: &[String]) -> Result<Vec<PackageId>> {
    let ids: Vec<PackageId> = targets
        .iter()
        .map(|name| {
            let id = ctx.package(name);
            ctx.mark_explicit(id);
            id
        })
        .collect();

    fill_remote_metadata(ctx, &ids).await?;
    Ok(ids)
}

/// Run `phases` on every package in order.
///
/// A package stops at its first failed phase; the failure is logged and the
/// next package is attempted. Errors outside the operational taxonomy abort
/// the whole run.
pub async fn execute(ctx: &Context, ids: &[PackageId], phases: Phases) -> Result<Report> {
    let mut report = Report::default();

    for &id in ids {
        let name = ctx.name(id);
        let mut outcome = Outcome {
            name: name.clone(),
            completed: Vec::new(),
            error: None,
        };

        for operation in phases.operations() {
            let result = match operation {
                Operation::Download => ctx.download(id).await,
                Operation::Build => ctx.build(id).await,
                Operation::Install => ctx.install(id).await,
            };

            match result {
                Ok(()) => outcome.completed.push(operation),
                Err(e) if e.is_operational() => {
                    warn!(package = %name, "{}", e);
                    outcome.error = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if outcome.error.is_none() {
            info!(package = %name, "done");
        }
        report.outcomes.push(outcome);
    }

    Ok(report)
}

/// Packages in the tree that are installed explicitly
pub fn default_targets(ctx: &Context) -> Result<Vec<String>> {
    Ok(ctx
        .managed_packages()?
        .into_iter()
        .flat_map(|base| base.pkgnames)
        .filter(|name| ctx.install_reason(name) == Some(InstallReason::Explicit))
        .collect())
}
