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

//! Package records and the download / build / install state machine.
//!
//! Every operation runs on the record's base and is guarded by a per
//! (record, operation) failure cache: once an operation failed, later calls
//! in the same run return the same prefixed error without touching disk,
//! git, makepkg or pacman again.

use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::aur::resolver::aur_depends;
use crate::aur::{AurPackageInfo, SourceEntry, Srcinfo};
use crate::context::Context;
use crate::error::{Error, IoContext, Operation, Result};

/// Build description checked out from the AUR
pub const DESCRIPTION_FILE: &str = "PKGBUILD";
/// Private snapshot of the description that makepkg actually reads
pub const WORKING_COPY: &str = ".PKGBUILD.build";
/// Rendered metadata of the working copy
pub const SRCINFO_FILE: &str = ".SRCINFO";

/// Ignore patterns every package directory carries
pub const FIXED_EXCLUSIONS: &[&str] = &["/src/", "/pkg/", "*.pkg.tar*", "*.log", "/.PKGBUILD.build"];

/// Index of a record in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub(crate) usize);

/// What the AUR knows about a name
#[derive(Debug, Clone, Default)]
pub enum RemoteState {
    /// Not looked up yet
    #[default]
    Unknown,
    Present(AurPackageInfo),
    /// Looked up, not in the AUR
    Absent,
}

impl RemoteState {
    pub fn is_known(&self) -> bool {
        !matches!(self, RemoteState::Unknown)
    }

    pub fn info(&self) -> Option<&AurPackageInfo> {
        match self {
            RemoteState::Present(info) => Some(info),
            _ => None,
        }
    }
}

/// One package name and everything learned about it during this run
#[derive(Debug)]
pub struct Package {
    pub name: String,
    /// Record owning the source tree; the record itself unless split
    pub base: PackageId,
    pub explicit: bool,
    pub local: Option<Srcinfo>,
    pub remote: RemoteState,
    pub downloaded: bool,
    pub built: bool,
    pub installed: bool,
    /// makepkg actually ran for this record in this run
    pub rebuilt: bool,
    pub(crate) errors: HashMap<Operation, Arc<Error>>,
}

impl Package {
    pub(crate) fn new(name: &str, id: PackageId) -> Self {
        Self {
            name: name.to_string(),
            base: id,
            explicit: false,
            local: None,
            remote: RemoteState::Unknown,
            downloaded: false,
            built: false,
            installed: false,
            rebuilt: false,
            errors: HashMap::new(),
        }
    }
}

/// Ignore list for a package directory: the fixed patterns plus every
/// downloaded source, so only files shipped by the AUR repository are tracked
pub fn exclusion_patterns(sources: &[SourceEntry]) -> Vec<String> {
    let mut patterns: Vec<String> = FIXED_EXCLUSIONS.iter().map(|p| p.to_string()).collect();
    for source in sources.iter().filter(|s| s.is_remote()) {
        let pattern = format!("/{}", source.filename);
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }
    patterns
}

impl Context {
    /// Check out or update the source tree of `id`'s base and of its AUR
    /// dependencies
    pub fn download(&self, id: PackageId) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            let base = self.base(id);
            self.guarded(base, Operation::Download, self.download_base(base))
                .await
        }
        .boxed_local()
    }

    /// Build `id`'s base unless its artifacts are up to date
    pub fn build(&self, id: PackageId) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            let base = self.base(id);
            let force = self.force_requested(id);
            self.guarded(base, Operation::Build, self.build_base(base, force))
                .await
        }
        .boxed_local()
    }

    /// Build if needed, then install `id`'s base and its AUR dependencies
    pub fn install(&self, id: PackageId) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            let base = self.base(id);
            let explicit = self.with(id, |p| p.explicit) || self.with(base, |p| p.explicit);
            self.guarded(base, Operation::Install, self.install_base(base, explicit))
                .await
        }
        .boxed_local()
    }

    fn force_requested(&self, id: PackageId) -> bool {
        self.options.force
            && (self.with(id, |p| p.explicit) || self.with(self.base(id), |p| p.explicit))
    }

    /// Replay a cached failure, or run `work` and cache its operational failure
    async fn guarded(
        &self,
        id: PackageId,
        operation: Operation,
        work: impl Future<Output = Result<()>>,
    ) -> Result<()> {
        let name = self.name(id);
        if let Some(cause) = self.with(id, |p| p.errors.get(&operation).cloned()) {
            debug!(package = %name, %operation, "replaying cached failure");
            return Err(Error::operation(&name, operation, cause));
        }

        let span = info_span!("operation", package = %name, %operation);
        match work.instrument(span).await {
            Err(e) if e.is_operational() => {
                let cause = Arc::new(e);
                self.with_mut(id, |p| p.errors.insert(operation, Arc::clone(&cause)));
                Err(Error::operation(&name, operation, cause))
            }
            other => other,
        }
    }

    async fn download_base(&self, base: PackageId) -> Result<()> {
        if self.with(base, |p| p.downloaded) {
            return Ok(());
        }
        // Set before recursing: dependency downloads may cycle back here
        self.with_mut(base, |p| p.downloaded = true);

        let name = self.name(base);
        let dir = self.package_dir(base);

        if !dir.exists() {
            if !self.with(base, |p| p.remote.is_known()) {
                self.fetch(&[base]).await?;
            }
            if self.with(base, |p| p.remote.info().is_none()) {
                return Err(Error::PackageNotFound { package: name });
            }

            info!(package = %name, "adding source tree");
            let url = self.remote_url(&name);
            if let Err(e) = self.vcs.add(&url, &dir) {
                if dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        warn!(
                            package = %name,
                            path = %dir.display(),
                            error = %cleanup,
                            "could not remove partially added source tree"
                        );
                    }
                }
                return Err(e);
            }
        } else {
            info!(package = %name, "updating source tree");
            self.vcs.update(&dir)?;
        }

        let sources = self.local(base)?.sources(&self.options.arch);
        self.vcs.set_exclusions(&dir, &exclusion_patterns(&sources))?;

        for dep in self.all_local_depends(base)? {
            self.download(dep).await?;
        }
        Ok(())
    }

    async fn build_base(&self, base: PackageId, force: bool) -> Result<()> {
        if self.with(base, |p| p.built) {
            return Ok(());
        }

        let name = self.name(base);
        if !self.package_dir(base).exists() {
            return Err(Error::NotDownloaded { package: name });
        }

        self.snapshot_description(base)?;
        self.ensure_local(base)?;

        if !force && !self.needs_build(base)? {
            debug!(package = %name, "artifacts are up to date");
            return Ok(());
        }

        self.with_mut(base, |p| p.built = true);
        for artifact in self.existing_artifacts(base)? {
            debug!(artifact = %artifact.display(), "removing old artifact");
            match fs::remove_file(&artifact) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(Error::io(&artifact, e))
                }
                _ => {}
            }
        }

        for dep in aur_depends(self, base, false, true)? {
            self.install(dep).await?;
        }

        info!(package = %name, "building");
        let dir = self.package_dir(base);
        self.builder.build(&dir, &dir.join(WORKING_COPY))?;
        self.with_mut(base, |p| p.rebuilt = true);

        self.refresh_local(base)
    }

    async fn install_base(&self, base: PackageId, explicit: bool) -> Result<()> {
        if self.with(base, |p| p.installed) {
            return Ok(());
        }
        self.with_mut(base, |p| p.installed = true);

        let force = self.options.force && explicit;
        self.guarded(base, Operation::Build, self.build_base(base, force))
            .await?;

        let name = self.name(base);
        let version = self.local_version(base)?;
        let produced = self.produced_names(base)?;
        let current = produced
            .iter()
            .all(|n| self.local_installed_version(n).as_deref() == Some(version.as_str()));
        if current && !self.with(base, |p| p.rebuilt) {
            debug!(package = %name, %version, "already installed");
            return Ok(());
        }

        for dep in self.all_local_depends(base)? {
            self.install(dep).await?;
        }

        info!(package = %name, %version, explicit, "installing");
        let dir = self.package_dir(base);
        let artifacts = self.artifacts(base)?;
        self.builder
            .install_artifacts(&dir, &artifacts, !explicit, self.options.noconfirm)
    }

    /// AUR make and runtime dependencies from local metadata, make first
    fn all_local_depends(&self, id: PackageId) -> Result<Vec<PackageId>> {
        let mut deps = aur_depends(self, id, false, true)?;
        for dep in aur_depends(self, id, false, false)? {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Ok(deps)
    }

    /// Copy the description into the working copy when their contents differ,
    /// leaving the working copy's mtime alone otherwise
    pub(crate) fn snapshot_description(&self, id: PackageId) -> Result<()> {
        let dir = self.package_dir(id);
        let description = dir.join(DESCRIPTION_FILE);
        let working = dir.join(WORKING_COPY);

        let content = fs::read(&description).at_path(&description)?;
        if fs::read(&working).ok().as_deref() != Some(content.as_slice()) {
            fs::write(&working, &content).at_path(&working)?;
        }
        Ok(())
    }
}
