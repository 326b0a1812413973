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

//! Run context: the package registry and the collaborators it drives.
//!
//! The registry owns one [`Package`] per distinct name for the whole run.
//! Records are addressed by [`PackageId`]; state lives behind a `RefCell`
//! and no borrow is ever held across an `.await`.

use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::alpm_manager::{InstallReason, SystemDb};
use crate::aur::client::parse_dependency;
use crate::aur::{git, BuildTool, RemoteMetadata, Srcinfo, Vcs};
use crate::config::Config;
use crate::error::{Error, IoContext, Result};
use crate::package::{
    Package, PackageId, RemoteState, DESCRIPTION_FILE, SRCINFO_FILE, WORKING_COPY,
};

/// Settings that shape a run
#[derive(Debug, Clone)]
pub struct Options {
    pub root: PathBuf,
    pub git_url: String,
    /// Machine architecture artifacts are built for
    pub arch: String,
    pub pkgext: String,
    pub noconfirm: bool,
    /// Rebuild explicit packages even when their artifacts are fresh
    pub force: bool,
}

impl Options {
    pub fn from_config(config: &Config, force: bool) -> Self {
        Self {
            root: config.root.clone(),
            git_url: config.aur.git_url.clone(),
            arch: config.machine_arch(),
            pkgext: config.build.pkgext.clone(),
            noconfirm: config.build.noconfirm,
            force,
        }
    }
}

#[derive(Default)]
struct Registry {
    packages: Vec<Package>,
    index: HashMap<String, PackageId>,
}

/// A package base directory found in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedBase {
    pub base: String,
    pub pkgnames: Vec<String>,
    pub version: Option<String>,
}

pub struct Context {
    pub options: Options,
    pub(crate) vcs: Box<dyn Vcs>,
    pub(crate) builder: Box<dyn BuildTool>,
    system: Box<dyn SystemDb>,
    remote: Box<dyn RemoteMetadata>,
    registry: RefCell<Registry>,
    foreign: OnceCell<HashSet<String>>,
}

impl Context {
    pub fn new(
        options: Options,
        vcs: Box<dyn Vcs>,
        builder: Box<dyn BuildTool>,
        system: Box<dyn SystemDb>,
        remote: Box<dyn RemoteMetadata>,
    ) -> Self {
        Self {
            options,
            vcs,
            builder,
            system,
            remote,
            registry: RefCell::new(Registry::default()),
            foreign: OnceCell::new(),
        }
    }

    /// The record for `name`, created on first use
    pub fn package(&self, name: &str) -> PackageId {
        let mut registry = self.registry.borrow_mut();
        if let Some(&id) = registry.index.get(name) {
            return id;
        }
        let id = PackageId(registry.packages.len());
        registry.packages.push(Package::new(name, id));
        registry.index.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: PackageId) -> String {
        self.with(id, |p| p.name.clone())
    }

    pub fn base(&self, id: PackageId) -> PackageId {
        self.with(id, |p| p.base)
    }

    pub fn with<R>(&self, id: PackageId, f: impl FnOnce(&Package) -> R) -> R {
        f(&self.registry.borrow().packages[id.0])
    }

    pub fn with_mut<R>(&self, id: PackageId, f: impl FnOnce(&mut Package) -> R) -> R {
        f(&mut self.registry.borrow_mut().packages[id.0])
    }

    pub fn mark_explicit(&self, id: PackageId) {
        self.with_mut(id, |p| p.explicit = true);
    }

    /// Source tree directory of `id`'s base
    pub fn package_dir(&self, id: PackageId) -> PathBuf {
        self.options.root.join(self.name(self.base(id)))
    }

    pub fn remote_url(&self, pkgbase: &str) -> String {
        git::remote_url(&self.options.git_url, pkgbase)
    }

    /// Names satisfiable from the sync databases, version clauses stripped.
    /// Computed once per run.
    pub fn foreign_capabilities(&self) -> &HashSet<String> {
        self.foreign.get_or_init(|| {
            let names: HashSet<String> = self
                .system
                .sync_names_and_provides()
                .iter()
                .map(|entry| parse_dependency(entry).0.to_string())
                .collect();
            debug!(count = names.len(), "loaded foreign capabilities");
            names
        })
    }

    pub fn local_installed_version(&self, name: &str) -> Option<String> {
        self.system.installed_version(name)
    }

    pub fn install_reason(&self, name: &str) -> Option<InstallReason> {
        self.system.install_reason(name)
    }

    /// Look up remote metadata for `ids` in one batch.
    ///
    /// Results are stored on their own record and on the record of their
    /// package base, which becomes the result's base. Requested names the
    /// service did not return end up `Absent`, unless their base already
    /// carries metadata.
    pub async fn fetch(&self, ids: &[PackageId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = ids.iter().map(|&id| self.name(id)).collect();
        debug!(names = %names.join(","), "fetching remote metadata");
        let response = self.remote.info(&names).await?;

        if response.is_error() {
            return Err(Error::RemoteService {
                message: response
                    .error
                    .unwrap_or_else(|| "unspecified error".to_string()),
            });
        }

        for info in response.results {
            debug!(package = %info.name, version = %info.version, "found in the AUR");
            let record = self.package(&info.name);
            let base = if info.package_base.is_empty() {
                record
            } else {
                self.package(&info.package_base)
            };

            self.with_mut(base, |p| {
                if p.remote.info().is_none() || p.name == info.name {
                    p.remote = RemoteState::Present(info.clone());
                }
            });
            self.with_mut(record, |p| {
                p.remote = RemoteState::Present(info);
                p.base = base;
            });
        }

        for &id in ids {
            if self.with(id, |p| p.remote.is_known()) {
                continue;
            }
            let inherited = self.with(self.base(id), |p| p.remote.info().cloned());
            self.with_mut(id, |p| {
                p.remote = inherited.map_or(RemoteState::Absent, RemoteState::Present)
            });
        }

        Ok(())
    }

    /// Local metadata of `id`'s base, computing it on first need.
    ///
    /// An existing `.SRCINFO` at least as new as the description is read
    /// back; otherwise the description is snapshotted and rendered.
    pub fn ensure_local(&self, id: PackageId) -> Result<()> {
        let base = self.base(id);
        if self.with(base, |p| p.local.is_some()) {
            return Ok(());
        }

        let dir = self.package_dir(base);
        if !dir.exists() {
            return Err(Error::NotDownloaded {
                package: self.name(base),
            });
        }

        let srcinfo = dir.join(SRCINFO_FILE);
        let rendered = modified(&srcinfo)?;
        let description = modified(&dir.join(DESCRIPTION_FILE))?;
        let local = match (rendered, description) {
            (Some(rendered), Some(description)) if rendered >= description => {
                let content = fs::read_to_string(&srcinfo).at_path(&srcinfo)?;
                Srcinfo::parse(&content)
            }
            _ => {
                self.snapshot_description(base)?;
                self.render_local(base)?
            }
        };

        self.with_mut(base, |p| p.local = Some(local));
        Ok(())
    }

    /// Re-render local metadata from the working copy a build left behind.
    ///
    /// makepkg rewrites `pkgver` in the file it was given, so the working
    /// copy is rendered as is and never re-snapshotted here.
    pub fn refresh_local(&self, id: PackageId) -> Result<()> {
        let base = self.base(id);
        let local = self.render_local(base)?;
        self.with_mut(base, |p| p.local = Some(local));
        Ok(())
    }

    fn render_local(&self, base: PackageId) -> Result<Srcinfo> {
        let dir = self.package_dir(base);
        let content = self
            .builder
            .render_metadata(&dir, &dir.join(WORKING_COPY))?;

        let srcinfo = dir.join(SRCINFO_FILE);
        fs::write(&srcinfo, &content).at_path(&srcinfo)?;
        Ok(Srcinfo::parse(&content))
    }

    /// Local metadata of `id`'s base
    pub fn local(&self, id: PackageId) -> Result<Srcinfo> {
        let base = self.base(id);
        self.ensure_local(base)?;
        Ok(self.with(base, |p| p.local.clone().unwrap_or_default()))
    }

    /// `[epoch:]pkgver-pkgrel` of `id`'s base
    pub fn local_version(&self, id: PackageId) -> Result<String> {
        let base = self.base(id);
        self.local(base)?.version(&self.name(base))
    }

    /// Every package name the base produces; the base name if none is declared
    pub fn produced_names(&self, id: PackageId) -> Result<Vec<String>> {
        let base = self.base(id);
        let local = self.local(base)?;
        if local.pkgnames().is_empty() {
            Ok(vec![self.name(base)])
        } else {
            Ok(local.pkgnames().to_vec())
        }
    }

    /// Paths the build of `id`'s base is expected to produce
    pub fn artifacts(&self, id: PackageId) -> Result<Vec<PathBuf>> {
        let base = self.base(id);
        let name = self.name(base);
        let local = self.local(base)?;
        let version = local.version(&name)?;
        let arch = local.resolve_arch(&name, &self.options.arch)?;
        let dir = self.package_dir(base);

        Ok(self
            .produced_names(base)?
            .iter()
            .map(|pkgname| {
                dir.join(format!(
                    "{}-{}-{}.{}",
                    pkgname, version, arch, self.options.pkgext
                ))
            })
            .collect())
    }

    /// Built artifacts of any version already present for the packages
    /// `id`'s base produces.
    ///
    /// Matches `<pkgname>-<pkgver>-<pkgrel>-<arch>.<pkgext>` with the
    /// package name compared exactly, so `foo` never claims `foo-cli`'s files.
    pub fn existing_artifacts(&self, id: PackageId) -> Result<Vec<PathBuf>> {
        let base = self.base(id);
        let dir = self.package_dir(base);
        let produced = self.produced_names(base)?;
        let suffix = format!(".{}", self.options.pkgext);

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir).at_path(&dir)? {
            let entry = entry.at_path(&dir)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(suffix.as_str()) else {
                continue;
            };
            let fields: Vec<&str> = stem.rsplitn(4, '-').collect();
            if fields.len() == 4 && produced.iter().any(|n| n == fields[3]) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Whether the artifacts of `id`'s base are older than its inputs.
    ///
    /// Inputs are the description, its working copy and every local source
    /// file. A missing artifact is always stale; equal timestamps are fresh.
    pub fn needs_build(&self, id: PackageId) -> Result<bool> {
        let base = self.base(id);
        let dir = self.package_dir(base);

        let mut oldest_artifact: Option<SystemTime> = None;
        for artifact in self.artifacts(base)? {
            match modified(&artifact)? {
                Some(time) => {
                    oldest_artifact = Some(oldest_artifact.map_or(time, |t| t.min(time)))
                }
                None => {
                    debug!(artifact = %artifact.display(), "artifact missing");
                    return Ok(true);
                }
            }
        }

        let mut inputs = vec![dir.join(DESCRIPTION_FILE), dir.join(WORKING_COPY)];
        inputs.extend(
            self.local(base)?
                .sources(&self.options.arch)
                .into_iter()
                .filter(|s| !s.is_remote())
                .map(|s| dir.join(s.filename)),
        );

        let mut newest_input: Option<SystemTime> = None;
        for input in &inputs {
            if let Some(time) = modified(input)? {
                newest_input = Some(newest_input.map_or(time, |t| t.max(time)));
            }
        }

        Ok(match (oldest_artifact, newest_input) {
            (Some(artifact), Some(input)) => artifact < input,
            (None, _) => true,
            (Some(_), None) => false,
        })
    }

    /// Package bases checked out under the root, sorted by name
    pub fn managed_packages(&self) -> Result<Vec<ManagedBase>> {
        let root = &self.options.root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(root, e)),
        };

        let mut bases = Vec::new();
        for entry in entries {
            let entry = entry.at_path(root)?;
            let base = entry.file_name().to_string_lossy().into_owned();
            if base.starts_with('.') || !entry.path().is_dir() {
                continue;
            }

            let srcinfo = fs::read_to_string(entry.path().join(SRCINFO_FILE))
                .ok()
                .map(|content| Srcinfo::parse(&content));
            let pkgnames = srcinfo
                .as_ref()
                .map(|s| s.pkgnames().to_vec())
                .filter(|names| !names.is_empty())
                .unwrap_or_else(|| vec![base.clone()]);
            let version = srcinfo.and_then(|s| s.version(&base).ok());

            bases.push(ManagedBase {
                base,
                pkgnames,
                version,
            });
        }

        bases.sort_by(|a, b| a.base.cmp(&b.base));
        Ok(bases)
    }
}

/// Modification time of `path`, `None` if it does not exist
fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta.modified().map(Some).at_path(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}
