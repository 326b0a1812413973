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

//! In-memory collaborators for tests.
//!
//! Every fake appends what it was asked to do to a shared [`Log`], so tests
//! assert on side effects by counting events such as `git add foo`,
//! `makepkg build foo` or `pacman -U foo --asdeps`.

use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;
use tempfile::TempDir;

use crate::alpm_manager::{InstallReason, SystemDb};
use crate::aur::{AurPackageInfo, AurRpcResponse, BuildTool, RemoteMetadata, Vcs};
use crate::context::{Context, Options};
use crate::error::{Error, Result};

/// Version the fake AUR reports for every package
const FAKE_VERSION: &str = "1.0-1";
/// `pkgver` a description renders to unless it sets its own
const FAKE_PKGVER: &str = "1.0";
const FAKE_ARCH: &str = "x86_64";
const FAKE_PKGEXT: &str = "pkg.tar.zst";

#[derive(Default)]
pub struct Log(RefCell<Vec<String>>);

impl Log {
    fn push(&self, event: String) {
        self.0.borrow_mut().push(event);
    }

    /// Number of events containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Whether the first event containing `first` precedes the first
    /// containing `second`
    pub fn before(&self, first: &str, second: &str) -> bool {
        let events = self.0.borrow();
        let position = |needle: &str| events.iter().position(|e| e.contains(needle));
        matches!((position(first), position(second)), (Some(a), Some(b)) if a < b)
    }
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The last `pkgver=` assignment in a description
fn description_pkgver(description: &Path) -> Result<String> {
    let content = fs::read_to_string(description).map_err(|e| Error::io(description, e))?;
    Ok(content
        .lines()
        .filter_map(|l| l.strip_prefix("pkgver="))
        .last()
        .unwrap_or(FAKE_PKGVER)
        .to_string())
}

fn command_failed(command: String, cwd: &Path) -> Error {
    Error::ExternalCommand {
        command,
        cwd: cwd.to_path_buf(),
        code: Some(1),
    }
}

#[derive(Debug, Clone, Default)]
struct FakeBase {
    pkgnames: Vec<String>,
    depends: Vec<String>,
    make_depends: Vec<String>,
    arch: Vec<String>,
    extra: Vec<String>,
}

impl FakeBase {
    fn render(&self, pkgbase: &str, pkgver: &str) -> String {
        let mut out = format!(
            "pkgbase = {}\n\tpkgver = {}\n\tpkgrel = 1\n",
            pkgbase, pkgver
        );
        let arch: Vec<&str> = if self.arch.is_empty() {
            vec![FAKE_ARCH]
        } else {
            self.arch.iter().map(String::as_str).collect()
        };
        for a in arch {
            out.push_str(&format!("\tarch = {}\n", a));
        }
        for dep in &self.make_depends {
            out.push_str(&format!("\tmakedepends = {}\n", dep));
        }
        for dep in &self.depends {
            out.push_str(&format!("\tdepends = {}\n", dep));
        }
        for line in &self.extra {
            out.push_str(&format!("\t{}\n", line));
        }
        out.push('\n');

        if self.pkgnames.is_empty() {
            out.push_str(&format!("pkgname = {}\n", pkgbase));
        }
        for name in &self.pkgnames {
            out.push_str(&format!("pkgname = {}\n", name));
        }
        out
    }
}

/// Builder for a fake AUR, system and package tree
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    aur: Vec<AurPackageInfo>,
    bases: HashMap<String, FakeBase>,
    sync: Vec<String>,
    installed: HashMap<String, (String, InstallReason)>,
    failures: HashSet<String>,
    bumps: HashMap<String, String>,
    checked_out: Vec<String>,
    force: bool,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    /// An AUR package; its depends also land in the base's rendered `.SRCINFO`
    pub fn aur(mut self, name: &str, base: &str, depends: &[&str], make_depends: &[&str]) -> Self {
        let to_vec = |deps: &[&str]| deps.iter().map(|d| d.to_string()).collect::<Vec<_>>();
        self.aur.push(AurPackageInfo {
            name: name.to_string(),
            package_base: base.to_string(),
            version: FAKE_VERSION.to_string(),
            depends: to_vec(depends),
            make_depends: to_vec(make_depends),
        });

        let entry = self.bases.entry(base.to_string()).or_default();
        entry.pkgnames.push(name.to_string());
        for dep in depends {
            if !entry.depends.iter().any(|d| d == dep) {
                entry.depends.push(dep.to_string());
            }
        }
        for dep in make_depends {
            if !entry.make_depends.iter().any(|d| d == dep) {
                entry.make_depends.push(dep.to_string());
            }
        }
        self
    }

    pub fn source(self, base: &str, entry: &str) -> Self {
        self.srcinfo_line(base, &format!("source = {}", entry))
    }

    pub fn srcinfo_line(mut self, base: &str, line: &str) -> Self {
        self.bases
            .entry(base.to_string())
            .or_default()
            .extra
            .push(line.to_string());
        self
    }

    pub fn arch(mut self, base: &str, arch: &[&str]) -> Self {
        self.bases.entry(base.to_string()).or_default().arch =
            arch.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Names and provides of the sync databases
    pub fn sync(mut self, names: &[&str]) -> Self {
        self.sync.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn installed(mut self, name: &str, version: &str, reason: InstallReason) -> Self {
        self.installed
            .insert(name.to_string(), (version.to_string(), reason));
        self
    }

    /// Make an event fail: `rpc`, `add <base>`, `update <base>`,
    /// `build <base>` or `install <base>`
    pub fn fail(mut self, event: &str) -> Self {
        self.failures.insert(event.to_string());
        self
    }

    /// Building `base` rewrites `pkgver` in the description it is given,
    /// the way a VCS package's `pkgver()` does
    pub fn bump_on_build(mut self, base: &str, pkgver: &str) -> Self {
        self.bumps.insert(base.to_string(), pkgver.to_string());
        self
    }

    /// Start with `<root>/<base>` already present
    pub fn checked_out(mut self, base: &str) -> Self {
        self.checked_out.push(base.to_string());
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn build(self) -> Harness {
        let root = Rc::new(tempfile::tempdir().unwrap());
        for base in &self.checked_out {
            let dir = root.path().join(base);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("PKGBUILD"), format!("pkgbase={}\n", base)).unwrap();
        }
        self.assemble(root)
    }

    fn assemble(self, root: Rc<TempDir>) -> Harness {
        let log = Rc::new(Log::default());
        let options = Options {
            root: root.path().to_path_buf(),
            git_url: "https://aur.example.org".to_string(),
            arch: FAKE_ARCH.to_string(),
            pkgext: FAKE_PKGEXT.to_string(),
            noconfirm: false,
            force: self.force,
        };

        let ctx = Context::new(
            options,
            Box::new(FakeVcs {
                log: Rc::clone(&log),
                failures: self.failures.clone(),
            }),
            Box::new(FakeBuild {
                log: Rc::clone(&log),
                failures: self.failures.clone(),
                bases: self.bases.clone(),
                bumps: self.bumps.clone(),
            }),
            Box::new(FakeSystem {
                log: Rc::clone(&log),
                installed: self.installed.clone(),
                sync: self.sync.iter().cloned().collect(),
            }),
            Box::new(FakeAur {
                log: Rc::clone(&log),
                packages: self.aur.clone(),
                fail: self.failures.contains("rpc"),
            }),
        );

        Harness {
            ctx,
            log,
            root,
            scenario: self,
        }
    }
}

/// A context wired to fakes over a temporary package tree
pub struct Harness {
    pub ctx: Context,
    pub log: Rc<Log>,
    root: Rc<TempDir>,
    scenario: Scenario,
}

impl Harness {
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// A fresh run over the same tree
    pub fn rerun(&self) -> Harness {
        self.rerun_with(|s| s)
    }

    pub fn rerun_forced(&self) -> Harness {
        self.rerun_with(Scenario::force)
    }

    pub fn rerun_with(&self, change: impl FnOnce(Scenario) -> Scenario) -> Harness {
        change(self.scenario.clone()).assemble(Rc::clone(&self.root))
    }
}

struct FakeAur {
    log: Rc<Log>,
    packages: Vec<AurPackageInfo>,
    fail: bool,
}

#[async_trait(?Send)]
impl RemoteMetadata for FakeAur {
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse> {
        self.log.push(format!("rpc {}", names.join(",")));
        if self.fail {
            return Ok(AurRpcResponse {
                version: 5,
                response_type: "error".to_string(),
                resultcount: 0,
                results: Vec::new(),
                error: Some("Too many package results.".to_string()),
            });
        }

        let results = self
            .packages
            .iter()
            .filter(|p| names.contains(&p.name))
            .cloned()
            .collect();
        Ok(AurRpcResponse::multiinfo(results))
    }
}

struct FakeVcs {
    log: Rc<Log>,
    failures: HashSet<String>,
}

impl Vcs for FakeVcs {
    fn add(&self, remote_url: &str, path: &Path) -> Result<()> {
        let base = dir_name(path);
        self.log.push(format!("git add {}", base));

        fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
        if self.failures.contains(&format!("add {}", base)) {
            return Err(command_failed(
                format!("git subtree add --squash --prefix {} {} master", base, remote_url),
                path.parent().unwrap_or(path),
            ));
        }
        fs::write(path.join("PKGBUILD"), format!("pkgbase={}\n", base))
            .map_err(|e| Error::io(path, e))
    }

    fn update(&self, path: &Path) -> Result<()> {
        let base = dir_name(path);
        self.log.push(format!("git update {}", base));
        if self.failures.contains(&format!("update {}", base)) {
            return Err(command_failed(
                format!("git subtree pull --squash --prefix {}", base),
                path.parent().unwrap_or(path),
            ));
        }
        Ok(())
    }

    fn set_exclusions(&self, path: &Path, patterns: &[String]) -> Result<()> {
        self.log.push(format!("exclude {}", dir_name(path)));
        let ignore = path.join(".gitignore");
        fs::write(&ignore, patterns.join("\n") + "\n").map_err(|e| Error::io(&ignore, e))
    }
}

struct FakeBuild {
    log: Rc<Log>,
    failures: HashSet<String>,
    bases: HashMap<String, FakeBase>,
    bumps: HashMap<String, String>,
}

impl BuildTool for FakeBuild {
    fn render_metadata(&self, dir: &Path, description: &Path) -> Result<String> {
        let base = dir_name(dir);
        self.log.push(format!("makepkg render {}", base));
        let pkgver = description_pkgver(description)?;
        Ok(self
            .bases
            .get(&base)
            .cloned()
            .unwrap_or_default()
            .render(&base, &pkgver))
    }

    fn build(&self, dir: &Path, description: &Path) -> Result<()> {
        let base = dir_name(dir);
        self.log.push(format!("makepkg build {}", base));
        if self.failures.contains(&format!("build {}", base)) {
            return Err(command_failed("makepkg --syncdeps --force".to_string(), dir));
        }

        if let Some(pkgver) = self.bumps.get(&base) {
            let mut content =
                fs::read_to_string(description).map_err(|e| Error::io(description, e))?;
            content.push_str(&format!("pkgver={}\n", pkgver));
            fs::write(description, content).map_err(|e| Error::io(description, e))?;
        }
        let version = format!("{}-1", description_pkgver(description)?);

        let fake = self.bases.get(&base).cloned().unwrap_or_default();
        let names = if fake.pkgnames.is_empty() {
            vec![base]
        } else {
            fake.pkgnames
        };
        for name in names {
            let artifact = dir.join(format!("{}-{}-{}.{}", name, version, FAKE_ARCH, FAKE_PKGEXT));
            fs::write(&artifact, b"").map_err(|e| Error::io(&artifact, e))?;
        }
        Ok(())
    }

    fn install_artifacts(
        &self,
        dir: &Path,
        artifacts: &[PathBuf],
        as_dependency: bool,
        _no_confirm: bool,
    ) -> Result<()> {
        let mut names = Vec::new();
        for artifact in artifacts {
            if !artifact.exists() {
                return Err(Error::io(
                    artifact,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "artifact was never built"),
                ));
            }
            let file_name = dir_name(artifact);
            let stem = file_name.trim_end_matches(&format!(".{}", FAKE_PKGEXT));
            names.push(stem.rsplitn(4, '-').last().unwrap_or(stem).to_string());
        }

        let mut event = format!("pacman -U {}", names.join(" "));
        if as_dependency {
            event.push_str(" --asdeps");
        }
        self.log.push(event);

        let base = dir_name(dir);
        if self.failures.contains(&format!("install {}", base)) {
            return Err(command_failed("sudo pacman -U".to_string(), dir));
        }
        Ok(())
    }
}

struct FakeSystem {
    log: Rc<Log>,
    installed: HashMap<String, (String, InstallReason)>,
    sync: HashSet<String>,
}

impl SystemDb for FakeSystem {
    fn installed_version(&self, name: &str) -> Option<String> {
        self.installed.get(name).map(|(version, _)| version.clone())
    }

    fn install_reason(&self, name: &str) -> Option<InstallReason> {
        self.installed.get(name).map(|(_, reason)| *reason)
    }

    fn sync_names_and_provides(&self) -> HashSet<String> {
        self.log.push("sync scan".to_string());
        self.sync.clone()
    }
}
