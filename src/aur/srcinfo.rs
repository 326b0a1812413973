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

//! `.SRCINFO` parsing and source entry classification.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static FIELD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9_]+)\s*=\s?(.*?)\s*$").expect("valid regex"));

const VCS_PREFIXES: &[&str] = &["git+", "git://", "hg+", "svn+", "bzr+", "fossil+"];

/// Parsed `.SRCINFO` metadata.
///
/// Every field maps to its values in declaration order. Keys may repeat
/// (`depends`, `source`) and carry an architecture suffix (`source_x86_64`);
/// suffixed keys are stored as written and merged by [`Srcinfo::get_for_arch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Srcinfo {
    fields: HashMap<String, Vec<String>>,
}

impl Srcinfo {
    /// Parse `.SRCINFO` content
    pub fn parse(content: &str) -> Self {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(cap) = FIELD_LINE.captures(line) {
                let value = cap[2].to_string();
                // `depends =` resets an inherited array in a split package section
                if value.is_empty() {
                    continue;
                }
                fields.entry(cap[1].to_string()).or_default().push(value);
            }
        }

        Self { fields }
    }

    /// All values of a field, empty if undeclared
    pub fn get(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of a field
    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field).first().map(String::as_str)
    }

    /// Values of `field` followed by those of `field_<arch>`
    pub fn get_for_arch(&self, field: &str, arch: &str) -> Vec<&str> {
        self.get(field)
            .iter()
            .chain(self.get(&format!("{}_{}", field, arch)))
            .map(String::as_str)
            .collect()
    }

    /// Names of the packages produced by this base
    pub fn pkgnames(&self) -> &[String] {
        self.get("pkgname")
    }

    /// `[epoch:]pkgver-pkgrel`
    pub fn version(&self, package: &str) -> Result<String> {
        let missing = |field: &str| Error::MalformedMetadata {
            package: package.to_string(),
            reason: format!("missing {}", field),
        };
        let pkgver = self.first("pkgver").ok_or_else(|| missing("pkgver"))?;
        let pkgrel = self.first("pkgrel").ok_or_else(|| missing("pkgrel"))?;

        Ok(match self.first("epoch") {
            Some(epoch) if epoch != "0" => format!("{}:{}-{}", epoch, pkgver, pkgrel),
            _ => format!("{}-{}", pkgver, pkgrel),
        })
    }

    /// Pick the architecture artifacts are built for.
    ///
    /// The first declared value equal to `any` or to `machine` wins.
    pub fn resolve_arch(&self, package: &str, machine: &str) -> Result<String> {
        let declared = self.get("arch");
        declared
            .iter()
            .find(|arch| *arch == "any" || *arch == machine)
            .cloned()
            .ok_or_else(|| Error::UnsupportedArchitecture {
                package: package.to_string(),
                arch: machine.to_string(),
                declared: declared.to_vec(),
            })
    }

    /// Declared sources for the given architecture
    pub fn sources(&self, arch: &str) -> Vec<SourceEntry> {
        self.get_for_arch("source", arch)
            .into_iter()
            .map(SourceEntry::parse)
            .collect()
    }
}

/// One entry of a `source` array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Name of the file inside the package directory
    pub filename: String,
    /// Download location, `None` for files shipped in the repository
    pub location: Option<String>,
}

impl SourceEntry {
    /// Split a raw entry the way makepkg names its download
    pub fn parse(raw: &str) -> Self {
        let (name, location) = match raw.split_once("::") {
            Some((name, location)) => (Some(name), location),
            None => (None, raw),
        };

        if !location.contains("://") {
            return Self {
                filename: name.unwrap_or(location).to_string(),
                location: None,
            };
        }

        let filename = match name {
            Some(name) => name.to_string(),
            None => {
                let stripped = location
                    .split(['#', '?'])
                    .next()
                    .unwrap_or(location)
                    .trim_end_matches('/');
                let base = stripped.rsplit('/').next().unwrap_or(stripped);
                if VCS_PREFIXES.iter().any(|p| location.starts_with(p)) {
                    base.trim_end_matches(".git").to_string()
                } else {
                    base.to_string()
                }
            }
        };

        Self {
            filename,
            location: Some(location.to_string()),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.location.is_some()
    }
}
