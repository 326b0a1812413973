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

//! AUR (Arch User Repository) support module.
//!
//! This module provides:
//! - RPC client for batched metadata lookups
//! - `.SRCINFO` parsing
//! - Transitive AUR dependency resolution
//! - makepkg and git subtree drivers

pub mod builder;
pub mod client;
pub mod git;
pub mod resolver;
pub mod srcinfo;

pub use builder::{BuildTool, Makepkg};
pub use client::{AurClient, AurPackageInfo, RemoteMetadata};
pub use git::{GitSubtree, Vcs};
pub use srcinfo::{SourceEntry, Srcinfo};

use serde::Deserialize;

/// AUR RPC API response wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct AurRpcResponse {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "type")]
    pub response_type: String,
    #[serde(default)]
    pub resultcount: usize,
    #[serde(default)]
    pub results: Vec<AurPackageInfo>,
    pub error: Option<String>,
}

impl AurRpcResponse {
    /// Successful response carrying `results`
    pub fn multiinfo(results: Vec<AurPackageInfo>) -> Self {
        Self {
            version: 5,
            response_type: "multiinfo".to_string(),
            resultcount: results.len(),
            results,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.response_type == "error" || self.error.is_some()
    }
}
