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

//! AUR RPC API client.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::AurRpcResponse;
use crate::error::{Error, Result};

/// AUR package information from RPC API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AurPackageInfo {
    pub name: String,
    pub package_base: String,
    #[serde(default)]
    pub version: String,

    // Dependencies
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub make_depends: Vec<String>,
}

/// Batched metadata lookup, the seam between the resolver and the AUR
#[async_trait(?Send)]
pub trait RemoteMetadata {
    /// Look up every name in one logical request
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse>;
}

/// AUR RPC client
pub struct AurClient {
    client: reqwest::Client,
    base_url: String,
}

/// AUR RPC accepts up to 250 packages per request
const BATCH_SIZE: usize = 250;

impl AurClient {
    /// Create a new AUR client against the given RPC endpoint
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("aurtree/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::remote)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn info_url(&self, names: &[String]) -> String {
        let args: Vec<String> = names
            .iter()
            .map(|n| format!("arg[]={}", urlencoding::encode(n)))
            .collect();
        format!("{}?v=5&type=info&{}", self.base_url, args.join("&"))
    }
}

#[async_trait(?Send)]
impl RemoteMetadata for AurClient {
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse> {
        let mut merged = AurRpcResponse::multiinfo(Vec::new());

        for chunk in names.chunks(BATCH_SIZE) {
            let url = self.info_url(chunk);
            debug!(count = chunk.len(), "querying AUR RPC");

            let response: AurRpcResponse = self
                .client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(Error::remote)?
                .json()
                .await
                .map_err(Error::remote)?;

            if response.is_error() {
                return Ok(response);
            }
            merged.results.extend(response.results);
        }

        merged.resultcount = merged.results.len();
        Ok(merged)
    }
}

/// Parse dependency string into name and optional version constraint
pub fn parse_dependency(dep: &str) -> (&str, Option<&str>) {
    let dep = dep.trim();

    match dep.find(['<', '>', '=']) {
        Some(pos) => (&dep[..pos], Some(&dep[pos..])),
        None => (dep, None),
    }
}
