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

//! Transitive AUR dependency discovery.

use std::collections::BTreeSet;
use tracing::debug;

use super::client::parse_dependency;
use crate::context::Context;
use crate::error::Result;
use crate::package::{PackageId, RemoteState};

/// Fetch remote metadata for `initial` and every AUR package they need.
///
/// Works layer by layer: each round adds the remote make and runtime AUR
/// dependencies of the pending records that have metadata, keeps only the
/// records never looked up, and fetches those in one batch. Every record is
/// fetched at most once, so dependency cycles converge.
pub async fn fill_remote_metadata(ctx: &Context, initial: &[PackageId]) -> Result<()> {
    let mut pending: BTreeSet<PackageId> = initial.iter().copied().collect();
    let mut round = 0;

    loop {
        let mut discovered = BTreeSet::new();
        for &id in &pending {
            discovered.extend(aur_depends(ctx, id, true, true)?);
            discovered.extend(aur_depends(ctx, id, true, false)?);
        }
        pending.extend(discovered);
        pending.retain(|&id| !ctx.with(id, |p| p.remote.is_known()));

        if pending.is_empty() {
            return Ok(());
        }

        round += 1;
        let batch: Vec<PackageId> = pending.iter().copied().collect();
        debug!(round, count = batch.len(), "resolving AUR dependencies");
        ctx.fetch(&batch).await?;
    }
}

/// AUR dependencies of `id`, registered as records.
///
/// `use_remote` reads the RPC metadata, otherwise the local `.SRCINFO`
/// (including the machine architecture's `_<arch>` entries). `want_make`
/// selects make dependencies instead of runtime ones. Anything the sync
/// databases provide is left to pacman; version clauses are ignored.
pub fn aur_depends(
    ctx: &Context,
    id: PackageId,
    use_remote: bool,
    want_make: bool,
) -> Result<Vec<PackageId>> {
    let raw: Vec<String> = if use_remote {
        ctx.with(id, |p| match &p.remote {
            RemoteState::Present(info) if want_make => info.make_depends.clone(),
            RemoteState::Present(info) => info.depends.clone(),
            _ => Vec::new(),
        })
    } else {
        let field = if want_make { "makedepends" } else { "depends" };
        ctx.local(id)?
            .get_for_arch(field, &ctx.options.arch)
            .into_iter()
            .map(str::to_string)
            .collect()
    };

    let foreign = ctx.foreign_capabilities();
    let mut deps = Vec::new();
    for dep in &raw {
        let (name, _) = parse_dependency(dep);
        if name.is_empty() || foreign.contains(name) {
            continue;
        }
        let dep = ctx.package(name);
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    Ok(deps)
}
