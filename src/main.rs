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

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

mod alpm_manager;
mod aur;
mod config;
mod context;
mod driver;
mod error;
mod logging;
mod package;
#[cfg(test)]
mod testing;

use alpm_manager::AlpmManager;
use aur::{AurClient, GitSubtree, Makepkg};
use context::{Context, Options};
use driver::{Phases, Report};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  compiledkernel-idk and pacboost contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "aurtree")]
#[command(version = VERSION)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Keep AUR packages as git subtrees and rebuild them only when needed.")]
struct Cli {
    #[arg(short = 'd', long, help = "Check out or update package sources")]
    download: bool,
    #[arg(short = 'b', long, help = "Build packages whose artifacts are stale")]
    build: bool,
    #[arg(short = 'i', long, help = "Install built packages")]
    install: bool,
    #[arg(short = 'f', long, help = "Rebuild the named packages even if up to date")]
    force: bool,
    #[arg(long, help = "Bypass pacman confirmation prompts")]
    noconfirm: bool,
    #[arg(long, value_name = "DIR", help = "Package tree root")]
    root: Option<PathBuf>,
    #[arg(short = 'v', long, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, help = "List packages managed in the tree")]
    list: bool,
    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::Config::load()?;
    if let Some(root) = cli.root {
        cfg.root = root;
    }
    if cli.noconfirm {
        cfg.build.noconfirm = true;
    }
    cfg.validate()?;

    logging::init(
        logging::level_for_verbosity(&cfg.logging.level, cli.verbose),
        cfg.logging.file.as_deref(),
    );

    // makepkg refuses to build as root
    if unsafe { libc::geteuid() } == 0 {
        return Err(anyhow!("aurtree must not be run as root"));
    }
    for tool in ["git", "makepkg"] {
        which::which(tool).map_err(|_| anyhow!("required tool '{}' not found in PATH", tool))?;
    }

    let git = GitSubtree::new(&cfg.root, cfg.aur.git_url.as_str());
    git.ensure_repository()?;

    let ctx = Context::new(
        Options::from_config(&cfg, cli.force),
        Box::new(git),
        Box::new(Makepkg::from_config(&cfg.build)),
        Box::new(AlpmManager::new(&cfg.repos)?),
        Box::new(AurClient::new(cfg.aur.rpc_url.as_str())?),
    );

    if cli.list {
        return list_packages(&ctx);
    }

    let targets = if cli.packages.is_empty() {
        driver::default_targets(&ctx)?
    } else {
        cli.packages
    };
    if targets.is_empty() {
        println!("{}", style(":: nothing to do.").green());
        return Ok(());
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(format!("resolving {} package(s)...", targets.len()));
    pb.enable_steady_tick(Duration::from_millis(80));
    let resolved = driver::resolve(&ctx, &targets).await;
    pb.finish_and_clear();
    let ids = resolved?;

    let phases = Phases::from_flags(cli.download, cli.build, cli.install);
    let report = driver::execute(&ctx, &ids, phases).await?;
    print_summary(&report);

    if !report.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn list_packages(ctx: &Context) -> Result<()> {
    let managed = ctx.managed_packages()?;
    if managed.is_empty() {
        println!("{}", style(":: no packages in the tree.").yellow());
        return Ok(());
    }

    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(vec!["package", "base", "tree version", "installed", "reason"]);
    for base in &managed {
        for name in &base.pkgnames {
            let reason = match ctx.install_reason(name) {
                Some(alpm_manager::InstallReason::Explicit) => "explicit",
                Some(alpm_manager::InstallReason::Dependency) => "dependency",
                None => "-",
            };
            t.add_row(vec![
                name.clone(),
                base.base.clone(),
                base.version.clone().unwrap_or_else(|| "-".to_string()),
                ctx.local_installed_version(name)
                    .unwrap_or_else(|| "-".to_string()),
                reason.to_string(),
            ]);
        }
    }
    println!("{}", t);
    Ok(())
}

fn print_summary(report: &Report) {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(vec!["package", "completed", "result"]);
    for outcome in &report.outcomes {
        let completed: Vec<String> = outcome.completed.iter().map(|op| op.to_string()).collect();
        t.add_row(vec![
            outcome.name.clone(),
            completed.join(", "),
            outcome.error.clone().unwrap_or_else(|| "ok".to_string()),
        ]);
    }
    println!("{}", t);

    if report.success() {
        println!("{}", style(":: all packages processed.").green().bold());
    } else {
        println!(
            "{}",
            style(format!(":: {} package(s) failed.", report.failures()))
                .red()
                .bold()
        );
    }
}
