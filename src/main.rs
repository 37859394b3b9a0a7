/*
 * aurlink - Asynchronous AUR client.
 * Copyright (C) 2025  compiledkernel-idk and aurlink contributors
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

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;

mod aur;
mod config;
mod error;
mod logging;

use aur::{
    AurPackageInfo, CloneRequest, CloneResponse, DebugLevel, EngineOptions, RawRequest, RawResponse,
    RequestEngine, Response, RpcRequest, RpcResponse, SearchBy,
};
use error::AurError;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  compiledkernel-idk and aurlink contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "aurlink")]
#[command(version)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Asynchronous AUR client.")]
struct Cli {
    #[arg(long, global = true, value_name = "URL", help = "AUR base URL")]
    baseurl: Option<String>,
    #[arg(short = 'C', long, global = true, value_name = "DIR", help = "Directory to clone and download into")]
    chdir: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    color: ColorMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Subcommand)]
enum Command {
    /// Show detailed information about packages
    Info {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Search for packages; every term must match
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
        #[arg(long, default_value = "name-desc", value_parser = parse_search_by)]
        by: SearchBy,
    },
    /// Clone or update the git repositories of packages
    Clone {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Print a source file of a package
    Show {
        package: String,
        #[arg(long, default_value = "PKGBUILD")]
        file: String,
    },
    /// Download snapshot tarballs of packages
    Download {
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

fn parse_search_by(value: &str) -> std::result::Result<SearchBy, String> {
    SearchBy::parse(value).ok_or_else(|| format!("invalid search field '{}'", value))
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = config::Config::load();
    if let Some(baseurl) = cli.baseurl {
        config.aur.base_url = baseurl;
    }
    config.validate()?;

    logging::init_with_file(&config.logging.level, config.logging.file.as_deref());

    let colors = match cli.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => config.color && console::colors_enabled(),
    };
    console::set_colors_enabled(colors);
    console::set_colors_enabled_stderr(colors);

    let workdir = match cli.chdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let debug_level = DebugLevel::parse(config.aur.debug.as_deref());
    if debug_level.is_enabled() {
        debug!("request tracing: {:?}", debug_level);
    }

    let engine = RequestEngine::with_options(
        config.aur.base_url.as_str(),
        EngineOptions {
            debug: debug_level,
            git_program: config.aur.git_program.clone(),
            workdir: workdir.clone(),
            use_proxy: true,
        },
    )?;
    let mut session = Session::new(engine);

    match cli.command {
        Command::Info { packages } => info(&mut session, &packages),
        Command::Search { terms, by } => search(&mut session, &terms, by),
        Command::Clone { packages } => clone(&mut session, &packages),
        Command::Show { package, file } => show(&mut session, &package, &file),
        Command::Download { packages } => download(&mut session, &packages, &workdir),
    }
}

/// Engine plus the first failure reported by any callback
struct Session {
    engine: RequestEngine,
    failure: Rc<RefCell<Option<String>>>,
}

/// Why a request that is not `is_ok()` failed
fn failure_message<T>(response: &Response<T>) -> String {
    if response.error.is_empty() {
        AurError::UnexpectedStatus {
            status: response.status,
        }
        .to_string()
    } else {
        response.error.clone()
    }
}

/// Remember the first failure and abort the engine.
fn record_failure(failure: &RefCell<Option<String>>, message: String) -> i32 {
    let mut slot = failure.borrow_mut();
    if slot.is_none() {
        *slot = Some(message);
    }
    -libc::EIO
}

impl Session {
    fn new(engine: RequestEngine) -> Self {
        Self {
            engine,
            failure: Rc::new(RefCell::new(None)),
        }
    }

    fn wait(&mut self) -> Result<()> {
        let status = self.engine.wait();
        if let Some(message) = self.failure.take() {
            return Err(anyhow!(message));
        }
        if status < 0 {
            return Err(AurError::Interrupted { status }.into());
        }
        Ok(())
    }

    /// Queue an RPC request whose parsed results land in `sink`
    fn queue_rpc(&mut self, request: &RpcRequest, sink: Rc<RefCell<Vec<AurPackageInfo>>>) {
        let failure = self.failure.clone();
        self.engine
            .queue_rpc_request(request, move |response: Response<RpcResponse>| {
                if !response.is_ok() {
                    return record_failure(&failure, failure_message(&response));
                }
                match response.value.parse() {
                    Ok(mut found) => {
                        sink.borrow_mut().append(&mut found);
                        0
                    }
                    Err(e) => record_failure(&failure, e.to_string()),
                }
            });
    }

    fn info(&mut self, names: &[String]) -> Result<Vec<AurPackageInfo>> {
        let sink = Rc::new(RefCell::new(Vec::new()));
        self.queue_rpc(&RpcRequest::info(names.iter().cloned()), sink.clone());
        self.wait()?;
        Ok(sink.take())
    }
}

fn info(session: &mut Session, packages: &[String]) -> Result<()> {
    let mut found = session.info(packages)?;
    if found.is_empty() {
        bail!(AurError::PackageNotFound {
            package: packages.join(", ")
        });
    }

    // Keep the order the packages were asked for.
    found.sort_by_key(|pkg| packages.iter().position(|p| *p == pkg.name));
    for pkg in &found {
        print_details(pkg);
    }
    Ok(())
}

fn print_details(pkg: &AurPackageInfo) {
    let list = |items: &[String]| {
        if items.is_empty() {
            "None".to_string()
        } else {
            items.join("  ")
        }
    };

    println!("{}", style(format!("Package: {}", pkg.name)).bold().cyan());
    println!("  Version      : {}", pkg.version);
    println!("  Description  : {}", pkg.description.as_deref().unwrap_or("-"));
    println!("  URL          : {}", pkg.url.as_deref().unwrap_or("-"));
    println!("  AUR Page     : https://aur.archlinux.org/packages/{}", pkg.name);
    println!("  Package Base : {}", pkg.package_base);
    println!("  Keywords     : {}", list(&pkg.keywords));
    println!("  Licenses     : {}", list(&pkg.license));
    println!("  Provides     : {}", list(&pkg.provides));
    println!("  Conflicts    : {}", list(&pkg.conflicts));
    println!("  Depends On   : {}", list(&pkg.depends));
    println!("  Make Deps    : {}", list(&pkg.make_depends));
    println!("  Check Deps   : {}", list(&pkg.check_depends));
    println!("  Optional Deps: {}", list(&pkg.opt_depends));
    if pkg.is_orphan() {
        println!("  Maintainer   : {}", style("orphan").red());
    } else {
        println!("  Maintainer   : {}", pkg.maintainer.as_deref().unwrap_or_default());
    }
    println!("  Votes        : {}", pkg.num_votes);
    println!("  Popularity   : {:.2}", pkg.popularity);
    println!("  Submitted    : {}", format_timestamp(pkg.first_submitted));
    println!("  Last Modified: {}", format_timestamp(pkg.last_modified));
    if let Some(since) = pkg.out_of_date {
        println!("  Out Of Date  : {}", style(format_timestamp(since)).red());
    }
    println!();
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%a %d %b %Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn search(session: &mut Session, terms: &[String], by: SearchBy) -> Result<()> {
    let sinks: Vec<_> = terms
        .iter()
        .map(|term| {
            let sink = Rc::new(RefCell::new(Vec::new()));
            session.queue_rpc(&RpcRequest::search(by, term.as_str()), sink.clone());
            sink
        })
        .collect();
    session.wait()?;

    let mut per_term = sinks.into_iter().map(|sink| sink.take());
    let mut matches: BTreeMap<String, AurPackageInfo> = per_term
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|pkg| (pkg.name.clone(), pkg))
        .collect();
    for found in per_term {
        let names: BTreeSet<String> = found.into_iter().map(|pkg| pkg.name).collect();
        matches.retain(|name, _| names.contains(name));
    }

    if matches.is_empty() {
        println!("no matches found.");
        return Ok(());
    }

    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(vec!["package", "version", "votes", "popularity", "description"]);
    for pkg in matches.values() {
        let mut version = pkg.version.clone();
        if pkg.out_of_date.is_some() {
            version.push_str(" (out-of-date)");
        }
        t.add_row(vec![
            format!("aur/{}", pkg.name),
            version,
            pkg.num_votes.to_string(),
            format!("{:.2}", pkg.popularity),
            pkg.description.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", t);
    Ok(())
}

/// Distinct package bases of the found packages
fn package_bases(found: &[AurPackageInfo]) -> BTreeMap<String, &AurPackageInfo> {
    let mut bases = BTreeMap::new();
    for pkg in found {
        bases.entry(pkg.package_base.clone()).or_insert(pkg);
    }
    bases
}

fn lookup(session: &mut Session, packages: &[String]) -> Result<Vec<AurPackageInfo>> {
    let found = session.info(packages)?;
    for name in packages {
        if !found.iter().any(|pkg| pkg.name == *name) {
            eprintln!("{} no such package: {}", style("warning:").yellow().bold(), name);
        }
    }
    if found.is_empty() {
        bail!(AurError::PackageNotFound {
            package: packages.join(", ")
        });
    }
    Ok(found)
}

fn clone(session: &mut Session, packages: &[String]) -> Result<()> {
    let found = lookup(session, packages)?;
    let failures = Rc::new(RefCell::new(Vec::new()));

    for base in package_bases(&found).into_keys() {
        let failures = failures.clone();
        let package = base.clone();
        session
            .engine
            .queue_clone_request(&CloneRequest::new(base), move |response: Response<CloneResponse>| {
                let operation = response.value.operation;
                if response.is_ok() {
                    println!(
                        "{} {} complete: {}",
                        style("::").cyan().bold(),
                        operation,
                        style(&package).white().bold()
                    );
                } else {
                    let err = AurError::VcsExit {
                        package: package.clone(),
                        operation: operation.to_string(),
                        message: response.error.clone(),
                        status: response.status,
                    };
                    eprintln!("{} {}", style("error:").red().bold(), err);
                    failures.borrow_mut().push(package.clone());
                }
                0
            });
    }

    session.wait()?;
    let failures = failures.borrow();
    if !failures.is_empty() {
        bail!("failed to clone or update: {}", failures.join(", "));
    }
    Ok(())
}

fn show(session: &mut Session, package: &str, file: &str) -> Result<()> {
    let found = lookup(session, &[package.to_string()])?;
    let pkg = found
        .iter()
        .find(|pkg| pkg.name == package)
        .ok_or_else(|| AurError::PackageNotFound {
            package: package.to_string(),
        })?;

    let failure = session.failure.clone();
    session.engine.queue_raw_request(
        &RawRequest::for_source_file(&pkg.package_base, file),
        move |response: Response<RawResponse>| {
            if !response.is_ok() {
                return record_failure(&failure, failure_message(&response));
            }
            let mut stdout = std::io::stdout().lock();
            match stdout.write_all(&response.value.bytes).and_then(|_| stdout.flush()) {
                Ok(()) => 0,
                Err(e) => record_failure(&failure, e.to_string()),
            }
        },
    );
    session.wait()
}

fn download(session: &mut Session, packages: &[String], workdir: &std::path::Path) -> Result<()> {
    let found = lookup(session, packages)?;

    for (base, pkg) in package_bases(&found) {
        let failure = session.failure.clone();
        let target = workdir.join(format!("{}.tar.gz", base));
        session.engine.queue_tarball_request(
            &RawRequest::for_tarball(&pkg.snapshot_path()),
            move |response: Response<RawResponse>| {
                if !response.is_ok() {
                    return record_failure(&failure, failure_message(&response));
                }
                match fs::write(&target, &response.value.bytes) {
                    Ok(()) => {
                        println!(
                            "{} downloaded {}",
                            style("::").cyan().bold(),
                            style(target.display()).white().bold()
                        );
                        0
                    }
                    Err(e) => record_failure(
                        &failure,
                        AurError::filesystem(target.display().to_string(), "cannot write tarball", e)
                            .to_string(),
                    ),
                }
            },
        );
    }

    session.wait()
}
