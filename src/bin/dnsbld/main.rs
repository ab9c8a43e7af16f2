// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The blocklist DNS daemon.

use std::fmt::Write;
use std::process;

use anyhow::{bail, Context, Result};
use env_logger::Env;
use log::{debug, error, info};

use dnsbl::netlist::Netlist;
use dnsbl::server::{self, QueryLogConfig, RunConfig};
use dnsbl::zone::{load_zones, reload_zones, ReloadOutcome};

mod args;
mod setup;

use args::Args;

fn main() {
    env_logger::init_from_env(Env::new().default_filter_or("info"));

    if let Err(e) = try_running(args::parse()) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
}

fn try_running(args: Args) -> Result<()> {
    let config = build_run_config(&args)?;

    // Bind before loading zones: binding is where a misconfigured
    // server fails fastest, and it must happen while we may still hold
    // the privileges port 53 needs.
    let socket = setup::bind_socket(args.bind.as_deref())?;
    let user = setup::resolve_user(args.user.as_deref())?;
    let pidfile = args
        .pidfile
        .as_deref()
        .map(setup::open_pidfile)
        .transpose()?;
    setup::enter_dirs(args.rootdir.as_deref(), args.workdir.as_deref())?;
    if let Some((uid, gid)) = user {
        setup::drop_privileges(uid, gid)?;
    }

    let mut zones = load_zones(args.zones);
    if !args.quickstart
        && reload_zones(&mut zones, &config.load_options()) == ReloadOutcome::ReloadedWithErrors
    {
        bail!("zone loading errors, aborting");
    }

    if !args.foreground {
        setup::daemonize()?;
    }
    if let Some(pidfile) = pidfile {
        setup::write_pidfile(pidfile)?;
    }
    if args.quickstart {
        // Quickstart defers the initial load until after the fork, and
        // load errors are no longer fatal: broken zones stay empty and
        // are retried on the next check.
        reload_zones(&mut zones, &config.load_options());
    }

    for zone in zones.iter() {
        debug!("serving zone {}", zone.origin());
    }
    info!(
        "version {} started: {} zone(s)",
        env!("CARGO_PKG_VERSION"),
        zones.len(),
    );
    server::run(socket, zones, &config).context("service loop failed")?;
    Ok(())
}

fn build_run_config(args: &Args) -> Result<RunConfig> {
    let query_filter = args
        .answer_filter
        .as_deref()
        .map(Netlist::parse)
        .transpose()
        .context("invalid -a netlist")?;
    let log_filter = args
        .log_filter
        .as_deref()
        .map(Netlist::parse)
        .transpose()
        .context("invalid -L netlist")?;
    let query_log = args.logfile.as_deref().map(|path| match path.strip_prefix('+') {
        Some(path) => QueryLogConfig {
            path: path.into(),
            flush: true,
        },
        None => QueryLogConfig {
            path: path.into(),
            flush: false,
        },
    });
    Ok(RunConfig {
        ttl: args.ttl,
        recheck: args.check,
        accept_in_cidr: args.accept_in_cidr,
        verbose: args.stats,
        query_filter,
        log_filter,
        query_log,
    })
}
