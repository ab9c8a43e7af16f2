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

//! The single-threaded service loop.
//!
//! One execution context owns the socket, the zones, and the
//! statistics; there is nothing to synchronize. Each iteration first
//! drains pending signals (reload, statistics, log reopen, shutdown),
//! then serves at most one packet. Signal handlers themselves only set
//! flags (`signal-hook` keeps them async-signal-safe); all real work
//! happens here, between packets, so a reload's dataset swaps are
//! always complete before the next receive. Packets arriving during a
//! reload wait in the kernel socket buffer, which setup sizes as large
//! as the kernel will allow.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use nix::unistd::alarm;
use signal_hook::consts::signal::{
    SIGALRM, SIGHUP, SIGINT, SIGPIPE, SIGTERM, SIGUSR1, SIGUSR2,
};
use signal_hook::iterator::Signals;

use crate::ip4;
use crate::message::constants::MAX_UDP_SIZE;
use crate::netlist::Netlist;
use crate::zone::{reload_zones, LoadOptions, ZoneSet};

mod query;
mod stats;
pub use query::{answer, Answer, ResponseInfo};
pub use stats::Stats;

/// How long a blocking receive may go without a look at the pending
/// signals.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////
// RUN CONFIGURATION                                                  //
////////////////////////////////////////////////////////////////////////

/// The immutable run context, built once from the command line and
/// passed by reference; nothing here changes while the server runs.
pub struct RunConfig {
    /// TTL for synthesized records when a zone sets none.
    pub ttl: u32,
    /// Seconds between checks for changed zone files.
    pub recheck: u32,
    /// Accept CIDRs whose base has host bits set.
    pub accept_in_cidr: bool,
    /// Log reload timing.
    pub verbose: bool,
    /// Only sources matching this netlist are answered.
    pub query_filter: Option<Netlist>,
    /// Only sources matching this netlist are logged.
    pub log_filter: Option<Netlist>,
    /// The query log, if one was requested.
    pub query_log: Option<QueryLogConfig>,
}

/// Where and how to write the query log.
#[derive(Clone, Debug)]
pub struct QueryLogConfig {
    pub path: PathBuf,
    /// Flush after every line (the `+` path prefix).
    pub flush: bool,
}

impl RunConfig {
    /// Returns the zone-loading options this configuration implies.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            accept_in_cidr: self.accept_in_cidr,
            verbose: self.verbose,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE SERVICE LOOP                                                   //
////////////////////////////////////////////////////////////////////////

/// Serves `zones` on `socket` until SIGTERM or SIGINT.
///
/// The caller is expected to have loaded the zones once already (or to
/// have opted out with quickstart); this loop reloads them whenever
/// SIGHUP or the periodic SIGALRM fires.
pub fn run(socket: UdpSocket, mut zones: ZoneSet, config: &RunConfig) -> io::Result<()> {
    let mut signals = Signals::new([
        SIGHUP, SIGALRM, SIGUSR1, SIGUSR2, SIGTERM, SIGINT, SIGPIPE,
    ])?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    let load_options = config.load_options();
    let mut stats = Stats::new();
    let mut query_log = config.query_log.clone().map(QueryLog::open);
    let mut buf = [0u8; MAX_UDP_SIZE];
    alarm::set(config.recheck);

    loop {
        let mut reload = false;
        let mut terminate = false;
        for signal in signals.pending() {
            match signal {
                SIGTERM | SIGINT => terminate = true,
                SIGUSR1 => stats.log(false),
                SIGUSR2 => stats.log(true),
                SIGHUP => {
                    if let Some(log) = query_log.as_mut() {
                        log.reopen();
                    }
                    reload = true;
                }
                SIGALRM => reload = true,
                // SIGPIPE is caught solely so that a query log on a
                // FIFO cannot kill the process.
                _ => (),
            }
        }
        if terminate {
            info!("terminating");
            stats.log(false);
            return Ok(());
        }
        if reload {
            reload_zones(&mut zones, &load_options);
            alarm::set(config.recheck);
        }

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted,
                ) =>
            {
                continue
            }
            Err(e) => return Err(e),
        };
        let client = match src {
            SocketAddr::V4(v4) => u32::from(*v4.ip()),
            SocketAddr::V6(_) => continue,
        };
        if let Some(filter) = &config.query_filter {
            if !filter.matches(client) {
                continue;
            }
        }

        match query::answer(&zones, config.ttl, &mut buf, len) {
            Answer::Drop => stats.record_bad(len),
            Answer::Respond { len: out_len, info } => {
                if let Some(log) = query_log.as_mut() {
                    if config.log_filter.as_ref().map_or(true, |f| f.matches(client)) {
                        log.write_reply(client, &info, out_len);
                    }
                }
                stats.record(info.rcode, info.ancount, len, out_len);
                send(&socket, &buf[..out_len], src);
            }
        }
    }
}

/// Sends a response, retrying on EINTR. Any other send error is logged
/// and the packet forgotten; the loop must keep serving.
fn send(socket: &UdpSocket, buf: &[u8], dest: SocketAddr) {
    loop {
        match socket.send_to(buf, dest) {
            Ok(_) => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("sendto {}: {}", dest, e);
                return;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE QUERY LOG                                                      //
////////////////////////////////////////////////////////////////////////

/// The query log file. Open failures are logged and disable the log
/// until the next SIGHUP; they never stop the server.
struct QueryLog {
    config: QueryLogConfig,
    writer: Option<BufWriter<File>>,
}

impl QueryLog {
    fn open(config: QueryLogConfig) -> Self {
        let mut log = Self {
            config,
            writer: None,
        };
        log.reopen();
        log
    }

    /// (Re)opens the log file. Non-blocking open, in case the path is
    /// a FIFO with no reader.
    fn reopen(&mut self) {
        self.writer = None;
        match OpenOptions::new()
            .append(true)
            .create(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(&self.config.path)
        {
            Ok(file) => self.writer = Some(BufWriter::new(file)),
            Err(e) => warn!(
                "error (re)opening logfile `{}': {}",
                self.config.path.display(),
                e,
            ),
        }
    }

    /// Writes one reply line: client, question, RCODE, answer count,
    /// and response size.
    fn write_reply(&mut self, client: u32, info: &ResponseInfo, len: usize) {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return,
        };
        let outcome = match info.query.as_ref() {
            Some(query) => writeln!(
                writer,
                "{} {} {} {}: {}/{}/{}",
                ip4::Display(client),
                query.qname,
                query.qtype,
                query.qclass,
                info.rcode,
                info.ancount,
                len,
            ),
            None => writeln!(
                writer,
                "{} -: {}/{}/{}",
                ip4::Display(client),
                info.rcode,
                info.ancount,
                len,
            ),
        };
        if outcome.is_ok() && self.config.flush {
            let _ = writer.flush();
        }
    }
}
