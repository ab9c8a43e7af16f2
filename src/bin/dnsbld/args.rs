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

//! Implements command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use dnsbl::zone::ZoneSpec;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The blocklist DNS daemon
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Run as this user:group
    #[clap(short = 'u', value_name = "USER[:GROUP]")]
    pub user: Option<String>,

    /// Chroot to this directory
    #[clap(short = 'r', value_name = "ROOTDIR")]
    pub rootdir: Option<PathBuf>,

    /// Working directory with zone files (entered after the chroot)
    #[clap(short = 'w', value_name = "WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Bind to (listen on) this address (*:53)
    #[clap(short = 'b', value_name = "[ADDR][:PORT]")]
    pub bind: Option<String>,

    /// TTL value set in answers
    #[clap(short = 't', default_value_t = 2048, value_name = "TTL")]
    pub ttl: u32,

    /// Check for zone file updates every CHECK seconds
    #[clap(short = 'c', default_value_t = 60, value_name = "CHECK")]
    pub check: u32,

    /// Enable CIDR ranges where the prefix is not on the range
    /// boundary (by default ranges such as 127.0.0.1/8 are rejected)
    #[clap(short = 'e')]
    pub accept_in_cidr: bool,

    /// Write the backgrounded pid to this file
    #[clap(short = 'p', value_name = "PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Do not become a daemon
    #[clap(short = 'n')]
    pub foreground: bool,

    /// Quickstart: load zones after backgrounding
    #[clap(short = 'q')]
    pub quickstart: bool,

    /// Log queries and answers to this file, relative to the chroot
    /// (prefix the path with `+' to flush after every line)
    #[clap(short = 'l', value_name = "LOGFILE")]
    pub logfile: Option<String>,

    /// Only log queries from IPs matching this netlist
    #[clap(short = 'L', value_name = "NETLIST")]
    pub log_filter: Option<String>,

    /// Only answer queries from IPs matching this netlist
    #[clap(short = 'a', value_name = "NETLIST")]
    pub answer_filter: Option<String>,

    /// Log zone reload statistics
    #[clap(short = 's')]
    pub stats: bool,

    /// Zones to serve, each `origin:type:file[,file...]'; repeated
    /// origins constitute the same zone
    #[clap(required = true, value_parser, value_name = "ZONESPEC")]
    pub zones: Vec<ZoneSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_the_usual_invocation() {
        let args = Args::try_parse_from([
            "dnsbld",
            "-n",
            "-b",
            "127.0.0.1:5353",
            "-t",
            "300",
            "-a",
            "127/8",
            "sbl.example:ip4set:sbl.zone",
            "dbl.example:dnset:dbl.zone",
        ])
        .unwrap();
        assert!(args.foreground);
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:5353"));
        assert_eq!(args.ttl, 300);
        assert_eq!(args.check, 60);
        assert_eq!(args.zones.len(), 2);
    }

    #[test]
    fn args_require_a_zone_spec() {
        assert!(Args::try_parse_from(["dnsbld", "-n"]).is_err());
        assert!(Args::try_parse_from(["dnsbld", "bad-spec"]).is_err());
    }
}
