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

//! Process setup: socket, privileges, daemonization.
//!
//! Everything here happens once, before the service loop starts, in
//! the classic daemon order: bind while still privileged, resolve the
//! target user while the password database is still reachable, then
//! chroot, drop privileges, and (unless running in the foreground)
//! fork into the background.

use std::fs::File;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use nix::sys::socket::{setsockopt, sockopt};
use nix::unistd::{chdir, chroot, fork, setgid, setgroups, setsid, setuid, ForkResult, Gid, Uid};

/// The default port to listen on.
const DNS_PORT: u16 = 53;

/// The user to run as when started as root without `-u`.
const DEFAULT_USER: &str = "rbldns";

////////////////////////////////////////////////////////////////////////
// SOCKET SETUP                                                       //
////////////////////////////////////////////////////////////////////////

/// Binds the UDP listening socket per the `-b` option, `[addr][:port]`
/// with hostname and empty-field support.
pub fn bind_socket(bind: Option<&str>) -> Result<UdpSocket> {
    let addr = parse_bind_addr(bind.unwrap_or(""))?;
    let socket =
        UdpSocket::bind(addr).with_context(|| format!("unable to bind to {}", addr))?;

    // Ask for the biggest receive buffer the kernel will give us, so
    // that packets arriving during a zone reload keep. Walk downward
    // by ~3% per try.
    let mut size: usize = 64 * 1024;
    while size >= 1024 {
        if setsockopt(socket.as_raw_fd(), sockopt::RcvBuf, &size).is_ok() {
            break;
        }
        size -= size >> 5;
    }

    Ok(socket)
}

/// Parses the `-b` argument. An empty address (or `*`) means any; an
/// empty port means 53; a non-numeric address goes through the
/// resolver.
fn parse_bind_addr(bind: &str) -> Result<SocketAddr> {
    let (host, port) = match bind.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (bind, ""),
    };
    let port: u16 = if port.is_empty() {
        DNS_PORT
    } else {
        port.parse()
            .map_err(|_| anyhow!("invalid port `{}'", port))?
    };
    if host.is_empty() || host == "*" {
        return Ok(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into());
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port).into());
    }
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.find(|a| a.is_ipv4()))
        .ok_or_else(|| anyhow!("invalid bind address `{}'", host))
}

////////////////////////////////////////////////////////////////////////
// PRIVILEGES                                                         //
////////////////////////////////////////////////////////////////////////

/// Resolves the `-u user[:group]` option into ids. Called before any
/// chroot, while the passwd/group databases are still reachable. With
/// no `-u`, a process started as root falls back to the default
/// service user; a non-root process keeps its ids.
pub fn resolve_user(user: Option<&str>) -> Result<Option<(Uid, Gid)>> {
    let user = match user {
        Some(user) => user,
        None if Uid::current().is_root() => DEFAULT_USER,
        None => return Ok(None),
    };
    let (user_part, group_part) = match user.split_once(':') {
        Some((user_part, group_part)) => (user_part, Some(group_part)),
        None => (user, None),
    };

    let (uid, mut gid) = if let Ok(id) = user_part.parse::<u32>() {
        (Uid::from_raw(id), Gid::from_raw(id))
    } else {
        let entry = nix::unistd::User::from_name(user_part)
            .with_context(|| format!("cannot look up user `{}'", user_part))?
            .ok_or_else(|| anyhow!("unknown user `{}'", user_part))?;
        (entry.uid, entry.gid)
    };
    if let Some(group_part) = group_part {
        gid = if let Ok(id) = group_part.parse::<u32>() {
            Gid::from_raw(id)
        } else {
            nix::unistd::Group::from_name(group_part)
                .with_context(|| format!("cannot look up group `{}'", group_part))?
                .ok_or_else(|| anyhow!("unknown group `{}'", group_part))?
                .gid
        };
    }
    if uid.is_root() {
        bail!("daemon should not run as root, specify the -u option");
    }
    Ok(Some((uid, gid)))
}

/// Drops to the resolved user and group.
pub fn drop_privileges(uid: Uid, gid: Gid) -> Result<()> {
    setgroups(&[gid])
        .and_then(|_| setgid(gid))
        .and_then(|_| setuid(uid))
        .with_context(|| format!("unable to setuid({}:{})", uid, gid))
}

/// Enters the chroot jail (`-r`) and the working directory (`-w`,
/// relative to the chroot).
pub fn enter_dirs(rootdir: Option<&Path>, workdir: Option<&Path>) -> Result<()> {
    if let Some(rootdir) = rootdir {
        chdir(rootdir)
            .and_then(|_| chroot("."))
            .with_context(|| format!("unable to chroot to {}", rootdir.display()))?;
    }
    if let Some(workdir) = workdir {
        chdir(workdir).with_context(|| format!("unable to chdir to {}", workdir.display()))?;
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// DAEMONIZATION                                                      //
////////////////////////////////////////////////////////////////////////

/// Forks into the background: the parent exits, the child starts a new
/// session and detaches its standard streams.
pub fn daemonize() -> Result<()> {
    // SAFETY: this process is single-threaded at this point (the
    // service loop has not started), so fork is safe to call.
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { .. } => process::exit(0),
        ForkResult::Child => (),
    }
    setsid().context("setsid failed")?;
    let null = File::options()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("cannot open /dev/null")?;
    for fd in 0..=2 {
        nix::unistd::dup2(null.as_raw_fd(), fd).context("cannot detach standard streams")?;
    }
    Ok(())
}

/// Opens the pidfile early (while still privileged and outside any
/// chroot); the pid is written after the fork.
pub fn open_pidfile(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("unable to write pidfile {}", path.display()))
}

/// Records this process's pid in the (already opened) pidfile.
pub fn write_pidfile(mut file: File) -> Result<()> {
    writeln!(file, "{}", process::id()).context("unable to write pidfile")
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
