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

//! Zone loading and reloading.
//!
//! Zones are configured through command-line *zone specs* of the form
//! `origin:type:file[,file...]`. Repeated origins append further
//! datasets to the same zone; an identical `(origin, type)` pair
//! appends files to the existing dataset.
//!
//! Backing files are flat text: one entry per line, `#` to end of
//! line is a comment, `$`-lines are directives (`$TTL`, `$SOA`, `$NS`,
//! `$DATASET`, `$A`, `$TXT`), and everything else is a
//! `subject [:value]` entry.
//! The reloader stats every backing file and rebuilds a zone from
//! scratch whenever the composite modification time moves; on any
//! error the zone keeps its previous contents, so service continues
//! from the last good data.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Instant, SystemTime};

use log::{error, info};

use super::{BoundDataset, Contents, Soa, Source, Zone, ZoneSet};
use crate::dataset::{DatasetBuilder, DatasetKind};
use crate::ip4;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// ZONE SPECS                                                         //
////////////////////////////////////////////////////////////////////////

/// One `origin:type:file[,file...]` zone spec from the command line.
#[derive(Clone, Debug)]
pub struct ZoneSpec {
    pub origin: Name,
    pub kind: DatasetKind,
    pub files: Vec<PathBuf>,
}

impl FromStr for ZoneSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, SpecError> {
        let (origin, rest) = s.split_once(':').ok_or(SpecError::MissingField)?;
        let (kind, files) = rest.split_once(':').ok_or(SpecError::MissingField)?;
        let origin = origin.parse().map_err(|_| SpecError::BadOrigin)?;
        let kind = kind.parse().map_err(|_| SpecError::BadKind)?;
        let files: Vec<PathBuf> = files
            .split(',')
            .filter(|f| !f.is_empty())
            .map(PathBuf::from)
            .collect();
        if files.is_empty() {
            return Err(SpecError::NoFiles);
        }
        Ok(Self {
            origin,
            kind,
            files,
        })
    }
}

/// An error signaling that a zone spec is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpecError {
    MissingField,
    BadOrigin,
    BadKind,
    NoFiles,
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::MissingField => f.write_str("expected `origin:type:file[,file...]'"),
            Self::BadOrigin => f.write_str("invalid zone origin"),
            Self::BadKind => f.write_str("unknown dataset type"),
            Self::NoFiles => f.write_str("no files given"),
        }
    }
}

impl std::error::Error for SpecError {}

/// Registers `specs` into a fresh [`ZoneSet`]. No files are read yet;
/// run [`reload_zones`] to load them.
pub fn load_zones(specs: Vec<ZoneSpec>) -> ZoneSet {
    let mut zones = ZoneSet::new();
    for spec in specs {
        let zone = zones.get_or_create(&spec.origin);
        let sources = zone.sources_mut();
        if let Some(source) = sources.iter_mut().find(|s| s.kind == spec.kind) {
            source.files.extend(spec.files);
        } else {
            sources.push(Source {
                kind: spec.kind,
                files: spec.files,
            });
        }
    }
    zones
}

////////////////////////////////////////////////////////////////////////
// RELOADING                                                          //
////////////////////////////////////////////////////////////////////////

/// Options that shape zone loading.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadOptions {
    /// Accept CIDRs whose base has host bits set, clearing the bits.
    pub accept_in_cidr: bool,
    /// Log reload timing.
    pub verbose: bool,
}

/// The overall result of a reload pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReloadOutcome {
    /// No zone's files had changed.
    Unchanged,
    /// At least one zone was rebuilt; all rebuilds succeeded.
    Reloaded,
    /// At least one zone's rebuild failed and kept its previous data.
    ReloadedWithErrors,
}

/// Checks every zone's backing files and rebuilds the changed zones.
/// A zone whose rebuild fails logs the cause and keeps serving its
/// previous contents.
pub fn reload_zones(zones: &mut ZoneSet, options: &LoadOptions) -> ReloadOutcome {
    let started = Instant::now();
    let mut reloaded = 0usize;
    let mut failed = 0usize;
    for zone in zones.iter_mut() {
        match rebuild_zone(zone, options) {
            Ok(true) => reloaded += 1,
            Ok(false) => (),
            Err(()) => failed += 1,
        }
    }
    if options.verbose && (reloaded > 0 || failed > 0) {
        info!(
            "{} zone(s) reloaded, {} failed, in {:?}",
            reloaded,
            failed,
            started.elapsed(),
        );
    }
    if failed > 0 {
        ReloadOutcome::ReloadedWithErrors
    } else if reloaded > 0 {
        ReloadOutcome::Reloaded
    } else {
        ReloadOutcome::Unchanged
    }
}

/// Rebuilds one zone if its files changed. Returns whether a rebuild
/// happened; `Err` means the rebuild failed and the previous contents
/// remain in place (the mtime is left alone too, so the next pass
/// retries).
fn rebuild_zone(zone: &mut Zone, options: &LoadOptions) -> Result<bool, ()> {
    // Composite mtime over all backing files.
    let mut mtime: Option<SystemTime> = None;
    for source in zone.sources() {
        for file in &source.files {
            match std::fs::metadata(file).and_then(|m| m.modified()) {
                Ok(t) => mtime = Some(mtime.map_or(t, |m| m.max(t))),
                Err(e) => {
                    error!(
                        "zone {}: cannot stat {}: {}",
                        zone.origin(),
                        file.display(),
                        e,
                    );
                    return Err(());
                }
            }
        }
    }
    if mtime.is_some() && mtime == zone.mtime() {
        return Ok(false);
    }

    let mut builder = ZoneBuilder::new(zone.origin().clone(), options.accept_in_cidr);
    for source in zone.sources() {
        for file in &source.files {
            if let Err(e) = builder.read_file(source.kind, file) {
                error!("zone {}: {} (zone keeps previous data)", zone.origin(), e);
                return Err(());
            }
        }
    }
    let contents = builder.finish();
    let n_entries: usize = contents.datasets.iter().map(|b| b.dataset.len()).sum();
    zone.install(contents, mtime);
    info!("zone {} (re)loaded: {} entries", zone.origin(), n_entries);
    Ok(true)
}

////////////////////////////////////////////////////////////////////////
// THE ZONE BUILDER                                                   //
////////////////////////////////////////////////////////////////////////

/// Accumulates one zone's contents across its files.
struct ZoneBuilder {
    origin: Name,
    accept_in_cidr: bool,
    builders: Vec<(Name, DatasetBuilder)>,
    soa: Option<Soa>,
    ns: Vec<Name>,
    ttl: Option<u32>,
}

impl ZoneBuilder {
    fn new(origin: Name, accept_in_cidr: bool) -> Self {
        Self {
            origin,
            accept_in_cidr,
            builders: Vec::new(),
            soa: None,
            ns: Vec::new(),
            ttl: None,
        }
    }

    /// Reads one backing file into the zone. Entries go to the dataset
    /// of `kind` bound at the origin until a `$DATASET` directive
    /// redirects them.
    fn read_file(&mut self, kind: DatasetKind, path: &Path) -> Result<(), LoadError> {
        let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
        let reader = BufReader::new(file);
        let mut current = self.builder_index(kind, self.origin.clone());
        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| LoadError::io(path, e))?;
            self.parse_line(&line, &mut current)
                .map_err(|e| LoadError::parse(path, number + 1, e))?;
        }
        Ok(())
    }

    /// Returns the index of the builder for (`kind`, `name`), creating
    /// it if needed. Sharing the builder across files is what makes
    /// repeated `(origin, type)` specs one dataset.
    fn builder_index(&mut self, kind: DatasetKind, name: Name) -> usize {
        if let Some(i) = self
            .builders
            .iter()
            .position(|(n, b)| *n == name && b.kind() == kind)
        {
            return i;
        }
        self.builders.push((name, DatasetBuilder::new(kind)));
        self.builders.len() - 1
    }

    /// Parses one line. `current` indexes the dataset builder entries
    /// are currently directed to.
    fn parse_line(&mut self, line: &str, current: &mut usize) -> Result<(), LineError> {
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            return Ok(());
        }
        if let Some(directive) = content.strip_prefix('$') {
            return self.parse_directive(directive, current);
        }

        let (subject, value) = match content.split_once(char::is_whitespace) {
            Some((subject, rest)) => (subject, Some(parse_value(rest.trim())?)),
            None => (content, None),
        };
        let builder = &mut self.builders[*current].1;
        let value = value.unwrap_or_else(|| builder.default_value());
        match builder.kind() {
            DatasetKind::Ip4Set => {
                let (lo, hi) = ip4::parse_range(subject, self.accept_in_cidr)
                    .map_err(LineError::BadRange)?;
                builder.add_range(lo, hi, value).unwrap();
            }
            DatasetKind::DnSet => {
                let (text, wildcard) = match subject.strip_prefix('.') {
                    Some(rest) => (rest, true),
                    None => (subject, false),
                };
                let name: Name = text.parse().map_err(LineError::BadDomain)?;
                builder.add_domain(&name, wildcard, value).unwrap();
            }
        }
        Ok(())
    }

    fn parse_directive(&mut self, directive: &str, current: &mut usize) -> Result<(), LineError> {
        let mut fields = directive.split_whitespace();
        let keyword = fields.next().unwrap_or("");
        match keyword.to_ascii_uppercase().as_str() {
            "TTL" => {
                let ttl = fields
                    .next()
                    .and_then(|f| f.parse().ok())
                    .ok_or(LineError::BadDirective("$TTL expects a number"))?;
                self.ttl = Some(ttl);
            }
            "SOA" => {
                let mut name_field = || -> Result<Name, LineError> {
                    fields
                        .next()
                        .ok_or(LineError::BadDirective("$SOA expects 7 fields"))?
                        .parse()
                        .map_err(LineError::BadDomain)
                };
                let mname = name_field()?;
                let rname = name_field()?;
                let mut num_field = || -> Result<u32, LineError> {
                    fields
                        .next()
                        .and_then(|f| f.parse().ok())
                        .ok_or(LineError::BadDirective("$SOA expects 7 fields"))
                };
                self.soa = Some(Soa {
                    mname,
                    rname,
                    serial: num_field()?,
                    refresh: num_field()?,
                    retry: num_field()?,
                    expire: num_field()?,
                    minimum: num_field()?,
                });
            }
            "NS" => {
                for field in fields {
                    self.ns.push(field.parse().map_err(LineError::BadDomain)?);
                }
            }
            "DATASET" => {
                let kind: DatasetKind = fields
                    .next()
                    .and_then(|f| f.parse().ok())
                    .ok_or(LineError::BadDirective("$DATASET expects a type"))?;
                let name = fields
                    .next()
                    .ok_or(LineError::BadDirective("$DATASET expects a name"))?;
                let bound = if name == "@" {
                    self.origin.clone()
                } else {
                    let subzone: Name = name.parse().map_err(LineError::BadDomain)?;
                    subzone
                        .joined(&self.origin)
                        .map_err(LineError::BadDomain)?
                };
                *current = self.builder_index(kind, bound);
            }
            "A" => {
                let addr = fields
                    .next()
                    .and_then(|f| ip4::parse_full_addr(f).ok())
                    .ok_or(LineError::BadDirective("$A expects an address"))?;
                let value = (addr & 0xff) as u8;
                if value == 0 {
                    return Err(LineError::ReservedValue);
                }
                self.builders[*current].1.set_default_value(value);
            }
            "TXT" => {
                let rest = directive[keyword.len()..].trim();
                let text = rest
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                    .unwrap_or(rest);
                self.builders[*current].1.set_txt_template(text.to_owned());
            }
            _ => return Err(LineError::BadDirective("unknown directive")),
        }
        Ok(())
    }

    fn finish(self) -> Contents {
        Contents {
            datasets: self
                .builders
                .into_iter()
                .map(|(name, builder)| BoundDataset {
                    name,
                    dataset: builder.finalize(),
                })
                .collect(),
            soa: self.soa,
            ns: self.ns,
            ttl: self.ttl,
        }
    }
}

/// Parses an entry's classification value: digits with an optional
/// leading `:`. Value 0 is reserved for "not listed".
fn parse_value(field: &str) -> Result<u8, LineError> {
    let digits = field.strip_prefix(':').unwrap_or(field);
    let value: u8 = digits.parse().map_err(|_| LineError::BadValue)?;
    if value == 0 {
        return Err(LineError::ReservedValue);
    }
    Ok(value)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a zone file could not be read or parsed.
#[derive(Debug)]
struct LoadError {
    file: PathBuf,
    line: Option<usize>,
    kind: LoadErrorKind,
}

#[derive(Debug)]
enum LoadErrorKind {
    Io(io::Error),
    Line(LineError),
}

/// What went wrong on one line of a zone file.
#[derive(Debug)]
enum LineError {
    BadDirective(&'static str),
    BadRange(ip4::Error),
    BadDomain(crate::name::Error),
    BadValue,
    ReservedValue,
}

impl LoadError {
    fn io(file: &Path, e: io::Error) -> Self {
        Self {
            file: file.to_owned(),
            line: None,
            kind: LoadErrorKind::Io(e),
        }
    }

    fn parse(file: &Path, line: usize, e: LineError) -> Self {
        Self {
            file: file.to_owned(),
            line: Some(line),
            kind: LoadErrorKind::Line(e),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.kind, self.line) {
            (LoadErrorKind::Io(e), _) => write!(f, "{}: {}", self.file.display(), e),
            (LoadErrorKind::Line(e), Some(line)) => {
                write!(f, "{} line {}: {}", self.file.display(), line, e)
            }
            (LoadErrorKind::Line(e), None) => write!(f, "{}: {}", self.file.display(), e),
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadDirective(what) => f.write_str(what),
            Self::BadRange(e) => write!(f, "invalid address range: {}", e),
            Self::BadDomain(e) => write!(f, "invalid domain name: {}", e),
            Self::BadValue => f.write_str("invalid entry value"),
            Self::ReservedValue => f.write_str("value 0 is reserved"),
        }
    }
}

impl std::error::Error for LoadError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::dataset::Subject;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn write_file(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
        let path = dir.join(file_name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dnsbl-load-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn zone_spec_from_str_works() {
        let spec: ZoneSpec = "sbl.example:ip4set:a.zone,b.zone".parse().unwrap();
        assert_eq!(spec.origin, name("sbl.example."));
        assert_eq!(spec.kind, DatasetKind::Ip4Set);
        assert_eq!(spec.files, [PathBuf::from("a.zone"), PathBuf::from("b.zone")]);

        assert!(matches!(
            "sbl.example".parse::<ZoneSpec>(),
            Err(SpecError::MissingField),
        ));
        assert!(matches!(
            "sbl.example:generic:a.zone".parse::<ZoneSpec>(),
            Err(SpecError::BadKind),
        ));
        assert!(matches!(
            "sbl.example:ip4set:".parse::<ZoneSpec>(),
            Err(SpecError::NoFiles),
        ));
    }

    #[test]
    fn load_zones_merges_specs() {
        let specs = vec![
            "sbl.example:ip4set:a.zone".parse().unwrap(),
            "sbl.example:ip4set:b.zone".parse().unwrap(),
            "sbl.example:dnset:c.zone".parse().unwrap(),
            "dbl.example:dnset:d.zone".parse().unwrap(),
        ];
        let zones = load_zones(specs);
        assert_eq!(zones.len(), 2);
        let sbl = zones.find(&name("sbl.example.")).unwrap();
        assert_eq!(sbl.sources().len(), 2);
        assert_eq!(sbl.sources()[0].files.len(), 2);
    }

    #[test]
    fn reload_builds_datasets_and_directives() {
        let dir = temp_dir("basic");
        let file = write_file(
            &dir,
            "sbl.zone",
            "# test zone\n\
             $TTL 300\n\
             $SOA ns.example. host.example. 1 2 3 4 5\n\
             $NS ns.example.\n\
             $TXT \"Listed: $\"\n\
             10.0.0.0/8 :2\n\
             192.168.1.1\n",
        );
        let mut zones = load_zones(vec![ZoneSpec {
            origin: name("sbl.example."),
            kind: DatasetKind::Ip4Set,
            files: vec![file],
        }]);
        let outcome = reload_zones(&mut zones, &LoadOptions::default());
        assert_eq!(outcome, ReloadOutcome::Reloaded);

        let zone = zones.find(&name("sbl.example.")).unwrap();
        assert_eq!(zone.ttl(), Some(300));
        assert_eq!(zone.soa().unwrap().serial, 1);
        assert_eq!(zone.ns(), [name("ns.example.")]);
        let dataset = &zone.datasets()[0];
        assert_eq!(dataset.name, name("sbl.example."));
        assert_eq!(dataset.dataset.txt_template(), Some("Listed: $"));
        assert_eq!(
            dataset.dataset.lookup(Subject::Addr(0x0a000001)).unwrap().value,
            2,
        );
        assert_eq!(
            dataset.dataset.lookup(Subject::Addr(0xc0a80101)).unwrap().value,
            2,
        );
        assert!(dataset.dataset.lookup(Subject::Addr(0x0b000000)).is_none());
    }

    #[test]
    fn reload_is_a_noop_when_mtimes_do_not_change() {
        let dir = temp_dir("mtime");
        let file = write_file(&dir, "dbl.zone", ".bad.example :3\n");
        let mut zones = load_zones(vec![ZoneSpec {
            origin: name("dbl.example."),
            kind: DatasetKind::DnSet,
            files: vec![file],
        }]);
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Reloaded,
        );
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Unchanged,
        );
    }

    #[test]
    fn failed_reload_keeps_previous_contents() {
        let dir = temp_dir("keep");
        let file = write_file(&dir, "sbl.zone", "10/8 :2\n");
        let mut zones = load_zones(vec![ZoneSpec {
            origin: name("sbl.example."),
            kind: DatasetKind::Ip4Set,
            files: vec![file.clone()],
        }]);
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Reloaded,
        );

        // Break the file; the old data must keep serving. (The pause
        // keeps the mtime comparison honest on coarse filesystems.)
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(&dir, "sbl.zone", "10/8 :2\nnot an address\n");
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::ReloadedWithErrors,
        );
        let zone = zones.find(&name("sbl.example.")).unwrap();
        assert_eq!(
            zone.datasets()[0]
                .dataset
                .lookup(Subject::Addr(0x0a000001))
                .unwrap()
                .value,
            2,
        );

        // Fix it again with new contents; the next pass picks it up.
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(&dir, "sbl.zone", "11/8 :3\n");
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Reloaded,
        );
        let zone = zones.find(&name("sbl.example.")).unwrap();
        let dataset = &zone.datasets()[0].dataset;
        assert!(dataset.lookup(Subject::Addr(0x0a000001)).is_none());
        assert_eq!(dataset.lookup(Subject::Addr(0x0b000001)).unwrap().value, 3);
    }

    #[test]
    fn dataset_directive_binds_a_subzone() {
        let dir = temp_dir("subzone");
        let file = write_file(
            &dir,
            "combined.zone",
            "10/8 :2\n\
             $DATASET dnset spam\n\
             .bad.example :3\n\
             $DATASET ip4set @\n\
             172.16/12 :4\n",
        );
        let mut zones = load_zones(vec![ZoneSpec {
            origin: name("bl.example."),
            kind: DatasetKind::Ip4Set,
            files: vec![file],
        }]);
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::Reloaded,
        );
        let zone = zones.find(&name("bl.example.")).unwrap();
        assert_eq!(zone.datasets().len(), 2);
        assert_eq!(zone.datasets()[0].name, name("bl.example."));
        assert_eq!(zone.datasets()[1].name, name("spam.bl.example."));
        let base = &zone.datasets()[0].dataset;
        assert_eq!(base.lookup(Subject::Addr(0x0a000001)).unwrap().value, 2);
        assert_eq!(base.lookup(Subject::Addr(0xac100001)).unwrap().value, 4);
        let spam = &zone.datasets()[1].dataset;
        let domain = name("x.bad.example.");
        assert_eq!(spam.lookup(Subject::Domain(&domain)).unwrap().value, 3);
    }

    #[test]
    fn value_0_and_junk_values_are_rejected() {
        assert!(parse_value(":2").is_ok());
        assert!(parse_value("7").is_ok());
        assert!(matches!(parse_value(":0"), Err(LineError::ReservedValue)));
        assert!(matches!(parse_value("x"), Err(LineError::BadValue)));
        assert!(matches!(parse_value(":256"), Err(LineError::BadValue)));
    }

    #[test]
    fn host_bit_cidrs_follow_the_accept_flag() {
        let dir = temp_dir("hostbits");
        let file = write_file(&dir, "sbl.zone", "127.0.0.1/8 :2\n");
        let make = |dir_file: PathBuf| {
            load_zones(vec![ZoneSpec {
                origin: name("sbl.example."),
                kind: DatasetKind::Ip4Set,
                files: vec![dir_file],
            }])
        };
        let mut zones = make(file.clone());
        assert_eq!(
            reload_zones(&mut zones, &LoadOptions::default()),
            ReloadOutcome::ReloadedWithErrors,
        );
        let mut zones = make(file);
        let options = LoadOptions {
            accept_in_cidr: true,
            ..LoadOptions::default()
        };
        assert_eq!(reload_zones(&mut zones, &options), ReloadOutcome::Reloaded);
        let zone = zones.find(&name("sbl.example.")).unwrap();
        assert_eq!(
            zone.datasets()[0]
                .dataset
                .lookup(Subject::Addr(0x7f123456))
                .unwrap()
                .value,
            2,
        );
    }
}
