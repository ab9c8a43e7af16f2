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

//! Zones and the zone registry.
//!
//! A [`Zone`] is a node of the DNS namespace served authoritatively:
//! its origin name, the datasets bound at or below that origin, the
//! apex SOA and NS records, and the bookkeeping the reloader needs
//! (backing files and their composite modification time). The
//! [`ZoneSet`] keeps all served zones ordered so that dispatch can find
//! the zone whose origin is the longest suffix of a query name with a
//! simple scan.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::dataset::{Dataset, DatasetKind};
use crate::name::Name;

mod load;
pub use load::{load_zones, reload_zones, LoadOptions, ReloadOutcome, SpecError, ZoneSpec};

////////////////////////////////////////////////////////////////////////
// ZONES                                                              //
////////////////////////////////////////////////////////////////////////

/// One served zone.
pub struct Zone {
    origin: Name,
    sources: Vec<Source>,
    contents: Contents,
    mtime: Option<SystemTime>,
}

/// One `(kind, files)` source group of a zone, as configured on the
/// command line. Each group is rebuilt from all of its files on
/// reload.
#[derive(Clone, Debug)]
pub struct Source {
    pub kind: DatasetKind,
    pub files: Vec<PathBuf>,
}

/// The reloadable part of a [`Zone`]: everything its files define.
/// The reloader builds a complete new `Contents` and swaps it in, so a
/// failed reload leaves the previous one untouched.
#[derive(Clone, Debug, Default)]
pub(crate) struct Contents {
    pub datasets: Vec<BoundDataset>,
    pub soa: Option<Soa>,
    pub ns: Vec<Name>,
    pub ttl: Option<u32>,
}

/// A dataset bound at a name: the zone origin itself, or a subzone
/// under it (the `$DATASET` directive).
#[derive(Clone, Debug)]
pub struct BoundDataset {
    /// The fully qualified name the dataset hangs off.
    pub name: Name,
    pub dataset: Dataset,
}

/// The contents of the zone's SOA record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// Builds the RDATA of the SOA record. Names inside RDATA are
    /// written uncompressed.
    pub fn rdata(&self) -> Vec<u8> {
        let mut rdata =
            Vec::with_capacity(self.mname.wire_repr().len() + self.rname.wire_repr().len() + 20);
        rdata.extend_from_slice(self.mname.wire_repr());
        rdata.extend_from_slice(self.rname.wire_repr());
        for field in [self.serial, self.refresh, self.retry, self.expire, self.minimum] {
            rdata.extend_from_slice(&field.to_be_bytes());
        }
        rdata
    }
}

impl Zone {
    /// Creates a zone with no contents yet.
    pub fn new(origin: Name) -> Self {
        Self {
            origin,
            sources: Vec::new(),
            contents: Contents::default(),
            mtime: None,
        }
    }

    /// Returns the zone's origin name.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Returns the datasets bound in this zone, in binding order.
    pub fn datasets(&self) -> &[BoundDataset] {
        &self.contents.datasets
    }

    /// Returns the zone's SOA, if its files define one.
    pub fn soa(&self) -> Option<&Soa> {
        self.contents.soa.as_ref()
    }

    /// Returns the zone's NS names.
    pub fn ns(&self) -> &[Name] {
        &self.contents.ns
    }

    /// Returns the TTL for records synthesized from this zone, if its
    /// files set one (`$TTL`).
    pub fn ttl(&self) -> Option<u32> {
        self.contents.ttl
    }

    /// Returns the zone's source groups.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub(crate) fn sources_mut(&mut self) -> &mut Vec<Source> {
        &mut self.sources
    }

    pub(crate) fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Swaps in freshly built contents. Single-threaded service means
    /// no lookup can be in flight here; the old contents are dropped
    /// once the swap completes.
    pub(crate) fn install(&mut self, contents: Contents, mtime: Option<SystemTime>) {
        self.contents = contents;
        self.mtime = mtime;
    }
}

////////////////////////////////////////////////////////////////////////
// THE ZONE REGISTRY                                                  //
////////////////////////////////////////////////////////////////////////

/// The set of zones served by the process.
#[derive(Default)]
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the zone with origin `origin`, creating it if needed.
    pub fn get_or_create(&mut self, origin: &Name) -> &mut Zone {
        if let Some(i) = self.zones.iter().position(|z| z.origin() == origin) {
            return &mut self.zones[i];
        }
        // Keep the scan order by non-increasing origin depth so that
        // the first suffix match below is the longest one.
        let i = self
            .zones
            .partition_point(|z| z.origin().len() >= origin.len());
        self.zones.insert(i, Zone::new(origin.clone()));
        &mut self.zones[i]
    }

    /// Returns the zone whose origin is the longest suffix of `qname`,
    /// if any.
    pub fn find(&self, qname: &Name) -> Option<&Zone> {
        self.zones
            .iter()
            .find(|z| qname.strip_suffix(z.origin()).is_some())
    }

    /// Returns an iterator over the zones.
    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Zone> {
        self.zones.iter_mut()
    }

    /// Returns the number of zones.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn find_returns_the_longest_suffix_match() {
        let mut zones = ZoneSet::new();
        zones.get_or_create(&name("example."));
        zones.get_or_create(&name("sbl.example."));
        zones.get_or_create(&name("dbl.example."));

        let zone = zones.find(&name("2.0.0.127.sbl.example.")).unwrap();
        assert_eq!(zone.origin(), &name("sbl.example."));
        let zone = zones.find(&name("sbl.example.")).unwrap();
        assert_eq!(zone.origin(), &name("sbl.example."));
        let zone = zones.find(&name("other.example.")).unwrap();
        assert_eq!(zone.origin(), &name("example."));
        assert!(zones.find(&name("example.net.")).is_none());
        assert!(zones.find(&Name::root()).is_none());
    }

    #[test]
    fn get_or_create_reuses_existing_zones() {
        let mut zones = ZoneSet::new();
        zones.get_or_create(&name("sbl.example."));
        zones.get_or_create(&name("sbl.example."));
        assert_eq!(zones.len(), 1);
    }

    #[test]
    fn soa_rdata_layout() {
        let soa = Soa {
            mname: name("ns.example."),
            rname: name("hostmaster.example."),
            serial: 1,
            refresh: 2,
            retry: 3,
            expire: 4,
            minimum: 5,
        };
        let rdata = soa.rdata();
        let names_len = soa.mname.wire_repr().len() + soa.rname.wire_repr().len();
        assert_eq!(rdata.len(), names_len + 20);
        assert_eq!(&rdata[names_len..names_len + 4], &1u32.to_be_bytes());
        assert_eq!(&rdata[names_len + 16..], &5u32.to_be_bytes());
    }
}
