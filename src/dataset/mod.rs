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

//! Blocklist datasets.
//!
//! A dataset is a typed collection backing one or more zones. The
//! fixed set of kinds is a closed sum: [`Ip4Set`] holds IPv4 ranges and
//! answers queries whose subject is a reversed dotted quad, and
//! [`DnSet`] holds domain names. Both yield a small positive
//! *classification value* for listed subjects; the value selects the
//! synthesized `A` record (`127.0.0.<value>`), and the dataset may
//! carry a TXT template instantiated with the subject.

use std::fmt;
use std::str::FromStr;

use crate::name::Name;

mod dnset;
mod ip4set;
pub use dnset::{DnMatch, DnSet, DnSetBuilder};
pub use ip4set::{Ip4Set, Ip4SetBuilder};

/// The classification value applied to entries that carry none, when
/// the dataset does not override it. The synthesized default answer is
/// thus `127.0.0.2`.
pub const DEFAULT_VALUE: u8 = 2;

////////////////////////////////////////////////////////////////////////
// DATASET KINDS                                                      //
////////////////////////////////////////////////////////////////////////

/// The kind of a dataset. Adding a kind means adding a variant here
/// and to the store behind [`Dataset`]; there is no open extension.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DatasetKind {
    Ip4Set,
    DnSet,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Ip4Set => f.write_str("ip4set"),
            Self::DnSet => f.write_str("dnset"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = UnknownKindError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.eq_ignore_ascii_case("ip4set") {
            Ok(Self::Ip4Set)
        } else if text.eq_ignore_ascii_case("dnset") {
            Ok(Self::DnSet)
        } else {
            Err(UnknownKindError)
        }
    }
}

/// An error signaling that a dataset kind name is not recognized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownKindError;

impl fmt::Display for UnknownKindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("unknown dataset type")
    }
}

impl std::error::Error for UnknownKindError {}

////////////////////////////////////////////////////////////////////////
// DATASETS                                                           //
////////////////////////////////////////////////////////////////////////

/// A finalized dataset: a store plus the answer template shared by its
/// entries.
#[derive(Clone, Debug)]
pub struct Dataset {
    store: Store,
    txt_template: Option<String>,
}

#[derive(Clone, Debug)]
enum Store {
    Ip4Set(Ip4Set),
    DnSet(DnSet),
}

/// The subject of a lookup: the part of the query name below the
/// dataset's position, decoded per the dataset kind.
#[derive(Clone, Copy, Debug)]
pub enum Subject<'a> {
    Addr(u32),
    Domain(&'a Name),
}

/// A successful lookup: the classification value of the matched entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hit {
    pub value: u8,
}

impl Dataset {
    /// Returns this dataset's kind.
    pub fn kind(&self) -> DatasetKind {
        match self.store {
            Store::Ip4Set(_) => DatasetKind::Ip4Set,
            Store::DnSet(_) => DatasetKind::DnSet,
        }
    }

    /// Looks up `subject`. A subject of the wrong shape for this
    /// dataset kind finds nothing.
    pub fn lookup(&self, subject: Subject) -> Option<Hit> {
        match (&self.store, subject) {
            (Store::Ip4Set(set), Subject::Addr(addr)) => {
                set.lookup(addr).map(|value| Hit { value })
            }
            (Store::DnSet(set), Subject::Domain(name)) => {
                set.lookup(name).map(|m| Hit { value: m.value })
            }
            _ => None,
        }
    }

    /// Returns the TXT template configured for this dataset, if any.
    pub fn txt_template(&self) -> Option<&str> {
        self.txt_template.as_deref()
    }

    /// Returns the number of entries in the dataset.
    pub fn len(&self) -> usize {
        match &self.store {
            Store::Ip4Set(set) => set.len(),
            Store::DnSet(set) => set.len(),
        }
    }

    /// Returns whether the dataset holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

////////////////////////////////////////////////////////////////////////
// THE BUILDER                                                        //
////////////////////////////////////////////////////////////////////////

/// Accumulates entries and answer-template directives for a
/// [`Dataset`].
#[derive(Clone, Debug)]
pub struct DatasetBuilder {
    store: StoreBuilder,
    default_value: u8,
    txt_template: Option<String>,
}

#[derive(Clone, Debug)]
enum StoreBuilder {
    Ip4Set(Ip4SetBuilder),
    DnSet(DnSetBuilder),
}

impl DatasetBuilder {
    /// Creates an empty builder for a dataset of `kind`.
    pub fn new(kind: DatasetKind) -> Self {
        Self {
            store: match kind {
                DatasetKind::Ip4Set => StoreBuilder::Ip4Set(Ip4SetBuilder::new()),
                DatasetKind::DnSet => StoreBuilder::DnSet(DnSetBuilder::new()),
            },
            default_value: DEFAULT_VALUE,
            txt_template: None,
        }
    }

    /// Returns the builder's kind.
    pub fn kind(&self) -> DatasetKind {
        match self.store {
            StoreBuilder::Ip4Set(_) => DatasetKind::Ip4Set,
            StoreBuilder::DnSet(_) => DatasetKind::DnSet,
        }
    }

    /// Returns the classification value applied to entries without an
    /// explicit one.
    pub fn default_value(&self) -> u8 {
        self.default_value
    }

    /// Sets the classification value applied to entries without an
    /// explicit one (the `$A` directive).
    pub fn set_default_value(&mut self, value: u8) {
        self.default_value = value;
    }

    /// Sets the TXT template (the `$TXT` directive).
    pub fn set_txt_template(&mut self, template: String) {
        self.txt_template = Some(template);
    }

    /// Adds an IPv4 range entry. This is an error for a [`DnSet`]
    /// builder.
    pub fn add_range(&mut self, lo: u32, hi: u32, value: u8) -> Result<(), WrongKindError> {
        match &mut self.store {
            StoreBuilder::Ip4Set(builder) => {
                builder.add(lo, hi, value);
                Ok(())
            }
            StoreBuilder::DnSet(_) => Err(WrongKindError),
        }
    }

    /// Adds a domain-name entry. This is an error for an [`Ip4Set`]
    /// builder.
    pub fn add_domain(
        &mut self,
        name: &Name,
        wildcard: bool,
        value: u8,
    ) -> Result<(), WrongKindError> {
        match &mut self.store {
            StoreBuilder::DnSet(builder) => {
                builder.add(name, wildcard, value);
                Ok(())
            }
            StoreBuilder::Ip4Set(_) => Err(WrongKindError),
        }
    }

    /// Finalizes the accumulated entries into a [`Dataset`].
    pub fn finalize(self) -> Dataset {
        Dataset {
            store: match self.store {
                StoreBuilder::Ip4Set(builder) => Store::Ip4Set(builder.finalize()),
                StoreBuilder::DnSet(builder) => Store::DnSet(builder.finalize()),
            },
            txt_template: self.txt_template,
        }
    }
}

/// An error signaling that an entry of the wrong shape was added to a
/// dataset builder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WrongKindError;

impl fmt::Display for WrongKindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("entry does not match the dataset type")
    }
}

impl std::error::Error for WrongKindError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
