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

//! The domain-name store.
//!
//! A [`DnSet`] maps domain names to classification values. Entries are
//! keyed by the *reversed* label sequence of the lowercased name, each
//! label followed by a `0` separator (`foo.bar.com` is keyed as
//! `com\0bar\0foo\0`), so that lexicographic order over keys groups a
//! name with its sub-domains and a suffix test on names becomes a
//! prefix test on keys.
//!
//! An entry is either *exact* (matches only itself) or *wildcard*
//! (matches strict sub-domains only); in zone files a leading `.`
//! marks the wildcard form. Both forms may coexist for one name with
//! different values.

use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// THE FINALIZED SET                                                  //
////////////////////////////////////////////////////////////////////////

/// A finalized, immutable set of domain-name entries.
#[derive(Clone, Debug, Default)]
pub struct DnSet {
    entries: Vec<Entry>,
}

#[derive(Clone, Debug)]
struct Entry {
    key: Box<[u8]>,
    wildcard: bool,
    value: u8,
}

/// The result of a successful [`DnSet::lookup`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DnMatch {
    pub value: u8,
    pub exact: bool,
}

impl DnSet {
    /// Looks up `name`, returning the deepest-suffix entry that admits
    /// it: the name's own exact entry if there is one, otherwise the
    /// wildcard entry for the longest proper suffix.
    pub fn lookup(&self, name: &Name) -> Option<DnMatch> {
        // Probe each suffix of the query, deepest first. Every suffix
        // key is a prefix of the full key, so each probe is a binary
        // search for (key, flavor); the first hit is the deepest.
        let full_key = reverse_key(name);
        let mut key = &full_key[..];
        let mut wildcard = false;
        let mut n = 0;
        loop {
            if let Ok(i) = self
                .entries
                .binary_search_by(|e| (&*e.key, e.wildcard).cmp(&(key, wildcard)))
            {
                return Some(DnMatch {
                    value: self.entries[i].value,
                    exact: !wildcard,
                });
            }
            // Strip the deepest (leftmost-in-the-original) label; all
            // shallower suffixes can only match through wildcards.
            if n + 1 >= name.len() {
                return None;
            }
            let stripped = name.label(n).len() + 1;
            key = &key[..key.len() - stripped];
            wildcard = true;
            n += 1;
        }
    }

    /// Returns the number of entries in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the reversed-label key of `name`.
fn reverse_key(name: &Name) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.wire_repr().len());
    // The last label is the empty root label; it contributes nothing.
    for n in (0..name.len() - 1).rev() {
        key.extend_from_slice(name.label(n));
        key.push(0);
    }
    key
}

////////////////////////////////////////////////////////////////////////
// THE BUILDER                                                        //
////////////////////////////////////////////////////////////////////////

/// Accumulates entries for a [`DnSet`].
#[derive(Clone, Debug, Default)]
pub struct DnSetBuilder {
    entries: Vec<Entry>,
}

impl DnSetBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry for `name`. When two entries share a name and
    /// flavor, the later insertion wins.
    pub fn add(&mut self, name: &Name, wildcard: bool, value: u8) {
        self.entries.push(Entry {
            key: reverse_key(name).into_boxed_slice(),
            wildcard,
            value,
        });
    }

    /// Sorts the entries and resolves duplicates into a [`DnSet`].
    pub fn finalize(mut self) -> DnSet {
        // The sort is stable, so equal (key, flavor) runs keep their
        // insertion order and the dedup below keeps the last-inserted
        // value.
        self.entries
            .sort_by(|a, b| (&*a.key, a.wildcard).cmp(&(&*b.key, b.wildcard)));
        self.entries
            .dedup_by(|later, kept| {
                kept.key == later.key && kept.wildcard == later.wildcard && {
                    kept.value = later.value;
                    true
                }
            });
        DnSet {
            entries: self.entries,
        }
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

    fn build(entries: &[(&str, bool, u8)]) -> DnSet {
        let mut builder = DnSetBuilder::new();
        for &(text, wildcard, value) in entries {
            builder.add(&name(text), wildcard, value);
        }
        builder.finalize()
    }

    #[test]
    fn exact_entry_matches_only_itself() {
        let set = build(&[("bad.example", false, 3)]);
        assert_eq!(
            set.lookup(&name("bad.example")),
            Some(DnMatch {
                value: 3,
                exact: true,
            }),
        );
        assert_eq!(set.lookup(&name("x.bad.example")), None);
        assert_eq!(set.lookup(&name("example")), None);
        assert_eq!(set.lookup(&name("ad.example")), None);
    }

    #[test]
    fn wildcard_entry_matches_strict_subdomains_only() {
        let set = build(&[("bad.example", true, 3)]);
        assert_eq!(set.lookup(&name("bad.example")), None);
        assert_eq!(
            set.lookup(&name("x.bad.example")),
            Some(DnMatch {
                value: 3,
                exact: false,
            }),
        );
        assert_eq!(
            set.lookup(&name("x.y.bad.example")),
            Some(DnMatch {
                value: 3,
                exact: false,
            }),
        );
    }

    #[test]
    fn deepest_suffix_wins() {
        let set = build(&[("example", true, 1), ("bad.example", true, 2)]);
        assert_eq!(set.lookup(&name("x.bad.example")).unwrap().value, 2);
        assert_eq!(set.lookup(&name("x.good.example")).unwrap().value, 1);
    }

    #[test]
    fn sibling_entries_do_not_shadow_a_wildcard() {
        // The greatest entry not above the query key here is the
        // sibling m.a.example; the wildcard for a.example must still be
        // found.
        let set = build(&[("a.example", true, 1), ("m.a.example", false, 2)]);
        assert_eq!(set.lookup(&name("x.a.example")).unwrap().value, 1);
        assert_eq!(set.lookup(&name("m.a.example")).unwrap().value, 2);
    }

    #[test]
    fn exact_and_wildcard_may_coexist() {
        let set = build(&[("bad.example", false, 2), ("bad.example", true, 3)]);
        assert_eq!(
            set.lookup(&name("bad.example")),
            Some(DnMatch {
                value: 2,
                exact: true,
            }),
        );
        assert_eq!(
            set.lookup(&name("x.bad.example")),
            Some(DnMatch {
                value: 3,
                exact: false,
            }),
        );
    }

    #[test]
    fn later_duplicate_wins() {
        let set = build(&[("bad.example", false, 2), ("bad.example", false, 7)]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.lookup(&name("bad.example")).unwrap().value, 7);
    }

    #[test]
    fn lookup_is_case_blind_through_name_normalization() {
        let set = build(&[("Bad.Example", false, 2)]);
        assert_eq!(set.lookup(&name("BAD.EXAMPLE")).unwrap().value, 2);
    }

    #[test]
    fn label_boundaries_are_respected() {
        // "ample" must not match entries for "example".
        let set = build(&[("example", true, 1)]);
        assert_eq!(set.lookup(&name("x.ample")), None);
        assert_eq!(set.lookup(&name("xexample")), None);
    }
}
