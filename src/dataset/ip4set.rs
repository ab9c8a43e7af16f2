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

//! The IPv4 range store.
//!
//! An [`Ip4Set`] holds a sorted sequence of non-overlapping inclusive
//! address ranges, each carrying a classification value. Ranges are
//! accumulated through an [`Ip4SetBuilder`] and canonicalized by
//! [`Ip4SetBuilder::finalize`]; after that, any address matches at most
//! one range and lookup is a binary search.

////////////////////////////////////////////////////////////////////////
// THE FINALIZED SET                                                  //
////////////////////////////////////////////////////////////////////////

/// A finalized, immutable set of IPv4 ranges.
#[derive(Clone, Debug, Default)]
pub struct Ip4Set {
    ranges: Vec<Range>,
}

/// One canonicalized range. `hi` is inclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Range {
    lo: u32,
    hi: u32,
    value: u8,
}

impl Ip4Set {
    /// Looks up `addr`, returning the classification value of the
    /// matching range (if any).
    pub fn lookup(&self, addr: u32) -> Option<u8> {
        // Find the last range with lo <= addr.
        let i = self.ranges.partition_point(|r| r.lo <= addr);
        if i == 0 {
            return None;
        }
        let range = &self.ranges[i - 1];
        (addr <= range.hi).then_some(range.value)
    }

    /// Returns the number of ranges in the set.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns whether the set holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// THE BUILDER                                                        //
////////////////////////////////////////////////////////////////////////

/// Accumulates ranges for an [`Ip4Set`].
#[derive(Clone, Debug, Default)]
pub struct Ip4SetBuilder {
    entries: Vec<Entry>,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    lo: u32,
    hi: u32,
    value: u8,
    seq: u32,
}

/// An [`Entry`] on the sweep stack: `cur` is the first address of the
/// entry not yet emitted and not covered by a nested entry.
#[derive(Clone, Copy, Debug)]
struct Pending {
    cur: u32,
    hi: u32,
    value: u8,
}

impl Ip4SetBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the inclusive range `[lo, hi]` with classification
    /// `value`. Insertion order matters: when two ranges of equal
    /// specificity overlap, the later insertion wins.
    pub fn add(&mut self, lo: u32, hi: u32, value: u8) {
        let seq = self.entries.len() as u32;
        self.entries.push(Entry { lo, hi, value, seq });
    }

    /// Canonicalizes the accumulated entries into an [`Ip4Set`].
    ///
    /// Entries are sorted so that they are processed in order of
    /// increasing start, with wider ranges before narrower ones at the
    /// same start and earlier insertions before later ones at identical
    /// extent. The sweep then lets each entry override the enclosing
    /// one within its own span: a narrower (more specific) range
    /// always wins, and at equal specificity the later insertion wins.
    /// Adjacent contiguous ranges with equal values are coalesced.
    pub fn finalize(mut self) -> Ip4Set {
        self.entries.sort_unstable_by(|a, b| {
            a.lo.cmp(&b.lo)
                .then(b.hi.cmp(&a.hi))
                .then(a.seq.cmp(&b.seq))
        });

        let mut ranges: Vec<Range> = Vec::new();
        let mut stack: Vec<Pending> = Vec::new();
        for entry in &self.entries {
            // Ranges that end before this entry starts are done; emit
            // their remainders.
            while let Some(&top) = stack.last() {
                if top.hi < entry.lo {
                    emit(&mut ranges, top.cur, top.hi, top.value);
                    stack.pop();
                } else {
                    break;
                }
            }

            if let Some(&top) = stack.last() {
                // The entry starts inside the innermost pending range
                // (the sort guarantees top.lo <= entry.lo <= top.hi).
                // The part of the pending range before the entry is
                // settled now; the entry owns its own span.
                if entry.lo > top.cur {
                    emit(&mut ranges, top.cur, entry.lo - 1, top.value);
                }
                if entry.hi >= top.hi {
                    // The entry covers the rest of this pending range,
                    // and possibly of outer ones too.
                    while stack.last().map(|t| t.hi <= entry.hi).unwrap_or(false) {
                        stack.pop();
                    }
                    if let Some(outer) = stack.last_mut() {
                        outer.cur = entry.hi + 1;
                    }
                } else {
                    stack.last_mut().unwrap().cur = entry.hi + 1;
                }
            }
            stack.push(Pending {
                cur: entry.lo,
                hi: entry.hi,
                value: entry.value,
            });
        }
        while let Some(top) = stack.pop() {
            emit(&mut ranges, top.cur, top.hi, top.value);
        }

        Ip4Set { ranges }
    }
}

/// Appends the range `[lo, hi]` to `ranges`, coalescing it with the
/// previous range when the two are contiguous and equal-valued.
fn emit(ranges: &mut Vec<Range>, lo: u32, hi: u32, value: u8) {
    if let Some(last) = ranges.last_mut() {
        if last.value == value && last.hi.wrapping_add(1) == lo {
            last.hi = hi;
            return;
        }
    }
    ranges.push(Range { lo, hi, value });
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
