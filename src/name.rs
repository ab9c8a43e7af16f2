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

//! A compact representation of domain names.
//!
//! A [`Name`] owns the uncompressed on-the-wire representation of a
//! domain name, lowercased on ingest so that lookups and suffix tests
//! are plain byte comparisons. Alongside the wire form it keeps the
//! offset of every label, which makes suffix stripping (the hot
//! operation when dispatching blocklist queries) an index computation
//! rather than a scan.

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum number of labels in a domain name, counting the root
/// label. A name of 255 octets cannot hold more, since every other
/// label consumes at least two octets.
pub const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label (not including the length octet).
pub const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// An owned, validated, lowercased domain name.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Name {
    wire: Box<[u8]>,
    label_offsets: Box<[u8]>,
}

impl Name {
    /// Returns the root name.
    pub fn root() -> Self {
        Self {
            wire: Box::new([0]),
            label_offsets: Box::new([0]),
        }
    }

    /// Returns the uncompressed on-the-wire representation of the name,
    /// including the terminating null label.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the number of labels in the name, counting the null
    /// label, so that the root name has length one.
    pub fn len(&self) -> usize {
        self.label_offsets.len()
    }

    /// Returns whether this is the root name.
    pub fn is_empty(&self) -> bool {
        self.label_offsets.len() == 1
    }

    /// Returns label `n`, not including its length octet. Label 0 is
    /// the first (leftmost) label; the last label is the empty root
    /// label.
    pub fn label(&self, n: usize) -> &[u8] {
        let offset = self.label_offsets[n] as usize;
        let len = self.wire[offset] as usize;
        &self.wire[offset + 1..offset + 1 + len]
    }

    /// Returns an iterator over the labels of the name, including the
    /// final empty root label.
    pub fn labels(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.len()).map(move |n| self.label(n))
    }

    /// Returns the wire form of the name starting at label `n` (the
    /// suffix obtained by stripping the first `n` labels).
    pub fn wire_repr_from(&self, n: usize) -> &[u8] {
        &self.wire[self.label_offsets[n] as usize..]
    }

    /// If `suffix` is a suffix of this name (on label boundaries),
    /// returns the number of leading labels of this name that precede
    /// it. The root name is a suffix of every name.
    pub fn strip_suffix(&self, suffix: &Name) -> Option<usize> {
        if suffix.len() > self.len() {
            return None;
        }
        let n = self.len() - suffix.len();
        if self.wire_repr_from(n) == suffix.wire_repr() {
            Some(n)
        } else {
            None
        }
    }

    /// Returns the name formed by this name's labels followed by
    /// `suffix`'s labels (this name below `suffix`).
    pub fn joined(&self, suffix: &Name) -> Result<Self> {
        let mut wire = Vec::with_capacity(self.wire.len() + suffix.wire.len() - 1);
        let mut label_offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        wire.extend_from_slice(&self.wire[..self.wire.len() - 1]);
        wire.extend_from_slice(&suffix.wire);
        if wire.len() > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        for &offset in self.label_offsets[..self.len() - 1].iter() {
            label_offsets.try_push(offset).map_err(|_| Error::NameTooLong)?;
        }
        let base = (self.wire.len() - 1) as u8;
        for &offset in suffix.label_offsets.iter() {
            label_offsets
                .try_push(base + offset)
                .map_err(|_| Error::NameTooLong)?;
        }
        Ok(Self {
            wire: wire.into_boxed_slice(),
            label_offsets: label_offsets.as_slice().into(),
        })
    }

    /// Returns the name formed by the first `n` labels of this name
    /// (the part above the suffix that starts at label `n`).
    pub fn prefix(&self, n: usize) -> Self {
        let end = self.label_offsets[n] as usize;
        let mut wire = Vec::with_capacity(end + 1);
        wire.extend_from_slice(&self.wire[..end]);
        wire.push(0);
        let mut label_offsets: Vec<u8> = self.label_offsets[..n].to_vec();
        label_offsets.push(end as u8);
        Self {
            wire: wire.into_boxed_slice(),
            label_offsets: label_offsets.into_boxed_slice(),
        }
    }

    /// Parses an uncompressed name from `buf` starting at `start`,
    /// lowercasing as it goes. Compression pointers are rejected.
    /// On success, returns the name and the number of octets it
    /// occupies in `buf`.
    pub fn parse_uncompressed(buf: &[u8], start: usize) -> Result<(Self, usize)> {
        let mut wire = Vec::new();
        let mut label_offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        let mut cursor = start;
        loop {
            let len = *buf.get(cursor).ok_or(Error::UnexpectedEnd)? as usize;
            if len & 0xc0 != 0 {
                // Compression pointers (and the obsolete 0x40/0x80
                // label types) do not belong in a question.
                return Err(Error::CompressedLabel);
            }
            if wire.len() + len + 1 > MAX_WIRE_LEN {
                return Err(Error::NameTooLong);
            }
            label_offsets
                .try_push(wire.len() as u8)
                .map_err(|_| Error::NameTooLong)?;
            let label = buf
                .get(cursor + 1..cursor + 1 + len)
                .ok_or(Error::UnexpectedEnd)?;
            wire.push(len as u8);
            wire.extend(label.iter().map(u8::to_ascii_lowercase));
            cursor += len + 1;
            if len == 0 {
                let parsed_len = cursor - start;
                return Ok((
                    Self {
                        wire: wire.into_boxed_slice(),
                        label_offsets: label_offsets.as_slice().into(),
                    },
                    parsed_len,
                ));
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONVERSION FROM TEXT                                               //
////////////////////////////////////////////////////////////////////////

impl FromStr for Name {
    type Err = Error;

    /// Parses a name from presentation form. A trailing dot is
    /// accepted but not required; escapes are not supported (blocklist
    /// zone names do not use them).
    fn from_str(text: &str) -> Result<Self> {
        let text = text.strip_suffix('.').unwrap_or(text);
        if text.is_empty() {
            return Ok(Self::root());
        }
        let mut wire = Vec::with_capacity(text.len() + 2);
        let mut label_offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        for label in text.split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            if wire.len() + label.len() + 2 > MAX_WIRE_LEN {
                return Err(Error::NameTooLong);
            }
            label_offsets
                .try_push(wire.len() as u8)
                .map_err(|_| Error::NameTooLong)?;
            wire.push(label.len() as u8);
            wire.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
        label_offsets
            .try_push(wire.len() as u8)
            .map_err(|_| Error::NameTooLong)?;
        wire.push(0);
        Ok(Self {
            wire: wire.into_boxed_slice(),
            label_offsets: label_offsets.as_slice().into(),
        })
    }
}

////////////////////////////////////////////////////////////////////////
// FORMATTING                                                         //
////////////////////////////////////////////////////////////////////////

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str(".");
        }
        for label in self.labels().take(self.len() - 1) {
            for &octet in label {
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{:03}", octet)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a domain name is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    UnexpectedEnd,
    CompressedLabel,
    EmptyLabel,
    LabelTooLong,
    NameTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UnexpectedEnd => f.write_str("name runs past the end of the buffer"),
            Self::CompressedLabel => f.write_str("compressed label where none is allowed"),
            Self::EmptyLabel => f.write_str("empty label"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("name exceeds 255 octets"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Name`] operations.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
