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

//! Implementation of the [`Opcode`] type.

use std::fmt;

////////////////////////////////////////////////////////////////////////
// OPCODES                                                            //
////////////////////////////////////////////////////////////////////////

/// The opcode value of the DNS message header: a four-bit field
/// indicating the kind of query being made. This server answers only
/// [`Opcode::QUERY`]; everything else gets NOTIMP.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct Opcode(u8);

impl Opcode {
    pub const QUERY: Self = Self(0);
    pub const IQUERY: Self = Self(1);
    pub const STATUS: Self = Self(2);
    pub const NOTIFY: Self = Self(4);
    pub const UPDATE: Self = Self(5);

    /// Creates an `Opcode` from the low four bits of `raw`.
    pub fn from_low_bits(raw: u8) -> Self {
        Self(raw & 0x0f)
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value.0
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::QUERY => f.write_str("QUERY"),
            Self::IQUERY => f.write_str("IQUERY"),
            Self::STATUS => f.write_str("STATUS"),
            Self::NOTIFY => f.write_str("NOTIFY"),
            Self::UPDATE => f.write_str("UPDATE"),
            Self(value) => write!(f, "opcode {}", value),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_low_bits_accepts_all_four_bit_values() {
        for value in 0..16 {
            assert_eq!(Opcode::from_low_bits(value), Opcode(value));
        }
        assert_eq!(Opcode::from_low_bits(0), Opcode::QUERY);
        assert_eq!(Opcode::from_low_bits(5), Opcode::UPDATE);
    }

    #[test]
    fn from_low_bits_masks_high_bits() {
        assert_eq!(Opcode::from_low_bits(0x1f), Opcode(0x0f));
        assert_eq!(Opcode::from_low_bits(0xf0), Opcode::QUERY);
        for value in 0..=u8::MAX {
            assert_eq!(
                Opcode::from_low_bits(value),
                Opcode::from_low_bits(value & 0x0f),
            );
        }
    }

    #[test]
    fn into_u8_round_trips_four_bit_values() {
        for value in 0..16 {
            assert_eq!(u8::from(Opcode::from_low_bits(value)), value);
        }
    }
}
