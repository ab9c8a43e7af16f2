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

//! An authoritative UDP DNS server for DNS-based blocklists (DNSBLs).
//!
//! A DNSBL zone is a subtree of the DNS namespace whose names are
//! structured encodings of IPv4 addresses or domain names. Clients
//! query ordinary `A` and `TXT` records; the answer encodes whether the
//! subject is listed and with what classification. This crate provides
//! the in-memory datasets backing such zones ([`dataset`]), the zone
//! registry and flat-file loader ([`zone`]), the wire codec
//! ([`message`]), and the single-threaded service loop ([`server`]).

pub mod dataset;
pub mod ip4;
pub mod message;
pub mod name;
pub mod netlist;
pub mod server;
pub mod zone;
