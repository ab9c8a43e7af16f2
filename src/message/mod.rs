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

//! Reading and writing of DNS messages.
//!
//! The codec here is deliberately narrow: it parses a single-question
//! UDP query ([`Query`]) and synthesizes the response in place in the
//! same buffer ([`Builder`]), which keeps the hot path free of copies
//! and allocations beyond the query name itself.

mod builder;
pub mod constants;
mod opcode;
mod query;
mod question;
mod rcode;
pub use builder::{a_rdata, txt_rdata, Builder};
pub use opcode::Opcode;
pub use query::{ParseOutcome, Query};
pub use question::{Qclass, Qtype};
pub use rcode::Rcode;
