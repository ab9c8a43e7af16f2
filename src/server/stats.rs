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

//! Query statistics.
//!
//! Counters are kept per result class (positive answers, NXDOMAIN,
//! errors, unparseable packets) with request and response byte totals,
//! and dumped as one log line on SIGUSR1/SIGUSR2.

use std::time::{Duration, Instant};

use log::info;

use crate::message::Rcode;

////////////////////////////////////////////////////////////////////////
// STATISTICS                                                         //
////////////////////////////////////////////////////////////////////////

/// Counters for one statistics window.
#[derive(Clone, Debug)]
pub struct Stats {
    window_start: Instant,
    ok: Class,
    nxdomain: Class,
    error: Class,
    bad: Class,
    /// Answer RRs across positive responses.
    answers: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct Class {
    count: u64,
    bytes_in: u64,
    bytes_out: u64,
}

impl Class {
    fn bump(&mut self, bytes_in: usize, bytes_out: usize) {
        self.count += 1;
        self.bytes_in += bytes_in as u64;
        self.bytes_out += bytes_out as u64;
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            window_start: Instant::now(),
            ok: Class::default(),
            nxdomain: Class::default(),
            error: Class::default(),
            bad: Class::default(),
            answers: 0,
        }
    }
}

impl Stats {
    /// Creates zeroed counters with the window starting now.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sent response.
    pub fn record(&mut self, rcode: Rcode, ancount: u16, bytes_in: usize, bytes_out: usize) {
        match rcode {
            Rcode::NOERROR => {
                self.ok.bump(bytes_in, bytes_out);
                self.answers += ancount as u64;
            }
            Rcode::NXDOMAIN => self.nxdomain.bump(bytes_in, bytes_out),
            _ => self.error.bump(bytes_in, bytes_out),
        }
    }

    /// Records a packet that was dropped without a response.
    pub fn record_bad(&mut self, bytes_in: usize) {
        self.bad.bump(bytes_in, 0);
    }

    /// Returns the age of the current window.
    pub fn window(&self) -> Duration {
        self.window_start.elapsed()
    }

    /// Logs the counters; with `reset`, a new window starts.
    pub fn log(&mut self, reset: bool) {
        let total = self.ok.count + self.nxdomain.count + self.error.count + self.bad.count;
        info!(
            "stats for {}sec (num/in/out/ans): tot={}/{}/{} \
             ok={}/{}/{}/{} nxd={}/{}/{} err={}/{}/{} bad={}/{}",
            self.window().as_secs(),
            total,
            self.ok.bytes_in + self.nxdomain.bytes_in + self.error.bytes_in + self.bad.bytes_in,
            self.ok.bytes_out + self.nxdomain.bytes_out + self.error.bytes_out,
            self.ok.count,
            self.ok.bytes_in,
            self.ok.bytes_out,
            self.answers,
            self.nxdomain.count,
            self.nxdomain.bytes_in,
            self.nxdomain.bytes_out,
            self.error.count,
            self.error.bytes_in,
            self.error.bytes_out,
            self.bad.count,
            self.bad.bytes_in,
        );
        if reset {
            *self = Self::new();
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
    fn record_sorts_responses_into_classes() {
        let mut stats = Stats::new();
        stats.record(Rcode::NOERROR, 2, 30, 70);
        stats.record(Rcode::NXDOMAIN, 0, 31, 50);
        stats.record(Rcode::REFUSED, 0, 32, 12);
        stats.record_bad(8);
        assert_eq!(stats.ok.count, 1);
        assert_eq!(stats.answers, 2);
        assert_eq!(stats.nxdomain.count, 1);
        assert_eq!(stats.error.count, 1);
        assert_eq!(stats.bad.count, 1);
        assert_eq!(stats.bad.bytes_in, 8);

        stats.log(true);
        assert_eq!(stats.ok.count, 0);
        assert_eq!(stats.answers, 0);
    }
}
