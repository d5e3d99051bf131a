// Copyright 2024, The Swarmlink Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

const WINDOW: Duration = Duration::from_secs(1);

/// Fixed-window counter limiting how many inbound connections a single host may open per second.
/// Hosts without a thin-waist address (e.g. relayed connections) are not counted.
pub(super) struct HostRateLimiter {
    limit: usize,
    windows: HashMap<String, (Instant, usize)>,
}

impl HostRateLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            windows: HashMap::new(),
        }
    }

    /// Record an attempt from the given host and return whether it is within the limit.
    pub fn check(&mut self, host: String) -> bool {
        let now = Instant::now();
        let entry = self.windows.entry(host).or_insert((now, 0));
        if now.duration_since(entry.0) >= WINDOW {
            *entry = (now, 0);
        }
        entry.1 += 1;
        let within = entry.1 <= self.limit;
        // Stale windows for hosts we never hear from again accumulate slowly; sweep them when
        // the map grows past a few hundred entries
        if self.windows.len() > 512 {
            self.windows.retain(|_, (start, _)| now.duration_since(*start) < WINDOW);
        }
        within
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_per_host() {
        let mut limiter = HostRateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1".to_string()));
        }
        assert!(!limiter.check("10.0.0.1".to_string()));
        // An unrelated host is unaffected
        assert!(limiter.check("10.0.0.2".to_string()));
    }
}
