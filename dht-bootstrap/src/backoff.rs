// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Capped exponential backoff with jitter for bootstrap reconnects (§4.8).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape of the reconnect backoff: start at `base_ms`, multiply by `factor` on every
/// consecutive failure, cap at `max_ms`, and jitter by up to `jitter_frac` either way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPlan {
    pub base_ms: u64,
    pub factor: f32,
    pub max_ms: u64,
    pub jitter_frac: f32,
}

impl Default for BackoffPlan {
    fn default() -> Self {
        Self {
            base_ms: 10_000,
            factor: 2.0,
            max_ms: 120_000,
            jitter_frac: 0.2,
        }
    }
}

/// Produces successive reconnect delays for one connection attempt loop. Reset (drop and
/// recreate) after a successful connection so the next failure starts from `base_ms` again.
pub struct BackoffIter {
    plan: BackoffPlan,
    cur_ms: u64,
}

impl BackoffIter {
    pub fn new(plan: BackoffPlan) -> Self {
        Self { plan, cur_ms: 0 }
    }
}

impl Iterator for BackoffIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let next_ms = if self.cur_ms == 0 {
            self.plan.base_ms
        } else {
            ((self.cur_ms as f32) * self.plan.factor) as u64
        };
        self.cur_ms = next_ms.min(self.plan.max_ms);

        let frac = self.plan.jitter_frac.clamp(0.0, 1.0);
        let jitter = (self.cur_ms as f32 * frac) as i64;
        let delta = if jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(-jitter..=jitter)
        };
        let adjusted = (self.cur_ms as i64 + delta).max(0) as u64;
        Some(Duration::from_millis(adjusted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_saturate_at_the_cap() {
        let plan = BackoffPlan {
            base_ms: 1_000,
            factor: 2.0,
            max_ms: 5_000,
            jitter_frac: 0.0,
        };
        let delays: Vec<Duration> = BackoffIter::new(plan).take(6).collect();
        assert_eq!(delays[0], Duration::from_millis(1_000));
        assert_eq!(delays[1], Duration::from_millis(2_000));
        assert_eq!(delays[2], Duration::from_millis(4_000));
        for delay in &delays[3..] {
            assert_eq!(*delay, Duration::from_millis(5_000));
        }
    }

    #[test]
    fn jitter_stays_within_the_configured_fraction() {
        let plan = BackoffPlan {
            base_ms: 10_000,
            factor: 2.0,
            max_ms: 10_000,
            jitter_frac: 0.2,
        };
        for delay in BackoffIter::new(plan).take(20) {
            let ms = delay.as_millis() as i64;
            assert!((8_000..=12_000).contains(&ms), "jitter out of range: {ms}");
        }
    }
}
