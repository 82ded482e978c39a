// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Time injection. SCT timestamps come from a [`TimeSource`] capability
//! rather than the system clock so that tests can pin them.

use static_ct_api::UnixTimestamp;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait TimeSource: Send + Sync {
    /// The current time in milliseconds since the Unix epoch.
    fn now_unix_millis(&self) -> UnixTimestamp;
}

/// Reads the real system clock.
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix_millis(&self) -> UnixTimestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Always returns the same instant.
pub struct FixedTimeSource {
    millis: UnixTimestamp,
}

impl FixedTimeSource {
    pub fn new(millis: UnixTimestamp) -> Self {
        Self { millis }
    }
}

impl TimeSource for FixedTimeSource {
    fn now_unix_millis(&self) -> UnixTimestamp {
        self.millis
    }
}
