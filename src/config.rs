// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client and link configuration

use std::time::Duration;

use crate::unit::{UnitId, TCP_DEVICE};

/// Default deadline for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Baud rate above which the inter-frame silence is fixed.
const FIXED_SILENCE_BAUD_RATE: u32 = 19_200;

/// Fixed inter-frame silence for baud rates above 19200.
const FIXED_SILENCE: Duration = Duration::from_micros(1_750);

/// Bits per character: start bit, 8 data bits, parity/stop bit, stop bit.
const BITS_PER_CHAR: u64 = 11;

/// Configuration of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Unit that all requests are addressed to.
    pub unit_id: UnitId,

    /// Deadline of each request, measured from issuing it.
    pub request_timeout: Duration,

    /// Connect on demand when issuing a request while disconnected.
    pub auto_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unit_id: TCP_DEVICE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auto_connect: true,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub const fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }
}

/// Configuration of an RTU link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuConfig {
    /// Idle time on the line that completes a frame of unknown length.
    ///
    /// With `None` only frames whose length can be derived from their
    /// function code are received.
    pub inter_frame_silence: Option<Duration>,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self::for_baud_rate(FIXED_SILENCE_BAUD_RATE)
    }
}

impl RtuConfig {
    #[must_use]
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        Self {
            inter_frame_silence: Some(silence_for_baud_rate(baud_rate)),
        }
    }

    #[must_use]
    pub const fn with_inter_frame_silence(mut self, silence: Option<Duration>) -> Self {
        self.inter_frame_silence = silence;
        self
    }
}

/// Silent interval of 3.5 character times that separates RTU frames.
///
/// Fixed to 1.75 ms for baud rates above 19200.
#[must_use]
pub fn silence_for_baud_rate(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > FIXED_SILENCE_BAUD_RATE {
        return FIXED_SILENCE;
    }
    // 3.5 characters = 7 half characters
    let nanos = 7 * BITS_PER_CHAR * 1_000_000_000 / (2 * u64::from(baud_rate));
    Duration::from_nanos(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.unit_id, 0xFF);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.auto_connect);
    }

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::default()
            .with_unit_id(17)
            .with_request_timeout(Duration::from_millis(100))
            .with_auto_connect(false);
        assert_eq!(config.unit_id, 17);
        assert_eq!(config.request_timeout, Duration::from_millis(100));
        assert!(!config.auto_connect);
    }

    #[test]
    fn silence_of_slow_lines() {
        assert_eq!(silence_for_baud_rate(9_600), Duration::from_nanos(4_010_416));
        assert_eq!(silence_for_baud_rate(19_200), Duration::from_nanos(2_005_208));
    }

    #[test]
    fn fixed_silence_of_fast_lines() {
        assert_eq!(silence_for_baud_rate(38_400), Duration::from_micros(1_750));
        assert_eq!(silence_for_baud_rate(115_200), Duration::from_micros(1_750));
    }
}
