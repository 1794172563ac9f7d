//! SRT caller transport over a native SRT library.

#[cfg(feature = "libsrt")]
mod ffi;
#[cfg(any(test, feature = "test-util"))]
mod mock;
mod native;
mod option;
mod socket;
mod transport;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stats::SocketStatistics;
use crate::DEFAULT_STATISTICS_WINDOW;

#[cfg(feature = "libsrt")]
pub use ffi::LibSrt;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSrt;
pub use native::{RawSocket, SrtApi, SrtHandle};
pub use option::{OptionBinding, OptionType, OptionValue, SrtOptions, SrtSocketOption};
pub use socket::SrtSocket;
pub use transport::SrtTransport;

/// Largest payload carried by one SRT live-mode packet (7 TS packets).
pub const PAYLOAD_SIZE: usize = 1316;

/// The native library bundled with this build, if any.
pub fn default_api() -> Option<std::sync::Arc<dyn SrtApi>> {
    #[cfg(feature = "libsrt")]
    {
        match LibSrt::new() {
            Ok(api) => Some(std::sync::Arc::new(api)),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }
    #[cfg(not(feature = "libsrt"))]
    {
        None
    }
}

/// Native socket status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrtSocketStatus {
    #[default]
    Init,
    Opened,
    Listening,
    Connecting,
    Connected,
    Broken,
    Closing,
    Closed,
    /// The socket does not exist.
    Invalid,
}

impl SrtSocketStatus {
    /// Map a native `SRT_SOCKSTATUS` value.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Init,
            2 => Self::Opened,
            3 => Self::Listening,
            4 => Self::Connecting,
            5 => Self::Connected,
            6 => Self::Broken,
            7 => Self::Closing,
            8 => Self::Closed,
            _ => Self::Invalid,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Opened => "Opened",
            Self::Listening => "Listening",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Broken => "Broken",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for SrtSocketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receiver of SRT socket notifications, held weakly by the socket.
pub trait SrtSocketDelegate: Send + Sync {
    /// The polled status changed.
    fn status(&self, status: SrtSocketStatus);

    /// A new statistics sample was taken.
    fn did_update_statistics(&self, _statistics: &SocketStatistics) {}
}

/// SRT socket tuning.
#[derive(Debug, Clone)]
pub struct SrtSocketConfig {
    /// Status polling period.
    pub poll_interval: Duration,

    /// Applied as `sndtimeo` after connect when set.
    pub send_timeout: Option<Duration>,

    /// Payload split size for `write`.
    pub payload_size: usize,

    /// Sampling period of the statistics windows.
    pub statistics_interval: Duration,

    /// Samples kept per statistics window.
    pub statistics_window: usize,
}

impl Default for SrtSocketConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(30),
            send_timeout: None,
            payload_size: PAYLOAD_SIZE,
            statistics_interval: Duration::from_secs(1),
            statistics_window: DEFAULT_STATISTICS_WINDOW,
        }
    }
}
