//! Builds the transport a configuration asks for.

use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use livecast_ipc::StreamConfig;
use livecast_transport::rtmp::RtmpSocketConfig;
use livecast_transport::srt::{self, SrtApi, SrtSocketConfig};
use livecast_transport::{
    ReconnectPolicy, RtmpTransport, SrtTransport, Transport, TransportError, TransportKind,
};

use crate::error::{EngineError, EngineResult};

/// Creates transports from [`StreamConfig`]s.
pub struct TransportFactory {
    srt_api: Option<Arc<dyn SrtApi>>,
}

impl TransportFactory {
    /// Use the SRT library bundled with this build, if any.
    pub fn new() -> Self {
        Self {
            srt_api: srt::default_api(),
        }
    }

    pub fn with_srt_api(api: Arc<dyn SrtApi>) -> Self {
        Self { srt_api: Some(api) }
    }

    /// Reject every `srt://` URL.
    pub fn without_srt() -> Self {
        Self { srt_api: None }
    }

    pub fn supports_srt(&self) -> bool {
        self.srt_api.is_some()
    }

    /// Validate `config` and build its transport. Nothing connects yet.
    #[instrument(name = "create_transport", skip(self, config), fields(url = %config.url))]
    pub fn create(&self, config: &StreamConfig) -> EngineResult<Arc<dyn Transport>> {
        config.validate()?;
        let url = Url::parse(&config.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", config.url, e)))?;

        let transport: Arc<dyn Transport> = match TransportKind::from_url(&url)? {
            TransportKind::Rtmp => {
                let mut transport = RtmpTransport::from_url(&url, rtmp_config(config))?;
                if let Some(size) = config.chunk_size {
                    transport = transport.with_chunk_size(size as usize);
                }
                Arc::new(transport)
            }
            TransportKind::Srt => {
                let api = self.srt_api.clone().ok_or(EngineError::SrtUnavailable)?;
                Arc::new(SrtTransport::new(url, api, srt_config(config)))
            }
        };

        debug!(kind = transport.kind().name(), "Transport created");
        Ok(transport)
    }
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn rtmp_config(config: &StreamConfig) -> RtmpSocketConfig {
    RtmpSocketConfig {
        connect_timeout: config.connect_timeout(),
        write_timeout: config.write_timeout(),
        handshake_timeout: config.handshake_timeout(),
        statistics_interval: config.statistics_interval(),
        statistics_window: config.statistics_window,
        ..RtmpSocketConfig::default()
    }
}

fn srt_config(config: &StreamConfig) -> SrtSocketConfig {
    SrtSocketConfig {
        poll_interval: config.srt_poll_interval(),
        send_timeout: config.srt_send_timeout(),
        statistics_interval: config.statistics_interval(),
        statistics_window: config.statistics_window,
        ..SrtSocketConfig::default()
    }
}

/// Backoff settings of `config`.
pub fn reconnect_policy(config: &StreamConfig) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: config.reconnect.max_attempts,
        base_delay: std::time::Duration::from_millis(config.reconnect.base_delay_ms),
        max_delay: std::time::Duration::from_millis(config.reconnect.max_delay_ms),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use livecast_ipc::ConfigError;
    use livecast_transport::srt::MockSrt;

    use super::*;

    #[test]
    fn test_creates_by_scheme() {
        let factory = TransportFactory::with_srt_api(Arc::new(MockSrt::new()));

        let rtmp = factory
            .create(&StreamConfig::with_url("rtmp://localhost/live"))
            .unwrap();
        let srt = factory
            .create(&StreamConfig::with_url("srt://localhost:9000?latency=120"))
            .unwrap();

        assert_eq!(rtmp.kind(), TransportKind::Rtmp);
        assert_eq!(srt.kind(), TransportKind::Srt);
    }

    #[test]
    fn test_rejects_bad_config() {
        let factory = TransportFactory::without_srt();

        assert!(matches!(
            factory.create(&StreamConfig::default()),
            Err(EngineError::Config(ConfigError::MissingUrl))
        ));
        assert!(matches!(
            factory.create(&StreamConfig::with_url("http://localhost/live")),
            Err(EngineError::Transport(TransportError::InvalidUrl(_)))
        ));
        assert!(matches!(
            factory.create(&StreamConfig::with_url("srt://localhost:9000")),
            Err(EngineError::SrtUnavailable)
        ));
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let mut config = StreamConfig::with_url("rtmp://localhost/live");
        config.reconnect.max_attempts = 2;
        config.reconnect.base_delay_ms = 250;

        let policy = reconnect_policy(&config);

        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
    }
}
