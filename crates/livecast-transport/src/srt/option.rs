//! SRT socket option catalogue and URL query parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use super::native::SrtHandle;
use crate::error::TransportError;
use crate::TransportResult;

/// When an option may be applied to a caller socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionBinding {
    /// Before `srt_connect`.
    Pre,
    /// After the connection is established.
    Post,
}

/// Native value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Int32,
    Int64,
    String,
    /// `live` or `file`, stored as an int32.
    TransType,
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl OptionValue {
    /// Parse a textual value as `ty`.
    pub fn parse(ty: OptionType, text: &str) -> Option<Self> {
        match ty {
            OptionType::Bool => match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(Self::Bool(true)),
                "0" | "false" | "no" | "off" => Some(Self::Bool(false)),
                _ => None,
            },
            OptionType::Int32 => text.parse().ok().map(Self::Int32),
            OptionType::Int64 => text.parse().ok().map(Self::Int64),
            OptionType::String => Some(Self::String(text.to_string())),
            OptionType::TransType => match text {
                "live" => Some(Self::Int32(0)),
                "file" => Some(Self::Int32(1)),
                _ => None,
            },
        }
    }

    fn matches(&self, ty: OptionType) -> bool {
        matches!(
            (self, ty),
            (Self::Bool(_), OptionType::Bool)
                | (Self::Int32(_), OptionType::Int32 | OptionType::TransType)
                | (Self::Int64(_), OptionType::Int64)
                | (Self::String(_), OptionType::String)
        )
    }
}

/// Options settable on a caller socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SrtSocketOption {
    Mss,
    SndSyn,
    RcvSyn,
    Fc,
    SndBuf,
    RcvBuf,
    UdpSndBuf,
    UdpRcvBuf,
    Rendezvous,
    SndTimeo,
    RcvTimeo,
    ReuseAddr,
    MaxBw,
    TsbpdMode,
    Latency,
    InputBw,
    OheadBw,
    Passphrase,
    PbKeyLen,
    IpTtl,
    IpTos,
    TlPktDrop,
    SndDropDelay,
    NakReport,
    ConnTimeo,
    MinInputBw,
    LossMaxTtl,
    RcvLatency,
    PeerLatency,
    MinVersion,
    StreamId,
    Congestion,
    MessageApi,
    PayloadSize,
    TransType,
    KmRefreshRate,
    KmPreAnnounce,
    EnforcedEncryption,
    PeerIdleTimeo,
    PacketFilter,
}

impl SrtSocketOption {
    pub const ALL: &'static [Self] = &[
        Self::Mss,
        Self::SndSyn,
        Self::RcvSyn,
        Self::Fc,
        Self::SndBuf,
        Self::RcvBuf,
        Self::UdpSndBuf,
        Self::UdpRcvBuf,
        Self::Rendezvous,
        Self::SndTimeo,
        Self::RcvTimeo,
        Self::ReuseAddr,
        Self::MaxBw,
        Self::TsbpdMode,
        Self::Latency,
        Self::InputBw,
        Self::OheadBw,
        Self::Passphrase,
        Self::PbKeyLen,
        Self::IpTtl,
        Self::IpTos,
        Self::TlPktDrop,
        Self::SndDropDelay,
        Self::NakReport,
        Self::ConnTimeo,
        Self::MinInputBw,
        Self::LossMaxTtl,
        Self::RcvLatency,
        Self::PeerLatency,
        Self::MinVersion,
        Self::StreamId,
        Self::Congestion,
        Self::MessageApi,
        Self::PayloadSize,
        Self::TransType,
        Self::KmRefreshRate,
        Self::KmPreAnnounce,
        Self::EnforcedEncryption,
        Self::PeerIdleTimeo,
        Self::PacketFilter,
    ];

    /// Query parameter name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mss => "mss",
            Self::SndSyn => "sndsyn",
            Self::RcvSyn => "rcvsyn",
            Self::Fc => "fc",
            Self::SndBuf => "sndbuf",
            Self::RcvBuf => "rcvbuf",
            Self::UdpSndBuf => "udpsndbuf",
            Self::UdpRcvBuf => "udprcvbuf",
            Self::Rendezvous => "rendezvous",
            Self::SndTimeo => "sndtimeo",
            Self::RcvTimeo => "rcvtimeo",
            Self::ReuseAddr => "reuseaddr",
            Self::MaxBw => "maxbw",
            Self::TsbpdMode => "tsbpdmode",
            Self::Latency => "latency",
            Self::InputBw => "inputbw",
            Self::OheadBw => "oheadbw",
            Self::Passphrase => "passphrase",
            Self::PbKeyLen => "pbkeylen",
            Self::IpTtl => "ipttl",
            Self::IpTos => "iptos",
            Self::TlPktDrop => "tlpktdrop",
            Self::SndDropDelay => "snddropdelay",
            Self::NakReport => "nakreport",
            Self::ConnTimeo => "conntimeo",
            Self::MinInputBw => "mininputbw",
            Self::LossMaxTtl => "lossmaxttl",
            Self::RcvLatency => "rcvlatency",
            Self::PeerLatency => "peerlatency",
            Self::MinVersion => "minversion",
            Self::StreamId => "streamid",
            Self::Congestion => "congestion",
            Self::MessageApi => "messageapi",
            Self::PayloadSize => "payloadsize",
            Self::TransType => "transtype",
            Self::KmRefreshRate => "kmrefreshrate",
            Self::KmPreAnnounce => "kmpreannounce",
            Self::EnforcedEncryption => "enforcedencryption",
            Self::PeerIdleTimeo => "peeridletimeo",
            Self::PacketFilter => "packetfilter",
        }
    }

    /// `SRT_SOCKOPT` value.
    pub fn native_id(self) -> i32 {
        match self {
            Self::Mss => 0,
            Self::SndSyn => 1,
            Self::RcvSyn => 2,
            Self::Fc => 4,
            Self::SndBuf => 5,
            Self::RcvBuf => 6,
            Self::UdpSndBuf => 8,
            Self::UdpRcvBuf => 9,
            Self::Rendezvous => 12,
            Self::SndTimeo => 13,
            Self::RcvTimeo => 14,
            Self::ReuseAddr => 15,
            Self::MaxBw => 16,
            Self::TsbpdMode => 22,
            Self::Latency => 23,
            Self::InputBw => 24,
            Self::OheadBw => 25,
            Self::Passphrase => 26,
            Self::PbKeyLen => 27,
            Self::IpTtl => 29,
            Self::IpTos => 30,
            Self::TlPktDrop => 31,
            Self::SndDropDelay => 32,
            Self::NakReport => 33,
            Self::ConnTimeo => 36,
            Self::MinInputBw => 38,
            Self::LossMaxTtl => 42,
            Self::RcvLatency => 43,
            Self::PeerLatency => 44,
            Self::MinVersion => 45,
            Self::StreamId => 46,
            Self::Congestion => 47,
            Self::MessageApi => 48,
            Self::PayloadSize => 49,
            Self::TransType => 50,
            Self::KmRefreshRate => 51,
            Self::KmPreAnnounce => 52,
            Self::EnforcedEncryption => 53,
            Self::PeerIdleTimeo => 55,
            Self::PacketFilter => 60,
        }
    }

    pub fn value_type(self) -> OptionType {
        match self {
            Self::SndSyn
            | Self::RcvSyn
            | Self::Rendezvous
            | Self::ReuseAddr
            | Self::TsbpdMode
            | Self::TlPktDrop
            | Self::NakReport
            | Self::MessageApi
            | Self::EnforcedEncryption => OptionType::Bool,
            Self::MaxBw | Self::InputBw | Self::MinInputBw => OptionType::Int64,
            Self::Passphrase | Self::StreamId | Self::Congestion | Self::PacketFilter => {
                OptionType::String
            }
            Self::TransType => OptionType::TransType,
            _ => OptionType::Int32,
        }
    }

    pub fn binding(self) -> OptionBinding {
        match self {
            Self::SndSyn
            | Self::RcvSyn
            | Self::SndTimeo
            | Self::RcvTimeo
            | Self::MaxBw
            | Self::InputBw
            | Self::MinInputBw
            | Self::OheadBw
            | Self::SndDropDelay
            | Self::LossMaxTtl => OptionBinding::Post,
            _ => OptionBinding::Pre,
        }
    }

    /// Look an option up by its query parameter name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|option| option.name() == name)
    }
}

/// A set of option values, at most one per option.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SrtOptions {
    values: BTreeMap<SrtSocketOption, OptionValue>,
}

impl SrtOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect options from the URL query. Unknown keys are ignored.
    pub fn from_uri(uri: &Url) -> TransportResult<Self> {
        let mut options = Self::new();
        for (key, value) in uri.query_pairs() {
            let Some(option) = SrtSocketOption::from_name(&key) else {
                debug!(key = %key, "Ignoring unknown SRT option");
                continue;
            };
            let parsed = OptionValue::parse(option.value_type(), &value).ok_or_else(|| {
                TransportError::InvalidArgument(format!(
                    "Invalid value for {}: {}",
                    option.name(),
                    value
                ))
            })?;
            options.values.insert(option, parsed);
        }
        Ok(options)
    }

    /// Set an option, replacing any previous value.
    pub fn insert(&mut self, option: SrtSocketOption, value: OptionValue) -> TransportResult<()> {
        if !value.matches(option.value_type()) {
            return Err(TransportError::InvalidArgument(format!(
                "Wrong value type for {}",
                option.name()
            )));
        }
        self.values.insert(option, value);
        Ok(())
    }

    /// Set a millisecond duration option.
    pub fn insert_millis(&mut self, option: SrtSocketOption, duration: Duration) -> TransportResult<()> {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        self.insert(option, OptionValue::Int32(millis))
    }

    pub fn get(&self, option: SrtSocketOption) -> Option<&OptionValue> {
        self.values.get(&option)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Options with the given binding.
    pub fn with_binding(
        &self,
        binding: OptionBinding,
    ) -> impl Iterator<Item = (SrtSocketOption, &OptionValue)> {
        self.values
            .iter()
            .filter(move |(option, _)| option.binding() == binding)
            .map(|(option, value)| (*option, value))
    }

    /// Apply every option with `binding` to the socket.
    ///
    /// All options are attempted; the failures are reported together.
    pub fn configure(&self, handle: &SrtHandle, binding: OptionBinding) -> TransportResult<()> {
        let failures: Vec<String> = self
            .with_binding(binding)
            .filter_map(|(option, value)| match handle.set_option(option, value) {
                Ok(()) => None,
                Err(e) => {
                    warn!(option = option.name(), "Failed to set SRT option: {}", e);
                    Some(option.name().to_string())
                }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::InvalidArgument(format!(
                "Failed to set options: {}",
                failures.join(", ")
            )))
        }
    }
}
