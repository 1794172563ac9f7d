//! Command-line publisher.
//!
//! Reads a muxed byte stream (MPEG-TS for SRT, raw messages for RTMP)
//! from a file or stdin and publishes it through the engine.

mod input;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livecast_engine::{ChannelPump, Engine, OutputPump};
use livecast_ipc::{command_channel, event_channel, EngineCommand, EngineEvent, StreamConfig};

use crate::input::{read_input, InputOptions, InputSource};

#[derive(Parser, Debug)]
#[command(name = "livecast")]
#[command(about = "Publish a muxed stream to an RTMP or SRT server", long_about = None)]
struct Args {
    /// TOML stream configuration
    #[arg(long, short, env = "LIVECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Target URL, overrides the configuration file
    #[arg(long, env = "LIVECAST_URL")]
    url: Option<String>,

    /// Input file, or - for stdin
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Bytes per payload handed to the transport
    #[arg(long, default_value = "1316")]
    chunk_bytes: usize,

    /// Pace the input to this bitrate
    #[arg(long)]
    bitrate_kbps: Option<u32>,

    /// Print engine events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "livecast=debug,livecast_engine=debug,livecast_transport=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>, url: Option<String>) -> Result<StreamConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => StreamConfig::default(),
    };
    if let Some(url) = url {
        config.url = url;
    }
    config.validate().context("Invalid stream configuration")?;
    Ok(config)
}

/// Ask the engine to shut down on Ctrl-C.
fn watch_ctrl_c(commands: Sender<EngineCommand>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    thread::Builder::new()
        .name("livecast-signal".to_string())
        .spawn(move || {
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                info!("Received shutdown signal");
                let _ = commands.send(EngineCommand::Shutdown);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Feed the input, then shut down once the output queue drained.
fn spawn_input(
    source: InputSource,
    options: InputOptions,
    output: Sender<Bytes>,
    commands: Sender<EngineCommand>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("livecast-input".to_string())
        .spawn(move || {
            if let Err(e) = read_input(&source, &options, &output) {
                error!("{:#}", e);
            }
            while !output.is_empty() {
                thread::sleep(Duration::from_millis(50));
            }
            let _ = commands.send(EngineCommand::Shutdown);
        })
        .context("Failed to spawn input thread")
}

/// Log engine events until shutdown. Returns the fatal error, if any.
fn handle_events(
    events: &Receiver<EngineEvent>,
    commands: &Sender<EngineCommand>,
    json: bool,
) -> Option<String> {
    let mut fatal = None;
    for event in events.iter() {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
        }

        match &event {
            EngineEvent::StateChanged { previous, current } => {
                info!("State: {} -> {}", previous.name(), current.name());
            }
            EngineEvent::Transport(status) => debug!(?status, "Transport"),
            EngineEvent::Metrics(metrics) => debug!(
                sent_bps = metrics.sent_bytes_per_sec,
                discard_percent = metrics.discard_percent,
                queue = metrics.queue_bytes_out,
                "Metrics"
            ),
            EngineEvent::Warning(warning) => warn!(?warning, "Performance warning"),
            EngineEvent::Reconnecting {
                attempt,
                max_attempts,
                delay_ms,
            } => warn!("Reconnecting {}/{} in {} ms", attempt, max_attempts, delay_ms),
            EngineEvent::Error {
                recoverable,
                message,
            } => {
                error!(recoverable, "{}", message);
                fatal = Some(message.clone());
                let _ = commands.send(EngineCommand::Shutdown);
            }
            EngineEvent::Ready => debug!("Engine ready"),
            EngineEvent::Shutdown => break,
        }
    }
    fatal
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = load_config(args.config.as_deref(), args.url.clone())?;
    info!(url = %config.url, "livecast starting");

    // Create IPC channels
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let (output_tx, output_rx) = crossbeam_channel::bounded::<Bytes>(256);

    // Start engine in background thread
    let engine = thread::Builder::new()
        .name("livecast-engine".to_string())
        .spawn(move || {
            let mut engine = Engine::new(command_rx, event_tx).with_output(move || {
                Box::new(ChannelPump::new(output_rx.clone())) as Box<dyn OutputPump>
            });
            engine.run();
        })
        .context("Failed to spawn engine thread")?;

    watch_ctrl_c(command_tx.clone())?;
    command_tx
        .send(EngineCommand::Publish { config })
        .context("Engine is not running")?;

    let options = InputOptions {
        chunk_bytes: args.chunk_bytes,
        bitrate_kbps: args.bitrate_kbps,
    };
    let _input = spawn_input(
        InputSource::parse(&args.input),
        options,
        output_tx,
        command_tx.clone(),
    )?;

    let fatal = handle_events(&event_rx, &command_tx, args.json_events);
    if engine.join().is_err() {
        bail!("Engine thread panicked");
    }

    match fatal {
        Some(message) => bail!(message),
        None => {
            info!("livecast stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_flag_overrides_config() {
        let path = std::env::temp_dir().join(format!("livecast-{}.toml", std::process::id()));
        std::fs::write(&path, "url = \"rtmp://config/live\"\nwrite_timeout_ms = 300\n").unwrap();

        let config = load_config(Some(&path), Some("srt://flag:9000".to_string())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.url, "srt://flag:9000");
        assert_eq!(config.write_timeout_ms, 300);
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(load_config(None, None).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args =
            Args::try_parse_from(["livecast", "--url", "rtmp://host/live", "-i", "in.flv"]).unwrap();

        assert_eq!(args.url.as_deref(), Some("rtmp://host/live"));
        assert_eq!(args.input, "in.flv");
        assert_eq!(args.chunk_bytes, 1316);
    }
}
