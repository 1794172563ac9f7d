//! Reads the muxed input and feeds the output channel.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::Sender;
use tracing::{debug, info};

/// Where the muxed stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// `-` selects stdin.
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Stdin => Ok(Box::new(io::stdin())),
            Self::File(path) => Ok(Box::new(open_file(path)?)),
        }
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open input {}", path.display()))
}

/// Read settings.
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// Bytes per forwarded run.
    pub chunk_bytes: usize,

    /// Pace reads to this rate; unpaced when unset.
    pub bitrate_kbps: Option<u32>,
}

/// Pump `source` into `output` until EOF. Returns the byte count.
pub fn read_input(source: &InputSource, options: &InputOptions, output: &Sender<Bytes>) -> Result<u64> {
    let mut reader = source.open()?;
    let chunk_bytes = options.chunk_bytes.max(1);
    let started = Instant::now();
    let mut total: u64 = 0;
    let mut buf = vec![0u8; chunk_bytes];

    loop {
        let n = read_full(&mut reader, &mut buf).context("Failed to read input")?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if output.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
            debug!("Output closed, stopping input");
            break;
        }
        if let Some(kbps) = options.bitrate_kbps {
            pace(started, total, kbps);
        }
    }

    info!(bytes = total, "Input finished");
    Ok(total)
}

/// Fill `buf` unless EOF comes first.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn pace(started: Instant, total: u64, kbps: u32) {
    let bytes_per_sec = u64::from(kbps.max(1)) * 1000 / 8;
    let due = Duration::from_secs_f64(total as f64 / bytes_per_sec as f64);
    if let Some(wait) = due.checked_sub(started.elapsed()) {
        thread::sleep(wait);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_reads_file_in_chunks() {
        let path = std::env::temp_dir().join(format!("livecast-input-{}.ts", std::process::id()));
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0x47u8; 3000]).unwrap();
        drop(file);

        let (tx, rx) = crossbeam_channel::unbounded();
        let options = InputOptions {
            chunk_bytes: 1316,
            bitrate_kbps: None,
        };
        let total = read_input(&InputSource::File(path.clone()), &options, &tx).unwrap();
        std::fs::remove_file(&path).unwrap();

        let sizes: Vec<usize> = rx.try_iter().map(|b| b.len()).collect();
        assert_eq!(total, 3000);
        assert_eq!(sizes, vec![1316, 1316, 368]);
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(InputSource::parse("-"), InputSource::Stdin);
        assert_eq!(
            InputSource::parse("movie.ts"),
            InputSource::File(PathBuf::from("movie.ts"))
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let options = InputOptions {
            chunk_bytes: 1316,
            bitrate_kbps: None,
        };

        assert!(read_input(&InputSource::parse("/nonexistent/livecast.ts"), &options, &tx).is_err());
    }
}
