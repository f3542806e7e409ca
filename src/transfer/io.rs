// src/transfer/io.rs

//! Stream adapters used while moving payloads
//!
//! - `CancelToken`: shared cancel flag with an optional deadline
//! - `Bandwidth`: parsed `--max-bandwidth` value
//! - `TransferReader`: upload stream that checks the cancel token on every
//!   chunk and hashes the bytes it hands out
//! - `TransferWriter`: download stream that checks the cancel token on every
//!   chunk and throttles to a `Bandwidth`

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between the caller and running transfers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that trips once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with `Error::Cancelled` if the token has tripped
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(operation.to_string()));
        }
        Ok(())
    }

    fn check_io(&self) -> io::Result<()> {
        if self.is_cancelled() {
            return Err(io::Error::other(CANCELLED_MESSAGE));
        }
        Ok(())
    }
}

const CANCELLED_MESSAGE: &str = "transfer cancelled";

/// Whether an error produced by a stream adapter came from cancellation
pub fn is_cancelled_error(err: &Error) -> bool {
    match err {
        Error::Cancelled(_) => true,
        Error::IoError(msg) => msg.ends_with(CANCELLED_MESSAGE),
        Error::Io(e) => e.to_string() == CANCELLED_MESSAGE,
        _ => false,
    }
}

/// Transfer rate limit in bytes per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth(u64);

impl Bandwidth {
    pub fn bytes_per_sec(bytes: u64) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::InvalidArgument(
                "Bandwidth must be greater than zero".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes_per_sec(&self) -> u64 {
        self.0
    }

    /// Share of the limit for one of `parts` concurrent streams
    pub fn split(&self, parts: usize) -> Self {
        Self((self.0 / parts.max(1) as u64).max(1))
    }
}

impl FromStr for Bandwidth {
    type Err = Error;

    /// Accepts `"2048"`, `"1 MB"`, `"1024 KB"`, `"512KiB"`, `"10mb/s"`
    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let lower = raw.to_ascii_lowercase();
        let lower = lower.trim_end_matches("/s").trim_end_matches("ps").trim();

        let split = lower
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(lower.len());
        let (number, unit) = lower.split_at(split);

        let value: f64 = number
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("Invalid bandwidth '{}'", raw)))?;

        let multiplier: u64 = match unit.trim() {
            "" | "b" => 1,
            "k" | "kb" => 1_000,
            "m" | "mb" => 1_000_000,
            "g" | "gb" => 1_000_000_000,
            "ki" | "kib" => 1 << 10,
            "mi" | "mib" => 1 << 20,
            "gi" | "gib" => 1 << 30,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "Unknown bandwidth unit '{}' in '{}'",
                    other, raw
                )));
            }
        };

        Self::bytes_per_sec((value * multiplier as f64) as u64)
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B/s", self.0)
    }
}

/// Sleeps a stream down to a byte rate
#[derive(Debug)]
struct Throttle {
    rate: u64,
    started: Instant,
    transferred: u64,
}

impl Throttle {
    fn new(limit: Bandwidth) -> Self {
        Self {
            rate: limit.as_bytes_per_sec(),
            started: Instant::now(),
            transferred: 0,
        }
    }

    fn consume(&mut self, bytes: usize) {
        self.transferred += bytes as u64;
        let due = Duration::from_secs_f64(self.transferred as f64 / self.rate as f64);
        let elapsed = self.started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

/// Reader adapter for uploads
pub struct TransferReader<R> {
    inner: R,
    cancel: CancelToken,
    hasher: Sha256,
}

impl<R: Read> TransferReader<R> {
    pub fn new(inner: R, cancel: CancelToken) -> Self {
        Self {
            inner,
            cancel,
            hasher: Sha256::new(),
        }
    }

    /// Hex digest of every byte read so far
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: Read> Read for TransferReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancel.check_io()?;
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer adapter for downloads
pub struct TransferWriter<W> {
    inner: W,
    cancel: CancelToken,
    throttle: Option<Throttle>,
}

impl<W: Write> TransferWriter<W> {
    pub fn new(inner: W, cancel: CancelToken) -> Self {
        Self {
            inner,
            cancel,
            throttle: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<Bandwidth>) -> Self {
        self.throttle = limit.map(Throttle::new);
        self
    }
}

impl<W: Write> Write for TransferWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cancel.check_io()?;
        let n = self.inner.write(buf)?;
        if let Some(throttle) = &mut self.throttle {
            throttle.consume(n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use std::io::Cursor;

    #[test]
    fn test_bandwidth_parsing() {
        let cases = [
            ("2048", 2048),
            ("1 MB", 1_000_000),
            ("1024 KB", 1_024_000),
            ("512KiB", 512 * 1024),
            ("1.5 MiB", 1_572_864),
            ("10mb/s", 10_000_000),
            ("1 GB", 1_000_000_000),
        ];
        for (input, expected) in cases {
            let bw: Bandwidth = input.parse().unwrap();
            assert_eq!(bw.as_bytes_per_sec(), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_bandwidth_rejects_garbage() {
        for bad in ["", "fast", "10 parsecs", "0", "0 MB", "-1"] {
            assert!(bad.parse::<Bandwidth>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_bandwidth_split() {
        let bw = Bandwidth::bytes_per_sec(1000).unwrap();
        assert_eq!(bw.split(4).as_bytes_per_sec(), 250);
        assert_eq!(bw.split(0).as_bytes_per_sec(), 1000);
    }

    #[test]
    fn test_reader_hashes_what_it_reads() {
        let payload = Cursor::new(b"payload".to_vec());
        let mut reader = TransferReader::new(payload, CancelToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(reader.finish(), checksum::compute_bytes(b"payload"));
    }

    #[test]
    fn test_cancelled_token_stops_streams() {
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(token.check("push"), Err(Error::Cancelled(_))));

        let mut reader = TransferReader::new(Cursor::new(b"payload".to_vec()), token.clone());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), CANCELLED_MESSAGE);

        let mut writer = TransferWriter::new(Vec::new(), token);
        assert!(writer.write(b"x").is_err());
        assert!(is_cancelled_error(&Error::IoError(format!(
            "Failed to download k: {}",
            CANCELLED_MESSAGE
        ))));
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert!(!CancelToken::with_timeout(Duration::from_secs(3600)).is_cancelled());
    }

    #[test]
    fn test_throttled_writer_respects_rate() {
        let limit = Bandwidth::bytes_per_sec(1_000).unwrap();
        let mut sink = Vec::new();
        let started = Instant::now();
        {
            let mut writer =
                TransferWriter::new(&mut sink, CancelToken::new()).with_limit(Some(limit));
            writer.write_all(&[0u8; 200]).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(sink.len(), 200);
    }
}
