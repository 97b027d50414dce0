//! # Sample Source Module
//!
//! Line-oriented sample input and the ingestion loop that feeds the ring
//! buffer.
//!
//! The acquisition board prints one ADC code per line, in decimal. Anything
//! that reads like that can act as a source: a serial device node set up
//! beforehand with `stty`, a capture file, stdin, or the built-in synthetic
//! generator.
//!
//! ## Line protocol
//! - One non-negative base-10 integer in `0..=1023` per line
//! - Surrounding whitespace (including a trailing `\r`) is ignored
//! - Any other line is dropped without reporting an error

use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::calibration::{CODE_MAX, CalibrationParams};
use crate::ring_buffer::{RawSample, SampleRingBuffer};

/// Pause after a failed read before trying again.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Producer of sample lines.
///
/// `Ok(None)` means the source is exhausted and will never produce again.
/// Errors are treated as transient by the ingestion loop.
pub trait SampleSource: Send {
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Parses one protocol line into a sample, or `None` if it is malformed.
pub fn parse_sample(line: &str) -> Option<RawSample> {
    let digits = line.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    if value > u32::from(CODE_MAX) {
        return None;
    }
    RawSample::try_from(value).ok()
}

/// Source reading newline-terminated samples from any buffered reader.
///
/// Lines are read as bytes. A line that is not valid UTF-8 is passed on
/// lossily converted, so the parser drops it like any other malformed line.
pub struct LineSource<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }
}

impl LineSource<BufReader<File>> {
    /// Opens a file or device node for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open sample source {}", path.display()))?;
        info!("[SOURCE] Reading samples from {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl LineSource<BufReader<io::Stdin>> {
    pub fn stdin() -> Self {
        info!("[SOURCE] Reading samples from stdin");
        Self::new(BufReader::new(io::stdin()))
    }
}

impl<R: BufRead + Send> SampleSource for LineSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.line.clear();
        match self.reader.read_until(b'\n', &mut self.line)? {
            0 => Ok(None),
            _ => Ok(Some(String::from_utf8_lossy(&self.line).into_owned())),
        }
    }
}

/// Parameters of the synthetic stand-in for the acquisition board.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Tone frequency in Hz
    pub frequency_hz: f64,
    /// Tone amplitude in physical units
    pub amplitude: f64,
    /// Peak amplitude of uniform noise, in physical units
    pub noise: f64,
    pub sample_rate: f64,
    pub calibration: CalibrationParams,
    /// When set, samples are released at `sample_rate` in real time
    pub paced: bool,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            amplitude: 5.0,
            noise: 0.1,
            sample_rate: 1000.0,
            calibration: CalibrationParams::default(),
            paced: true,
            seed: 0x5eed,
        }
    }
}

/// Sine-plus-noise generator quantized through the inverse calibration, so
/// its output is indistinguishable from the board's serial stream.
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    index: u64,
    started: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            index: 0,
            started: None,
        }
    }

    /// Next sample as an ADC code.
    pub fn next_code(&mut self) -> RawSample {
        let cfg = &self.config;
        let t = self.index as f64 / cfg.sample_rate;
        let mut value = cfg.amplitude * (2.0 * PI * cfg.frequency_hz * t).sin();
        if cfg.noise > 0.0 {
            value += self.rng.gen_range(-cfg.noise..=cfg.noise);
        }
        self.index += 1;
        cfg.calibration.physical_to_raw(value)
    }

    fn wait_for_schedule(&mut self) {
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_secs_f64(self.index as f64 / self.config.sample_rate);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl SampleSource for SyntheticSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.config.paced {
            self.wait_for_schedule();
        }
        Ok(Some(format!("{}\n", self.next_code())))
    }
}

/// Counters reported when an ingestion loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub discarded: u64,
    pub read_errors: u64,
}

/// Reads from `source` into `buffer` until `running` clears or the source
/// ends.
///
/// The flag is checked once per line; a read that blocks is not interrupted.
pub fn run_ingestion(
    source: &mut dyn SampleSource,
    buffer: &SampleRingBuffer,
    running: &Arc<AtomicBool>,
) -> IngestStats {
    let mut stats = IngestStats::default();

    while running.load(Ordering::Acquire) {
        match source.read_line() {
            Ok(Some(line)) => match parse_sample(&line) {
                Some(sample) => {
                    buffer.push(sample);
                    stats.accepted += 1;
                }
                None => stats.discarded += 1,
            },
            Ok(None) => {
                info!("[INGEST] Source exhausted");
                break;
            }
            Err(e) => {
                stats.read_errors += 1;
                debug!("[INGEST] Read failed ({}), retrying", e);
                thread::sleep(READ_RETRY_BACKOFF);
            }
        }
    }

    info!(
        "[INGEST] Loop finished: {} accepted, {} discarded, {} read errors",
        stats.accepted, stats.discarded, stats.read_errors
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Replays scripted read results, then reports end of stream.
    struct ScriptedSource {
        script: VecDeque<io::Result<Option<String>>>,
    }

    impl SampleSource for ScriptedSource {
        fn read_line(&mut self) -> io::Result<Option<String>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn test_parse_accepts_valid_codes() {
        assert_eq!(parse_sample("0"), Some(0));
        assert_eq!(parse_sample("1023\n"), Some(1023));
        assert_eq!(parse_sample(" 512\r\n"), Some(512));
        assert_eq!(parse_sample("007"), Some(7));
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for line in ["", "\n", "abc", "-5", "+5", "1024", "12.5", "1 2", "99999999999999999999"] {
            assert_eq!(parse_sample(line), None, "line {line:?}");
        }
    }

    #[test]
    fn test_ingestion_keeps_valid_lines_in_order() {
        let input = "1\ngarbage\n2\n\n3\n5000\n4\n";
        let mut source = LineSource::new(Cursor::new(input.as_bytes().to_vec()));
        let buffer = SampleRingBuffer::new(4).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let stats = run_ingestion(&mut source, &buffer, &running);

        assert_eq!(buffer.snapshot(), vec![1, 2, 3, 4]);
        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.discarded, 3);
    }

    #[test]
    fn test_non_utf8_lines_are_discarded_without_backoff() {
        let mut input = Vec::new();
        for i in 0..100u16 {
            input.extend_from_slice(b"\xff\xfe1\n");
            input.extend_from_slice(format!("{}\n", i % 1024).as_bytes());
        }
        let mut source = LineSource::new(Cursor::new(input));
        let buffer = SampleRingBuffer::new(4).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let started = Instant::now();
        let stats = run_ingestion(&mut source, &buffer, &running);

        assert_eq!(stats.accepted, 100);
        assert_eq!(stats.discarded, 100);
        assert_eq!(stats.read_errors, 0);
        assert_eq!(buffer.snapshot(), vec![96, 97, 98, 99]);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_ingestion_survives_read_errors() {
        let mut source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some("10\n".to_string())),
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
                Ok(Some("20\n".to_string())),
            ]),
        };
        let buffer = SampleRingBuffer::new(2).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let stats = run_ingestion(&mut source, &buffer, &running);

        assert_eq!(buffer.snapshot(), vec![10, 20]);
        assert_eq!(stats.read_errors, 1);
    }

    #[test]
    fn test_ingestion_exits_when_flag_is_cleared() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            paced: false,
            ..SyntheticConfig::default()
        });
        let buffer = SampleRingBuffer::new(8).unwrap();
        let running = Arc::new(AtomicBool::new(false));

        let stats = run_ingestion(&mut source, &buffer, &running);
        assert_eq!(stats, IngestStats::default());
        assert_eq!(buffer.snapshot(), vec![0; 8]);
    }

    #[test]
    fn test_synthetic_lines_follow_protocol() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            paced: false,
            ..SyntheticConfig::default()
        });
        for _ in 0..200 {
            let line = source.read_line().unwrap().unwrap();
            assert!(line.ends_with('\n'));
            assert!(parse_sample(&line).is_some(), "line {line:?}");
        }
    }

    #[test]
    fn test_synthetic_tone_swings_around_midscale() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            amplitude: 6.0,
            noise: 0.0,
            paced: false,
            ..SyntheticConfig::default()
        });
        let codes: Vec<RawSample> = (0..1000).map(|_| source.next_code()).collect();
        let min = *codes.iter().min().unwrap();
        let max = *codes.iter().max().unwrap();
        assert!(min < 200 && max > 800, "range {min}..{max}");
    }
}
