use crate::logging::append_run_log;
use crate::runtime::Clock;
use crate::types::{OutputLog, TimestampedUnit};
use serde_json::json;
use std::io::{self, BufRead, BufReader, Read};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOutcome {
    pub log: OutputLog,
    pub error: Option<String>,
}

pub struct OutputRecorder<'a> {
    clock: &'a dyn Clock,
}

impl<'a> OutputRecorder<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self { clock }
    }

    pub fn record(&self, mut reader: impl Read) -> RecorderOutcome {
        let mut log = OutputLog::new();
        let mut decoder = Utf8Decoder::default();
        let mut decoded = Vec::new();
        let mut buf = [0u8; 4096];
        let mut error = None;

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        decoder.push(byte, &mut decoded);
                    }
                    for ch in decoded.drain(..) {
                        log.push(TimestampedUnit::new(self.clock.now(), ch.to_string()));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    append_run_log(
                        "warn",
                        "recorder.read_failed",
                        json!({ "captured": log.len(), "error": err.to_string() }),
                    );
                    error = Some(err.to_string());
                    break;
                }
            }
        }

        if decoder.finish() {
            log.push(TimestampedUnit::new(
                self.clock.now(),
                char::REPLACEMENT_CHARACTER.to_string(),
            ));
        }

        RecorderOutcome { log, error }
    }
}

pub fn capture_lines(reader: impl Read) -> Vec<String> {
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                lines.push(text.trim_end_matches(['\n', '\r']).to_string());
            }
        }
    }
    lines
}

#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
    expected: usize,
}

impl Utf8Decoder {
    fn push(&mut self, byte: u8, out: &mut Vec<char>) {
        if self.pending.is_empty() {
            match sequence_width(byte) {
                1 => out.push(char::from(byte)),
                0 => out.push(char::REPLACEMENT_CHARACTER),
                width => {
                    self.pending.push(byte);
                    self.expected = width;
                }
            }
            return;
        }

        if byte & 0xC0 != 0x80 {
            // truncated sequence; restart on this byte
            self.pending.clear();
            out.push(char::REPLACEMENT_CHARACTER);
            self.push(byte, out);
            return;
        }

        self.pending.push(byte);
        if self.pending.len() == self.expected {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => out.extend(text.chars()),
                Err(_) => out.push(char::REPLACEMENT_CHARACTER),
            }
            self.pending.clear();
        }
    }

    fn finish(&mut self) -> bool {
        let incomplete = !self.pending.is_empty();
        self.pending.clear();
        incomplete
    }
}

fn sequence_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}
