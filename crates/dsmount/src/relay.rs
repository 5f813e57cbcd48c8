//! Copies worker output to the supervisor's stdout.
//!
//! The relay runs on a detached thread that is never joined: it ends when
//! the worker closes its end of the pipe or the sink stops accepting writes.
//! It touches nothing but the pipe and its sink, so teardown never waits on
//! it.

use std::io::{BufRead, BufReader, Read, Write};

pub trait OutputRelay: Send + Sync {
    /// Start relaying `source` in the background. Must not block.
    fn relay(&self, source: Box<dyn Read + Send>, label: String);
}

/// Forwards each worker line to the process stdout, so interactive prompts
/// from the worker (device-code login and the like) reach the user.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutRelay;

impl OutputRelay for StdoutRelay {
    fn relay(&self, source: Box<dyn Read + Send>, label: String) {
        let name = format!("dsmount-relay-{}", label);
        let spawned = std::thread::Builder::new()
            .name(name)
            .spawn(move || relay_lines(source, std::io::stdout(), &label));
        if let Err(e) = spawned {
            tracing::warn!("Could not start output relay thread: {}", e);
        }
    }
}

/// Drains worker output without showing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardRelay;

impl OutputRelay for DiscardRelay {
    fn relay(&self, source: Box<dyn Read + Send>, label: String) {
        let spawned = std::thread::Builder::new()
            .name(format!("dsmount-drain-{}", label))
            .spawn(move || relay_lines(source, std::io::sink(), &label));
        if let Err(e) = spawned {
            tracing::warn!("Could not start output drain thread: {}", e);
        }
    }
}

/// Copy `source` to `sink` line by line until EOF or the first error.
/// Returns the number of lines copied.
pub fn relay_lines<R: Read, W: Write>(source: R, mut sink: W, label: &str) -> u64 {
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    let mut copied = 0u64;

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if let Err(e) = sink.write_all(&line).and_then(|_| sink.flush()) {
                    tracing::debug!("Relay {} sink closed: {}", label, e);
                    break;
                }
                copied += 1;
            }
            Err(e) => {
                tracing::debug!("Relay {} source closed: {}", label, e);
                break;
            }
        }
    }

    tracing::debug!("Relay {} finished after {} lines", label, copied);
    copied
}
