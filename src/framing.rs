use std::collections::VecDeque;
use tracing::warn;

use crate::config::REASSEMBLY_WARN_BYTES;

/// Record tags that may start a new message in the middle of a line.
pub const TAGS: [&str; 6] = [
    "+SWQUERY:",
    "+MRSTATUS:",
    "+SWRDSTATUS:",
    "+SWRSSI:",
    "+NBAPN:",
    "+NBMQTT:",
];

/// Turns arbitrary byte chunks into lines ending in `\r\n`, `\r` or `\n`.
/// Records glued onto one line are split again in front of each known tag.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    // Kept as bytes so a UTF-8 sequence split across chunks decodes intact
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    warned: bool,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the logical lines it completes.
    ///
    /// The iterator is lazy: lines not pulled before it is dropped stay
    /// buffered and come out of the next `feed`.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);

        if self.buffer.len() > REASSEMBLY_WARN_BYTES && !self.warned {
            warn!(
                pending = self.buffer.len(),
                "no line terminator received, reassembly buffer keeps growing"
            );
            self.warned = true;
        }

        Frames { reassembler: self }
    }

    /// Drop any partial line, e.g. when the link goes away.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.warned = false;
    }

    /// Bytes received that do not yet form a complete line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }

            let pos = self
                .buffer
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')?;
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..pos]);
            self.pending.extend(split_tagged(text.trim()));

            if self.buffer.len() <= REASSEMBLY_WARN_BYTES {
                self.warned = false;
            }
        }
    }
}

/// Lazy sequence of trimmed, non-empty logical lines.
pub struct Frames<'a> {
    reassembler: &'a mut FrameReassembler,
}

impl Iterator for Frames<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.reassembler.next_line()
    }
}

/// Split a physical line in front of every tag occurrence.
pub fn split_tagged(line: &str) -> Vec<String> {
    let mut cuts: Vec<usize> = TAGS
        .iter()
        .flat_map(|tag| line.match_indices(tag).map(|(i, _)| i))
        .collect();
    cuts.push(0);
    cuts.push(line.len());
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .map(|w| line[w[0]..w[1]].trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
