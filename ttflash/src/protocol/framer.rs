//! Line framing for the board's text output.
//!
//! The transport delivers arbitrarily sized chunks; this module turns them
//! into complete lines. Lines are split on `\n` and a single `\r` directly
//! before the `\n` is dropped, so both `\n` and `\r\n` terminators yield the
//! same line and `\r\n` never produces an extra empty line.
//!
//! Splitting happens on raw bytes before UTF-8 decoding. `\n` cannot occur
//! inside a multi-byte UTF-8 sequence, so the output does not depend on where
//! the transport happened to cut the stream. Invalid UTF-8 is replaced with
//! `U+FFFD`.
//!
//! No line length limit is enforced: a stream without terminators grows the
//! pending buffer until the allocator gives up, which aborts the process.

use std::collections::VecDeque;
use std::io::{self, Read};

/// Default read size used by [`FramedLines`].
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Incremental byte-to-line splitter.
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            if self.pending.is_empty() {
                lines.push(decode_line(head));
            } else {
                self.pending.extend_from_slice(head);
                lines.push(decode_line(&self.pending));
                self.pending.clear();
            }
            rest = &tail[1..];
        }

        self.pending.extend_from_slice(rest);
        lines
    }

    /// Flush the trailing unterminated fragment, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lazy sequence of lines read from a byte stream.
///
/// Yields `Ok(line)` for each complete line and passes read errors through
/// (including timeouts, after which iteration may simply continue). On end
/// of stream the trailing fragment is flushed and the sequence ends for good.
pub struct FramedLines<R> {
    reader: R,
    framer: LineFramer,
    ready: VecDeque<String>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> FramedLines<R> {
    /// Frame lines from `reader` using the default chunk size.
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    /// Frame lines from `reader`, reading at most `chunk_size` bytes at a time.
    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            framer: LineFramer::new(),
            ready: VecDeque::new(),
            buf: vec![0u8; chunk_size.max(1)],
            done: false,
        }
    }
}

impl<R: Read> Iterator for FramedLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    if let Some(line) = self.framer.finish() {
                        return Some(Ok(line));
                    }
                    return None;
                },
                Ok(n) => {
                    let lines = self.framer.push(&self.buf[..n]);
                    self.ready.extend(lines);
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_in_chunks(data: &[u8], sizes: &[usize]) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        let mut rest = data;
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].min(rest.len());
            lines.extend(framer.push(&rest[..n]));
            rest = &rest[n..];
            i += 1;
        }
        lines.extend(framer.finish());
        lines
    }

    #[test]
    fn test_splits_lf_and_crlf() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"one\ntwo\r\nthree");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(framer.finish().as_deref(), Some("three"));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_crlf_split_across_reads_adds_no_empty_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"abc\r").is_empty());
        assert_eq!(framer.push(b"\ndef\r\n"), vec!["abc", "def"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_read_boundaries_do_not_change_output() {
        let data = "tt.sdk_version=release_v1.2.3\r\nBOOT: ok\n\x04>OK\x04\r\nflash_prog=100000\r\n温度=42\r\ntail"
            .as_bytes();
        let whole = frame_in_chunks(data, &[data.len()]);
        for sizes in [&[1][..], &[2, 3], &[7], &[5, 1, 11], &[64]] {
            assert_eq!(frame_in_chunks(data, sizes), whole, "chunk sizes {sizes:?}");
        }
        assert_eq!(whole.len(), 6);
        assert_eq!(whole[4], "温度=42");
        assert_eq!(whole[5], "tail");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\xFFb\n"), vec!["a\u{FFFD}b"]);
    }

    #[test]
    fn test_framed_lines_flushes_fragment_at_eof() {
        let reader = io::Cursor::new(b"first\r\nsecond\nthird".to_vec());
        let lines: Vec<String> = FramedLines::with_chunk_size(reader, 3)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_framed_lines_passes_timeouts_through_and_continues() {
        struct Flaky {
            calls: usize,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.calls += 1;
                match self.calls {
                    1 => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
                    2 => {
                        buf[..3].copy_from_slice(b"ok\n");
                        Ok(3)
                    },
                    _ => Ok(0),
                }
            }
        }

        let mut lines = FramedLines::new(Flaky { calls: 0 });
        let first = lines.next().unwrap().unwrap_err();
        assert_eq!(first.kind(), io::ErrorKind::TimedOut);
        assert_eq!(lines.next().unwrap().unwrap(), "ok");
        assert!(lines.next().is_none());
        assert!(lines.next().is_none());
    }
}
