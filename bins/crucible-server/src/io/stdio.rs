// Demultiplexing of the container runtime's framed stdio stream.
//
// When a container runs without a TTY the daemon multiplexes stdout and
// stderr onto one byte stream, prefixing every chunk with an 8-byte header:
// [stream id][three reserved bytes][payload length, u32 big-endian]. The
// decoder below is incremental: a header or payload may arrive split across
// reads.

use bollard::container::LogOutput;
use futures_util::{Stream, StreamExt};
use tracing::warn;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_id(id: u8) -> Self {
        match id {
            0 => StreamKind::Stdin,
            2 => StreamKind::Stderr,
            _ => StreamKind::Stdout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub payload: Vec<u8>,
}

/// Incremental frame decoder. Feed it raw bytes as they arrive; it yields
/// complete frames and buffers any partial header/payload for the next push.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if self.pending.len() < HEADER_LEN {
                break;
            }
            let len = u32::from_be_bytes([
                self.pending[4],
                self.pending[5],
                self.pending[6],
                self.pending[7],
            ]) as usize;
            if self.pending.len() < HEADER_LEN + len {
                break;
            }
            let kind = StreamKind::from_id(self.pending[0]);
            let payload = self.pending[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.pending.drain(..HEADER_LEN + len);
            frames.push(Frame { kind, payload });
        }
        frames
    }

    /// True when no partially received frame is buffered.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Merge one demultiplexed segment into the captured output.
///
/// Segments are treated line-wise: a trailing newline is normalized away,
/// empty segments are dropped, and every surviving segment contributes
/// exactly one line.
pub fn append_segment(out: &mut String, payload: &[u8]) {
    let text = String::from_utf8_lossy(payload);
    let line = text.strip_suffix('\n').unwrap_or(&text);
    if line.is_empty() {
        return;
    }
    out.push_str(line);
    out.push('\n');
}

/// Decode a complete raw multiplexed stream, delivered in arbitrary chunks,
/// into merged output text.
pub fn demux_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut decoder = FrameDecoder::new();
    let mut out = String::new();
    for chunk in chunks {
        for frame in decoder.push(chunk) {
            append_segment(&mut out, &frame.payload);
        }
    }
    out
}

/// Drain a container log stream to completion, merging stdout and stderr in
/// arrival order. Stream errors end the capture with whatever was read; the
/// end of a force-stopped container surfaces here as an abrupt end-of-stream.
pub async fn collect_log_stream<S>(mut stream: S) -> String
where
    S: Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    let mut out = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(LogOutput::StdOut { message })
            | Ok(LogOutput::StdErr { message })
            | Ok(LogOutput::Console { message }) => append_segment(&mut out, &message),
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) => {
                warn!(error = %e, "log stream ended with error");
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![id, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn single_frame_decodes() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&frame(1, b"hello"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, StreamKind::Stdout);
        assert_eq!(frames[0].payload, b"hello");
        assert!(decoder.is_drained());
    }

    #[test]
    fn header_split_across_reads() {
        let bytes = frame(2, b"oops");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..3]).is_empty());
        assert!(decoder.push(&bytes[3..7]).is_empty());
        let frames = decoder.push(&bytes[7..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, StreamKind::Stderr);
        assert_eq!(frames[0].payload, b"oops");
    }

    #[test]
    fn payload_split_across_reads() {
        let bytes = frame(1, b"split payload");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..10]).is_empty());
        let frames = decoder.push(&bytes[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"split payload");
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut bytes = frame(1, b"out");
        bytes.extend(frame(2, b"err"));
        bytes.extend(frame(1, b""));
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].payload, b"");
    }

    #[test]
    fn streams_merge_in_arrival_order() {
        let mut bytes = frame(1, b"first");
        bytes.extend(frame(2, b"second"));
        bytes.extend(frame(1, b"third"));
        assert_eq!(demux_chunks([&bytes[..]]), "first\nsecond\nthird\n");
    }

    #[test]
    fn empty_segments_are_suppressed() {
        let mut bytes = frame(1, b"");
        bytes.extend(frame(1, b"visible"));
        bytes.extend(frame(2, b"\n"));
        assert_eq!(demux_chunks([&bytes[..]]), "visible\n");
    }

    #[test]
    fn trailing_newline_normalized_per_segment() {
        let bytes = frame(1, b"Hello, world!\n");
        assert_eq!(demux_chunks([&bytes[..]]), "Hello, world!\n");
    }

    #[test]
    fn carriage_returns_inside_segments_survive() {
        let bytes = frame(1, b"cc\rdd");
        assert_eq!(demux_chunks([&bytes[..]]), "cc\rdd\n");
    }

    // Character-count law: every non-empty payload of length l contributes
    // l + 1 characters (its bytes plus one newline).
    #[test]
    fn character_count_matches_frame_lengths() {
        let payloads: Vec<&[u8]> = vec![b"a", b"bb", b"", b"cccc", b"cc\rdd"];
        let mut bytes = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            bytes.extend(frame(if i % 2 == 0 { 1 } else { 2 }, payload));
        }
        let expected: usize = payloads
            .iter()
            .map(|p| if p.is_empty() { 0 } else { p.len() + 1 })
            .sum();
        // Re-chunk at awkward boundaries to exercise buffering as well.
        let mid = bytes.len() / 3;
        let out = demux_chunks([&bytes[..mid], &bytes[mid..mid + 1], &bytes[mid + 1..]]);
        assert_eq!(out.chars().count(), expected);
    }
}
