//! Reassembles BMS response frames from the raw BLE notification stream.
//!
//! Notifications arrive at arbitrary boundaries: a single frame is commonly
//! split across two or three notifications, and under load two frames can
//! arrive concatenated in one. The assembler buffers whatever it is given and
//! emits only complete, correctly terminated frames.

/// Frame start marker.
pub(crate) const FRAME_START: u8 = 0xDD;
/// Frame end marker.
pub(crate) const FRAME_END: u8 = 0x77;

/// Bytes of framing overhead around the payload: start marker, command,
/// status, length, two checksum bytes and the end marker.
const FRAME_OVERHEAD: usize = 7;

/// A complete response frame as received from the BMS.
///
/// Layout: `0xDD <command> <status> <len> <payload ...> <chk> <chk> 0x77`.
/// The two bytes before the terminator are the vendor's checksum; the scheme
/// is not established so they are carried but never interpreted, and frame
/// integrity rests on the terminator byte alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// The command code this frame is a response to.
    pub fn command(&self) -> u8 {
        self.0[1]
    }

    /// The declared payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.0[3] as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Accumulates raw notification chunks and yields complete frames.
///
/// The assembler is re-entrant: a frame split across any number of `feed`
/// calls is held in the internal buffer until its remainder arrives. Bytes
/// preceding a start marker are garbage (duplicate notification tails,
/// corruption) and are discarded.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially accumulated frame, e.g. after a disconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Append a notification chunk and drain every complete frame it
    /// completes. Returns zero or more frames; never blocks.
    ///
    /// A candidate that spans `payload_len + 7` bytes but does not end in the
    /// terminator byte is silently dropped. This also covers the case where a
    /// stray `0xDD` inside a payload was mistaken for a frame start: the
    /// misread length lands the terminator check on the wrong byte and the
    /// corrupted region is discarded. The next polling cycle elicits a fresh
    /// frame, so no recovery is attempted here.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while !self.buffer.is_empty() {
            let Some(start) = self.buffer.iter().position(|&b| b == FRAME_START) else {
                // No frame can start in what we hold.
                self.buffer.clear();
                break;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            // The length field sits at index 3; wait until we can read it.
            if self.buffer.len() < 4 {
                break;
            }

            let packet_len = self.buffer[3] as usize + FRAME_OVERHEAD;
            if self.buffer.len() < packet_len {
                break;
            }

            let candidate: Vec<u8> = self.buffer.drain(..packet_len).collect();
            if candidate[packet_len - 1] == FRAME_END {
                frames.push(Frame(candidate));
            } else {
                let h = hex::encode(&candidate);
                log::debug!("dropping unterminated frame candidate: {h}");
            }
        }

        frames
    }
}

#[cfg(test)]
impl Frame {
    /// Build a frame without going through the assembler, so decoder tests
    /// can construct frames whose declared length disagrees with their size.
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
pub(crate) fn make_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![FRAME_START, command, 0x00, payload.len() as u8];
    frame.extend_from_slice(payload);
    // Checksum bytes are never validated, any value will do.
    frame.extend_from_slice(&[0x00, 0x00, FRAME_END]);
    frame
}

#[test]
fn test_feed_whole_frame() {
    let mut assembler = FrameAssembler::new();
    let bytes = make_frame(0x03, &[0xAA, 0xBB, 0xCC]);
    let frames = assembler.feed(&bytes);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command(), 0x03);
    assert_eq!(frames[0].payload_len(), 3);
    assert_eq!(frames[0].as_bytes(), &bytes[..]);
}

#[test]
fn test_feed_empty_is_noop() {
    let mut assembler = FrameAssembler::new();
    assert!(assembler.feed(&[]).is_empty());
}

#[test]
fn test_feed_byte_at_a_time_matches_whole() {
    let bytes = make_frame(0x03, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let mut whole = FrameAssembler::new();
    let expected = whole.feed(&bytes);

    let mut split = FrameAssembler::new();
    let mut got = Vec::new();
    for b in &bytes {
        got.extend(split.feed(std::slice::from_ref(b)));
    }

    assert_eq!(got, expected);
    assert_eq!(got.len(), 1);
}

#[test]
fn test_feed_discards_garbage_prefix() {
    let mut assembler = FrameAssembler::new();
    let mut bytes = vec![0x00, 0x13, 0x37];
    bytes.extend(make_frame(0x04, &[0x0C, 0xE4]));
    let frames = assembler.feed(&bytes);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command(), 0x04);
}

#[test]
fn test_feed_no_marker_clears_buffer() {
    let mut assembler = FrameAssembler::new();
    assert!(assembler.feed(&[0x01, 0x02, 0x03]).is_empty());
    // Buffer was cleared, so a following frame is not polluted.
    let frames = assembler.feed(&make_frame(0x03, &[9]));
    assert_eq!(frames.len(), 1);
}

#[test]
fn test_feed_drops_unterminated_frame() {
    let mut assembler = FrameAssembler::new();
    let mut bytes = make_frame(0x03, &[1, 2, 3]);
    *bytes.last_mut().unwrap() = 0x00;
    assert!(assembler.feed(&bytes).is_empty());
}

#[test]
fn test_feed_concatenated_frames() {
    let mut assembler = FrameAssembler::new();
    let mut bytes = make_frame(0x03, &[1, 2]);
    bytes.extend(make_frame(0x04, &[3, 4, 5, 6]));
    let frames = assembler.feed(&bytes);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].command(), 0x03);
    assert_eq!(frames[1].command(), 0x04);
}

#[test]
fn test_feed_waits_for_length_byte() {
    let mut assembler = FrameAssembler::new();
    assert!(assembler.feed(&[FRAME_START, 0x03, 0x00]).is_empty());
    let rest = {
        let full = make_frame(0x03, &[0xAB]);
        full[3..].to_vec()
    };
    let frames = assembler.feed(&rest);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload_len(), 1);
}

#[test]
fn test_feed_survives_reset() {
    let mut assembler = FrameAssembler::new();
    let bytes = make_frame(0x03, &[1, 2, 3]);
    assert!(assembler.feed(&bytes[..5]).is_empty());
    assembler.reset();
    // The half frame is gone; a fresh complete frame still parses.
    let frames = assembler.feed(&bytes);
    assert_eq!(frames.len(), 1);
}
