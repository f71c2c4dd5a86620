//! Byte-level framing for the PLUTO serial link.
//!
//! Both directions share one frame layout:
//!
//! ```text
//! <H> <H> <N> <payload: N-1 bytes> <checksum>
//! ```
//!
//! where `H` is the direction's sentinel (0xFF from the device, 0xAA towards
//! it) and the checksum is the low byte of `H + H + N + Σpayload`.
//!
//! The decoder knows nothing about payload semantics. It is fed whatever the
//! transport returned on each read and keeps its state between calls, so a
//! frame split across reads decodes exactly like one delivered whole.
//! Resynchronisation after a bad frame is lossy: the discarded bytes are
//! never rescanned for a header.

use log::{debug, warn};

// ============================================================================
// Constants
// ============================================================================

/// Sentinel byte of frames sent by the device.
pub const IN_HEADER: u8 = 0xFF;

/// Sentinel byte of frames sent to the device.
pub const OUT_HEADER: u8 = 0xAA;

/// Largest payload that fits a one-byte length field (`N = payload + 1`).
pub const MAX_PAYLOAD: usize = 254;

// ============================================================================
// Encoding
// ============================================================================

/// Checksum over a frame body, seeded with both sentinel bytes.
pub fn checksum(header: u8, len: u8, payload: &[u8]) -> u8 {
    let seed = 2u32 * header as u32 + len as u32;
    let sum = payload.iter().fold(seed, |acc, &b| acc + b as u32);
    (sum % 256) as u8
}

/// Wrap `payload` in a complete frame using `header` as sentinel.
///
/// Returns `None` if the payload is empty or longer than [`MAX_PAYLOAD`].
pub fn encode_frame(header: u8, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return None;
    }
    let len = (payload.len() + 1) as u8;
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&[header, header, len]);
    frame.extend_from_slice(payload);
    frame.push(checksum(header, len, payload));
    Some(frame)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decoder position within the frame currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    LookingForHeader,
    FoundHeader1,
    FoundHeader2,
    ReadingPayload,
    CheckChecksum,
    FoundFullPacket,
}

/// Running counters, mostly for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub packets: u64,
    pub checksum_errors: u64,
    pub zero_length: u64,
}

/// Incremental frame decoder.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    header: u8,
    state: DecoderState,
    expected: usize,
    chksum: u32,
    payload: Vec<u8>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(IN_HEADER)
    }
}

impl FrameDecoder {
    pub fn new(header: u8) -> Self {
        Self {
            header,
            state: DecoderState::LookingForHeader,
            expected: 0,
            chksum: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
            stats: DecoderStats::default(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Feed a chunk of bytes, returning every payload completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let before = self.stats;
        let mut packets = Vec::new();
        for &byte in bytes {
            if let Some(payload) = self.push_byte(byte) {
                packets.push(payload);
            }
        }

        let bad = self.stats.checksum_errors - before.checksum_errors;
        let empty = self.stats.zero_length - before.zero_length;
        if bad > 0 || empty > 0 {
            warn!(
                "frames discarded in chunk: checksum={}, zero_length={} (suppressing per-frame logs)",
                bad, empty
            );
        }
        packets
    }

    /// Advance the state machine by one byte.
    pub fn push_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            DecoderState::LookingForHeader => {
                if byte == self.header {
                    self.state = DecoderState::FoundHeader1;
                }
            }
            DecoderState::FoundHeader1 => {
                self.state = if byte == self.header {
                    DecoderState::FoundHeader2
                } else {
                    DecoderState::LookingForHeader
                };
            }
            DecoderState::FoundHeader2 => {
                if byte == 0 {
                    self.stats.zero_length += 1;
                    self.reset();
                } else {
                    self.expected = byte as usize - 1;
                    self.chksum = 2 * self.header as u32 + byte as u32;
                    self.payload.clear();
                    self.state = if self.expected == 0 {
                        DecoderState::CheckChecksum
                    } else {
                        DecoderState::ReadingPayload
                    };
                }
            }
            DecoderState::ReadingPayload => {
                self.payload.push(byte);
                self.chksum += byte as u32;
                if self.payload.len() == self.expected {
                    self.state = DecoderState::CheckChecksum;
                }
            }
            DecoderState::CheckChecksum => {
                if (self.chksum % 256) as u8 == byte {
                    self.state = DecoderState::FoundFullPacket;
                } else {
                    debug!(
                        "checksum mismatch: expected={:#04X}, received={:#04X}",
                        self.chksum % 256,
                        byte
                    );
                    self.stats.checksum_errors += 1;
                    self.reset();
                }
            }
            DecoderState::FoundFullPacket => {
                // Unreachable: a full packet is emitted below before the next byte.
                self.reset();
                return self.push_byte(byte);
            }
        }

        if self.state == DecoderState::FoundFullPacket {
            self.stats.packets += 1;
            let payload = std::mem::take(&mut self.payload);
            self.reset();
            return Some(payload);
        }
        None
    }

    fn reset(&mut self) {
        self.state = DecoderState::LookingForHeader;
        self.expected = 0;
        self.chksum = 0;
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        encode_frame(IN_HEADER, payload).unwrap()
    }

    #[test]
    fn encodes_known_frame() {
        // 0xFF + 0xFF + 0x03 + 0x01 + 0x02 = 0x204
        assert_eq!(frame(&[0x01, 0x02]), vec![0xFF, 0xFF, 0x03, 0x01, 0x02, 0x04]);
        let out = encode_frame(OUT_HEADER, &[0x07]).unwrap();
        // 0xAA + 0xAA + 0x02 + 0x07 = 0x15D
        assert_eq!(out, vec![0xAA, 0xAA, 0x02, 0x07, 0x5D]);
    }

    #[test]
    fn rejects_unencodable_payloads() {
        assert!(encode_frame(IN_HEADER, &[]).is_none());
        assert!(encode_frame(IN_HEADER, &[0u8; MAX_PAYLOAD + 1]).is_none());
        assert!(encode_frame(IN_HEADER, &[0u8; MAX_PAYLOAD]).is_some());
    }

    #[test]
    fn round_trips_payload_lengths() {
        let mut decoder = FrameDecoder::default();
        for len in [1usize, 2, 17, 64, 128, 250] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let packets = decoder.push(&frame(&payload));
            assert_eq!(packets, vec![payload]);
        }
        assert_eq!(decoder.stats().packets, 6);
    }

    #[test]
    fn split_at_every_boundary_matches_whole() {
        let payload = [0x00, 0x10, 0xFF, 0x42, 0x99, 0x01];
        let bytes = frame(&payload);
        for cut in 0..=bytes.len() {
            let mut decoder = FrameDecoder::default();
            let mut got = decoder.push(&bytes[..cut]);
            got.extend(decoder.push(&bytes[cut..]));
            assert_eq!(got, vec![payload.to_vec()], "cut at {cut}");
        }
    }

    #[test]
    fn corrupted_payload_is_dropped_and_next_frame_decodes() {
        let first = frame(&[0x10, 0x20, 0x30]);
        let second = frame(&[0x01, 0x02, 0x03, 0x04]);
        for idx in 3..first.len() {
            let mut corrupted = first.clone();
            corrupted[idx] = corrupted[idx].wrapping_add(1);
            let mut stream = corrupted;
            stream.extend_from_slice(&second);

            let mut decoder = FrameDecoder::default();
            let packets = decoder.push(&stream);
            assert_eq!(packets, vec![vec![0x01, 0x02, 0x03, 0x04]], "byte {idx}");
            assert_eq!(decoder.stats().checksum_errors, 1);
        }
    }

    #[test]
    fn corrupted_header_or_length_never_yields_the_frame() {
        let payload = [0x10, 0x20, 0x30];
        let good = [vec![0x01, 0x02, 0x03, 0x04], vec![0x05, 0x06], vec![0x07]];
        for idx in 0..3 {
            for delta in [1u8, 0xFF] {
                let mut stream = frame(&payload);
                stream[idx] = stream[idx].wrapping_add(delta);
                for p in &good {
                    stream.extend(frame(p));
                }

                let mut decoder = FrameDecoder::default();
                let packets = decoder.push(&stream);
                let ctx = format!("byte {idx} delta {delta:#04X}");
                assert!(packets.iter().all(|p| good.contains(p)), "{ctx}: {packets:?}");
                assert_eq!(packets.last(), good.last(), "{ctx}");
                assert!(decoder.stats().checksum_errors <= 1, "{ctx}");
            }
        }
    }

    #[test]
    fn zero_length_resets() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0xFF, 0xFF, 0x00];
        stream.extend(frame(&[0x05]));
        assert_eq!(decoder.push(&stream), vec![vec![0x05]]);
        assert_eq!(decoder.stats().zero_length, 1);
    }

    #[test]
    fn garbage_before_header_is_skipped() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0x00, 0x13, 0xFF, 0x20, 0x37];
        stream.extend(frame(&[0xAB, 0xCD]));
        assert_eq!(decoder.push(&stream), vec![vec![0xAB, 0xCD]]);
    }

    #[test]
    fn decoder_ignores_foreign_sentinel() {
        let mut decoder = FrameDecoder::new(IN_HEADER);
        let out = encode_frame(OUT_HEADER, &[0x01, 0x02]).unwrap();
        assert!(decoder.push(&out).is_empty());
        assert_eq!(decoder.state(), DecoderState::LookingForHeader);
    }

    #[test]
    fn partial_frame_keeps_state() {
        let mut decoder = FrameDecoder::default();
        let bytes = frame(&[0x01, 0x02, 0x03]);
        assert!(decoder.push(&bytes[..4]).is_empty());
        assert_eq!(decoder.state(), DecoderState::ReadingPayload);
        assert_eq!(decoder.push(&bytes[4..]), vec![vec![0x01, 0x02, 0x03]]);
        assert_eq!(decoder.state(), DecoderState::LookingForHeader);
    }
}
