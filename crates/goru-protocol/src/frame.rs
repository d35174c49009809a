//! Frame recognition for the stderr-embedded host-call protocol.
//!
//! Every framed message starts with a NUL byte and carries an ASCII tag.
//! Fixed-payload frames (`READY`, `DONE`, `COMPLETE`, `INCOMPLETE`) are a
//! single literal including their trailing NUL. Variable-payload frames
//! (`Call`, `Flush`, `Error`) carry a prefix followed by a payload and a
//! terminating NUL.

pub const CALL_PREFIX: &[u8] = b"\x00GORU:";
pub const FLUSH_PREFIX: &[u8] = b"\x00GORU_FLUSH:";
pub const ERROR_PREFIX: &[u8] = b"\x00GORU_ERROR:";
pub const READY: &[u8] = b"\x00GORU_READY\x00";
pub const DONE: &[u8] = b"\x00GORU_DONE\x00";
pub const COMPLETE: &[u8] = b"\x00GORU_COMPLETE\x00";
pub const INCOMPLETE: &[u8] = b"\x00GORU_INCOMPLETE\x00";

/// Generous cap on how many bytes we'll buffer waiting for a terminator
/// before giving up on a frame as malformed. Keeps a guest that emits a
/// `\x00GORU:` prefix and never closes it from growing the carry buffer
/// without bound.
pub const MAX_PENDING_FRAME: usize = 1024 * 1024;

/// A recognized frame, with the number of input bytes it consumes and any
/// payload it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Call(Vec<u8>),
    Flush(Vec<u8>),
    Error(Vec<u8>),
    Ready,
    Done,
    Complete,
    Incomplete,
}

/// Result of attempting to match a frame at a given buffer position.
pub enum Match {
    /// `buf[pos..]` is not the start of any known frame; it is a literal
    /// byte that belongs to real stderr output.
    Literal,
    /// `buf[pos..]` might be the start of a frame, but there isn't enough
    /// data yet to tell. Caller should stop scanning and carry forward
    /// from `pos`.
    NeedMoreData,
    /// A complete frame was recognized, consuming `consumed` bytes
    /// starting at `pos`.
    Complete { frame: Frame, consumed: usize },
}

const FIXED_FRAMES: &[(&[u8], Frame)] = &[
    (READY, Frame::Ready),
    (DONE, Frame::Done),
    (COMPLETE, Frame::Complete),
    (INCOMPLETE, Frame::Incomplete),
];

/// Attempt to match a frame starting at `buf[pos]`, which must be `0x00`.
///
/// Precedence across prefixes that could both start at `pos` is irrelevant
/// here since no two known prefixes share the same second byte; the
/// leftmost-prefix-wins rule required by the spec falls out naturally from
/// scanning for the first `0x00` in `try_match_all`.
pub fn match_at(buf: &[u8], pos: usize) -> Match {
    debug_assert_eq!(buf[pos], 0);
    let rest = &buf[pos..];

    // Fixed, zero-payload frames: exact-length literals.
    for (literal, frame) in FIXED_FRAMES {
        if rest.len() >= literal.len() {
            if &rest[..literal.len()] == *literal {
                return Match::Complete {
                    frame: frame.clone(),
                    consumed: literal.len(),
                };
            }
        } else if literal.starts_with(rest) {
            return Match::NeedMoreData;
        }
    }

    // Variable-payload frames: prefix, then payload terminated by NUL.
    for (prefix, wrap) in [
        (CALL_PREFIX, Frame::Call as fn(Vec<u8>) -> Frame),
        (FLUSH_PREFIX, Frame::Flush as fn(Vec<u8>) -> Frame),
        (ERROR_PREFIX, Frame::Error as fn(Vec<u8>) -> Frame),
    ] {
        if rest.len() >= prefix.len() {
            if &rest[..prefix.len()] == prefix {
                let payload_start = prefix.len();
                return match rest[payload_start..].iter().position(|&b| b == 0) {
                    Some(term_offset) => Match::Complete {
                        frame: wrap(rest[payload_start..payload_start + term_offset].to_vec()),
                        consumed: payload_start + term_offset + 1,
                    },
                    None if rest.len() - payload_start > MAX_PENDING_FRAME => {
                        // Malformed: no terminator within a generous window.
                        // Treat the prefix itself as a dropped, malformed
                        // frame so the parser can resume past it.
                        Match::Complete {
                            frame: wrap(Vec::new()),
                            consumed: rest.len(),
                        }
                    }
                    None => Match::NeedMoreData,
                };
            }
        } else if prefix.starts_with(rest) {
            return Match::NeedMoreData;
        }
    }

    Match::Literal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ready_exactly() {
        let buf = READY;
        match match_at(buf, 0) {
            Match::Complete { frame: Frame::Ready, consumed } => assert_eq!(consumed, READY.len()),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn partial_prefix_asks_for_more_data() {
        let buf = b"\x00GORU_REA";
        assert!(matches!(match_at(buf, 0), Match::NeedMoreData));
    }

    #[test]
    fn call_frame_extracts_payload() {
        let mut buf = CALL_PREFIX.to_vec();
        buf.extend_from_slice(b"{\"fn\":\"time_now\",\"args\":{}}");
        buf.push(0);
        match match_at(&buf, 0) {
            Match::Complete { frame: Frame::Call(payload), consumed } => {
                assert_eq!(consumed, buf.len());
                assert_eq!(payload, br#"{"fn":"time_now","args":{}}"#);
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn unterminated_call_waits_for_more_data() {
        let mut buf = CALL_PREFIX.to_vec();
        buf.extend_from_slice(b"{\"fn\":\"time_now\"");
        assert!(matches!(match_at(&buf, 0), Match::NeedMoreData));
    }

    #[test]
    fn stray_nul_is_literal() {
        let buf = b"\x00not a frame at all and way too long to be a known prefix\x00";
        assert!(matches!(match_at(buf, 0), Match::Literal));
    }

    #[test]
    fn flush_frame_carries_decimal_count() {
        let mut buf = FLUSH_PREFIX.to_vec();
        buf.extend_from_slice(b"5");
        buf.push(0);
        match match_at(&buf, 0) {
            Match::Complete { frame: Frame::Flush(payload), .. } => assert_eq!(payload, b"5"),
            _ => panic!("expected Flush"),
        }
    }
}
