//! Wire codec for the 512-byte framed protocol.
//!
//! Every record is exactly `FRAME_LEN` bytes: a one-byte type tag,
//! optional newline-separated fields, a terminator byte `EOT`, and
//! don't-care padding. Integers are big-endian. There is no length
//! prefix; parsing stops at the first `EOT`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::params::*;

// ─── Message Tags ───────────────────────────────────────────────────

pub const TAG_LOGIN: u8 = b'a';
pub const TAG_ACC: u8 = b'b';
pub const TAG_NOP: u8 = b'c';
pub const TAG_USED: u8 = b'd';
pub const TAG_CON: u8 = b'e';
pub const TAG_QUEUE: u8 = b'f';
pub const TAG_TIME: u8 = b'g';
pub const TAG_START: u8 = b'h';
pub const TAG_GO: u8 = b'i';
pub const TAG_STOP: u8 = b'j';
pub const TAG_FLAG: u8 = b'k';
pub const TAG_REV: u8 = b'l';
pub const TAG_LEFT: u8 = b'm';
pub const TAG_MINE: u8 = b'n';
pub const TAG_ADJ: u8 = b'o';
pub const TAG_LEAD_P: u8 = b'p';
pub const TAG_LEAD_R: u8 = b'q';
pub const TAG_LEAD_E: u8 = b'r';
/// Sent by the listener when the admission queue is full, right before
/// the connection is closed.
pub const TAG_FULL: u8 = b's';

pub const KEY_USERNAME: u8 = b'w';
pub const KEY_PASSWORD: u8 = b'x';

// ─── Cursor + Parser Primitives ─────────────────────────────────────

/// Byte cursor over one frame. Both parser primitives restore the
/// position on failure, so alternatives can be tried in sequence.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Current byte, or EOT once the cursor runs off the buffer.
    fn peek(&self) -> u8 {
        self.buf.get(self.pos).copied().unwrap_or(EOT)
    }

    /// Advance past `tag` (and one following `'\n'`, if present).
    /// Returns true iff the next bytes equal `tag`; otherwise the
    /// cursor is left where it was.
    pub fn match_header(&mut self, tag: &[u8]) -> bool {
        let backup = self.pos;
        let mut matched = 0;
        for &t in tag {
            let b = self.peek();
            if b == EOT || b != t {
                break;
            }
            matched += 1;
            self.pos += 1;
        }
        if matched != tag.len() {
            self.pos = backup;
            return false;
        }
        if self.peek() == b'\n' {
            self.pos += 1;
        }
        true
    }

    /// Advance past `key`, then collect bytes until `'\n'` or EOT,
    /// consuming the `'\n'`. Returns the collected bytes, or None with
    /// the cursor restored when the key never matched.
    pub fn match_data(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let backup = self.pos;
        let mut matched = 0;
        let mut out = Vec::new();
        loop {
            let b = self.peek();
            if b == b'\n' || b == EOT {
                if b == b'\n' {
                    self.pos += 1;
                }
                break;
            }
            if matched == key.len() {
                out.push(b);
            } else if b == key[matched] {
                matched += 1;
            }
            self.pos += 1;
        }
        if matched != key.len() {
            self.pos = backup;
            return None;
        }
        Some(out)
    }

    /// Positional read of `n` raw bytes. Binary fields may contain
    /// `'\n'` or EOT legitimately, so they are never scanned for.
    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.pos + n > self.buf.len() {
            return Err(FrameError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume one `'\n'` separator.
    fn expect_newline(&mut self) -> Result<(), FrameError> {
        if self.peek() != b'\n' {
            return Err(FrameError::BadField("newline"));
        }
        self.pos += 1;
        Ok(())
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    UnknownTag(u8),
    Truncated,
    BadField(&'static str),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::UnknownTag(t) => write!(f, "unknown tag 0x{:02x}", t),
            FrameError::Truncated => write!(f, "frame truncated"),
            FrameError::BadField(what) => write!(f, "bad field: {}", what),
        }
    }
}
impl std::error::Error for FrameError {}

// ─── Frames ─────────────────────────────────────────────────────────

/// One ranked leaderboard row as it appears inside a LEAD_R frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadRow {
    pub username: String,
    pub secs: u64,
    pub nanos: u64,
    pub played: u32,
    pub won: u32,
}

/// Wire size of one encoded LeadRow:
/// key + name + '\n' + 8 + '\n' + 8 + '\n' + 4 + '\n' + 4 + '\n'
const LEAD_ROW_LEN: usize = 1 + NAME_LEN + 1 + 9 + 9 + 5 + 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Login { username: String, password: String },
    Acc,
    Nop,
    Used,
    Con,
    Queue { position: u16 },
    Time { secs: u64, nanos: u64 },
    Start,
    Go,
    Stop,
    Flag { cell: u8 },
    Reveal { cell: u8 },
    Left { mines: u8 },
    Mine,
    Adj { map: [u8; NUM_TILES] },
    LeadPage { page: u16 },
    LeadRows { rows: Vec<LeadRow> },
    LeadEnd,
    Full,
}

impl Frame {
    fn tag(&self) -> u8 {
        match self {
            Frame::Login { .. } => TAG_LOGIN,
            Frame::Acc => TAG_ACC,
            Frame::Nop => TAG_NOP,
            Frame::Used => TAG_USED,
            Frame::Con => TAG_CON,
            Frame::Queue { .. } => TAG_QUEUE,
            Frame::Time { .. } => TAG_TIME,
            Frame::Start => TAG_START,
            Frame::Go => TAG_GO,
            Frame::Stop => TAG_STOP,
            Frame::Flag { .. } => TAG_FLAG,
            Frame::Reveal { .. } => TAG_REV,
            Frame::Left { .. } => TAG_LEFT,
            Frame::Mine => TAG_MINE,
            Frame::Adj { .. } => TAG_ADJ,
            Frame::LeadPage { .. } => TAG_LEAD_P,
            Frame::LeadRows { .. } => TAG_LEAD_R,
            Frame::LeadEnd => TAG_LEAD_E,
            Frame::Full => TAG_FULL,
        }
    }

    /// Serialize into one fixed-size record. Unused tail bytes stay zero.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = Vec::with_capacity(FRAME_LEN);
        out.push(self.tag());
        match self {
            Frame::Login { username, password } => {
                out.push(b'\n');
                out.push(KEY_USERNAME);
                push_name(&mut out, username);
                out.push(b'\n');
                out.push(KEY_PASSWORD);
                push_name(&mut out, password);
            }
            Frame::Queue { position } => out.extend_from_slice(&position.to_be_bytes()),
            Frame::Time { secs, nanos } => {
                out.extend_from_slice(&secs.to_be_bytes());
                out.extend_from_slice(&nanos.to_be_bytes());
            }
            Frame::Flag { cell } | Frame::Reveal { cell } => out.push(*cell),
            Frame::Left { mines } => out.push(*mines),
            Frame::Adj { map } => {
                out.push(b'\n');
                out.extend_from_slice(map);
            }
            Frame::LeadPage { page } => out.extend_from_slice(&page.to_be_bytes()),
            Frame::LeadRows { rows } => {
                out.push(b'\n');
                for row in rows {
                    // A full ten-row page does not fit the record; stop
                    // before the row that would run past the terminator.
                    if out.len() + LEAD_ROW_LEN + 1 > FRAME_LEN {
                        break;
                    }
                    out.push(KEY_USERNAME);
                    push_name(&mut out, &row.username);
                    out.push(b'\n');
                    out.extend_from_slice(&row.secs.to_be_bytes());
                    out.push(b'\n');
                    out.extend_from_slice(&row.nanos.to_be_bytes());
                    out.push(b'\n');
                    out.extend_from_slice(&row.played.to_be_bytes());
                    out.push(b'\n');
                    out.extend_from_slice(&row.won.to_be_bytes());
                    out.push(b'\n');
                }
            }
            _ => {}
        }
        out.push(EOT);
        let mut buf = [0u8; FRAME_LEN];
        buf[..out.len()].copy_from_slice(&out);
        buf
    }

    /// Parse one received record. Text-shaped frames go through the
    /// cursor primitives; binary payloads are read positionally.
    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        let mut cur = Cursor::new(buf);
        let tag = cur.peek();
        match tag {
            TAG_LOGIN => {
                cur.match_header(&[TAG_LOGIN]);
                let username = cur
                    .match_data(&[KEY_USERNAME])
                    .ok_or(FrameError::BadField("username"))?;
                let password = cur
                    .match_data(&[KEY_PASSWORD])
                    .ok_or(FrameError::BadField("password"))?;
                Ok(Frame::Login {
                    username: field_to_string(&username),
                    password: field_to_string(&password),
                })
            }
            TAG_ACC => Ok(Frame::Acc),
            TAG_NOP => Ok(Frame::Nop),
            TAG_USED => Ok(Frame::Used),
            TAG_CON => Ok(Frame::Con),
            TAG_QUEUE => {
                cur.take(1)?;
                let raw = cur.take(2)?;
                Ok(Frame::Queue {
                    position: u16::from_be_bytes([raw[0], raw[1]]),
                })
            }
            TAG_TIME => {
                cur.take(1)?;
                let secs = read_u64(&mut cur)?;
                let nanos = read_u64(&mut cur)?;
                Ok(Frame::Time { secs, nanos })
            }
            TAG_START => Ok(Frame::Start),
            TAG_GO => Ok(Frame::Go),
            TAG_STOP => Ok(Frame::Stop),
            TAG_FLAG => {
                cur.take(1)?;
                Ok(Frame::Flag { cell: cur.take(1)?[0] })
            }
            TAG_REV => {
                cur.take(1)?;
                Ok(Frame::Reveal { cell: cur.take(1)?[0] })
            }
            TAG_LEFT => {
                cur.take(1)?;
                Ok(Frame::Left { mines: cur.take(1)?[0] })
            }
            TAG_MINE => Ok(Frame::Mine),
            TAG_ADJ => {
                if !cur.match_header(&[TAG_ADJ]) {
                    return Err(FrameError::BadField("adj header"));
                }
                let raw = cur.take(NUM_TILES)?;
                let mut map = [0u8; NUM_TILES];
                map.copy_from_slice(raw);
                Ok(Frame::Adj { map })
            }
            TAG_LEAD_P => {
                cur.take(1)?;
                let raw = cur.take(2)?;
                Ok(Frame::LeadPage {
                    page: u16::from_be_bytes([raw[0], raw[1]]),
                })
            }
            TAG_LEAD_R => {
                if !cur.match_header(&[TAG_LEAD_R]) {
                    return Err(FrameError::BadField("lead header"));
                }
                let mut rows = Vec::new();
                while cur.peek() != EOT {
                    let name = cur
                        .match_data(&[KEY_USERNAME])
                        .ok_or(FrameError::BadField("row username"))?;
                    let secs = read_u64(&mut cur)?;
                    cur.expect_newline()?;
                    let nanos = read_u64(&mut cur)?;
                    cur.expect_newline()?;
                    let played = read_u32(&mut cur)?;
                    cur.expect_newline()?;
                    let won = read_u32(&mut cur)?;
                    cur.expect_newline()?;
                    rows.push(LeadRow {
                        username: field_to_string(&name),
                        secs,
                        nanos,
                        played,
                        won,
                    });
                }
                Ok(Frame::LeadRows { rows })
            }
            TAG_LEAD_E => Ok(Frame::LeadEnd),
            TAG_FULL => Ok(Frame::Full),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

/// Name fields go out as exactly NAME_LEN bytes, zero-padded.
fn push_name(out: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    for i in 0..NAME_LEN {
        out.push(bytes.get(i).copied().unwrap_or(0));
    }
}

/// Wire name fields are zero-padded to NAME_LEN; strip the padding.
fn field_to_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn read_u64(cur: &mut Cursor<'_>) -> Result<u64, FrameError> {
    let raw = cur.take(8)?;
    let mut b = [0u8; 8];
    b.copy_from_slice(raw);
    Ok(u64::from_be_bytes(b))
}

fn read_u32(cur: &mut Cursor<'_>) -> Result<u32, FrameError> {
    let raw = cur.take(4)?;
    let mut b = [0u8; 4];
    b.copy_from_slice(raw);
    Ok(u32::from_be_bytes(b))
}

// ─── Framed I/O ─────────────────────────────────────────────────────

/// Read exactly one 512-byte record. EOF or any read error surfaces as
/// the caller's disconnect signal.
pub async fn read_raw_frame<R>(r: &mut R) -> std::io::Result<[u8; FRAME_LEN]>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0u8; FRAME_LEN];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one whole 512-byte record. Callers serialize access to the
/// stream so records never tear.
pub async fn write_frame<W>(w: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    w.write_all(&frame.encode()).await?;
    w.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        Frame::decode(&frame.encode()).unwrap()
    }

    #[test]
    fn test_simple_frames_round_trip() {
        for f in [
            Frame::Acc,
            Frame::Nop,
            Frame::Used,
            Frame::Con,
            Frame::Start,
            Frame::Go,
            Frame::Stop,
            Frame::Mine,
            Frame::LeadEnd,
            Frame::Full,
        ] {
            assert_eq!(round_trip(f.clone()), f);
        }
    }

    #[test]
    fn test_login_round_trip_pads_names() {
        let f = Frame::Login {
            username: "alice".into(),
            password: "password".into(),
        };
        let buf = f.encode();
        // tag, newline, key, then the name padded to 26 bytes
        assert_eq!(buf[0], TAG_LOGIN);
        assert_eq!(buf[2], KEY_USERNAME);
        assert_eq!(&buf[3..8], b"alice");
        assert_eq!(buf[8], 0);
        assert_eq!(buf[3 + NAME_LEN], b'\n');
        assert_eq!(round_trip(f.clone()), f);
    }

    #[test]
    fn test_binary_payload_frames_round_trip() {
        assert_eq!(
            round_trip(Frame::Queue { position: 0x0a0a }),
            Frame::Queue { position: 0x0a0a }
        );
        let t = Frame::Time { secs: 3, nanos: 167_000_010 };
        assert_eq!(round_trip(t.clone()), t);
        assert_eq!(round_trip(Frame::Reveal { cell: 80 }), Frame::Reveal { cell: 80 });
        assert_eq!(round_trip(Frame::Flag { cell: 0 }), Frame::Flag { cell: 0 });
        assert_eq!(round_trip(Frame::Left { mines: 9 }), Frame::Left { mines: 9 });
        assert_eq!(round_trip(Frame::LeadPage { page: 2 }), Frame::LeadPage { page: 2 });
    }

    #[test]
    fn test_adj_round_trip() {
        let mut map = [9u8; NUM_TILES];
        map[0] = 0;
        map[10] = 1;
        map[80] = 8;
        assert_eq!(round_trip(Frame::Adj { map }), Frame::Adj { map });
    }

    #[test]
    fn test_lead_rows_with_awkward_binary_bytes() {
        // secs deliberately contains 0x0a and 0x7f bytes; the decoder
        // must read the numeric fields positionally, not by scanning.
        let rows = vec![
            LeadRow {
                username: "Aurora".into(),
                secs: 0x0a7f_0a7f,
                nanos: 10,
                played: 4,
                won: 2,
            },
            LeadRow {
                username: "bob".into(),
                secs: 12,
                nanos: 500_000_000,
                played: 1,
                won: 1,
            },
        ];
        let f = Frame::LeadRows { rows: rows.clone() };
        assert_eq!(round_trip(f), Frame::LeadRows { rows });
    }

    #[test]
    fn test_lead_rows_cap_to_frame() {
        let rows: Vec<LeadRow> = (0..LEADERBOARD_ENTRIES)
            .map(|i| LeadRow {
                username: format!("player{:02}", i),
                secs: i as u64,
                nanos: 0,
                played: 1,
                won: 1,
            })
            .collect();
        let decoded = round_trip(Frame::LeadRows { rows: rows.clone() });
        match decoded {
            Frame::LeadRows { rows: got } => {
                // Ten rows are 563 bytes; only nine fit a 512-byte record.
                assert_eq!(got.len(), 9);
                assert_eq!(got, &rows[..9]);
            }
            other => panic!("expected LeadRows, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = b'z';
        buf[1] = EOT;
        assert_eq!(Frame::decode(&buf), Err(FrameError::UnknownTag(b'z')));
    }

    #[test]
    fn test_match_header_restores_on_failure() {
        let buf = [b'a', b'b', EOT];
        let mut cur = Cursor::new(&buf);
        assert!(!cur.match_header(b"ac"));
        assert_eq!(cur.pos(), 0);
        assert!(cur.match_header(b"ab"));
    }

    #[test]
    fn test_match_data_restores_on_failure() {
        let buf = *b"walice\nxsecret\x7f";
        let mut cur = Cursor::new(&buf);
        assert!(cur.match_data(&[KEY_PASSWORD]).is_none());
        assert_eq!(cur.pos(), 0);
        assert_eq!(cur.match_data(&[KEY_USERNAME]).unwrap(), b"alice");
        assert_eq!(cur.match_data(&[KEY_PASSWORD]).unwrap(), b"secret");
    }

    #[test]
    fn test_bytes_after_terminator_ignored() {
        let mut buf = Frame::Go.encode();
        for b in buf[8..].iter_mut() {
            *b = 0xaa;
        }
        assert_eq!(Frame::decode(&buf).unwrap(), Frame::Go);
    }
}
