//! groundlink wire format — the file transfer packet kinds.
//!
//! These types ARE the protocol spoken across the radio link. Every field
//! width is part of the format; changing one is a breaking change for every
//! node in the field, including the ones already in orbit.
//!
//! Layout: one kind byte followed by the kind's fields. Integers are
//! little-endian. Strings are a `u8` length followed by UTF-8 bytes.
//! Framing, addressing and CRC of the outer frame belong to the link layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Node identifier from the node directory. `0` is never a valid node.
pub type NodeId = u8;

/// Transaction identifier, unique per (peer, direction). `0` is never valid.
pub type TxId = u8;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Number of transaction slots per queue, including the unused slot 0.
pub const TRANSFER_QUEUE_LIMIT: usize = 256;

/// Bytes needed for one bit per possible tx_id.
pub const QUEUE_BITMAP_LEN: usize = TRANSFER_QUEUE_LIMIT / 8;

/// Longest file name carried in METADATA.
pub const MAX_FILE_NAME_LEN: usize = 128;

/// Longest node name carried in QUEUE / REQUEST-METADATA.
pub const MAX_NODE_NAME_LEN: usize = 40;

/// Longest agent name carried in METADATA.
pub const MAX_AGENT_NAME_LEN: usize = 40;

/// Largest DATA payload the `byte_count` field can describe.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

/// Encoded DATA bytes ahead of the payload: kind, origin, tx_id,
/// chunk_start and byte_count.
pub const DATA_HEADER_LEN: usize = 1 + 1 + 1 + 8 + 2;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Largest DATA payload whose encoded packet still fits one datagram.
pub const MAX_DATA_PAYLOAD: usize = MAX_UDP_PAYLOAD - DATA_HEADER_LEN;

// ── Packet kind ───────────────────────────────────────────────────────────────

/// The kind byte that leads every transfer packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Metadata = 0x01,
    Data = 0x02,
    ReqData = 0x03,
    ReqMeta = 0x04,
    ReqComplete = 0x05,
    Complete = 0x06,
    Cancel = 0x07,
    Queue = 0x08,
}

impl PacketKind {
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Metadata => "METADATA",
            PacketKind::Data => "DATA",
            PacketKind::ReqData => "REQUEST-DATA",
            PacketKind::ReqMeta => "REQUEST-METADATA",
            PacketKind::ReqComplete => "REQUEST-COMPLETE",
            PacketKind::Complete => "COMPLETE",
            PacketKind::Cancel => "CANCEL",
            PacketKind::Queue => "QUEUE",
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Metadata),
            0x02 => Ok(PacketKind::Data),
            0x03 => Ok(PacketKind::ReqData),
            0x04 => Ok(PacketKind::ReqMeta),
            0x05 => Ok(PacketKind::ReqComplete),
            0x06 => Ok(PacketKind::Complete),
            0x07 => Ok(PacketKind::Cancel),
            0x08 => Ok(PacketKind::Queue),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

// ── Queue bitmap ──────────────────────────────────────────────────────────────

/// One bit per tx_id, LSB-first within each byte. Bit 0 is never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueBitmap(pub [u8; QUEUE_BITMAP_LEN]);

impl QueueBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = TxId>) -> Self {
        let mut bitmap = Self::new();
        for id in ids {
            bitmap.set(id);
        }
        bitmap
    }

    pub fn set(&mut self, tx_id: TxId) {
        if tx_id != 0 {
            self.0[tx_id as usize / 8] |= 1 << (tx_id % 8);
        }
    }

    pub fn is_set(&self, tx_id: TxId) -> bool {
        tx_id != 0 && self.0[tx_id as usize / 8] & (1 << (tx_id % 8)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Set tx_ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = TxId> + '_ {
        (1..=u8::MAX).filter(move |id| self.is_set(*id))
    }
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// A decoded transfer packet. `origin` is always the sending node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Describes an outgoing file so the receiver can stage it.
    Metadata {
        origin: NodeId,
        tx_id: TxId,
        file_name: String,
        file_size: u64,
        agent_name: String,
    },
    /// One contiguous run of file bytes starting at `chunk_start`.
    Data {
        origin: NodeId,
        tx_id: TxId,
        chunk_start: u64,
        bytes: Bytes,
    },
    /// Receiver is missing `[hole_start, hole_end]` (inclusive).
    ReqData {
        origin: NodeId,
        tx_id: TxId,
        hole_start: u64,
        hole_end: u64,
    },
    /// Receiver lacks metadata for these transactions.
    ReqMeta {
        origin: NodeId,
        peer_name: String,
        tx_ids: Vec<TxId>,
    },
    /// Sender asks whether the receiver has everything.
    ReqComplete { origin: NodeId, tx_id: TxId },
    /// Receiver confirms the file arrived whole.
    Complete { origin: NodeId, tx_id: TxId },
    /// Sender dropped the transaction; receiver should too.
    Cancel { origin: NodeId, tx_id: TxId },
    /// Sender's full set of active outgoing tx_ids.
    Queue {
        origin: NodeId,
        peer_name: String,
        bitmap: QueueBitmap,
    },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Metadata { .. } => PacketKind::Metadata,
            Packet::Data { .. } => PacketKind::Data,
            Packet::ReqData { .. } => PacketKind::ReqData,
            Packet::ReqMeta { .. } => PacketKind::ReqMeta,
            Packet::ReqComplete { .. } => PacketKind::ReqComplete,
            Packet::Complete { .. } => PacketKind::Complete,
            Packet::Cancel { .. } => PacketKind::Cancel,
            Packet::Queue { .. } => PacketKind::Queue,
        }
    }

    pub fn origin(&self) -> NodeId {
        match self {
            Packet::Metadata { origin, .. }
            | Packet::Data { origin, .. }
            | Packet::ReqData { origin, .. }
            | Packet::ReqMeta { origin, .. }
            | Packet::ReqComplete { origin, .. }
            | Packet::Complete { origin, .. }
            | Packet::Cancel { origin, .. }
            | Packet::Queue { origin, .. } => *origin,
        }
    }

    /// The single transaction this packet refers to, if it refers to one.
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            Packet::Metadata { tx_id, .. }
            | Packet::Data { tx_id, .. }
            | Packet::ReqData { tx_id, .. }
            | Packet::ReqComplete { tx_id, .. }
            | Packet::Complete { tx_id, .. }
            | Packet::Cancel { tx_id, .. } => Some(*tx_id),
            Packet::ReqMeta { .. } | Packet::Queue { .. } => None,
        }
    }

    /// Serialize to the on-air payload.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.kind().into());

        match self {
            Packet::Metadata {
                origin,
                tx_id,
                file_name,
                file_size,
                agent_name,
            } => {
                buf.put_u8(*origin);
                buf.put_u8(*tx_id);
                put_str(&mut buf, "file_name", file_name, MAX_FILE_NAME_LEN)?;
                buf.put_u64_le(*file_size);
                put_str(&mut buf, "agent_name", agent_name, MAX_AGENT_NAME_LEN)?;
            }
            Packet::Data {
                origin,
                tx_id,
                chunk_start,
                bytes,
            } => {
                if bytes.len() > MAX_DATA_LEN {
                    return Err(WireError::DataTooLarge(bytes.len()));
                }
                buf.put_u8(*origin);
                buf.put_u8(*tx_id);
                buf.put_u64_le(*chunk_start);
                buf.put_u16_le(bytes.len() as u16);
                buf.put_slice(bytes);
            }
            Packet::ReqData {
                origin,
                tx_id,
                hole_start,
                hole_end,
            } => {
                buf.put_u8(*origin);
                buf.put_u8(*tx_id);
                buf.put_u64_le(*hole_start);
                buf.put_u64_le(*hole_end);
            }
            Packet::ReqMeta {
                origin,
                peer_name,
                tx_ids,
            } => {
                if tx_ids.len() > u8::MAX as usize {
                    return Err(WireError::TooManyIds(tx_ids.len()));
                }
                buf.put_u8(*origin);
                put_str(&mut buf, "peer_name", peer_name, MAX_NODE_NAME_LEN)?;
                buf.put_u8(tx_ids.len() as u8);
                buf.put_slice(tx_ids);
            }
            Packet::ReqComplete { origin, tx_id }
            | Packet::Complete { origin, tx_id }
            | Packet::Cancel { origin, tx_id } => {
                buf.put_u8(*origin);
                buf.put_u8(*tx_id);
            }
            Packet::Queue {
                origin,
                peer_name,
                bitmap,
            } => {
                buf.put_u8(*origin);
                put_str(&mut buf, "peer_name", peer_name, MAX_NODE_NAME_LEN)?;
                buf.put_slice(&bitmap.0);
            }
        }

        Ok(buf.freeze())
    }

    /// Parse an on-air payload. Any structural problem is an error; nothing
    /// partially decoded is ever returned.
    pub fn decode(payload: &[u8]) -> Result<Packet, WireError> {
        let mut r = payload;
        let kind = PacketKind::try_from(take_u8(&mut r)?)?;

        let packet = match kind {
            PacketKind::Metadata => Packet::Metadata {
                origin: take_u8(&mut r)?,
                tx_id: take_u8(&mut r)?,
                file_name: take_str(&mut r, "file_name", MAX_FILE_NAME_LEN)?,
                file_size: take_u64(&mut r)?,
                agent_name: take_str(&mut r, "agent_name", MAX_AGENT_NAME_LEN)?,
            },
            PacketKind::Data => {
                let origin = take_u8(&mut r)?;
                let tx_id = take_u8(&mut r)?;
                let chunk_start = take_u64(&mut r)?;
                let byte_count = take_u16(&mut r)? as usize;
                if r.remaining() < byte_count {
                    return Err(WireError::ByteCountMismatch {
                        declared: byte_count,
                        available: r.remaining(),
                    });
                }
                let bytes = Bytes::copy_from_slice(&r[..byte_count]);
                r.advance(byte_count);
                Packet::Data {
                    origin,
                    tx_id,
                    chunk_start,
                    bytes,
                }
            }
            PacketKind::ReqData => Packet::ReqData {
                origin: take_u8(&mut r)?,
                tx_id: take_u8(&mut r)?,
                hole_start: take_u64(&mut r)?,
                hole_end: take_u64(&mut r)?,
            },
            PacketKind::ReqMeta => {
                let origin = take_u8(&mut r)?;
                let peer_name = take_str(&mut r, "peer_name", MAX_NODE_NAME_LEN)?;
                let count = take_u8(&mut r)? as usize;
                if r.remaining() < count {
                    return Err(WireError::Truncated);
                }
                let tx_ids = r[..count].to_vec();
                r.advance(count);
                Packet::ReqMeta {
                    origin,
                    peer_name,
                    tx_ids,
                }
            }
            PacketKind::ReqComplete => Packet::ReqComplete {
                origin: take_u8(&mut r)?,
                tx_id: take_u8(&mut r)?,
            },
            PacketKind::Complete => Packet::Complete {
                origin: take_u8(&mut r)?,
                tx_id: take_u8(&mut r)?,
            },
            PacketKind::Cancel => Packet::Cancel {
                origin: take_u8(&mut r)?,
                tx_id: take_u8(&mut r)?,
            },
            PacketKind::Queue => {
                let origin = take_u8(&mut r)?;
                let peer_name = take_str(&mut r, "peer_name", MAX_NODE_NAME_LEN)?;
                if r.remaining() < QUEUE_BITMAP_LEN {
                    return Err(WireError::Truncated);
                }
                let mut bits = [0u8; QUEUE_BITMAP_LEN];
                r.copy_to_slice(&mut bits);
                Packet::Queue {
                    origin,
                    peer_name,
                    bitmap: QueueBitmap(bits),
                }
            }
        };

        if r.has_remaining() {
            return Err(WireError::TrailingBytes(r.remaining()));
        }
        Ok(packet)
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn put_str(
    buf: &mut BytesMut,
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), WireError> {
    if value.len() > max {
        return Err(WireError::NameTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    buf.put_u8(value.len() as u8);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn take_u8(r: &mut &[u8]) -> Result<u8, WireError> {
    if r.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(r.get_u8())
}

fn take_u16(r: &mut &[u8]) -> Result<u16, WireError> {
    if r.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(r.get_u16_le())
}

fn take_u64(r: &mut &[u8]) -> Result<u64, WireError> {
    if r.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(r.get_u64_le())
}

fn take_str(r: &mut &[u8], field: &'static str, max: usize) -> Result<String, WireError> {
    let len = take_u8(r)? as usize;
    if len > max {
        return Err(WireError::NameTooLong { field, len, max });
    }
    if r.remaining() < len {
        return Err(WireError::Truncated);
    }
    let value = std::str::from_utf8(&r[..len])
        .map_err(|_| WireError::InvalidUtf8(field))?
        .to_string();
    r.advance(len);
    Ok(value)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting transfer packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("packet truncated")]
    Truncated,

    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("{field} is {len} bytes, maximum {max}")]
    NameTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("DATA declares {declared} bytes but {available} remain")]
    ByteCountMismatch { declared: usize, available: usize },

    #[error("DATA payload of {0} bytes exceeds maximum {}", MAX_DATA_LEN)]
    DataTooLarge(usize),

    #[error("{0} tx_ids do not fit in one REQUEST-METADATA")]
    TooManyIds(usize),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn metadata_round_trip() {
        let original = Packet::Metadata {
            origin: 3,
            tx_id: 200,
            file_name: "beacon_0001.log".into(),
            file_size: 1_234_567,
            agent_name: "exec".into(),
        };
        let bytes = original.encode().unwrap();
        assert_eq!(bytes[0], PacketKind::Metadata as u8);
        assert_eq!(Packet::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn data_round_trip_preserves_payload() {
        let original = Packet::Data {
            origin: 1,
            tx_id: 9,
            chunk_start: 4096,
            bytes: Bytes::from_static(b"\x00\x01\x02payload"),
        };
        let bytes = original.encode().unwrap();
        assert_eq!(bytes.len(), DATA_HEADER_LEN + 10);
        assert_eq!(Packet::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn largest_data_payload_fits_a_datagram() {
        let packet = Packet::Data {
            origin: 1,
            tx_id: 2,
            chunk_start: 0,
            bytes: Bytes::from(vec![0u8; MAX_DATA_PAYLOAD]),
        };
        assert_eq!(packet.encode().unwrap().len(), MAX_UDP_PAYLOAD);
    }

    #[test]
    fn queue_round_trip_keeps_bitmap() {
        let original = Packet::Queue {
            origin: 2,
            peer_name: "ground".into(),
            bitmap: QueueBitmap::from_ids([1, 7, 8, 255]),
        };
        let decoded = Packet::decode(&original.encode().unwrap()).unwrap();
        match decoded {
            Packet::Queue { bitmap, .. } => {
                assert_eq!(bitmap.ids().collect::<Vec<_>>(), vec![1, 7, 8, 255]);
            }
            other => panic!("expected QUEUE, got {other:?}"),
        }
    }

    #[test]
    fn reqmeta_round_trip() {
        let original = Packet::ReqMeta {
            origin: 4,
            peer_name: "sat".into(),
            tx_ids: vec![3, 17, 250],
        };
        assert_eq!(Packet::decode(&original.encode().unwrap()).unwrap(), original);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = Packet::ReqData {
            origin: 1,
            tx_id: 2,
            hole_start: 10,
            hole_end: 20,
        }
        .encode()
        .unwrap();
        assert_eq!(
            Packet::decode(&bytes[..bytes.len() - 1]),
            Err(WireError::Truncated)
        );
        assert_eq!(Packet::decode(&[]), Err(WireError::Truncated));
    }

    #[test]
    fn data_byte_count_must_match() {
        let mut bytes = Packet::Data {
            origin: 1,
            tx_id: 2,
            chunk_start: 0,
            bytes: Bytes::from_static(b"abcd"),
        }
        .encode()
        .unwrap()
        .to_vec();
        bytes.pop();
        assert!(matches!(
            Packet::decode(&bytes),
            Err(WireError::ByteCountMismatch {
                declared: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = Packet::Cancel { origin: 1, tx_id: 5 }
            .encode()
            .unwrap()
            .to_vec();
        bytes.push(0xff);
        assert_eq!(Packet::decode(&bytes), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn unknown_kind_error_message() {
        let err = Packet::decode(&[0xab, 0, 0]).unwrap_err();
        assert_eq!(err, WireError::UnknownKind(0xab));
        assert!(err.to_string().contains("0xab"));
    }

    #[test]
    fn overlong_names_are_refused_on_encode() {
        let packet = Packet::Metadata {
            origin: 1,
            tx_id: 1,
            file_name: "x".repeat(MAX_FILE_NAME_LEN + 1),
            file_size: 1,
            agent_name: "a".into(),
        };
        assert!(matches!(
            packet.encode(),
            Err(WireError::NameTooLong {
                field: "file_name",
                ..
            })
        ));
    }

    #[test]
    fn bitmap_never_sets_zero() {
        let mut bitmap = QueueBitmap::new();
        bitmap.set(0);
        assert!(bitmap.is_empty());
        assert!(!bitmap.is_set(0));
        bitmap.set(16);
        assert!(bitmap.is_set(16));
        assert!(!bitmap.is_set(15));
        assert!(!bitmap.is_set(17));
    }

    #[test]
    fn packet_accessors() {
        let p = Packet::Complete { origin: 6, tx_id: 44 };
        assert_eq!(p.origin(), 6);
        assert_eq!(p.tx_id(), Some(44));
        assert_eq!(p.kind().name(), "COMPLETE");

        let q = Packet::Queue {
            origin: 6,
            peer_name: "n".into(),
            bitmap: QueueBitmap::new(),
        };
        assert_eq!(q.tx_id(), None);
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            let _ = Packet::decode(&bytes);
        }
    }
}
