use std::io;
use std::io::ErrorKind;
use std::mem;

use bytecheck::CheckBytes;
use ep_data::Dataset;
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ExchangeError, ExchangeUid, SCRATCH_SPACE};

static HEADER_TERMINATOR: &[u8] = b"\r\n";

pub const KIND_SIZE: usize = 1;
pub const UID_SIZE: usize = mem::size_of::<u128>();
pub const DATA_LEN_SIZE: usize = mem::size_of::<u32>();
pub const LEN_SIZE: usize = KIND_SIZE + UID_SIZE + DATA_LEN_SIZE;
pub const HEADER_SIZE: usize = LEN_SIZE + 2;
/// The largest payload a single frame may carry.
pub const MAX_FRAME_SIZE: usize = 512 << 20;

const READ_BUFFER_SIZE: usize = 64 << 10;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum FrameKind {
    /// The first frame on every connection, naming the sending node.
    Handshake = 0,
    /// A serialized batch of rows.
    Batch = 1,
    /// The sender will not send any more batches on this connection.
    Eof = 2,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FrameKind::Handshake),
            1 => Some(FrameKind::Batch),
            2 => Some(FrameKind::Eof),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct FrameHeader {
    pub(crate) kind: FrameKind,
    pub(crate) uid: ExchangeUid,
    pub(crate) len: usize,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, PartialEq)]
#[archive_attr(derive(CheckBytes, Debug))]
/// Identifies the node on the sending side of a connection.
pub(crate) struct Handshake {
    pub(crate) from: String,
}

#[derive(Debug)]
pub(crate) enum Frame {
    Handshake(Handshake),
    Batch(Dataset),
    Eof,
}

/// Parses a frame header.
///
/// Returns `None` if the buffer does not match the header layout.
pub(crate) fn parse_header(buf: &[u8]) -> Option<FrameHeader> {
    let header = buf.get(..HEADER_SIZE)?;

    if &header[LEN_SIZE..] != HEADER_TERMINATOR {
        return None;
    }

    let kind = FrameKind::from_byte(header[0])?;
    let uid_bytes = &header[KIND_SIZE..KIND_SIZE + UID_SIZE];
    let uid = ExchangeUid::from_le_bytes(uid_bytes.try_into().ok()?);
    let len_bytes = &header[KIND_SIZE + UID_SIZE..LEN_SIZE];
    let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;

    Some(FrameHeader { kind, uid, len })
}

fn serialize_header(kind: FrameKind, uid: ExchangeUid, len: usize) -> [u8; HEADER_SIZE] {
    let mut header = [0; HEADER_SIZE];
    header[0] = kind as u8;
    header[KIND_SIZE..KIND_SIZE + UID_SIZE].copy_from_slice(&uid.to_le_bytes());
    header[KIND_SIZE + UID_SIZE..LEN_SIZE].copy_from_slice(&(len as u32).to_le_bytes());
    header[LEN_SIZE..].copy_from_slice(HEADER_TERMINATOR);
    header
}

fn serialize_frame(
    kind: FrameKind,
    uid: ExchangeUid,
    payload: &[u8],
) -> Result<Vec<u8>, ExchangeError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ExchangeError::Serialize(format!(
            "Payload of {} bytes exceeds the maximum frame size of {} bytes",
            payload.len(),
            MAX_FRAME_SIZE,
        )));
    }

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&serialize_header(kind, uid, payload.len()));
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Serializes the handshake sent when a connection is opened.
pub(crate) fn handshake_frame(uid: ExchangeUid, from: &str) -> Result<Vec<u8>, ExchangeError> {
    let handshake = Handshake {
        from: from.to_string(),
    };
    let payload = rkyv::to_bytes::<_, SCRATCH_SPACE>(&handshake)
        .map_err(|e| ExchangeError::Serialize(e.to_string()))?;
    serialize_frame(FrameKind::Handshake, uid, &payload)
}

/// Serializes a batch of rows.
pub(crate) fn batch_frame(uid: ExchangeUid, batch: &Dataset) -> Result<Vec<u8>, ExchangeError> {
    let payload = rkyv::to_bytes::<_, SCRATCH_SPACE>(batch)
        .map_err(|e| ExchangeError::Serialize(e.to_string()))?;
    serialize_frame(FrameKind::Batch, uid, &payload)
}

/// Serializes the end of stream marker.
pub(crate) fn eof_frame(uid: ExchangeUid) -> Vec<u8> {
    serialize_header(FrameKind::Eof, uid, 0).to_vec()
}

/// Reads frames off an inbound stream.
pub(crate) struct FrameReader<R> {
    reader: R,
    hot_buffer: Box<[u8]>,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            hot_buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            buf: Vec::new(),
        }
    }

    /// Reads the next frame from the stream.
    ///
    /// Returns `None` if the stream was closed cleanly between two frames.
    pub(crate) async fn next_frame(&mut self) -> io::Result<Option<(ExchangeUid, Frame)>> {
        if self.extend_buffer_pos(HEADER_SIZE).await? {
            if self.buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "Stream closed part way through a frame header",
            ));
        }

        let header = parse_header(&self.buf).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, "Invalid frame header")
        })?;

        if header.len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds the maximum frame size", header.len),
            ));
        }

        let end_pos = HEADER_SIZE + header.len;
        if self.extend_buffer_pos(end_pos).await? {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "Stream closed part way through a frame payload",
            ));
        }

        let mut payload = AlignedVec::with_capacity(header.len);
        payload.extend_from_slice(&self.buf[HEADER_SIZE..end_pos]);
        self.shift_buffer_to(end_pos);

        let frame = match header.kind {
            FrameKind::Handshake => Frame::Handshake(
                rkyv::from_bytes::<Handshake>(&payload).map_err(|_| invalid_payload())?,
            ),
            FrameKind::Batch => {
                let batch =
                    rkyv::from_bytes::<Dataset>(&payload).map_err(|_| invalid_payload())?;
                batch.validate().map_err(|e| {
                    io::Error::new(ErrorKind::InvalidData, format!("Invalid batch: {e}"))
                })?;
                Frame::Batch(batch)
            },
            FrameKind::Eof => Frame::Eof,
        };

        Ok(Some((header.uid, frame)))
    }

    fn shift_buffer_to(&mut self, n: usize) {
        let remaining_len = self.buf.len() - n;
        self.buf.copy_within(n.., 0);
        self.buf.truncate(remaining_len);
    }

    /// Reads until the buffer holds at least `min_len` bytes.
    ///
    /// Returns `true` if the stream ended first.
    async fn extend_buffer_pos(&mut self, min_len: usize) -> io::Result<bool> {
        while self.buf.len() < min_len {
            let n = self.reader.read(&mut self.hot_buffer[..]).await?;
            if n == 0 {
                return Ok(true);
            }
            self.buf.extend_from_slice(&self.hot_buffer[..n]);
        }

        Ok(false)
    }
}

fn invalid_payload() -> io::Error {
    io::Error::new(ErrorKind::InvalidData, "Invalid frame payload")
}
