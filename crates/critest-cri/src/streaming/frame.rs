//! SPDY/3.1 frame encoding and decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::header::{HeaderBlock, HeaderCompressor, HeaderDecompressor};
use crate::error::StreamError;

/// SPDY protocol version carried in every control frame.
pub const VERSION: u16 = 3;

/// Frame flag: last frame of the sender's half of the stream.
pub const FLAG_FIN: u8 = 0x01;
/// SYN_STREAM flag: the recipient may not send on this stream.
pub const FLAG_UNIDIRECTIONAL: u8 = 0x02;

/// RST_STREAM status: protocol error.
pub const RST_PROTOCOL_ERROR: u32 = 1;
/// RST_STREAM status: stream refused.
pub const RST_REFUSED_STREAM: u32 = 3;
/// RST_STREAM status: stream cancelled by the sender.
pub const RST_CANCEL: u32 = 5;

const HEADER_LEN: usize = 8;
const MAX_FRAME_LEN: usize = 0x00ff_ffff;

const TYPE_SYN_STREAM: u16 = 1;
const TYPE_SYN_REPLY: u16 = 2;
const TYPE_RST_STREAM: u16 = 3;
const TYPE_SETTINGS: u16 = 4;
const TYPE_PING: u16 = 6;
const TYPE_GOAWAY: u16 = 7;
const TYPE_HEADERS: u16 = 8;
const TYPE_WINDOW_UPDATE: u16 = 9;

/// One SPDY/3.1 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Stream payload.
    Data {
        /// Target stream.
        stream_id: u32,
        /// Half-closes the sender's side.
        fin: bool,
        /// Payload bytes.
        data: Bytes,
    },
    /// Opens a stream.
    SynStream {
        /// New stream id; odd for client-initiated streams.
        stream_id: u32,
        /// Stream this one is associated with, or zero.
        associated_id: u32,
        /// Priority, 0 (highest) to 7.
        priority: u8,
        /// Half-closes the sender's side immediately.
        fin: bool,
        /// Stream headers.
        headers: HeaderBlock,
    },
    /// Accepts a stream.
    SynReply {
        /// Accepted stream.
        stream_id: u32,
        /// Half-closes the sender's side immediately.
        fin: bool,
        /// Reply headers.
        headers: HeaderBlock,
    },
    /// Aborts a stream.
    RstStream {
        /// Aborted stream.
        stream_id: u32,
        /// Reason code.
        status: u32,
    },
    /// Session settings; the values are not interpreted.
    Settings {
        /// Number of id/value pairs.
        entries: u32,
    },
    /// Liveness probe, echoed back by the recipient.
    Ping {
        /// Opaque id.
        id: u32,
    },
    /// The sender will open no more streams.
    GoAway {
        /// Last stream the sender processed.
        last_good_stream_id: u32,
        /// Reason code.
        status: u32,
    },
    /// Additional headers for an open stream.
    Headers {
        /// Target stream.
        stream_id: u32,
        /// Half-closes the sender's side.
        fin: bool,
        /// Extra headers.
        headers: HeaderBlock,
    },
    /// Flow-control credit.
    WindowUpdate {
        /// Target stream, or zero for the whole session.
        stream_id: u32,
        /// Bytes of credit.
        delta: u32,
    },
    /// A control frame type this client does not handle.
    Unknown {
        /// The frame type.
        kind: u16,
    },
}

/// Appends the wire form of `frame` to `out`.
///
/// # Errors
///
/// Returns an error if header compression fails or the frame is too large.
pub fn encode(
    frame: &Frame,
    compressor: &mut HeaderCompressor,
    out: &mut BytesMut,
) -> Result<(), StreamError> {
    match frame {
        Frame::Data {
            stream_id,
            fin,
            data,
        } => {
            let len = checked_len(data.len())?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_u32((u32::from(flags(*fin)) << 24) | len);
            out.put_slice(data);
        }
        Frame::SynStream {
            stream_id,
            associated_id,
            priority,
            fin,
            headers,
        } => {
            let block = compressor.compress(headers)?;
            control(out, TYPE_SYN_STREAM, flags(*fin), 10 + block.len())?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_u32(associated_id & 0x7fff_ffff);
            out.put_u8((priority & 0x07) << 5);
            out.put_u8(0);
            out.put_slice(&block);
        }
        Frame::SynReply {
            stream_id,
            fin,
            headers,
        } => {
            let block = compressor.compress(headers)?;
            control(out, TYPE_SYN_REPLY, flags(*fin), 4 + block.len())?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_slice(&block);
        }
        Frame::Headers {
            stream_id,
            fin,
            headers,
        } => {
            let block = compressor.compress(headers)?;
            control(out, TYPE_HEADERS, flags(*fin), 4 + block.len())?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_slice(&block);
        }
        Frame::RstStream { stream_id, status } => {
            control(out, TYPE_RST_STREAM, 0, 8)?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_u32(*status);
        }
        Frame::Settings { .. } => {
            control(out, TYPE_SETTINGS, 0, 4)?;
            out.put_u32(0);
        }
        Frame::Ping { id } => {
            control(out, TYPE_PING, 0, 4)?;
            out.put_u32(*id);
        }
        Frame::GoAway {
            last_good_stream_id,
            status,
        } => {
            control(out, TYPE_GOAWAY, 0, 8)?;
            out.put_u32(last_good_stream_id & 0x7fff_ffff);
            out.put_u32(*status);
        }
        Frame::WindowUpdate { stream_id, delta } => {
            control(out, TYPE_WINDOW_UPDATE, 0, 8)?;
            out.put_u32(stream_id & 0x7fff_ffff);
            out.put_u32(delta & 0x7fff_ffff);
        }
        Frame::Unknown { kind } => {
            return Err(StreamError::Protocol(format!(
                "cannot encode unknown frame type {kind}"
            )));
        }
    }
    Ok(())
}

/// Removes and decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` while `buf` holds less than a whole frame.
///
/// # Errors
///
/// Returns an error for malformed frames or undecodable header blocks.
pub fn decode(
    buf: &mut BytesMut,
    decompressor: &mut HeaderDecompressor,
) -> Result<Option<Frame>, StreamError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let flags = buf[4];
    let len = (u32::from_be_bytes([0, buf[5], buf[6], buf[7]])) as usize;
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    let mut body = buf.split_to(len).freeze();
    let fin = flags & FLAG_FIN != 0;

    if word & 0x8000_0000 == 0 {
        return Ok(Some(Frame::Data {
            stream_id: word & 0x7fff_ffff,
            fin,
            data: body,
        }));
    }

    #[allow(clippy::cast_possible_truncation)]
    let version = ((word >> 16) & 0x7fff) as u16;
    if version != VERSION {
        return Err(StreamError::Protocol(format!("unsupported SPDY version {version}")));
    }
    #[allow(clippy::cast_possible_truncation)]
    let kind = (word & 0xffff) as u16;

    let frame = match kind {
        TYPE_SYN_STREAM => {
            need(&body, 10, "SYN_STREAM")?;
            let stream_id = body.get_u32() & 0x7fff_ffff;
            let associated_id = body.get_u32() & 0x7fff_ffff;
            let priority = body.get_u8() >> 5;
            let _slot = body.get_u8();
            Frame::SynStream {
                stream_id,
                associated_id,
                priority,
                fin,
                headers: decompressor.decompress(&body)?,
            }
        }
        TYPE_SYN_REPLY => {
            need(&body, 4, "SYN_REPLY")?;
            let stream_id = body.get_u32() & 0x7fff_ffff;
            Frame::SynReply {
                stream_id,
                fin,
                headers: decompressor.decompress(&body)?,
            }
        }
        TYPE_HEADERS => {
            need(&body, 4, "HEADERS")?;
            let stream_id = body.get_u32() & 0x7fff_ffff;
            Frame::Headers {
                stream_id,
                fin,
                headers: decompressor.decompress(&body)?,
            }
        }
        TYPE_RST_STREAM => {
            need(&body, 8, "RST_STREAM")?;
            Frame::RstStream {
                stream_id: body.get_u32() & 0x7fff_ffff,
                status: body.get_u32(),
            }
        }
        TYPE_SETTINGS => {
            need(&body, 4, "SETTINGS")?;
            Frame::Settings {
                entries: body.get_u32(),
            }
        }
        TYPE_PING => {
            need(&body, 4, "PING")?;
            Frame::Ping { id: body.get_u32() }
        }
        TYPE_GOAWAY => {
            need(&body, 8, "GOAWAY")?;
            Frame::GoAway {
                last_good_stream_id: body.get_u32() & 0x7fff_ffff,
                status: body.get_u32(),
            }
        }
        TYPE_WINDOW_UPDATE => {
            need(&body, 8, "WINDOW_UPDATE")?;
            Frame::WindowUpdate {
                stream_id: body.get_u32() & 0x7fff_ffff,
                delta: body.get_u32() & 0x7fff_ffff,
            }
        }
        other => Frame::Unknown { kind: other },
    };
    Ok(Some(frame))
}

const fn flags(fin: bool) -> u8 {
    if fin { FLAG_FIN } else { 0 }
}

#[allow(clippy::cast_possible_truncation)]
fn checked_len(len: usize) -> Result<u32, StreamError> {
    if len > MAX_FRAME_LEN {
        return Err(StreamError::Protocol(format!("frame of {len} bytes is too large")));
    }
    Ok(len as u32)
}

fn control(out: &mut BytesMut, kind: u16, flags: u8, len: usize) -> Result<(), StreamError> {
    let len = checked_len(len)?;
    out.put_u16(0x8000 | VERSION);
    out.put_u16(kind);
    out.put_u32((u32::from(flags) << 24) | len);
    Ok(())
}

fn need(body: &Bytes, len: usize, what: &str) -> Result<(), StreamError> {
    if body.len() < len {
        return Err(StreamError::Protocol(format!(
            "{what} frame body of {} bytes is truncated",
            body.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> (HeaderCompressor, HeaderDecompressor) {
        (HeaderCompressor::new().unwrap(), HeaderDecompressor::new())
    }

    #[test]
    fn data_frame_layout() {
        let (mut c, _) = codec();
        let mut out = BytesMut::new();
        let frame = Frame::Data {
            stream_id: 3,
            fin: true,
            data: Bytes::from_static(b"hello"),
        };
        encode(&frame, &mut c, &mut out).unwrap();
        assert_eq!(&out[..8], &[0, 0, 0, 3, FLAG_FIN, 0, 0, 5]);
        assert_eq!(&out[8..], b"hello");
    }

    #[test]
    fn ping_control_header() {
        let (mut c, mut d) = codec();
        let mut out = BytesMut::new();
        encode(&Frame::Ping { id: 7 }, &mut c, &mut out).unwrap();
        assert_eq!(&out[..], &[0x80, 0x03, 0x00, 0x06, 0, 0, 0, 4, 0, 0, 0, 7]);
        assert_eq!(decode(&mut out, &mut d).unwrap(), Some(Frame::Ping { id: 7 }));
        assert!(out.is_empty());
    }

    #[test]
    fn syn_stream_round_trips_through_shared_contexts() {
        let (mut c, mut d) = codec();
        let mut out = BytesMut::new();
        let frames = [
            Frame::SynStream {
                stream_id: 1,
                associated_id: 0,
                priority: 0,
                fin: false,
                headers: HeaderBlock::new().with("streamType", "error"),
            },
            Frame::SynStream {
                stream_id: 3,
                associated_id: 0,
                priority: 0,
                fin: false,
                headers: HeaderBlock::new().with("streamType", "stdout"),
            },
        ];
        for frame in &frames {
            encode(frame, &mut c, &mut out).unwrap();
        }
        for frame in &frames {
            assert_eq!(decode(&mut out, &mut d).unwrap().as_ref(), Some(frame));
        }
    }

    #[test]
    fn partial_input_waits_for_more() {
        let (mut c, mut d) = codec();
        let mut full = BytesMut::new();
        encode(
            &Frame::RstStream {
                stream_id: 5,
                status: RST_CANCEL,
            },
            &mut c,
            &mut full,
        )
        .unwrap();
        let mut partial = BytesMut::from(&full[..10]);
        assert_eq!(decode(&mut partial, &mut d).unwrap(), None);
        assert_eq!(partial.len(), 10);
        partial.extend_from_slice(&full[10..]);
        assert_eq!(
            decode(&mut partial, &mut d).unwrap(),
            Some(Frame::RstStream {
                stream_id: 5,
                status: RST_CANCEL
            })
        );
    }

    #[test]
    fn rejects_other_versions() {
        let (_, mut d) = codec();
        let mut buf = BytesMut::from(&[0x80, 0x02, 0x00, 0x06, 0, 0, 0, 4, 0, 0, 0, 1][..]);
        assert!(matches!(decode(&mut buf, &mut d), Err(StreamError::Protocol(_))));
    }

    #[test]
    fn unknown_control_frames_are_skipped_not_fatal() {
        let (_, mut d) = codec();
        let mut buf = BytesMut::from(&[0x80, 0x03, 0x00, 0x0a, 0, 0, 0, 2, 0xaa, 0xbb][..]);
        assert_eq!(
            decode(&mut buf, &mut d).unwrap(),
            Some(Frame::Unknown { kind: 10 })
        );
        assert!(buf.is_empty());
    }
}
