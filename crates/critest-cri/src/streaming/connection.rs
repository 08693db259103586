//! A client-side SPDY/3.1 session multiplexing streams over one socket.
//!
//! A background task owns the read half: it decodes frames, answers pings,
//! grants flow-control credit, and routes stream events to per-stream
//! channels. Writers share the write half and the header compression
//! context behind an async mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::{self, Frame, RST_CANCEL, RST_REFUSED_STREAM};
use super::header::{HeaderBlock, HeaderCompressor, HeaderDecompressor};
use crate::error::StreamError;

/// How long to wait for the server to accept a new stream.
pub const STREAM_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest payload placed in a single DATA frame.
const MAX_DATA_CHUNK: usize = 32 * 1024;

#[derive(Debug)]
enum StreamEvent {
    Reply(HeaderBlock),
    Data(Bytes),
    Fin,
    Reset(u32),
}

struct FrameWriter {
    io: Box<dyn AsyncWrite + Send + Unpin>,
    compressor: HeaderCompressor,
    buf: BytesMut,
}

impl FrameWriter {
    async fn send(&mut self, frame: &Frame) -> Result<(), StreamError> {
        self.buf.clear();
        frame::encode(frame, &mut self.compressor, &mut self.buf)?;
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }
}

struct Shared {
    writer: tokio::sync::Mutex<FrameWriter>,
    streams: Mutex<HashMap<u32, mpsc::UnboundedSender<StreamEvent>>>,
    next_id: AtomicU32,
    going_away: AtomicBool,
}

impl Shared {
    async fn send(&self, frame: &Frame) -> Result<(), StreamError> {
        self.writer.lock().await.send(frame).await
    }

    fn register(&self, id: u32, tx: mpsc::UnboundedSender<StreamEvent>) {
        let _ = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
    }

    fn forget(&self, id: u32) {
        let _ = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn deliver(&self, id: u32, event: StreamEvent) -> bool {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.get(&id).is_some_and(|tx| tx.send(event).is_ok())
    }

    fn close_all(&self) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn dispatch(&self, frame: Frame) -> Result<(), StreamError> {
        match frame {
            Frame::Data {
                stream_id,
                fin,
                data,
            } => {
                let len = data.len();
                if len > 0 && self.deliver(stream_id, StreamEvent::Data(data)) {
                    let delta = u32::try_from(len).unwrap_or(u32::MAX);
                    self.send(&Frame::WindowUpdate { stream_id, delta }).await?;
                }
                if fin {
                    let _ = self.deliver(stream_id, StreamEvent::Fin);
                }
            }
            Frame::SynReply {
                stream_id,
                fin,
                headers,
            } => {
                let _ = self.deliver(stream_id, StreamEvent::Reply(headers));
                if fin {
                    let _ = self.deliver(stream_id, StreamEvent::Fin);
                }
            }
            Frame::Headers { stream_id, fin, .. } => {
                if fin {
                    let _ = self.deliver(stream_id, StreamEvent::Fin);
                }
            }
            Frame::RstStream { stream_id, status } => {
                let _ = self.deliver(stream_id, StreamEvent::Reset(status));
                self.forget(stream_id);
            }
            Frame::SynStream { stream_id, .. } => {
                tracing::debug!(stream_id, "refusing server-initiated stream");
                self.send(&Frame::RstStream {
                    stream_id,
                    status: RST_REFUSED_STREAM,
                })
                .await?;
            }
            Frame::Ping { id } => self.send(&Frame::Ping { id }).await?,
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                tracing::debug!(last_good_stream_id, status, "peer is going away");
                self.going_away.store(true, Ordering::SeqCst);
            }
            Frame::Settings { .. } | Frame::WindowUpdate { .. } => {}
            Frame::Unknown { kind } => tracing::trace!(kind, "ignoring unknown control frame"),
        }
        Ok(())
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut io: R, shared: Arc<Shared>) {
    let mut decompressor = HeaderDecompressor::new();
    let mut buf = BytesMut::with_capacity(16 * 1024);
    let outcome: Result<(), StreamError> = async {
        loop {
            while let Some(frame) = frame::decode(&mut buf, &mut decompressor)? {
                shared.dispatch(frame).await?;
            }
            if io.read_buf(&mut buf).await? == 0 {
                return Ok(());
            }
        }
    }
    .await;
    if let Err(e) = outcome {
        tracing::debug!(error = %e, "spdy session ended with an error");
    }
    shared.close_all();
}

/// An established SPDY/3.1 session.
pub struct Connection {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("next_id", &self.shared.next_id.load(Ordering::SeqCst))
            .field("going_away", &self.shared.going_away.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Starts a session over an upgraded socket.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the header compression context cannot be built.
    pub fn new<T>(io: T) -> Result<Self, StreamError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(io);
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(FrameWriter {
                io: Box::new(write),
                compressor: HeaderCompressor::new()?,
                buf: BytesMut::new(),
            }),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            going_away: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(read, shared.clone()));
        Ok(Self { shared, reader })
    }

    /// Opens a client stream with `headers` and waits for the server's reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closing, the server resets the
    /// stream, or no reply arrives within [`STREAM_REPLY_TIMEOUT`].
    pub async fn open_stream(&self, headers: HeaderBlock) -> Result<Stream, StreamError> {
        if self.shared.going_away.load(Ordering::SeqCst) || self.reader.is_finished() {
            return Err(StreamError::Closed);
        }
        let id = self.shared.next_id.fetch_add(2, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.register(id, tx);
        tracing::trace!(stream_id = id, ?headers, "opening stream");
        self.shared
            .send(&Frame::SynStream {
                stream_id: id,
                associated_id: 0,
                priority: 0,
                fin: false,
                headers,
            })
            .await?;

        let mut reader = StreamReader {
            id,
            shared: self.shared.clone(),
            events: rx,
            pending: VecDeque::new(),
            finished: false,
        };
        let reply = tokio::time::timeout(STREAM_REPLY_TIMEOUT, reader.wait_reply())
            .await
            .map_err(|_| StreamError::Timeout(STREAM_REPLY_TIMEOUT))??;
        Ok(Stream {
            writer: StreamWriter {
                id,
                shared: self.shared.clone(),
            },
            reader,
            reply,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A stream accepted by the server.
#[derive(Debug)]
pub struct Stream {
    writer: StreamWriter,
    reader: StreamReader,
    reply: HeaderBlock,
}

impl Stream {
    /// Stream id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.writer.id
    }

    /// Headers of the server's SYN_REPLY.
    #[must_use]
    pub const fn reply_headers(&self) -> &HeaderBlock {
        &self.reply
    }

    /// Sends `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        self.writer.write(data).await
    }

    /// Half-closes the client side.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn close_write(&self) -> Result<(), StreamError> {
        self.writer.close_write().await
    }

    /// Next chunk from the server; `None` once the server half-closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reset the stream.
    pub async fn read(&mut self) -> Result<Option<Bytes>, StreamError> {
        self.reader.read().await
    }

    /// Reads until the server half-closes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reset the stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        self.reader.read_to_end().await
    }

    /// Splits into independently owned halves.
    #[must_use]
    pub fn split(self) -> (StreamReader, StreamWriter) {
        (self.reader, self.writer)
    }
}

/// Sending half of a stream.
#[derive(Clone)]
pub struct StreamWriter {
    id: u32,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter").field("id", &self.id).finish()
    }
}

impl StreamWriter {
    /// Sends `data`, split into frames of at most 32 KiB.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        for chunk in data.chunks(MAX_DATA_CHUNK) {
            self.shared
                .send(&Frame::Data {
                    stream_id: self.id,
                    fin: false,
                    data: Bytes::copy_from_slice(chunk),
                })
                .await?;
        }
        Ok(())
    }

    /// Half-closes the client side with an empty FIN frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn close_write(&self) -> Result<(), StreamError> {
        self.shared
            .send(&Frame::Data {
                stream_id: self.id,
                fin: true,
                data: Bytes::new(),
            })
            .await
    }

    /// Aborts the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn reset(&self) -> Result<(), StreamError> {
        self.shared
            .send(&Frame::RstStream {
                stream_id: self.id,
                status: RST_CANCEL,
            })
            .await
    }
}

/// Receiving half of a stream.
pub struct StreamReader {
    id: u32,
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl StreamReader {
    async fn wait_reply(&mut self) -> Result<HeaderBlock, StreamError> {
        loop {
            match self.events.recv().await {
                Some(StreamEvent::Reply(headers)) => return Ok(headers),
                Some(StreamEvent::Reset(status)) => {
                    return Err(StreamError::Reset {
                        stream_id: self.id,
                        status,
                    });
                }
                Some(other) => self.pending.push_back(other),
                None => return Err(StreamError::Closed),
            }
        }
    }

    /// Next chunk from the server; `None` once the server half-closed or
    /// the session ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reset the stream.
    pub async fn read(&mut self) -> Result<Option<Bytes>, StreamError> {
        while !self.finished {
            let event = match self.pending.pop_front() {
                Some(event) => Some(event),
                None => self.events.recv().await,
            };
            match event {
                Some(StreamEvent::Data(data)) => return Ok(Some(data)),
                Some(StreamEvent::Reply(_)) => {}
                Some(StreamEvent::Fin) | None => self.finished = true,
                Some(StreamEvent::Reset(status)) => {
                    self.finished = true;
                    return Err(StreamError::Reset {
                        stream_id: self.id,
                        status,
                    });
                }
            }
        }
        Ok(None)
    }

    /// Reads until the server half-closes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the server reset the stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.shared.forget(self.id);
    }
}
