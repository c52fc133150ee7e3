//! Wire framing: every message is one JSON document terminated by `\n`
//!
//! Three messages exist: the configuration (manager → agent, once per
//! connection), the acknowledgement and the results (agent → manager).
//! JSON encoders escape newlines inside strings, so the line terminator is an
//! unambiguous frame boundary.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLong,

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LinesCodecError> for ProtocolError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong,
            LinesCodecError::Io(err) => ProtocolError::Io(err),
        }
    }
}

pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LEN)
}

/// Reading half of a framed connection
pub struct FrameReader<R = OwnedReadHalf> {
    inner: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
        }
    }

    /// Next raw frame; [`ProtocolError::Closed`] once the peer has shut its side. Cancel safe.
    pub async fn next_frame(&mut self) -> Result<String, ProtocolError> {
        match self.inner.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(err)) => Err(err.into()),
            None => Err(ProtocolError::Closed),
        }
    }

    pub async fn next_message<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let frame = self.next_frame().await?;
        Ok(serde_json::from_str(&frame)?)
    }
}

/// Writing half of a framed connection
pub struct FrameWriter<W = OwnedWriteHalf> {
    inner: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
        }
    }

    /// Writes `message` as one frame and flushes it.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let frame = serde_json::to_string(message)?;
        self.inner.send(frame).await?;
        Ok(())
    }
}

/// Splits a TCP stream into its framed halves.
pub fn framed(stream: TcpStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}
