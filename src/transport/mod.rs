//! The framed session transport shared by both endpoints.

pub mod frame;

mod ping;

use self::frame::Frame;
use self::ping::PingTimers;
use bytes::BytesMut;
use std::{
    fmt::{self, Debug},
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split},
    select,
    sync::mpsc,
    task::{self, JoinHandle},
    time::{Sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) const HEADER_LEN: usize = 2 /* tag */ + 2 /* length */;

/// Longest allowed frame value; together with the header a frame fits in
/// 1024 bytes.
pub const VALUE_MAX_LENGTH: u16 = 1024 - HEADER_LEN as u16;

pub const PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Inbound frames are handed over one at a time; a slow consumer holds the
/// reader back instead of queueing stale frames.
const INBOX_CAPACITY: usize = 1;

#[derive(Debug)]
pub enum Error {
    /// A length field exceeded [VALUE_MAX_LENGTH].
    MaxLengthExceeded,
    /// The stream ended in the middle of a frame.
    ShortRead,
    /// The stream ended at a frame boundary.
    Closed,
    UnknownTag(u16),
    /// A frame write missed the [WRITE_TIMEOUT] deadline.
    WriteTimedOut,
    /// No frame arrived within the receive-ping deadline.
    PingTimedOut,
    Codec(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MaxLengthExceeded => f.write_str("length is larger than the maximum length"),
            Error::ShortRead => f.write_str("stream ended in the middle of a frame"),
            Error::Closed => f.write_str("connection closed"),
            Error::UnknownTag(tag) => write!(f, "unknown tag {tag}"),
            Error::WriteTimedOut => f.write_str("write timed out"),
            Error::PingTimedOut => f.write_str("ping timed out"),
            Error::Codec(msg) => f.write_str(msg),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// PEM encoded TLS certificate.
#[derive(Clone)]
pub struct Certificate(pub Vec<u8>);

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Certificate")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl From<Vec<u8>> for Certificate {
    fn from(buf: Vec<u8>) -> Self {
        Self(buf)
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// PEM encoded TLS private key.
#[derive(Clone)]
pub struct PrivateKey(pub Vec<u8>);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl From<Vec<u8>> for PrivateKey {
    fn from(buf: Vec<u8>) -> Self {
        Self(buf)
    }
}

impl AsRef<[u8]> for PrivateKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub trait AsyncStream: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncStream for T {}

type BoxedStream = Pin<Box<dyn AsyncStream + Send>>;

/// One connected, already handshaked stream plus its reader task and
/// liveness deadlines.
pub struct Session {
    writer: WriteHalf<BoxedStream>,
    inbox: mpsc::Receiver<Frame>,
    inbox_err: Arc<Mutex<Option<Error>>>,
    timers: PingTimers,
    closed: Mutex<bool>,
    cancel_reader: CancellationToken,
    reader: JoinHandle<()>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(stream: impl AsyncStream + Send + 'static) -> Self {
        let stream: BoxedStream = Box::pin(stream);
        let (read_half, writer) = split(stream);

        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let inbox_err = Arc::new(Mutex::new(None));
        let cancel_reader = CancellationToken::new();

        let reader = task::spawn(run_reader(
            read_half,
            inbox_tx,
            inbox_err.clone(),
            cancel_reader.clone(),
        ));

        Self {
            writer,
            inbox,
            inbox_err,
            timers: PingTimers::new(),
            closed: Mutex::new(false),
            cancel_reader,
            reader,
        }
    }

    /// Next inbound frame; `None` once the reader has stopped, in which
    /// case [Session::take_error] holds the reason.
    ///
    /// This method is cancel safe.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbox.recv().await
    }

    pub fn take_error(&self) -> Option<Error> {
        self.inbox_err.lock().unwrap().take()
    }

    /// Writes one frame, bounded by [WRITE_TIMEOUT] so a stalled peer
    /// cannot hold up the relay path.
    ///
    /// This method is not cancel safe.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let bytes = frame.encode()?;
        let write = async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        };
        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(Error::WriteTimedOut),
        }
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.write_frame(&Frame::ping()).await?;
        self.timers.reset_send_deadline();
        Ok(())
    }

    pub fn send_ping_deadline(&self) -> Sleep {
        self.timers.send_deadline()
    }

    pub fn recv_ping_deadline(&self) -> Sleep {
        self.timers.recv_deadline()
    }

    pub fn reset_recv_deadline(&mut self) {
        self.timers.reset_recv_deadline()
    }

    /// Closes the stream and stops the reader. Idempotent.
    pub async fn close(&mut self) {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                return;
            }
            *closed = true;
        }
        self.cancel_reader.cancel();
        if let Err(err) = self.writer.shutdown().await {
            warn!(error = %err, "failed to shut down stream");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_reader.cancel();
        self.reader.abort();
    }
}

async fn run_reader(
    mut src: ReadHalf<BoxedStream>,
    inbox_tx: mpsc::Sender<Frame>,
    inbox_err: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::new();
    loop {
        let frame = select! {
            _ = cancel.cancelled() => break,
            result = frame::read_frame(&mut src, &mut buf) => match result {
                Ok(frame) => frame,
                Err(err) => {
                    *inbox_err.lock().unwrap() = Some(err);
                    break;
                }
            },
        };
        select! {
            _ = cancel.cancelled() => break,
            sent = inbox_tx.send(frame) => if sent.is_err() {
                break;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_event::{InputEvent, MouseMove};
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (near, far) = duplex(1024);
        let mut a = Session::new(near);
        let mut b = Session::new(far);

        a.send_ping().await.unwrap();
        let frame = b.recv().await.unwrap();
        assert_eq!(frame, Frame::ping());

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_event_frame_round_trip() {
        let (near, far) = duplex(1024);
        let mut a = Session::new(near);
        let mut b = Session::new(far);

        let event: InputEvent = MouseMove { dx: 7, dy: 3 }.into();
        a.write_frame(&Frame::from_event(&event).unwrap())
            .await
            .unwrap();
        let frame = b.recv().await.unwrap();
        assert_eq!(frame.into_event().unwrap(), event);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_reader_stops_on_unknown_tag() {
        let (mut raw, far) = duplex(1024);
        let mut session = Session::new(far);

        raw.write_all(&[0x00, 0x09, 0x00, 0x00]).await.unwrap();

        assert_eq!(session.recv().await, None);
        assert!(matches!(session.take_error(), Some(Error::UnknownTag(9))));
    }

    #[tokio::test]
    async fn test_recv_none_when_peer_closes() {
        let (raw, far) = duplex(1024);
        let mut session = Session::new(far);

        drop(raw);

        assert_eq!(session.recv().await, None);
        assert!(matches!(session.take_error(), Some(Error::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_deadline_on_stalled_peer() {
        // tiny pipe that nobody drains
        let (_far, near) = duplex(16);
        let mut session = Session::new(near);

        let event: InputEvent = MouseMove { dx: 1, dy: 1 }.into();
        let frame = Frame::from_event(&event).unwrap();

        let mut result = Ok(());
        for _ in 0..64 {
            result = session.write_frame(&frame).await;
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::WriteTimedOut)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_raw, far) = duplex(1024);
        let mut session = Session::new(far);
        session.close().await;
        session.close().await;
    }
}
