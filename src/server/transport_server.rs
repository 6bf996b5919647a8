use crate::{
    input_event::InputEvent,
    tls::create_tls_acceptor,
    transport::{self, Certificate, PrivateKey, Session, frame::Frame, frame::Tag},
};
use anyhow::{Context, Error, anyhow};
use futures::{FutureExt, future};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc::{self, error::TrySendError},
    task::{self, JoinError, JoinHandle},
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TransportServer {
    pub port: u16,
    pub tls_cert: Certificate,
    pub tls_key: PrivateKey,
    pub client_tls_cert: Certificate,
}

pub fn start(
    args: TransportServer,
    event_rx: mpsc::Receiver<InputEvent>,
    token: CancellationToken,
) -> JoinHandle<Result<(), Error>> {
    task::spawn(run_transport(args, event_rx, token))
}

async fn run_transport(
    args: TransportServer,
    mut event_rx: mpsc::Receiver<InputEvent>,
    token: CancellationToken,
) -> Result<(), Error> {
    let tls_acceptor = create_tls_acceptor(
        args.tls_cert.as_ref(),
        args.tls_key.as_ref(),
        args.client_tls_cert.as_ref(),
    )?;

    let server_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.port);
    info!("listening at {server_addr}");
    let listener = TcpListener::bind(server_addr)
        .await
        .context("failed to bind listener")?;

    // accepts run in their own task so a pending connection never blocks
    // relaying
    let (conn_tx, mut conn_rx) = mpsc::channel(1);
    let receptionist = task::spawn({
        let token = token.clone();
        async move {
            loop {
                select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            info!(?peer_addr, "received incoming connection");
                            if conn_tx.send((stream, peer_addr)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "failed to accept connection");
                            break;
                        }
                    },
                }
            }
        }
    });

    let mut session: Option<SessionHandle> = None;

    loop {
        let finished = session
            .as_mut()
            .map(|x| x.finished().boxed())
            .unwrap_or_else(|| future::pending().boxed());

        select! { biased;
            _ = token.cancelled() => break,

            _ = finished => {
                session.take();
            }

            event = event_rx.recv() => match (event, &session) {
                (Some(event), Some(sess)) => sess.send_event(event),
                // stop the transport when the control loop is gone
                (None, _) => break,
                // no active session, the event is dropped
                _ => (),
            },

            conn = conn_rx.recv() => match conn {
                Some((stream, peer_addr)) => {
                    handle_incoming_connection(&mut session, stream, peer_addr, &tls_acceptor, &token)
                }
                None => break,
            },
        }
    }

    if let Some(mut sess) = session.take() {
        sess.finished().await.ok();
    }
    receptionist.abort();

    Ok(())
}

/// Hands the connection to a new session task, unless a session is already
/// active, in which case the connection is dropped.
fn handle_incoming_connection(
    session: &mut Option<SessionHandle>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: &TlsAcceptor,
    token: &CancellationToken,
) {
    if session.is_some() {
        info!(?peer_addr, "rejecting connection, active session exists");
        drop(stream);
        return;
    }
    *session = Some(spawn_session(
        stream,
        peer_addr,
        tls_acceptor.clone(),
        token.child_token(),
    ));
}

/// Handle to a running session task.
struct SessionHandle {
    event_tx: mpsc::Sender<InputEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Offers an event to the session without waiting; when the session
    /// cannot keep up the event is dropped so input stays fresh.
    fn send_event(&self, event: InputEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => (),
            Err(TrySendError::Full(event)) => {
                warn!(?event, "dropping event, session cannot keep up")
            }
            Err(TrySendError::Closed(_)) => (),
        }
    }

    /// This method is cancel safe.
    async fn finished(&mut self) -> Result<(), JoinError> {
        (&mut self.task).await
    }
}

fn spawn_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: TlsAcceptor,
    token: CancellationToken,
) -> SessionHandle {
    let (event_tx, event_rx) = mpsc::channel(1);

    let task = task::spawn(async move {
        match run_session(stream, tls_acceptor, event_rx, token).await {
            Ok(()) => info!("session terminated"),
            Err(err) => error!(error = %err, "session terminated"),
        }
        info!(?peer_addr, "disconnected from client");
    });

    SessionHandle { event_tx, task }
}

async fn run_session(
    stream: TcpStream,
    tls_acceptor: TlsAcceptor,
    mut event_rx: mpsc::Receiver<InputEvent>,
    token: CancellationToken,
) -> Result<(), Error> {
    let stream = tls_acceptor
        .accept(stream)
        .await
        .context("tls handshake failed")?;
    info!("session established");

    let mut sess = Session::new(stream);
    let result = relay_session(&mut sess, &mut event_rx, &token).await;
    sess.close().await;
    result
}

async fn relay_session(
    sess: &mut Session,
    event_rx: &mut mpsc::Receiver<InputEvent>,
    token: &CancellationToken,
) -> Result<(), Error> {
    loop {
        select! {
            _ = token.cancelled() => return Ok(()),

            _ = sess.recv_ping_deadline() => {
                return Err(transport::Error::PingTimedOut.into());
            }

            _ = sess.send_ping_deadline() => {
                debug!("sending ping");
                sess.send_ping().await.context("failed to write ping")?;
            }

            event = event_rx.recv() => match event {
                Some(event) => {
                    debug!(?event, "sending event");
                    let frame = Frame::from_event(&event)?;
                    sess.write_frame(&frame).await.context("failed to write event")?;
                }
                None => return Ok(()),
            },

            frame = sess.recv() => match frame {
                Some(frame) => {
                    // any frame proves the peer alive
                    sess.reset_recv_deadline();
                    match frame.tag() {
                        Tag::Ping => debug!("ping received"),
                        tag => warn!(?tag, "unexpected tag"),
                    }
                }
                None => {
                    return Err(sess
                        .take_error()
                        .map(Into::into)
                        .unwrap_or_else(|| anyhow!("session reader stopped")));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_event::MouseMove;
    use crate::tls::{create_tls_connector, tests::gen_cert_key_pair};
    use rustls_pki_types::ServerName;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn connect_session(port: u16, client_cert: &str, client_key: &str, server_cert: &str) -> Session {
        let connector = create_tls_connector(
            client_cert.as_bytes(),
            client_key.as_bytes(),
            server_cert.as_bytes(),
        )
        .unwrap();
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let name = ServerName::try_from("127.0.0.1".to_owned()).unwrap();
        let stream = connector.connect(name, stream).await.unwrap();
        Session::new(stream)
    }

    #[tokio::test]
    async fn test_relays_events_and_rejects_second_connection() {
        let (server_cert, server_key) = gen_cert_key_pair();
        let (client_cert, client_key) = gen_cert_key_pair();

        let port = free_port();
        let token = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(1);

        let args = TransportServer {
            port,
            tls_cert: server_cert.clone().into_bytes().into(),
            tls_key: server_key.into_bytes().into(),
            client_tls_cert: client_cert.clone().into_bytes().into(),
        };
        let transport = start(args, event_rx, token.clone());

        // wait for the listener to come up
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut sess = connect_session(port, &client_cert, &client_key, &server_cert).await;
        sess.send_ping().await.unwrap();

        let event: InputEvent = MouseMove { dx: 7, dy: 3 }.into();
        event_tx.send(event).await.unwrap();

        let frame = loop {
            let frame = timeout(Duration::from_secs(5), sess.recv())
                .await
                .unwrap()
                .unwrap();
            if frame.tag() != Tag::Ping {
                break frame;
            }
        };
        assert_eq!(frame.into_event().unwrap(), event);

        // a second connection must be closed without touching the session
        let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let read = timeout(Duration::from_secs(5), second.read_u8()).await.unwrap();
        assert!(read.is_err());

        // the first session is still serviced
        let event: InputEvent = MouseMove { dx: -1, dy: 2 }.into();
        event_tx.send(event).await.unwrap();
        let frame = loop {
            let frame = timeout(Duration::from_secs(5), sess.recv())
                .await
                .unwrap()
                .unwrap();
            if frame.tag() != Tag::Ping {
                break frame;
            }
        };
        assert_eq!(frame.into_event().unwrap(), event);

        sess.close().await;
        token.cancel();
        transport.await.unwrap().unwrap();
    }
}
