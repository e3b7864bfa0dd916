use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::broadcast,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::{
    event::{read_event, write_event, Envelope},
    relay::{dispatch, ClientId, Fanout},
};

pub struct RelayServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(listener: TcpListener, tls: Option<TlsAcceptor>) -> Self {
        Self {
            listener,
            tls,
            state: Arc::new(RelayState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, tls, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, tls.as_ref(), &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    tls: Option<&TlsAcceptor>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, tls.cloned(), state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    state: &Arc<RelayState>,
) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let result = match tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => handle_connection(tls_stream, state).await,
                Err(err) => {
                    warn!(peer = %peer, error = ?err, "TLS handshake failed");
                    return;
                }
            },
            None => handle_connection(stream, state).await,
        };

        if let Err(err) = result {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

/// One fan-out unit on the internal broadcast channel. Sessions whose id
/// matches `exclude` drop the frame instead of delivering it.
#[derive(Debug, Clone)]
struct Frame {
    exclude: Option<ClientId>,
    envelope: Envelope,
}

/// The connection registry: a broadcast channel every session subscribes to,
/// plus a counter handing out connection identities.
pub struct RelayState {
    broadcaster: broadcast::Sender<Frame>,
    next_id: AtomicU64,
}

impl RelayState {
    fn new() -> Self {
        // The channel buffers a modest number of frames before lagging sessions skip ahead.
        let (broadcaster, _) = broadcast::channel(128);
        Self {
            broadcaster,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send_frame(&self, frame: Frame) {
        // Err here only means no session is subscribed; fan-out to nobody is fine.
        if let Err(error) = self.broadcaster.send(frame) {
            debug!(?error, "no connected recipients for frame");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.broadcaster.subscribe()
    }
}

impl Fanout for RelayState {
    fn send_to_others(&self, origin: ClientId, envelope: Envelope) {
        self.send_frame(Frame {
            exclude: Some(origin),
            envelope,
        });
    }

    fn send_to_all(&self, envelope: Envelope) {
        self.send_frame(Frame {
            exclude: None,
            envelope,
        });
    }
}

async fn handle_connection<S>(stream: S, state: Arc<RelayState>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let client_id = state.next_id();
    let (reader, mut writer) = tokio::io::split(stream);
    let mut inbox = state.subscribe();

    debug!(client_id, "client connected");

    // Inbound reads run on their own task: read_line is not cancel-safe, so
    // racing it against the frame subscription would drop the bytes of a
    // partially-read line whenever a fan-out interleaves.
    let read_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        read_loop(&read_state, client_id, &mut reader).await
    });

    let result = loop {
        select! {
            read_result = &mut read_task => {
                break read_result?;
            }
            frame = inbox.recv() => {
                if !deliver_frame(frame, client_id, &mut writer).await {
                    read_task.abort();
                    break Ok(());
                }
            }
        }
    };

    debug!(client_id, "client disconnected");
    result
}

async fn read_loop<R>(state: &RelayState, client_id: ClientId, reader: &mut R) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    while let Some(envelope) = read_event(reader).await? {
        debug!(client_id, event = envelope.name(), "relaying event");
        dispatch(state, client_id, envelope);
    }
    Ok(())
}

async fn deliver_frame<W>(
    frame: Result<Frame, broadcast::error::RecvError>,
    client_id: ClientId,
    writer: &mut W,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Ok(frame) => {
            if frame.exclude == Some(client_id) {
                return true;
            }
            if let Err(err) = write_event(writer, &frame.envelope).await {
                debug!(?err, client_id, "failed to deliver event to client");
                return false;
            }
            true
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            // No error event exists on this wire; skip ahead silently.
            warn!(client_id, skipped, "session lagged behind the relay stream");
            true
        }
        Err(broadcast::error::RecvError::Closed) => false,
    }
}
