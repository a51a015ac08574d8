use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Transport-reported connection state, mirroring the browser socket
/// `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Notifications coming out of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Write half and state of one connection.
///
/// `send_text` is synchronous: it either hands the frame to the
/// connection or fails right away, which lets a write double as a
/// liveness probe.
pub trait Transport: Send {
    fn ready_state(&self) -> ReadyState;

    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// A connected transport and the stream of its inbound events.
pub struct Link {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Builds links. Connecting may complete in the background; the link
/// reports `Opened` once it is usable.
pub trait Connector: Send {
    fn connect(&mut self, url: &Url) -> Result<Link, TransportError>;
}

/// Production connector over `tokio-tungstenite`
///
/// Each link is driven by its own task which owns the socket; the
/// returned transport talks to it through a channel. Must be called from
/// inside a tokio runtime.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, url: &Url) -> Result<Link, TransportError> {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(drive_socket(
            url.to_string(),
            Arc::clone(&state),
            outbound_rx,
            events_tx,
        ));

        Ok(Link {
            transport: Box::new(WsTransport {
                state,
                outbound: Some(outbound_tx),
                task,
            }),
            events: events_rx,
        })
    }
}

struct WsTransport {
    state: Arc<AtomicU8>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if self.ready_state() != ReadyState::Closed {
            self.state
                .store(ReadyState::Closing as u8, Ordering::SeqCst);
        }
        // Dropping the sender makes the socket task send a close frame and exit
        self.outbound = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            self.task.abort();
        }
    }
}

async fn drive_socket(
    url: String,
    state: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            warn!("Connect to {} failed: {}", url, e);
            state.store(ReadyState::Closed as u8, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed {
                code: None,
                reason: "connect failed".to_string(),
            });
            return;
        }
    };

    // close() may have run while the handshake was in flight
    if state
        .compare_exchange(
            ReadyState::Connecting as u8,
            ReadyState::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
    {
        let _ = events.send(TransportEvent::Opened);
    }

    let (mut sink, mut stream) = socket.split();
    let mut close_code = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    debug!("Transport closed locally, sending close frame");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.as_str().to_owned();
                    }
                    // Flushes the queued close reply
                    let _ = sink.close().await;
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed {
        code: close_code,
        reason: close_reason,
    });
}

/// In-memory connector for testing
///
/// Every `connect` creates a fresh link sharing one control block, so a
/// test can flip writability, inject frames into the newest link and
/// inspect what the client did.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Mutex<InMemoryNetwork>>,
}

#[derive(Default)]
struct InMemoryNetwork {
    urls: Vec<String>,
    sent: Vec<String>,
    closes: usize,
    unwritable: bool,
    refuse: bool,
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
    generation: u64,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes on every link fail (or succeed again).
    pub fn set_writable(&self, writable: bool) {
        self.shared.lock().unwritable = !writable;
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.lock().refuse = refuse;
    }

    /// Deliver an event on the most recent link. Returns false if there is
    /// no link or its receiver is gone.
    pub fn push(&self, event: TransportEvent) -> bool {
        match self.shared.lock().inbound.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn push_frame(&self, frame: &str) -> bool {
        self.push(TransportEvent::Frame(frame.to_string()))
    }

    pub fn connect_count(&self) -> usize {
        self.shared.lock().urls.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.shared.lock().urls.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.shared.lock().sent.clone()
    }

    pub fn close_count(&self) -> usize {
        self.shared.lock().closes
    }
}

impl Connector for InMemoryConnector {
    fn connect(&mut self, url: &Url) -> Result<Link, TransportError> {
        let mut shared = self.shared.lock();
        shared.urls.push(url.to_string());
        if shared.refuse {
            return Err(TransportError::Connect("refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Opened);
        shared.inbound = Some(tx);
        shared.generation += 1;

        Ok(Link {
            transport: Box::new(InMemoryTransport {
                shared: Arc::clone(&self.shared),
                generation: shared.generation,
                closed: false,
            }),
            events: rx,
        })
    }
}

struct InMemoryTransport {
    shared: Arc<Mutex<InMemoryNetwork>>,
    generation: u64,
    closed: bool,
}

impl Transport for InMemoryTransport {
    fn ready_state(&self) -> ReadyState {
        if self.closed {
            ReadyState::Closed
        } else {
            ReadyState::Open
        }
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if self.closed || shared.generation != self.generation {
            return Err(TransportError::Closed);
        }
        if shared.unwritable {
            return Err(TransportError::NotOpen);
        }
        shared.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.lock().closes += 1;
        }
    }
}
