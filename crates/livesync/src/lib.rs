pub mod client;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod reconciler;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;
pub mod vote;

// Public exports
pub use client::LiveClient;
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionStatus, HeartbeatOutcome};
pub use cursor::ResumeCursor;
pub use dispatcher::{Dispatch, Dispatcher, EnvelopeHandler};
pub use envelope::{Change, Delta, EntityKind, Envelope, MessageType};
pub use error::{Result, SyncError, TransportError};
pub use reconciler::EventStore;
pub use source::{EventSource, HttpEventSource};
pub use store::SyncStore;
pub use transport::{
    Connector, InMemoryConnector, Link, ReadyState, Transport, TransportEvent, WsConnector,
};
pub use types::{ChatMessage, ChildRef, EventId, EventRef, LiveEvent, Question, QuestionStats, UserId};
pub use vote::{VoteOutcome, reconcile_vote};
