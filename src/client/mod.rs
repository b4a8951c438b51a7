//! Client half of the messaging protocol: local read-state, optimistic sends,
//! typing indicators and the gateway transport.

pub mod connection;
pub mod outbox;
pub mod read_state;
pub mod session;
pub mod typing;
pub mod unread;

pub use connection::{ChatConnection, ConnectOptions, ConnectionEvent};
pub use outbox::{OutgoingMessage, Outbox};
pub use read_state::ReadStateCache;
pub use session::{ChatSession, TimelineEntry};
pub use typing::{TypingEmitter, TypingIndicators};
pub use unread::UnreadTracker;
