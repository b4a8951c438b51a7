pub mod conversation;
pub mod event;
pub mod message;
pub mod participant;

pub use conversation::*;
pub use event::*;
pub use message::*;
pub use participant::*;
