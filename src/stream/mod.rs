//! Chat message stream for a single channel.
//!
//! [`MessageWindow`] holds the loaded messages, [`StreamState`] is the
//! synchronous reducer over it, [`ChatStream`] drives the reducer one fetch at
//! a time, and [`spawn`] runs it as a background task that also merges live
//! events.

mod controller;
mod driver;
mod error;
pub(crate) mod source;
mod state;
pub(crate) mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::ChatStream;
pub use driver::{spawn, StreamCommand, StreamHandle, StreamNotice};
pub use error::StreamError;
pub use source::{
    Anchor, ChannelEvent, ChannelEventKind, Cursor, EventSource, MessageSource, Page, PageQuery,
    Subscription,
};
pub use state::{
    EventOutcome, FetchKind, FetchOutcome, FetchTicket, ScrollRequest, ScrollStart,
    StreamSettings, StreamSnapshot, StreamState,
};
pub use window::{EntryKey, MessageWindow, StreamEntry};
