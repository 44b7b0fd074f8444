//! Firebase Realtime Database REST client with live subscriptions.
//!
//! Reads a subtree once with [`Reference::value`], or streams change
//! notifications for it with [`Reference::subscribe`].
//!
//! # Features
//! - Chainable, immutable [`Reference`] with ordering, range, and limit filters
//! - Event-stream (`text/event-stream`) decoding on a background task
//! - FIFO delivery through a channel, with an optional bounded queue and
//!   explicit [`OverflowPolicy`]
//! - Deterministic [`close`](Subscription::close) that interrupts the reader
//!   and releases the connection
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), firebasedb::Error> {
//! use std::collections::HashMap;
//!
//! let db = firebasedb::Reference::new("https://dinosaur-facts.firebaseio.com/", "")?;
//! let mut sub = db.child("dinosaurs").subscribe().await?;
//! while let Some(event) = sub.next().await {
//!     let mut data: HashMap<String, serde_json::Value> = HashMap::new();
//!     let path = event.decode_into(&mut data)?;
//!     println!("{} at {path}: {data:?}", event.event_type());
//! }
//! sub.close().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod protocol;
mod reference;
mod subscribe;
mod types;

pub use protocol::FrameDecoder;
pub use reference::Reference;
pub use subscribe::{Subscription, subscribe};
pub use types::{
    Error, Event, EventKind, FrameError, OverflowPolicy, Payload, SubscribeConfig,
};
