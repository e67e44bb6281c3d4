//! Shared types and capabilities for the fx client workspace
//!
//! Everything the session and data layers consume from the outside world,
//! other than the network, lives here: time, key-value persistence,
//! navigation, and secret redaction.

mod clock;
mod error;
mod kv;
mod navigation;
mod secret;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use kv::{FileStore, KeyValueStore, MemoryStore, StoreFuture};
pub use navigation::{ChannelNavigator, NavigationCommand, Navigator, NoopNavigator};
pub use secret::Secret;
