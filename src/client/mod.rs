//! Client side of game synchronization: the merge engine, delivery deduplication,
//! transports and the session controller.

pub mod controller;
/// Recently applied mutation ids.
pub mod dedup;
#[cfg(feature = "http-client")]
pub mod http;
pub mod merge;
/// Single-shot timer for the automatic empty choice.
pub mod round_timer;
/// How a controller reaches the backend.
pub mod transport;

pub use controller::{ControllerError, GameStateController, IngestOutcome, PushSession};
pub use merge::{MergeError, merge, replay};
pub use transport::{InProcessTransport, SyncTransport, TransportError};
