//! Serializable event types for host UIs.
//!
//! Everything here derives `serde::Serialize` + `serde::Deserialize` so a host
//! can forward it as JSON unchanged.

pub mod events;

pub use events::{ConnectionState, ConnectionStateEvent, VolumeEvent};
