pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

/// Sender half of a connection's writer-task channel. All frames destined
/// for one socket funnel through this channel into a single writer task, so
/// sends to a connection are serialized — no two frames interleave at the
/// byte level. Other parts of the system clone this to push messages to a
/// specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
