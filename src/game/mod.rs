//! Game simulation modules

pub mod combat;
pub mod enemy;
pub mod r#match;
pub mod physics;
pub mod player;
pub mod registry;
pub mod snapshot;
pub mod wave;

pub use r#match::{GameMatch, MatchHandle};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Work queued for the match task, applied at the next tick boundary
#[derive(Debug)]
pub enum SessionInput {
    /// New authenticated connection; replies with its lobby slot
    Connect {
        connection: Uuid,
        reply: oneshot::Sender<Option<usize>>,
    },
    Disconnect {
        connection: Uuid,
    },
    /// Untrusted request from a connection
    Client {
        connection: Uuid,
        msg: ClientMsg,
    },
}
