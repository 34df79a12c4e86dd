//! WebSocket transport

pub mod connections;
pub mod handler;
pub mod protocol;
