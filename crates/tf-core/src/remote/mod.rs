//! Boundary to the remote messaging service (Telegram today).

pub mod port;
pub mod types;
