mod client;

pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::{
    ClientTx, LiveClient, PendingSession, Session, SessionEvent, connect, connect_with_config,
};
pub use gemini_live_types as types;
