// Core modules for the respprobe client
pub mod protocol; // RESP request encoder + reply decoder + reply encoders
pub mod error; // ProtocolError / ClientError
pub mod config; // ClientConfig + DEFAULT_ADDR
pub mod client; // Client (blocking round trips, typed helpers)
pub mod smoke; // Smoke plan, runner and report

// Re-export the common items for easier access
pub use protocol::*;
pub use error::*;
pub use config::*;
pub use client::*;
