pub mod config;
pub mod error;
pub mod protocol;
pub mod types;
pub mod vad;

// Keep the public surface small and intentional.
pub use config::*;
pub use error::*;
pub use protocol::*;
pub use types::*;
pub use vad::*;
