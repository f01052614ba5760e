pub mod config;
pub mod connection;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod signaling;
pub mod strategy;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use negotiation::*;
pub use session::*;
pub use signaling::*;
pub use strategy::*;
