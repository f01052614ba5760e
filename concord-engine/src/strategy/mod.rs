mod channel_kind;
mod channel_strategy;

pub use channel_kind::*;
pub use channel_strategy::*;
