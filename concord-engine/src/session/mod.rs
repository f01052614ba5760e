mod session;
mod session_command;

pub use session::*;
pub use session_command::*;
