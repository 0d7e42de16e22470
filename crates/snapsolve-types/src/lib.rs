mod connection;
mod event;
mod task;

pub use connection::*;
pub use event::*;
pub use task::*;
