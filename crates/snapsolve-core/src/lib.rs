pub mod clipboard;
pub mod consumer;
pub mod event_bus;
pub mod presentation;

pub use clipboard::*;
pub use consumer::*;
pub use event_bus::*;
pub use presentation::*;
