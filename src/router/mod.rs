//! Signaling router: session directory, waiting room and message relay

pub mod dispatch;
pub mod registry;
pub mod server;

pub use dispatch::SignalDispatcher;
pub use registry::{SessionRegistry, WaitingEntry};
pub use server::run;
