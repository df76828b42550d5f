// src/runtime/mod.rs

//! Core asynchronous primitives: close signals and outlet channels.

pub mod close_signal;
pub mod outlet;

pub use close_signal::CloseSignal;
pub use outlet::{accept_error_outlet, push_outlet, AcceptErrorReceiver, AcceptErrorSender, PushReceiver, PushSender};
