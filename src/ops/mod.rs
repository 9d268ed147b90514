//! Client-side operations against running nodes

pub mod client;
pub mod wait;

pub use client::Client;
pub use wait::wait_ready;
