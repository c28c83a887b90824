//! Offline-resilient request interception cache proxy.
//!
//! Requests are classified into API, document and static traffic. API calls
//! race the network against a deadline, everything else is served cache-first
//! from a versioned cache generation with write-through on miss.

pub mod cache;
pub mod config;
pub mod logging;
pub mod net;
pub mod notify;
pub mod proxy;
pub mod server;
pub mod sync;
pub mod worker;
