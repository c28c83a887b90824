//! Abstract request/response primitives and the network seam.

mod client;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{FetchError, Fetcher, ReqwestFetcher};
pub use types::{Destination, Request, Response};
