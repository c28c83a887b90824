//! Request classification and the fetch strategy engine.

mod classify;
mod strategy;

pub use classify::{Classifier, RequestClass};
pub use strategy::{EngineOptions, FetchEngine, Served, OFFLINE_TEXT};
