//! Subscription-driven price streaming and alert routing engine.

pub mod app;
pub mod engine;
