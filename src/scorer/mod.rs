//! Remote predictive scorer client.

pub mod client;

pub use client::{FeatureRow, ScorerClient, ScorerError};
