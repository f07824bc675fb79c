//! CryptoAlert Library
//!
//! Scheduled ATH-drawdown and price-target alerts for crypto assets

pub mod config;
pub mod cycle;
pub mod engine;
pub mod market;
pub mod notify;
pub mod persistence;
pub mod ranges;
pub mod types;
