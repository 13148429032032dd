//! Spotter - cross-DEX arbitrage opportunity detection
//!
//! Venues are discovered from catalogs and an address book, checked on chain,
//! and kept in a registry. Each cycle the detector compares the same token
//! pair across venues and publishes ranked, gas-adjusted opportunities to the
//! store, where a trade service can pick them up.

pub mod abi;
pub mod allocator;
pub mod cache;
pub mod chain;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod execution;
pub mod market;
pub mod opportunity;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tokens;
pub mod validator;
pub mod venues;
