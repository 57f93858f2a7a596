//! Sponsored recovery of assets from compromised EVM wallets.
//!
//! A separate sponsor wallet pays gas for a batch of per-wallet recovery operations (an airdrop
//! claim, a token transfer, or both). Each compromised wallet signs a 24-hour, function-scoped
//! delegation to the batch contract; the sponsor then submits one operation per wallet, strictly
//! in sequence, and recovered tokens are finally split between the fee collector and the
//! wallet's receiver.
//!
//! Pipeline: [`wallet`] → [`delegation`] → [`batch`] → [`executor`] → [`distributor`].

pub mod amount;
pub mod batch;
pub mod chain;
pub mod config;
pub mod contract;
pub mod delegation;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod fee;
pub mod network;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod wallet;
