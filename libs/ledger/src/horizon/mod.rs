//! Horizon REST gateway

mod client;
mod types;

pub use client::HorizonGateway;
pub use types::{AccountResponse, ProblemResponse, TransactionResponse};
