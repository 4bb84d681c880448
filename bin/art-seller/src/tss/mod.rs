mod client;
mod types;

pub use client::TssClient;
pub use types::{DeliveryRequest, SignedEnvelope, TxFunctionRequest, TxFunctionResponse};
