mod client;

pub use client::{HttpLlmClient, HttpLlmClientConfig};
