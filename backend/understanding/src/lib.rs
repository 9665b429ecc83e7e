//! Inference backend clients for Picscribe.

pub mod ollama;

pub use ollama::OllamaClient;
