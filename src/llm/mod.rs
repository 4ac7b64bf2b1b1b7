//! Model client for the enrichment pipeline.
//!
//! Four semantic operations (OCR, correction, summarization, tag
//! generation) behind the [`ModelBackend`] trait, implemented over an
//! OpenAI-compatible chat-completions endpoint with retry and backoff.

mod client;
mod prompts;
mod retry;

pub use client::{ModelBackend, ModelClient, ModelError, NewTag, TagSuggestions};
pub use prompts::{prompt, render, SummaryTemplate};
pub use retry::RetryPolicy;
