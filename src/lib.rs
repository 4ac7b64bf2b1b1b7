//! NoteFlow - asynchronous AI note enrichment pipeline.
//!
//! Ingests user notes (images or raw text), runs them through a multi-stage
//! AI pipeline (OCR, correction, summarization, tagging), and persists
//! structured knowledge artifacts. Task progress streams to clients over
//! server-sent events.

pub mod cache;
pub mod cli;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod repository;
pub mod server;
pub mod tasks;
pub mod utils;
