//! # QA Agent
//!
//! Retrieval-augmented drafting of QA test cases and Selenium scripts.
//!
//! Uploaded documents are staged, extracted, chunked and embedded into a
//! fresh namespace of a shared vector index; that namespace is a knowledge
//! base. Test cases are drafted by a language model from the chunks most
//! similar to a query, and a second model turns one chosen test case plus
//! an HTML snippet into a browser-automation script.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Ingestor │──▶│   Chunker    │──▶│   Registry   │
//! │multipart │   │ stage+ext│   │ 800 / 150    │   │ embed+upsert │
//! └──────────┘   └──────────┘   └──────────────┘   └──────┬───────┘
//!                                                         │ kb_id
//!                 ┌──────────────┐   ┌──────────────┐     ▼
//!                 │   Script     │   │  Test-case   │◀─ Retriever
//!                 │  generator   │   │  generator   │
//!                 └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! qa-agent init                 # staging dir + vector index
//! qa-agent inspect spec.pdf     # dry-run extraction and chunking
//! qa-agent serve                # start HTTP server on :8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | Per-format text extraction |
//! | [`ingest`] | Upload staging and document creation |
//! | [`chunk`] | Recursive text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Namespaced vector storage |
//! | [`registry`] | Knowledge-base lifecycle |
//! | [`retrieve`] | Similarity retrieval |
//! | [`llm`] | Hosted language-model clients |
//! | [`testcases`] | Test-case generation and parsing |
//! | [`script`] | Selenium script generation and clean-up |
//! | [`service`] | Wiring of the whole pipeline |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod registry;
pub mod retrieve;
pub mod script;
pub mod server;
pub mod service;
pub mod testcases;
pub mod vector_index;
