//! # semstore
//!
//! **A single-node semantic document store.**
//!
//! semstore ingests free-text documents with optional string key/value
//! metadata, embeds each document with an ONNX transformer encoder, indexes
//! the embeddings in an HNSW graph, and answers k-nearest-neighbor queries
//! over HTTP/JSON, alongside substring text search, exact metadata lookup,
//! and point CRUD by document id. State is durable: a SQLite file for
//! documents and a serialized index for vectors.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌───────────────┐
//! │  HTTP    │──▶│   Coordinator    │──▶│ DocumentStore │
//! │  (axum)  │   │ (one big lock)  │   │   (SQLite)    │
//! └──────────┘   │                 │   └───────────────┘
//!                │                 │──▶┌───────────────┐
//!                │                 │   │   AnnIndex    │
//!                │                 │   │    (HNSW)     │
//!                │                 │   └───────────────┘
//!                │                 │──▶┌───────────────┐
//!                └─────────────────┘   │ InferenceEngine│
//!                                      │  (tract-onnx) │
//!                                      └───────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A document arrives over HTTP and is written to the
//!    [`store::DocumentStore`].
//! 2. The [`inference::InferenceEngine`] tokenizes the text, runs the
//!    transformer, mean-pools the hidden states over unmasked positions, and
//!    L2-normalizes the result.
//! 3. The embedding is appended to the [`ann::AnnIndex`]; the
//!    [`coordinator::Coordinator`] records which document id owns that index
//!    position.
//! 4. A search query is embedded the same way and matched against the index;
//!    hits are materialized from the store, scored `1 / (1 + distance)`.
//! 5. Updates and deletes rebuild the index from the store, since the HNSW
//!    graph has no safe per-vector removal.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Runtime configuration from CLI flags |
//! | [`error`] | Error taxonomy shared by all layers |
//! | [`models`] | `Document`, `SearchResult`, id generation |
//! | [`tokenizer`] | Tokenizer adapter over a serialized `tokenizer.json` |
//! | [`inference`] | `Embedder` trait and the tract-onnx engine |
//! | [`store`] | Durable document + metadata relations (rusqlite) |
//! | [`ann`] | HNSW index wrapper with dump/load |
//! | [`coordinator`] | Store ↔ index ↔ mapping consistency |
//! | [`server`] | HTTP/JSON facade (axum) with open CORS |

pub mod ann;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inference;
pub mod models;
pub mod server;
pub mod store;
pub mod tokenizer;

pub use error::{Error, Result};
