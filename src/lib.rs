//! # Code Vectorizer
//!
//! Multi-tenant vectorization and semantic search for source-code
//! repositories.
//!
//! A repository is cloned, its source files are split into overlapping,
//! token-bounded chunks, every chunk is embedded, and the vectors are stored
//! in a namespace owned by one `(username, repo_name)` pair. Natural-language
//! queries are embedded the same way and answered by cosine similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │  fetch   │──▶│ pipeline                 │──▶│ store         │
//! │ git clone│   │ discover→chunk→embed→save│   │ per-tenant ns │
//! └──────────┘   └────────────┬─────────────┘   └──────┬───────┘
//!                             │ progress               │
//!                        ┌────▼────┐             ┌─────▼────┐
//!                        │  jobs   │             │  search  │
//!                        └────┬────┘             └─────┬────┘
//!                             └──────┬─────────────────┘
//!                               ┌────▼────┐
//!                               │ service │──▶ HTTP (server) / CLI (cvec)
//!                               └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cvec init
//! cvec vectorize https://github.com/org/widgets.git --username alice
//! cvec search "parse the config file" --username alice
//! cvec serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Line-oriented token chunking |
//! | [`embedding`] | Embedding backends, batching and retry |
//! | [`store`] | Tenant namespaces (SQLite and in-memory) |
//! | [`db`] | SQLite connection pool |
//! | [`fetch`] | Repository cloning |
//! | [`discover`] | Eligible-file discovery |
//! | [`jobs`] | Job registry |
//! | [`pipeline`] | Ingestion pipeline |
//! | [`search`] | Similarity and file-path search |
//! | [`service`] | Boundary operations |
//! | [`server`] | HTTP API |
//! | [`progress`] | CLI progress reporting |

pub mod chunk;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod server;
pub mod service;
pub mod store;
