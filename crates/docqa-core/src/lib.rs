//! # docqa core
//!
//! Shared, runtime-agnostic logic for docqa: data models, the recursive
//! chunker, the vector index abstraction, MMR retrieval, context assembly,
//! prompt rendering, conversation sessions, and the embedding/generation
//! provider traits.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP clients.
//! Concrete providers, persistence, and orchestration live in the `docqa`
//! application crate.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod session;
