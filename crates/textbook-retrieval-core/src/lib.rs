//! # Textbook Retrieval Core
//!
//! Pure retrieval logic for Textbook Retrieval: title normalization, the
//! corpus store, the title index, the embedding index, and the hybrid
//! (exact-then-semantic) retriever.
//!
//! This crate performs no filesystem or network I/O. Embeddings come in
//! through the [`Embedder`](embedding::Embedder) trait; loading corpus files,
//! index caches, and figure assets is the application crate's job.

pub mod corpus;
pub mod embedding;
pub mod index;
pub mod normalize;
pub mod search;
