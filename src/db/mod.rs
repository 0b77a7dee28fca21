//! Durable storage layer
//!
//! MongoDB client/collection wrapper plus one document schema per table.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
