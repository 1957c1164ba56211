pub mod adapter;
pub mod classify;
pub mod db;
pub mod error;
pub mod model;
pub mod moderation;
pub mod normalize;
pub mod orchestrator;
pub mod relevance;
pub mod report;
pub mod schema;
pub mod settings;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;
