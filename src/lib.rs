//! Plant disease classification served over HTTP.
//!
//! Uploads are validated and decoded by [`preprocessing`], passed through the
//! canonical [`transform`] and classified by the active model owned by
//! [`model::ModelManager`]. The HTTP surface lives in [`routes`].

pub mod backbone;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod plant;
pub mod preprocessing;
pub mod routes;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod test_graphs;
