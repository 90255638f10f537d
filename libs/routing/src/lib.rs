//! # Fastlane Routing
//!
//! ## Purpose
//!
//! Everything between a cost matrix and a route decision:
//!
//! * [`tri`]: the triangular index addressing all-pairs relay storage.
//! * [`cost`]: the all-pairs cost matrix produced from relay pings.
//! * [`matrix`]: the route matrix: top-K lowest-cost multi-hop routes per
//!   relay pair plus the relay lookup tables, with versioned binary form.
//! * [`optimize`]: the offline cost→route transformation.
//! * [`reframe`]: mapping session-supplied relay ids into the indices of
//!   whatever route matrix is currently published.
//! * [`plan`]: the per-slice route decision engine.
//!
//! ## Performance profile
//!
//! Route lookups on the session path are array reads off a published,
//! immutable matrix; they allocate only the chosen hop vector. The optimizer
//! runs out of band on a schedule and is the only code here that spawns
//! threads.

pub mod cost;
pub mod matrix;
pub mod optimize;
pub mod plan;
pub mod reframe;
pub mod tri;

pub use cost::{cost_matrix_from_table, CostMatrix};
pub use matrix::{RouteEntry, RouteMatrix, ROUTE_MATRIX_BINARY_VERSION};
pub use optimize::optimize;
pub use plan::*;
pub use reframe::*;
pub use tri::{tri_index, tri_matrix_length};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing codec: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("routing io: {0}")]
    Io(#[from] std::io::Error),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
