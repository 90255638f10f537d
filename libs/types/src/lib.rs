//! # Fastlane Core Types
//!
//! Shared identifiers, protocol constants, and decision-policy types used by
//! every crate in the workspace. This crate has no async or I/O surface; it
//! exists so that the codec, routing, session, and service crates agree on
//! one definition of each wire-level quantity.

pub mod constants;
pub mod error_flags;
pub mod ids;
pub mod route_state;
pub mod shader;

pub use constants::*;
pub use error_flags::*;
pub use ids::*;
pub use route_state::RouteState;
pub use shader::RouteShader;
