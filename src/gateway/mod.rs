//! Gateway pipeline: route classification, identity resolution, budget
//! admission, upstream rewrite and response passthrough with cost
//! extraction.

pub mod auth;
pub mod cors;
mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::Gateway;
