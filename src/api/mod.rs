// API module
//
// This module contains the HTTP API for recording and verifying study chains

pub mod doc;
pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use doc::ApiDoc;
pub use routes::configure_routes;
