//! Shared domain types for the crucible execution service.
//!
//! Everything that crosses the wire between the HTTP/WebSocket layer and the
//! execution engine lives here, so that the server binary and external test
//! clients agree on one vocabulary.

pub mod types;
