//! Request/response shapes for the HTTP API.

pub mod v1;
