//! Gateway integration tests.
//!
//! Downstream services are axum stubs bound to 127.0.0.1:0.

mod support;
mod downstream;

#[cfg(feature = "http")]
mod http;
