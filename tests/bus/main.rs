//! Event bus integration tests over the in-memory topic broker.

mod support;
mod routing;
mod bootstrap;

#[cfg(feature = "http")]
mod end_to_end;
