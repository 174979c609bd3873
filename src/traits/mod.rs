//! Instrument capability traits
//!
//! The sweep engine only ever talks to instruments through these traits, so
//! any transport (socket, VISA, mock) can sit behind a handle.

pub mod scpi_endpoint;

pub use scpi_endpoint::ScpiEndpoint;
