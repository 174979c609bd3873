//! Hardware adapters
//!
//! Transports that implement [`ScpiEndpoint`](crate::traits::ScpiEndpoint):
//! raw SCPI sockets, VISA sessions, and an in-memory mock. Use [`open`] to get
//! a handle from a resource string.

pub mod mock;
pub mod resource;
pub mod socket_adapter;
pub mod visa_adapter;

pub use mock::{MockInstrument, MockOpener};
pub use resource::{open, DefaultOpener, Opener, ResourceAddress};
pub use socket_adapter::SocketAdapter;
pub use visa_adapter::{list_resources, VisaAdapter};
