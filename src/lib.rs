//! Async client for the Moku REST API.
//!
//! The crate is organized around a single device session:
//! - `session`: ownership-token client, endpoint addressing and error type.
//! - `envelope`: decoding of the `{success, data | code, messages}` wrapper.
//! - `oscilloscope`: typed helpers for the oscilloscope endpoints.
//! - `retry`: opt-in retry helper for callers.

/// Response envelope decoding.
pub mod envelope;
/// Oscilloscope request and frame types.
pub mod oscilloscope;
/// Caller-side retry helpers.
pub mod retry;
/// Session client, configuration and errors.
pub mod session;

pub use envelope::Envelope;
pub use session::{
    ClaimOptions, Endpoint, SessionClient, SessionClientOptions, SessionDefaults, SessionError,
    CLIENT_KEY_HEADER, DEFAULT_DEVICE_ADDRESS,
};
