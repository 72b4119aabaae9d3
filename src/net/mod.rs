//! Networking: token storage, the authenticated HTTP client, and REST wrappers.
//!
//! SYSTEM CONTEXT
//! ==============
//! `token_store` persists credentials, `http` is the only path to the
//! network, `api` wraps catalog endpoints, and `types` defines the wire schema.

pub mod api;
pub mod http;
pub mod token_store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_server;
