//! Catalog API client: token storage, an authenticated HTTP client with
//! transparent token renewal, session bootstrap, and role-based route gates.
//!
//! ARCHITECTURE
//! ============
//! `net::http::ApiClient` is the only path to the network and the only code
//! that renews tokens. `state::session::SessionManager` owns identity and the
//! bootstrap latch. `state::gate` decides what a location may show, and
//! `shell::Shell` ties the two together and reacts to session loss.

pub mod config;
pub mod error;
pub mod net;
pub mod routes;
pub mod shell;
pub mod state;

pub use config::ClientConfig;
pub use error::ApiError;
pub use net::http::{ApiClient, SessionEvent};
pub use net::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use shell::{Outcome, Shell};
pub use state::gate::{AuthGate, GateDecision};
pub use state::session::{SessionManager, SessionState};
