//! Client-side session state and the route gates that read it.

pub mod gate;
pub mod session;
