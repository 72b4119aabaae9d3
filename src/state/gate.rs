//! Role-based route guard.
//!
//! A gate is a pure function of the session snapshot and the requested
//! location. It never blocks and never calls the network; while the
//! bootstrap latch is unset it answers `Loading`, so an unresolved session
//! is never mistaken for an anonymous one.

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;

use std::fmt;

use url::form_urlencoded;

use super::session::SessionState;
use crate::net::types::Role;

pub const LOGIN_ROUTE: &str = "/login";
pub const HOME_ROUTE: &str = "/";

/// Access requirement for one route level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthGate {
    /// Empty means any authenticated user.
    roles: &'static [Role],
}

impl AuthGate {
    /// Any authenticated user may pass.
    pub const AUTHENTICATED: Self = Self { roles: &[] };

    #[must_use]
    pub const fn require_roles(roles: &'static [Role]) -> Self {
        Self { roles }
    }

    #[must_use]
    pub fn roles(&self) -> &'static [Role] {
        self.roles
    }

    /// Where the session stands relative to this gate.
    #[must_use]
    pub fn classify(&self, session: &SessionState) -> GateState {
        if !session.ready {
            return GateState::Loading;
        }
        match &session.identity {
            None => GateState::Unauthenticated,
            Some(user) if self.roles.is_empty() || self.roles.contains(&user.role) => GateState::Authorized,
            Some(_) => GateState::Unauthorized,
        }
    }

    /// Decide what to show for `location`.
    #[must_use]
    pub fn evaluate(&self, session: &SessionState, location: &str) -> GateDecision {
        match self.classify(session) {
            GateState::Loading => GateDecision::Loading,
            GateState::Unauthenticated => GateDecision::Redirect(Redirect {
                to: LOGIN_ROUTE.to_owned(),
                from: Some(location.to_owned()),
            }),
            GateState::Unauthorized => GateDecision::Redirect(Redirect { to: HOME_ROUTE.to_owned(), from: None }),
            GateState::Authorized => GateDecision::Render,
        }
    }
}

/// Evaluate nested gates outermost first; the first non-render decision wins.
#[must_use]
pub fn evaluate_chain(gates: &[AuthGate], session: &SessionState, location: &str) -> GateDecision {
    gates
        .iter()
        .map(|gate| gate.evaluate(session, location))
        .find(|decision| *decision != GateDecision::Render)
        .unwrap_or(GateDecision::Render)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Loading,
    Unauthenticated,
    Unauthorized,
    Authorized,
}

/// A history-replacing navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    /// Originally requested location, so login can send the user back.
    pub from: Option<String>,
}

impl Redirect {
    /// Target rendered as a single location string, with `from`
    /// form-encoded as the only query parameter.
    #[must_use]
    pub fn href(&self) -> String {
        match &self.from {
            Some(from) => {
                let query = form_urlencoded::Serializer::new(String::new()).append_pair("from", from).finish();
                format!("{}?{query}", self.to)
            }
            None => self.to.clone(),
        }
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Session not resolved yet; show a neutral placeholder.
    Loading,
    Redirect(Redirect),
    Render,
}
