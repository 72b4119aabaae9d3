//! Top-level shell: current location plus the reaction to session loss.
//!
//! SYSTEM CONTEXT
//! ==============
//! The API client signals `SessionEvent::Invalidated` once per lost session
//! and never navigates itself. The shell owns that reaction: it drops the
//! identity from the session manager and moves to the login location.
//! Navigation runs the route's gate chain against the current snapshot.

#[cfg(test)]
#[path = "shell_test.rs"]
mod shell_test;

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, broadcast, watch};

use crate::net::http::SessionEvent;
use crate::routes::{self, Route};
use crate::state::gate::{GateDecision, HOME_ROUTE, LOGIN_ROUTE, Redirect, evaluate_chain};
use crate::state::session::SessionManager;

/// Result of asking the shell to show a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Render(&'static Route),
    /// Session still resolving; the location is held until it settles.
    Loading,
    Redirected(Redirect),
    NotFound,
}

pub struct Shell {
    session: Arc<SessionManager>,
    events: Mutex<broadcast::Receiver<SessionEvent>>,
    location: watch::Sender<String>,
}

impl Shell {
    /// Subscribes to the session's client immediately, so no signal emitted
    /// after construction is missed.
    #[must_use]
    pub fn new(session: Arc<SessionManager>) -> Self {
        let events = Mutex::new(session.client().subscribe());
        let (location, _) = watch::channel(HOME_ROUTE.to_owned());
        Self { session, events, location }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    #[must_use]
    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    #[must_use]
    pub fn watch_location(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }

    /// Show `location`, following at most one redirect.
    pub fn navigate(&self, location: &str) -> Outcome {
        let Some(route) = routes::resolve(location) else {
            tracing::debug!(%location, "no route");
            return Outcome::NotFound;
        };

        match evaluate_chain(route.gates, &self.session.snapshot(), routes::strip_query(location)) {
            GateDecision::Render => {
                self.set_location(location.to_owned());
                Outcome::Render(route)
            }
            GateDecision::Loading => {
                self.set_location(location.to_owned());
                Outcome::Loading
            }
            GateDecision::Redirect(redirect) => {
                tracing::info!(requested = %location, to = %redirect, "route gate redirect");
                self.set_location(redirect.href());
                Outcome::Redirected(redirect)
            }
        }
    }

    /// React to one client signal.
    pub fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Invalidated => {
                self.session.invalidate();
                let current = self.location();
                let from = routes::resolve(&current)
                    .filter(|route| !route.is_public())
                    .map(|_| routes::strip_query(&current).to_owned());
                let redirect = Redirect { to: LOGIN_ROUTE.to_owned(), from };
                tracing::info!(from = %current, to = %redirect, "session lost; returning to login");
                self.set_location(redirect.href());
            }
        }
    }

    /// Handle every signal already queued, without waiting. Returns how many
    /// were handled.
    pub async fn pump(&self) -> usize {
        let mut rx = self.events.lock().await;
        let mut handled = 0;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    self.on_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session events lagged");
                    self.on_event(SessionEvent::Invalidated);
                    handled += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return handled,
            }
        }
    }

    /// Handle signals as they arrive. Holds the receiver for its whole
    /// lifetime, so [`Shell::pump`] waits while this runs.
    pub async fn run(&self) {
        let mut rx = self.events.lock().await;
        loop {
            match rx.recv().await {
                Ok(event) => self.on_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session events lagged");
                    self.on_event(SessionEvent::Invalidated);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    fn set_location(&self, location: String) {
        self.location.send_replace(location);
    }
}
