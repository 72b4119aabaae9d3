//! Route table: which gates guard which locations.
//!
//! ROUTE MAP
//! =========
//! Public: `/`, `/login`, `/signup`, `/logout`, `/verify-email/{uid}/{token}`.
//! Authenticated: `/products`, `/pricing`, `/supplier-request`.
//! Admin: `/admin/supplier-requests` (authenticated gate, then admin gate).

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_test;

use crate::net::types::Role;
use crate::state::gate::AuthGate;

const ADMIN_ONLY: AuthGate = AuthGate::require_roles(&[Role::Admin]);

/// One entry in the route table. `{name}` segments match any single segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub pattern: &'static str,
    /// Outermost first.
    pub gates: &'static [AuthGate],
}

impl Route {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.gates.is_empty()
    }

    fn matches(&self, path: &str) -> bool {
        let mut want = segments(self.pattern);
        let mut got = segments(path);
        loop {
            match (want.next(), got.next()) {
                (None, None) => return true,
                (Some(w), Some(g)) if is_param(w) || w == g => {}
                _ => return false,
            }
        }
    }
}

pub const ROUTES: &[Route] = &[
    Route { pattern: "/", gates: &[] },
    Route { pattern: "/login", gates: &[] },
    Route { pattern: "/signup", gates: &[] },
    Route { pattern: "/logout", gates: &[] },
    Route { pattern: "/verify-email/{uid}/{token}", gates: &[] },
    Route { pattern: "/products", gates: &[AuthGate::AUTHENTICATED] },
    Route { pattern: "/pricing", gates: &[AuthGate::AUTHENTICATED] },
    Route { pattern: "/supplier-request", gates: &[AuthGate::AUTHENTICATED] },
    Route { pattern: "/admin/supplier-requests", gates: &[AuthGate::AUTHENTICATED, ADMIN_ONLY] },
];

/// Find the route for `location`, ignoring any query string.
#[must_use]
pub fn resolve(location: &str) -> Option<&'static Route> {
    let path = strip_query(location);
    ROUTES.iter().find(|route| route.matches(path))
}

/// Path part of a location (`/login?from=%2Fx` gives `/login`).
#[must_use]
pub fn strip_query(location: &str) -> &str {
    location.split_once('?').map_or(location, |(path, _)| path)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn is_param(segment: &str) -> bool {
    segment.starts_with('{') && segment.ends_with('}')
}
