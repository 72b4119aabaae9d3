//! Wire DTOs for the catalog REST API.
//!
//! DESIGN
//! ======
//! Auth types are strict: a `/auth/me/` body with an unknown role fails to
//! decode and is treated as a failed identity lookup. Catalog types are
//! lenient (`#[serde(default)]`) because they only feed display code.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// AUTH
// =============================================================================

/// Access/refresh credential pair. Stored and replaced as one unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self { access: access.into(), refresh: refresh.into() }
    }
}

// Tokens never reach logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /auth/token/refresh/`. The server may rotate the refresh token.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Closed set of account roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Supplier,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Supplier => "supplier",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "supplier" => Ok(Self::Supplier),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Resolved identity from `GET /auth/me/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Numeric account id, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmailRequest<'a> {
    pub email: &'a str,
}

// =============================================================================
// CATALOG
// =============================================================================

/// A product row as returned by `/products/`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub id: i64,
    pub owner_username: Option<String>,
    pub name: String,
    pub sku: Option<String>,
    pub category: String,
    pub description: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub base_price: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub current_price: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub min_price: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub max_price: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub optimized_price: String,
    pub stock_qty: u64,
    pub units_sold: u64,
    pub customer_rating: u32,
    pub demand_forecast: u64,
    pub elasticity: f64,
    pub is_active: bool,
}

/// One entry of `/products/{id}/price-history/`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceChange {
    pub id: i64,
    pub product: i64,
    pub product_name: Option<String>,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub old_price: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub new_price: String,
    pub changed_by_username: Option<String>,
    pub reason: String,
    pub changed_at: String,
}

/// DRF list envelope. Some endpoints return a bare array; see [`Page::from_value`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    pub results: Vec<T>,
}

impl<T: serde::de::DeserializeOwned> Page<T> {
    /// Accept either `{count, results}` or a bare JSON array.
    ///
    /// # Errors
    ///
    /// Returns the serde error when neither shape matches.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_array() {
            let results: Vec<T> = serde_json::from_value(value)?;
            let count = results.len() as u64;
            return Ok(Self { count, results });
        }
        #[derive(Deserialize)]
        struct Envelope<T> {
            count: Option<u64>,
            results: Vec<T>,
        }
        let env: Envelope<T> = serde_json::from_value(value)?;
        let count = env.count.unwrap_or(env.results.len() as u64);
        Ok(Self { count, results: env.results })
    }
}

/// Status of a buyer's request for supplier access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierRequest {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub reason: String,
    pub status: SupplierRequestStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of `GET /auth/supplier-request/`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SupplierRequestLookup {
    pub exists: bool,
    #[serde(default)]
    pub request: Option<SupplierRequest>,
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Text(String),
        Number(serde_json::Number),
        Null(()),
    }
    Ok(match Decimal::deserialize(deserializer)? {
        Decimal::Text(s) => s,
        Decimal::Number(n) => n.to_string(),
        Decimal::Null(()) => String::new(),
    })
}
