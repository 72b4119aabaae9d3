//! Typed wrappers for the catalog, forecast, pricing and supplier endpoints.
//!
//! SYSTEM CONTEXT
//! ==============
//! These are the data-bound collaborators of the session core. Every call
//! goes through [`ApiClient`], so bearer attachment and token renewal apply
//! uniformly; nothing here touches tokens or session state directly.
//!
//! Analytics payloads (forecast overview, chart data, pricing analysis) are
//! returned as raw JSON because only display code consumes them.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use serde_json::{Value, json};

use super::http::{ApiClient, PendingRequest};
use super::types::{Page, PriceChange, Product, SupplierRequest, SupplierRequestLookup, SupplierRequestStatus};
use crate::error::ApiError;

/// Filters accepted by `GET /products/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ProductQuery {
    fn apply(&self, mut req: PendingRequest) -> PendingRequest {
        if let Some(search) = self.search.as_deref() {
            req = req.query("search", search.trim());
        }
        if let Some(category) = &self.category {
            req = req.query("category", category);
        }
        if let Some(ordering) = &self.ordering {
            req = req.query("ordering", ordering);
        }
        if let Some(page) = self.page {
            req = req.query("page", page);
        }
        if let Some(page_size) = self.page_size {
            req = req.query("page_size", page_size);
        }
        req
    }
}

fn product_path(id: i64) -> String {
    format!("/products/{id}/")
}

fn price_history_path(id: i64) -> String {
    format!("/products/{id}/price-history/")
}

fn forecast_path(id: i64) -> String {
    format!("/forecast/{id}/")
}

fn admin_supplier_request_path(id: i64) -> String {
    format!("/auth/admin/supplier-requests/{id}/")
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

async fn fetch_page<T: serde::de::DeserializeOwned>(client: &ApiClient, req: PendingRequest) -> Result<Page<T>, ApiError> {
    let value = client.send(req).await?;
    Page::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

// =============================================================================
// PRODUCTS
// =============================================================================

/// `GET /products/` with optional filters.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn list_products(client: &ApiClient, query: &ProductQuery) -> Result<Page<Product>, ApiError> {
    fetch_page(client, query.apply(PendingRequest::get("/products/"))).await
}

/// `GET /products/mine/`: products owned by the caller.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn list_my_products(client: &ApiClient) -> Result<Page<Product>, ApiError> {
    fetch_page(client, PendingRequest::get("/products/mine/")).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn get_product(client: &ApiClient, id: i64) -> Result<Product, ApiError> {
    client.send_json(PendingRequest::get(product_path(id))).await
}

/// `POST /products/` with a raw field map (name, category, prices, stock...).
///
/// # Errors
///
/// Field-level validation failures come back as [`ApiError::Validation`].
pub async fn create_product(client: &ApiClient, fields: &Value) -> Result<Product, ApiError> {
    client.send_json(PendingRequest::post("/products/").json(fields)).await
}

/// `PATCH /products/{id}/`. A `reason` field is recorded in price history
/// when `current_price` changes.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn update_product(client: &ApiClient, id: i64, fields: &Value) -> Result<Product, ApiError> {
    client.send_json(PendingRequest::patch(product_path(id)).json(fields)).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn delete_product(client: &ApiClient, id: i64) -> Result<(), ApiError> {
    client.send(PendingRequest::delete(product_path(id))).await.map(|_| ())
}

/// Newest-first price changes for one product.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn price_history(client: &ApiClient, id: i64) -> Result<Vec<PriceChange>, ApiError> {
    client.send_json(PendingRequest::get(price_history_path(id))).await
}

// =============================================================================
// FORECAST
// =============================================================================

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn forecast_overview(client: &ApiClient) -> Result<Value, ApiError> {
    client.send(PendingRequest::get("/forecast/overview/")).await
}

/// Chart series, optionally limited to `product_ids`.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn forecast_chart_data(client: &ApiClient, product_ids: &[i64]) -> Result<Value, ApiError> {
    let req = PendingRequest::get("/forecast/chart-data/").query("product_ids", join_ids(product_ids));
    client.send(req).await
}

/// `POST /forecast/generate/`; an empty `product_ids` asks for all products.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn generate_forecasts(client: &ApiClient, product_ids: &[i64], years: Option<u32>) -> Result<Value, ApiError> {
    let mut body = json!({});
    if !product_ids.is_empty() {
        body["product_ids"] = json!(product_ids);
    }
    if let Some(years) = years {
        body["years"] = json!(years);
    }
    client.send(PendingRequest::post("/forecast/generate/").json(&body)).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn list_forecasts(client: &ApiClient, page: Option<u32>) -> Result<Page<Value>, ApiError> {
    let mut req = PendingRequest::get("/forecast/");
    if let Some(page) = page {
        req = req.query("page", page);
    }
    fetch_page(client, req).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn get_forecast(client: &ApiClient, id: i64) -> Result<Value, ApiError> {
    client.send(PendingRequest::get(forecast_path(id))).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn delete_forecast(client: &ApiClient, id: i64) -> Result<(), ApiError> {
    client.send(PendingRequest::delete(forecast_path(id))).await.map(|_| ())
}

// =============================================================================
// PRICING
// =============================================================================

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn optimize_all(client: &ApiClient) -> Result<Value, ApiError> {
    client.send(PendingRequest::get("/pricing/optimize_all/")).await
}

/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn market_analysis(client: &ApiClient) -> Result<Value, ApiError> {
    client.send(PendingRequest::get("/pricing/market_analysis/")).await
}

/// Apply the optimized price to the given products.
///
/// # Errors
///
/// Returns [`ApiError::InvalidArgument`] for an empty id list, otherwise
/// propagates [`ApiError`] from the client.
pub async fn apply_optimization(client: &ApiClient, product_ids: &[i64]) -> Result<Value, ApiError> {
    if product_ids.is_empty() {
        return Err(ApiError::InvalidArgument("no product ids given".into()));
    }
    let body = json!({ "product_ids": product_ids });
    client.send(PendingRequest::post("/pricing/apply_optimization/").json(&body)).await
}

// =============================================================================
// SUPPLIER REQUESTS
// =============================================================================

/// The caller's own supplier-access request, if any.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn my_supplier_request(client: &ApiClient) -> Result<Option<SupplierRequest>, ApiError> {
    let lookup: SupplierRequestLookup = client.send_json(PendingRequest::get("/auth/supplier-request/")).await?;
    Ok(if lookup.exists { lookup.request } else { None })
}

/// # Errors
///
/// A second submission comes back as [`ApiError::Validation`].
pub async fn submit_supplier_request(client: &ApiClient, company: &str, reason: &str) -> Result<SupplierRequest, ApiError> {
    let body = json!({ "company": company, "reason": reason });
    client.send_json(PendingRequest::post("/auth/supplier-request/").json(&body)).await
}

/// Admin view of all supplier requests, newest first.
///
/// # Errors
///
/// Propagates [`ApiError`] from the client.
pub async fn list_supplier_requests(client: &ApiClient, page: u32, page_size: u32) -> Result<Page<SupplierRequest>, ApiError> {
    let req = PendingRequest::get("/auth/admin/supplier-requests/")
        .query("page", page.max(1))
        .query("page_size", page_size);
    fetch_page(client, req).await
}

/// Approve or reject a pending request.
///
/// # Errors
///
/// Returns [`ApiError::InvalidArgument`] for `Pending`; the server only
/// accepts a decision.
pub async fn decide_supplier_request(
    client: &ApiClient,
    id: i64,
    status: SupplierRequestStatus,
) -> Result<Value, ApiError> {
    if status == SupplierRequestStatus::Pending {
        return Err(ApiError::InvalidArgument("status must be approved or rejected".into()));
    }
    let req = PendingRequest::patch(admin_supplier_request_path(id)).json(&json!({ "status": status }));
    client.send(req).await
}
