//! Order model and payload validation.
//!
//! The backend serialises orders loosely: ids may be numbers or strings,
//! decimals may arrive as numbers or strings, and field names drift between
//! camelCase and snake_case. Everything is validated here into strict records
//! before the synchronizer sees it; entries without an identifier or status
//! are dropped.

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ---------------------------------------------------------------------------
// Identifiers and enums
// ---------------------------------------------------------------------------

/// Stable order identifier. Numeric ids are kept in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.as_str())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum OrderStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
    /// Any other status the backend reports, upper-cased.
    Other(String),
}

impl OrderStatus {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let status = match normalized.as_str() {
            "" => return None,
            "PENDING" => Self::Pending,
            "APPROVED" => Self::Approved,
            "COMPLETED" => Self::Completed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Other(normalized),
        };
        Some(status)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum PaymentMethod {
    Cash,
    Credit,
    Card,
    Other(String),
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let method = match normalized.as_str() {
            "" => return None,
            "CASH" => Self::Cash,
            "CREDIT" => Self::Credit,
            "CARD" => Self::Card,
            _ => Self::Other(normalized),
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Cash => "CASH",
            Self::Credit => "CREDIT",
            Self::Card => "CARD",
            Self::Other(s) => s,
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Order record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl CustomerRef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown customer")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer: CustomerRef,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_method: Option<PaymentMethod>,
    pub order_date: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub tax: Option<Decimal>,
}

/// Fields carried by a single-order push update. Everything except the id
/// and status is optional and only overwrites the retained order when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub id: OrderId,
    pub status: OrderStatus,
    pub total_amount: Option<Decimal>,
    pub customer_id: Option<String>,
    pub action: Option<String>,
}

impl Order {
    /// Apply a push update to this order in place.
    pub fn apply_update(&mut self, update: &OrderUpdate) {
        self.status = update.status.clone();
        if let Some(total) = update.total_amount {
            self.total_amount = total;
        }
        if let Some(customer_id) = &update.customer_id {
            self.customer.id = Some(customer_id.clone());
        }
    }

    /// Build a minimal order from an update for an id not yet tracked.
    pub fn from_update(update: &OrderUpdate) -> Self {
        Self {
            id: update.id.clone(),
            customer: CustomerRef {
                id: update.customer_id.clone(),
                name: None,
            },
            total_amount: update.total_amount.unwrap_or(Decimal::ZERO),
            status: update.status.clone(),
            payment_method: None,
            order_date: None,
            notes: None,
            tax: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An ordered collection of orders, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    orders: Vec<Order>,
}

impl Snapshot {
    /// Duplicate ids keep the position of their first occurrence and the
    /// value of their last.
    pub fn new(orders: Vec<Order>) -> Self {
        let mut positions: HashMap<OrderId, usize> = HashMap::with_capacity(orders.len());
        let mut unique: Vec<Order> = Vec::with_capacity(orders.len());
        for order in orders {
            match positions.get(&order.id) {
                Some(&idx) => unique[idx] = order,
                None => {
                    positions.insert(order.id.clone(), unique.len());
                    unique.push(order);
                }
            }
        }
        Self { orders: unique }
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| &o.id == id)
    }

    pub fn index_by_id(&self) -> HashMap<&OrderId, &Order> {
        self.orders.iter().map(|o| (&o.id, o)).collect()
    }

    /// Returns a copy with `update` merged in (appended when the id is new).
    pub fn with_update(&self, update: &OrderUpdate) -> Self {
        let mut orders = self.orders.clone();
        match orders.iter_mut().find(|o| o.id == update.id) {
            Some(existing) => existing.apply_update(update),
            None => orders.push(Order::from_update(update)),
        }
        Self { orders }
    }

    /// Returns a copy without the given id, or `None` if it was not tracked.
    pub fn without(&self, id: &OrderId) -> Option<Self> {
        let idx = self.orders.iter().position(|o| &o.id == id)?;
        let mut orders = self.orders.clone();
        orders.remove(idx);
        Some(Self { orders })
    }
}

// ---------------------------------------------------------------------------
// Order actions
// ---------------------------------------------------------------------------

/// Explicit status transitions exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Start,
    Complete,
    Cancel,
}

impl OrderAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "complete" => Some(Self::Complete),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Path segment under `/orders/{id}/`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }

    pub fn target_status(&self) -> OrderStatus {
        match self {
            Self::Start => OrderStatus::Approved,
            Self::Complete => OrderStatus::Completed,
            Self::Cancel => OrderStatus::Cancelled,
        }
    }

    /// Client-side precheck mirroring the backend's transition rules.
    pub fn check_from(&self, current: &OrderStatus) -> Result<(), String> {
        match (self, current) {
            (Self::Start, OrderStatus::Pending) => Ok(()),
            (Self::Start, _) => Err("Order can only be started from PENDING status".to_string()),
            (Self::Complete, OrderStatus::Approved) => Ok(()),
            (Self::Complete, _) => {
                Err("Order can only be completed from APPROVED status".to_string())
            }
            (Self::Cancel, OrderStatus::Completed | OrderStatus::Cancelled) => {
                Err(format!("Cannot cancel order in {current} status"))
            }
            (Self::Cancel, _) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload validation
// ---------------------------------------------------------------------------

fn value_any<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| v.get(*key))
        .find(|value| !value.is_null())
}

fn str_any(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(Value::as_str) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn decimal_any(v: &Value, keys: &[&str]) -> Option<Decimal> {
    match value_any(v, keys)? {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn parse_customer(v: &Value) -> CustomerRef {
    let nested = v.get("customer").filter(|c| c.is_object());
    let name = nested
        .and_then(|c| str_any(c, &["name", "fullName"]))
        .or_else(|| str_any(v, &["customerName", "customer_name"]));
    let id = nested
        .and_then(|c| value_any(c, &["id"]))
        .or_else(|| value_any(v, &["customerId", "customer_id"]))
        .and_then(OrderId::from_value)
        .map(|id| id.0);
    CustomerRef { id, name }
}

/// Validate one backend order object. Returns `None` when it lacks an id or
/// status, or carries a negative total.
pub fn parse_order(v: &Value) -> Option<Order> {
    let id = value_any(v, &["id", "orderId", "order_id"]).and_then(OrderId::from_value)?;
    let status = str_any(v, &["status", "newStatus"]).and_then(|s| OrderStatus::parse(&s))?;

    let total_amount = decimal_any(v, &["totalAmount", "total_amount", "total"]).unwrap_or_default();
    if total_amount.is_sign_negative() && !total_amount.is_zero() {
        debug!(order_id = %id, total = %total_amount, "skipping order with negative total");
        return None;
    }

    Some(Order {
        customer: parse_customer(v),
        total_amount,
        status,
        payment_method: str_any(v, &["paymentMethod", "payment_method"])
            .and_then(|s| PaymentMethod::parse(&s)),
        order_date: str_any(v, &["orderDate", "order_date", "createdAt", "created_at"])
            .and_then(|s| parse_timestamp(&s)),
        notes: str_any(v, &["notes"]),
        tax: decimal_any(v, &["tax"]),
        id,
    })
}

/// Validate a collection payload into a snapshot, skipping malformed entries.
/// Returns `None` when the payload is not an array at all.
pub fn parse_snapshot(payload: &Value) -> Option<Snapshot> {
    let entries = payload.as_array()?;
    let mut orders = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        match parse_order(entry) {
            Some(order) => orders.push(order),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, kept = orders.len(), "dropped malformed order entries");
    }
    Some(Snapshot::new(orders))
}

/// Validate a single-order push update (`{orderId, status, action, ...}`).
pub fn parse_order_update(v: &Value) -> Option<OrderUpdate> {
    let id = value_any(v, &["orderId", "order_id", "id"]).and_then(OrderId::from_value)?;
    let status = str_any(v, &["status", "newStatus"]).and_then(|s| OrderStatus::parse(&s))?;
    let total_amount = decimal_any(v, &["totalAmount", "total_amount"])
        .filter(|t| !t.is_sign_negative() || t.is_zero());
    Some(OrderUpdate {
        id,
        status,
        total_amount,
        customer_id: value_any(v, &["customerId", "customer_id"])
            .and_then(OrderId::from_value)
            .map(|id| id.0),
        action: str_any(v, &["action"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_order_accepts_backend_shape() {
        let order = parse_order(&json!({
            "id": 12,
            "customer": { "id": 3, "name": "Ada" },
            "orderDate": "2025-03-01T18:30:00",
            "totalAmount": 42.5,
            "status": "approved",
            "paymentMethod": "credit",
            "notes": "no onions",
            "tax": "3.40"
        }))
        .expect("valid order");

        assert_eq!(order.id.as_str(), "12");
        assert_eq!(order.customer.name.as_deref(), Some("Ada"));
        assert_eq!(order.customer.id.as_deref(), Some("3"));
        assert_eq!(order.total_amount, Decimal::from_str("42.5").unwrap());
        assert_eq!(order.status, OrderStatus::Approved);
        assert_eq!(order.payment_method, Some(PaymentMethod::Credit));
        assert_eq!(order.notes.as_deref(), Some("no onions"));
        assert_eq!(order.tax, Some(Decimal::from_str("3.40").unwrap()));
        assert!(order.order_date.is_some());
    }

    #[test]
    fn test_parse_order_rejects_missing_id_or_status() {
        assert!(parse_order(&json!({ "status": "PENDING" })).is_none());
        assert!(parse_order(&json!({ "id": 1 })).is_none());
        assert!(parse_order(&json!({ "id": "", "status": "PENDING" })).is_none());
        assert!(parse_order(&json!({ "id": 1, "status": "  " })).is_none());
        assert!(parse_order(&json!({ "id": true, "status": "PENDING" })).is_none());
    }

    #[test]
    fn test_parse_order_rejects_negative_total() {
        assert!(parse_order(&json!({ "id": 1, "status": "PENDING", "totalAmount": -1 })).is_none());
    }

    #[test]
    fn test_unknown_status_is_preserved() {
        let order = parse_order(&json!({ "id": "a", "status": "ready" })).unwrap();
        assert_eq!(order.status, OrderStatus::Other("READY".to_string()));
        assert_eq!(order.status.to_string(), "READY");
    }

    #[test]
    fn test_parse_snapshot_skips_malformed_entries() {
        let snapshot = parse_snapshot(&json!([
            { "id": 1, "status": "PENDING" },
            { "status": "PENDING" },
            "garbage",
            { "id": 2, "status": "COMPLETED" }
        ]))
        .unwrap();
        let ids: Vec<&str> = snapshot.orders().iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(parse_snapshot(&json!({ "orders": [] })).is_none());
    }

    #[test]
    fn test_snapshot_dedupes_by_id() {
        let snapshot = parse_snapshot(&json!([
            { "id": 1, "status": "PENDING" },
            { "id": 2, "status": "PENDING" },
            { "id": 1, "status": "APPROVED" }
        ]))
        .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.orders()[0].id.as_str(), "1");
        assert_eq!(snapshot.orders()[0].status, OrderStatus::Approved);
    }

    #[test]
    fn test_snapshot_with_update_merges_and_appends() {
        let snapshot = parse_snapshot(&json!([
            { "id": 1, "status": "PENDING", "totalAmount": 10, "customer": { "name": "Bo" } }
        ]))
        .unwrap();

        let update = parse_order_update(&json!({
            "orderId": "1", "status": "APPROVED", "action": "STARTED"
        }))
        .unwrap();
        let merged = snapshot.with_update(&update);
        let order = merged.get(&OrderId::new("1")).unwrap();
        assert_eq!(order.status, OrderStatus::Approved);
        assert_eq!(order.customer.name.as_deref(), Some("Bo"));
        assert_eq!(order.total_amount, Decimal::from(10));
        // the original copy is untouched
        assert_eq!(snapshot.orders()[0].status, OrderStatus::Pending);

        let fresh = parse_order_update(&json!({
            "orderId": 9, "status": "PENDING", "totalAmount": 5.25
        }))
        .unwrap();
        let appended = merged.with_update(&fresh);
        assert_eq!(appended.len(), 2);
        assert_eq!(appended.orders()[1].total_amount, Decimal::from_str("5.25").unwrap());
    }

    #[test]
    fn test_snapshot_without_removes_tracked_id() {
        let snapshot =
            parse_snapshot(&json!([{ "id": 1, "status": "PENDING" }, { "id": 2, "status": "PENDING" }]))
                .unwrap();
        let reduced = snapshot.without(&OrderId::new("1")).unwrap();
        assert_eq!(reduced.len(), 1);
        assert!(snapshot.without(&OrderId::new("99")).is_none());
    }

    #[test]
    fn test_action_prechecks_follow_backend_rules() {
        assert!(OrderAction::Start.check_from(&OrderStatus::Pending).is_ok());
        assert!(OrderAction::Start.check_from(&OrderStatus::Approved).is_err());
        assert!(OrderAction::Complete.check_from(&OrderStatus::Approved).is_ok());
        assert!(OrderAction::Complete.check_from(&OrderStatus::Pending).is_err());
        assert!(OrderAction::Cancel.check_from(&OrderStatus::Approved).is_ok());
        assert_eq!(
            OrderAction::Cancel.check_from(&OrderStatus::Completed),
            Err("Cannot cancel order in COMPLETED status".to_string())
        );
        assert_eq!(OrderAction::parse("Cancel"), Some(OrderAction::Cancel));
        assert_eq!(OrderAction::Start.target_status(), OrderStatus::Approved);
    }
}
