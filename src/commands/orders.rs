use serde_json::Value;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::orders::{parse_order, parse_snapshot, Order, OrderAction, OrderId, Snapshot};
use crate::sync::Synchronizer;

/// Parse a user-supplied order id argument.
pub fn parse_order_id(raw: &str) -> Result<OrderId, String> {
    let trimmed = raw.trim().trim_start_matches('#');
    if trimmed.is_empty() {
        return Err("Missing order id".to_string());
    }
    Ok(OrderId::new(trimmed))
}

pub async fn order_list(api: &ApiClient) -> Result<Snapshot, String> {
    let payload = api.fetch_orders().await.map_err(|e| e.inline_message())?;
    parse_snapshot(&payload)
        .ok_or_else(|| "Unexpected response from backend: expected a list of orders".to_string())
}

/// Run one explicit transition. The current status is checked first so an
/// impossible transition fails without a write; the backend enforces the same
/// rules regardless.
pub async fn order_transition(
    api: &ApiClient,
    id: &OrderId,
    action: OrderAction,
) -> Result<Option<Order>, String> {
    match api.get_order(id).await {
        Ok(current) => {
            if let Some(order) = parse_order(&current) {
                action.check_from(&order.status)?;
            }
        }
        Err(e) if e.is_transport() => return Err(e.inline_message()),
        // Let the transition call report missing orders and the like.
        Err(e) => warn!(order_id = %id, error = %e, "order precheck failed"),
    }

    let resp = api
        .transition_order(id, action)
        .await
        .map_err(|e| e.inline_message())?;
    Ok(parse_order(&resp))
}

/// Delete an order and drop it from a running synchronizer's snapshot.
pub async fn order_delete(
    api: &ApiClient,
    id: &OrderId,
    sync: Option<&Synchronizer>,
) -> Result<(), String> {
    api.delete_order(id).await.map_err(|e| e.inline_message())?;
    if let Some(sync) = sync {
        if sync.forget(id.clone()) {
            info!(order_id = %id, "deleted order dropped from live snapshot");
        }
    }
    Ok(())
}

pub fn format_order_line(order: &Order) -> String {
    let mut line = format!(
        "#{:<8} {:<10} {:>10}  {}",
        order.id.as_str(),
        order.status.as_str(),
        format!("${:.2}", order.total_amount),
        order.customer.display_name()
    );
    if let Some(date) = order.order_date {
        line.push_str(&format!("  {}", date.format("%Y-%m-%d %H:%M")));
    }
    if let Some(method) = &order.payment_method {
        line.push_str(&format!("  [{}]", method.as_str()));
    }
    line
}

/// JSON rendering of a snapshot for `orders --json`.
pub fn snapshot_json(snapshot: &Snapshot) -> Value {
    serde_json::to_value(snapshot).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve_once;
    use serde_json::json;
    use std::time::Duration;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5))
            .unwrap()
            .with_credentials("1", None)
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id(" #42 ").unwrap(), OrderId::new("42"));
        assert!(parse_order_id("  ").is_err());
    }

    #[test]
    fn test_format_order_line() {
        let order = parse_order(&json!({
            "id": 5,
            "status": "APPROVED",
            "totalAmount": "18.5",
            "paymentMethod": "CASH",
            "orderDate": "2026-02-03T12:15:00",
            "customer": { "name": "Lin" }
        }))
        .unwrap();
        let line = format_order_line(&order);
        assert!(line.starts_with("#5 "));
        assert!(line.contains("APPROVED"));
        assert!(line.contains("$18.50"));
        assert!(line.contains("Lin"));
        assert!(line.contains("2026-02-03 12:15"));
        assert!(line.ends_with("[CASH]"));
    }

    #[tokio::test]
    async fn test_transition_precheck_rejects_without_write() {
        let (base, server) = serve_once("200 OK", r#"{"id":3,"status":"COMPLETED"}"#).await;
        let err = order_transition(&client(&base), &OrderId::new("3"), OrderAction::Start)
            .await
            .unwrap_err();
        assert_eq!(err, "Order can only be started from PENDING status");
        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /api/orders/3 "));
    }

    #[tokio::test]
    async fn test_list_surfaces_backend_message_inline() {
        let (base, _server) = serve_once("403 Forbidden", r#"{"message":"Admin not found"}"#).await;
        let err = order_list(&client(&base)).await.unwrap_err();
        assert_eq!(err, "Admin not found");
    }

    #[tokio::test]
    async fn test_list_rejects_non_array_payload() {
        let (base, _server) = serve_once("200 OK", r#"{"orders":[]}"#).await;
        let err = order_list(&client(&base)).await.unwrap_err();
        assert!(err.contains("expected a list of orders"));
    }

    #[tokio::test]
    async fn test_delete_reports_inline_error() {
        let (base, _server) = serve_once("404 Not Found", "").await;
        let err = order_delete(&client(&base), &OrderId::new("8"), None)
            .await
            .unwrap_err();
        assert_eq!(err, "Resource not found");
    }
}
