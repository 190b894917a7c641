//! Snapshot diffing.

use serde::Serialize;

use crate::orders::{Order, OrderStatus, Snapshot};

/// A transition detected between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Added {
        order: Order,
    },
    StatusChanged {
        order: Order,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl ChangeEvent {
    pub fn order(&self) -> &Order {
        match self {
            Self::Added { order } | Self::StatusChanged { order, .. } => order,
        }
    }
}

/// Classify every order of `next` against `previous`. Status changes come
/// first, then additions, each group in `next` order.
///
/// Ids missing from `next` produce nothing: an order that disappears simply
/// drops out of the collection.
pub fn diff(previous: &Snapshot, next: &Snapshot) -> Vec<ChangeEvent> {
    let previous_by_id = previous.index_by_id();
    let mut changed = Vec::new();
    let mut added = Vec::new();
    for order in next.orders() {
        match previous_by_id.get(&order.id) {
            None => added.push(ChangeEvent::Added {
                order: order.clone(),
            }),
            Some(old) if old.status != order.status => changed.push(ChangeEvent::StatusChanged {
                order: order.clone(),
                from: old.status.clone(),
                to: order.status.clone(),
            }),
            Some(_) => {}
        }
    }
    changed.extend(added);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::parse_snapshot;
    use serde_json::json;

    fn snapshot(v: serde_json::Value) -> Snapshot {
        parse_snapshot(&v).expect("array payload")
    }

    #[test]
    fn test_identical_snapshots_yield_nothing() {
        let s = snapshot(json!([
            { "id": 1, "status": "PENDING" },
            { "id": 2, "status": "COMPLETED", "totalAmount": 9.99 }
        ]));
        assert!(diff(&s, &s).is_empty());
        assert!(diff(&Snapshot::default(), &Snapshot::default()).is_empty());
    }

    #[test]
    fn test_status_change_is_reported_once() {
        let before = snapshot(json!([{ "id": 1, "status": "PENDING" }]));
        let after = snapshot(json!([{ "id": 1, "status": "APPROVED" }]));
        let events = diff(&before, &after);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChangeEvent::StatusChanged { order, from, to } => {
                assert_eq!(order.id.as_str(), "1");
                assert_eq!(from, &OrderStatus::Pending);
                assert_eq!(to, &OrderStatus::Approved);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_new_id_is_reported_as_added() {
        let events = diff(
            &Snapshot::default(),
            &snapshot(json!([{ "id": 7, "status": "PENDING" }])),
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChangeEvent::Added { order } if order.id.as_str() == "7"));
    }

    #[test]
    fn test_removed_ids_are_silent() {
        let before = snapshot(json!([
            { "id": 1, "status": "PENDING" },
            { "id": 2, "status": "PENDING" }
        ]));
        let after = snapshot(json!([{ "id": 2, "status": "PENDING" }]));
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn test_status_changes_precede_additions() {
        let before = snapshot(json!([
            { "id": 1, "status": "PENDING" },
            { "id": 2, "status": "PENDING" },
            { "id": 4, "status": "APPROVED" }
        ]));
        let after = snapshot(json!([
            { "id": 3, "status": "PENDING" },
            { "id": 2, "status": "CANCELLED" },
            { "id": 5, "status": "PENDING" },
            { "id": 1, "status": "PENDING", "notes": "extra napkins" },
            { "id": 4, "status": "COMPLETED" }
        ]));
        let events = diff(&before, &after);
        let ids: Vec<&str> = events.iter().map(|e| e.order().id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4", "3", "5"]);
        assert!(matches!(events[0], ChangeEvent::StatusChanged { .. }));
        assert!(matches!(events[1], ChangeEvent::StatusChanged { .. }));
        assert!(matches!(events[2], ChangeEvent::Added { .. }));
        assert!(matches!(events[3], ChangeEvent::Added { .. }));
    }
}
