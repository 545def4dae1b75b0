use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OrderStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: BigDecimal,
        discount_amount: BigDecimal,
        total_items: i32,
        placed_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        changed_by: Uuid,
    },
    OrderItemsChanged {
        order_id: Uuid,
        total_amount: BigDecimal,
        total_items: i32,
    },
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced { .. } => "OrderPlaced",
            OrderEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            OrderEvent::OrderItemsChanged { .. } => "OrderItemsChanged",
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self {
            OrderEvent::OrderPlaced { order_id, .. }
            | OrderEvent::OrderStatusChanged { order_id, .. }
            | OrderEvent::OrderItemsChanged { order_id, .. } => *order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_change_serializes_with_tag() {
        let order_id = Uuid::new_v4();
        let event = OrderEvent::OrderStatusChanged {
            order_id,
            from: OrderStatus::Placed,
            to: OrderStatus::Confirmed,
            changed_by: Uuid::new_v4(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderStatusChanged");
        assert_eq!(json["data"]["from"], "placed");
        assert_eq!(json["data"]["to"], "confirmed");
        assert_eq!(event.aggregate_id(), order_id);
        assert_eq!(event.event_type(), "OrderStatusChanged");

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
