use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    WaitingForCapture,
    Succeeded,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::WaitingForCapture => "waiting_for_capture",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
        }
    }

    /// Maps a gateway-reported status string to a local status. Anything the
    /// gateway sends that we do not recognize is treated as still pending
    /// rather than rejected.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "succeeded" => PaymentStatus::Succeeded,
            "canceled" => PaymentStatus::Canceled,
            "waiting_for_capture" => PaymentStatus::WaitingForCapture,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Canceled)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Payment {
    pub id: String,
    pub user_id: i64,
    pub gateway_payment_id: String,
    pub amount_in_minor_units: i32,
    pub currency: String,
    pub credits_purchased: i32,
    pub status: PaymentStatus,
    pub credits_awarded: bool,
    pub description: Option<String>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// One purchasable credit package. Prices are in minor currency units.
#[derive(Clone, Copy, Debug)]
pub struct PaymentOption {
    pub key: &'static str,
    pub amount_in_minor_units: i32,
    pub credits: i32,
    pub description: &'static str,
}

pub const PAYMENT_OPTIONS: &[PaymentOption] = &[
    PaymentOption { key: "buy_1", amount_in_minor_units: 9900, credits: 1, description: "1 reading" },
    PaymentOption { key: "buy_3", amount_in_minor_units: 27900, credits: 3, description: "3 readings" },
    PaymentOption { key: "buy_5", amount_in_minor_units: 44900, credits: 5, description: "5 readings" },
    PaymentOption { key: "buy_10", amount_in_minor_units: 84900, credits: 10, description: "10 readings" },
    PaymentOption { key: "buy_20", amount_in_minor_units: 149900, credits: 20, description: "20 readings" },
];

impl PaymentOption {
    pub fn by_key(key: &str) -> Option<&'static PaymentOption> {
        PAYMENT_OPTIONS.iter().find(|o| o.key == key)
    }
}

/// Freshly created checkout at the gateway, handed back to the chat layer.
#[derive(Clone, Debug, Serialize)]
pub struct Checkout {
    pub payment_id: String,
    pub gateway_payment_id: String,
    pub redirect_url: String,
}

/// Inbound webhook payload, as the gateway posts it.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayNotification {
    pub event: String,
    pub object: NotificationObject,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationObject {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub object_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(PaymentStatus::from_gateway("succeeded"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_gateway("canceled"), PaymentStatus::Canceled);
        assert_eq!(
            PaymentStatus::from_gateway("waiting_for_capture"),
            PaymentStatus::WaitingForCapture
        );
        // Unrecognized statuses fall back to pending.
        assert_eq!(PaymentStatus::from_gateway("refund_pending"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_gateway(""), PaymentStatus::Pending);
    }

    #[test]
    fn payment_options_lookup() {
        let opt = PaymentOption::by_key("buy_5").unwrap();
        assert_eq!(opt.amount_in_minor_units, 44900);
        assert_eq!(opt.credits, 5);
        assert!(PaymentOption::by_key("buy_100").is_none());
    }

    #[test]
    fn notification_payload_parses() {
        let raw = r#"{
            "event": "payment.succeeded",
            "object": {"id": "2d9e", "status": "succeeded", "type": "payment"}
        }"#;
        let n: GatewayNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(n.event, "payment.succeeded");
        assert_eq!(n.object.object_type, "payment");
    }
}
