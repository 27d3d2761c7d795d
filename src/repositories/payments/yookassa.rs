use super::{CreatePayment, GatewayError, PaymentGateway};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

pub struct YookassaApi {
    url: String,
    shop_id: String,
    secret_key: String,
    return_url: String,
    client: reqwest::Client,
}

impl YookassaApi {
    pub fn new(url: String, shop_id: String, secret_key: String, return_url: String) -> Self {
        Self {
            url,
            shop_id,
            secret_key,
            return_url,
            client: reqwest::Client::new(),
        }
    }

    fn map_status(status: StatusCode, body: String) -> GatewayError {
        match status {
            StatusCode::BAD_REQUEST => GatewayError::BadRequest(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
            StatusCode::NOT_FOUND => GatewayError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
            _ => GatewayError::Unavailable(format!("{}: {}", status, body)),
        }
    }

    fn parse_payment(value: &serde_json::Value) -> Result<super::GatewayPayment, GatewayError> {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Unavailable("Missing payment id in response".to_string()))?;
        let status = value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let confirmation_url = value
            .pointer("/confirmation/confirmation_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(super::GatewayPayment {
            id: id.to_string(),
            status: status.to_string(),
            confirmation_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for YookassaApi {
    async fn create_payment(
        &self,
        request: &CreatePayment,
    ) -> Result<super::GatewayPayment, GatewayError> {
        // A fresh key per attempt; reusing one would make the gateway
        // collapse distinct purchases into a single payment.
        let idempotence_key = Uuid::new_v4().hyphenated().to_string();
        let payload = json!({
            "amount": {
                "value": format!(
                    "{}.{:02}",
                    request.amount_in_minor_units / 100,
                    request.amount_in_minor_units % 100
                ),
                "currency": request.currency,
            },
            "capture": true,
            "confirmation": {"type": "redirect", "return_url": self.return_url},
            "description": request.description,
            "metadata": {
                "user_id": request.user_id.to_string(),
                "credits": request.credits.to_string(),
                "key": request.option_key,
            },
        });

        let response = self
            .client
            .post(format!("{}/payments", self.url))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", idempotence_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_status(status, body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Unavailable(format!("Bad response format: {}", e)))?;

        Self::parse_payment(&value)
    }

    async fn find_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<super::GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.url, gateway_payment_id))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_status(status, body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Unavailable(format!("Bad response format: {}", e)))?;

        Self::parse_payment(&value)
    }
}
