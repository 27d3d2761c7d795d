use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub credits: i32,
    pub first_service_used: bool,
    pub accepted_terms: bool,
    pub referral_code: Option<String>,
    pub referred_by: Option<i64>,
    pub referral_bonus_awarded: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// Profile data delivered with an inbound contact from the chat platform.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Contact {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReferralStats {
    pub referral_code: String,
    pub invited_count: i64,
}
