use serde::Serialize;

/// Outcome of the entitlement check for one paid service request. The
/// `uses_free_trial` flag must be threaded through to the charge commit
/// unchanged; the commit re-validates atomically against the ledger.
#[derive(Clone, Debug, Serialize)]
pub struct Availability {
    pub allowed: bool,
    pub balance: i32,
    pub uses_free_trial: bool,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChargeOutcome {
    pub success: bool,
    pub new_balance: i32,
    pub used_free_trial: bool,
}
