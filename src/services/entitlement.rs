use crate::models::entitlement::Availability;
use crate::models::users::User;
use crate::settings;

/// Pricing rules for paid services.
#[derive(Clone, Copy, Debug)]
pub struct ServicePolicy {
    pub service_cost: i32,
    pub first_service_free: bool,
}

impl From<&settings::Credits> for ServicePolicy {
    fn from(credits: &settings::Credits) -> Self {
        ServicePolicy {
            service_cost: credits.service_cost,
            first_service_free: credits.first_service_free,
        }
    }
}

/// Decides whether a paid action may proceed. Pure; the verdict must be used
/// immediately and committed through the ledger service, which re-validates
/// atomically against the stored balance.
pub fn evaluate(user: &User, policy: &ServicePolicy) -> Availability {
    if user.credits >= policy.service_cost {
        Availability {
            allowed: true,
            balance: user.credits,
            uses_free_trial: false,
            message: format!(
                "You have {} credit(s). This reading costs {} credit(s).",
                user.credits, policy.service_cost
            ),
        }
    } else if policy.first_service_free && !user.first_service_used {
        Availability {
            allowed: true,
            balance: user.credits,
            uses_free_trial: true,
            message: "Your first reading is free!".to_string(),
        }
    } else {
        Availability {
            allowed: false,
            balance: user.credits,
            uses_free_trial: false,
            message: format!(
                "You have {} credit(s), but this reading costs {} credit(s). Please top up your balance.",
                user.credits, policy.service_cost
            ),
        }
    }
}
