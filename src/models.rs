pub mod entitlement;
pub mod payments;
pub mod users;
