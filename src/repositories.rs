pub mod audit;
pub mod ledger;
pub mod memory;
pub mod notifier;
pub mod payments;
