//! Application layer orchestrating the domain.
//!
//! Every state change runs inside a [`unit_of_work::UnitOfWork`], which holds
//! per-account row locks until its staged writes are committed to the store.
//! Notifications produced by a unit of work are released only after commit.

pub mod collector;
pub mod credit;
pub mod ledger;
pub mod notifications;
pub mod unit_of_work;

pub use collector::{CollectorHandle, PaymentCollector, SweepReport};
pub use credit::CreditService;
pub use ledger::Ledger;
pub use notifications::{NotificationOutbox, NotificationWorker};
