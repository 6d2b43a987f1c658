//! Account ledger and consumer-credit scheduling engine.
//!
//! Balances move only through locked units of work, credits carry a generated
//! amortization schedule, and a periodic collector debits due installments,
//! handling insufficient funds with penalties and overdue escalation.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
