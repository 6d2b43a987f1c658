//! Domain types, rules and the ports the core consumes.

pub mod account;
pub mod amortization;
pub mod analytics;
pub mod credit;
pub mod money;
pub mod notification;
pub mod ports;
pub mod schedule;
pub mod transaction;
