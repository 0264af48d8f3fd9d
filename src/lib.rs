//! exactly-once-consumer library
//!
//! The command-line pieces of the consumer: the ledger-backed handler run by
//! `consume` and the producer behind `produce`. The coordination loop itself
//! lives in the `coordinated-consumer` crate.

pub mod handler;
pub mod produce;

pub use handler::LedgerHandler;
pub use produce::{run_produce, EventProducer, ProduceArgs};
