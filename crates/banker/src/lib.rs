//! Locally-cached, eventually-consistent budget authority.
//!
//! A fleet of bidding workers makes real-time spend decisions against
//! *shadow accounts*, local replicas of authorizations drawn from a central
//! master bank. Two 1 Hz loops reconcile the replicas: *report-spend* pushes
//! observed spend back to the master, *reauthorize* tops every account up by
//! a configured spend rate. A liveness indicator derived from the two
//! last-success timestamps is the only signal external monitors consume.
//!
//! The master is reached through a polymorphic [`ApplicationLayer`]; both an
//! HTTP variant and an in-process message-bus variant ship here.

pub use application::{ApplicationLayer, BusLayer, BusRequest, BusResponse, HttpLayer, LayerError};
pub use controller::BudgetController;
pub use error::BankerError;
pub use memory::MemoryMaster;
pub use shadow::ShadowAccount;
pub use slave::{SlaveBanker, SlaveBankerConfig, DEFAULT_SPEND_RATE, MAX_FAIL_SYNC, SYNC_PERIOD};
pub use store::ShadowAccountStore;

mod application;
mod controller;
mod error;
mod memory;
mod shadow;
mod slave;
mod store;

type ResultBanker<T> = Result<T, BankerError>;
