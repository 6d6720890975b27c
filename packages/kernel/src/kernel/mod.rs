//! Domain layer of the mission control plane.
//!
//! Everything authoritative goes through [`store::KernelStore`]; the modules
//! here only ever mutate state with conditional single-row updates so that
//! concurrent request handlers race safely at the store, not in memory.

pub mod actor;
pub mod commands;
pub mod error;
pub mod governor;
pub mod missions;
pub mod ratelimit;
pub mod registry;
pub mod store;
pub mod traces;

pub use actor::{Actor, ActorKind};
pub use error::{KernelError, KernelResult};
