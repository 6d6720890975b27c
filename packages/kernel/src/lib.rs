//! company-kernel — mission control plane for the roaster platform.
//!
//! The kernel owns the durable mission queue (lease-based claims, bounded
//! retries), the governance engine that admits or quarantines work, and the
//! command approval pipeline for operator-gated control actions. Everything
//! authoritative lives in the sqlite store; the HTTP surface in [`server`] is
//! a thin translation layer over [`kernel`].

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;
