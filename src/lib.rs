//! Quorate - Tiered Rate Limiting
//!
//! This crate limits request rates per caller identity across a hierarchy of
//! tiers: a global tier, one tier per protocol, and one per HTTP endpoint or
//! gRPC method. Tiers keep their state either in process, as token buckets,
//! or in a shared counter store as fixed one-second windows.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
pub mod transport;
