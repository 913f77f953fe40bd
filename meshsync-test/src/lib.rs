//! Test harness for `meshsync`: a deterministic mock world, a loopback
//! message switch, and an input-ordering relay for driving multi-peer
//! end-to-end scenarios.

pub mod helpers;
