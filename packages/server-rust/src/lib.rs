//! `Topom` server: topology store, slot migration driver, group and sentinel
//! reconcilers, and the admin HTTP API in front of them.

pub mod clients;
pub mod cluster;
pub mod network;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{Topom, TopomError, TopomResult};
