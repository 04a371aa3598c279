//! Controller module for memcached-operator.
//!
//! Two independent loops keep children converged:
//! - the watch dispatcher (dispatcher) reacts to `Memcached` changes
//! - the periodic reconciler (resync) corrects drift and collects garbage
//!
//! Both go through the idempotent child actions (actions) and tear
//! Deployments down with the reaper (reaper).

// Shared modules
pub mod actions;
pub mod api;
pub mod backoff;
pub mod context;
pub mod error;
pub mod supervisor;
pub mod version_cache;

// Loops
pub mod dispatcher;
pub mod reaper;
pub mod resync;
