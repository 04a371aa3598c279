//! Custom Resource Definitions (CRDs) for memcached-operator.
//!
//! - `Memcached`: desired topology of one memcached + mcrouter cluster

mod memcached;

pub use memcached::*;
