//! Last-seen resource versions of child objects.
//!
//! Only used by the resync loop to skip updates of children that have not
//! changed since it last wrote them. Losing it costs extra updates, never
//! correctness.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Maps child UID to the resourceVersion last observed for it.
#[derive(Clone, Debug, Default)]
pub struct VersionCache {
    versions: HashMap<String, String>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the object's version matches the cached one for its UID.
    pub fn is_current(&self, meta: &ObjectMeta) -> bool {
        match (&meta.uid, &meta.resource_version) {
            (Some(uid), Some(version)) => self.versions.get(uid) == Some(version),
            _ => false,
        }
    }

    /// Remember the object's current version. Objects without a UID are ignored.
    pub fn record(&mut self, meta: &ObjectMeta) {
        if let (Some(uid), Some(version)) = (&meta.uid, &meta.resource_version) {
            self.versions.insert(uid.clone(), version.clone());
        }
    }

    /// Cached version for a UID.
    pub fn get(&self, uid: &str) -> Option<&str> {
        self.versions.get(uid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
