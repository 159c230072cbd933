//! Resource identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque 128-bit identifier unique across the system.
///
/// Uses UUIDv7 so ids sort in creation order, matching the "externally
/// visible, appears in events" requirement in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Create a new unique `ResourceId` using UUIDv7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a `ResourceId` from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ResourceId> for Uuid {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ResourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_time_ordered() {
        let a = ResourceId::new();
        let b = ResourceId::new();
        assert!(a.as_uuid().get_version_num() == 7);
        assert!(a <= b);
    }

    #[test]
    fn round_trips_through_string() {
        let id = ResourceId::new();
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
