use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::engines::DatabaseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Paused,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Tracked, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: u32,
    pub memory: u32,
    pub storage: u32,
}

/// One provisioned database, as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub id: Uuid,
    pub container_id: String,
    pub container_name: String,
    pub owner: Uuid,
    pub instance_name: String,
    pub database_type: DatabaseType,
    pub version: String,
    pub status: InstanceStatus,
    pub host: String,
    pub port: u16,
    pub connection_string: String,
    pub resource_usage: ResourceUsage,
    pub configuration: JsonValue,
    /// Optimistic concurrency token, bumped on every status write.
    #[serde(skip)]
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An authenticated tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub is_active: bool,
    /// Append-only; not pruned on delete, so it is an index rather than the truth.
    pub database_instances: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(username: String, email: String, credential_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            credential_hash,
            is_active: true,
            database_instances: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_catalog_text() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Paused,
            InstanceStatus::Error,
        ] {
            assert_eq!(InstanceStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(InstanceStatus::from_str("pause"), None);
    }

    #[test]
    fn principal_hides_credential_hash() {
        let principal = Principal::new("alice".into(), "alice@example.com".into(), "hash".into());
        let json = serde_json::to_value(&principal).unwrap();
        assert!(json.get("credentialHash").is_none());
        assert_eq!(json["username"], "alice");
        assert_eq!(json["isActive"], true);
    }
}
