//! Mirror and instance records.
//!
//! A mirror pairs a source project with a target project across two platform
//! instances. Instance credentials are read from the owning product's store;
//! the engine only ever borrows them.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// A platform instance participating in mirroring.
#[derive(Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Stable instance identifier, also embedded in loop-prevention labels.
    pub id: Uuid,
    /// API base URL of the instance.
    pub base_url: Url,
    /// Access token. Never serialized and never logged.
    #[serde(default, skip_serializing)]
    pub token: String,
}

impl Instance {
    /// Throttle/breaker destination key for this instance.
    pub fn destination(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }
}

// Manual Debug so tokens cannot leak through log formatting.
impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// A configured pairing of a source project and a target project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub id: Uuid,
    pub source: Instance,
    pub target: Instance,
    pub source_project_id: u64,
    pub target_project_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(url: &str) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            base_url: Url::parse(url).unwrap(),
            token: "glpat-secret".to_string(),
        }
    }

    #[test]
    fn destination_is_origin() {
        let inst = instance("https://git.example.com/api/v4/");
        assert_eq!(inst.destination(), "https://git.example.com");
    }

    #[test]
    fn debug_redacts_token() {
        let inst = instance("https://git.example.com");
        let rendered = format!("{inst:?}");
        assert!(!rendered.contains("glpat-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn serialize_skips_token() {
        let inst = instance("https://git.example.com");
        let json = serde_json::to_string(&inst).unwrap();
        assert!(!json.contains("glpat-secret"));
    }
}
