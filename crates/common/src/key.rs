use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Identifier for one tenant-agent channel session.
///
/// Serialized as `"{tenant_id}:{agent_id}"`. Exactly one live connector and
/// one durable session artifact directory exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey {
    tenant_id: String,
    agent_id: String,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Filesystem-safe form of the key, used to name artifact directories.
    #[must_use]
    pub fn fs_name(&self) -> String {
        self.to_string().replace(':', "_")
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.agent_id)
    }
}

impl FromStr for SessionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tenant, agent) = s
            .split_once(':')
            .ok_or_else(|| format!("session key missing ':' separator: {s}"))?;
        if tenant.is_empty() || agent.is_empty() {
            return Err(format!("session key has empty component: {s}"));
        }
        Ok(Self::new(tenant, agent))
    }
}

impl TryFrom<String> for SessionKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.to_string()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_parse() {
        let key = SessionKey::new("tenant-1", "agent-9");
        let parsed: SessionKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn fs_name_replaces_separator() {
        let key = SessionKey::new("t1", "a2");
        assert_eq!(key.fs_name(), "t1_a2");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!("tenantonly".parse::<SessionKey>().is_err());
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert!(":agent".parse::<SessionKey>().is_err());
        assert!("tenant:".parse::<SessionKey>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let key = SessionKey::new("t1", "a2");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"t1:a2\"");
        let back: SessionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
