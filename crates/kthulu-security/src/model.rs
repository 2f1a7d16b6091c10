use chrono::{DateTime, Utc};
use kthulu_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Access rule synthesized from security annotations or added directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub id: String,
    pub module: String,
    /// `*`, a prefix ending in `*`, or an exact resource name.
    pub resource: String,
    /// Empty or containing `*` means every action.
    pub actions: Vec<String>,
    pub required_roles: Vec<String>,
    /// Every entry must be granted by one of the caller's effective roles.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Keys that must be present in the request context with equal values.
    #[serde(default)]
    pub conditions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// `file:line` of the annotation the policy came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecurityPolicy {
    pub fn new(id: impl Into<String>, resource: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            module: String::new(),
            resource: resource.into(),
            actions: Vec::new(),
            required_roles: Vec::new(),
            permissions: Vec::new(),
            conditions: BTreeMap::new(),
            security_level: None,
            scope: None,
            source: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.required_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn matches_resource(&self, resource: &str) -> bool {
        resource_matches(&self.resource, resource)
    }

    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|a| a == "*" || a == action)
    }
}

/// `*` matches everything, `prefix*` matches by prefix, anything else exactly.
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => resource.starts_with(prefix),
        None => pattern == resource,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    /// Higher means more privilege.
    pub level: u32,
    /// Roles this one inherits from. Must form a DAG.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Deactivated roles stay stored but match nothing.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(id: impl Into<String>, level: u32) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: id.clone(),
            id,
            level,
            parents: Vec::new(),
            permissions: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
        self
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    /// `*` grants everything.
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == "*" || p == permission)
    }
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";
pub const ROLE_AUTHENTICATED: &str = "authenticated";
pub const ROLE_GUEST: &str = "guest";

/// Built-in roles, parents before children:
/// `admin -> user -> authenticated -> guest`.
pub fn builtin_roles() -> Vec<Role> {
    vec![
        Role::new(ROLE_GUEST, 1).with_name("Guest"),
        Role::new(ROLE_AUTHENTICATED, 5)
            .with_name("Authenticated")
            .with_parent(ROLE_GUEST),
        Role::new(ROLE_USER, 10)
            .with_name("User")
            .with_parent(ROLE_AUTHENTICATED)
            .with_permissions(&["read", "write:own"]),
        Role::new(ROLE_ADMIN, 100)
            .with_name("Administrator")
            .with_parent(ROLE_USER)
            .with_permissions(&["*"]),
    ]
}

/// A named capability registered with the authorization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub description: Option<String>,
    /// Modules whose annotations mention the permission.
    #[serde(default)]
    pub modules: Vec<String>,
}

impl Permission {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            modules: Vec::new(),
        }
    }
}

/// Output of policy synthesis, applied to the core in one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyBatch {
    pub policies: Vec<SecurityPolicy>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl PolicyBatch {
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty() && self.roles.is_empty() && self.permissions.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub request_id: Uuid,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub roles: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AccessRequest {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
            roles: Vec::new(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_well_formed(&self) -> bool {
        !self.subject.trim().is_empty()
            && !self.resource.trim().is_empty()
            && !self.action.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub action: String,
    pub resource: String,
    pub allowed: bool,
    pub reason: String,
    pub cache_hit: bool,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessResult {
    pub allowed: bool,
    pub reason: String,
    /// Ids of every policy whose resource and action matched.
    pub applied_policies: Vec<String>,
    pub cache_hit: bool,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditEntry>,
}

impl AccessResult {
    pub fn allow(reason: impl Into<String>, applied_policies: Vec<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            applied_policies,
            cache_hit: false,
            duration: Duration::ZERO,
            audit: None,
        }
    }

    pub fn deny(reason: impl Into<String>, applied_policies: Vec<String>) -> Self {
        Self {
            allowed: false,
            ..Self::allow(reason, applied_policies)
        }
    }
}
