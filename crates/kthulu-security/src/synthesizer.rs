// ABOUTME: Turns security-relevant annotations into policies, roles and permissions
// ABOUTME: Ids are content hashes so re-synthesis replaces instead of duplicating

use crate::model::{
    builtin_roles, Permission, PolicyBatch, Role, SecurityPolicy, ROLE_AUTHENTICATED,
};
use kthulu_core::{ProjectAnalysis, Tag};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Content words that mark a tag as security-relevant regardless of type.
pub const SECURITY_KEYWORDS: [&str; 8] = [
    "admin",
    "auth",
    "private",
    "token",
    "session",
    "credential",
    "secret",
    "password",
];

pub const DEFAULT_ACTION: &str = "read";
pub const DEFAULT_RESOURCE: &str = "default";
/// Level given to roles first seen in an annotation.
pub const DISCOVERED_ROLE_LEVEL: u32 = 20;

/// Security facts pulled out of one annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityTagInfo {
    pub module: String,
    pub file: Option<String>,
    pub line: u32,
    pub tag_type: String,
    pub resource: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub actions: Vec<String>,
    pub conditions: BTreeMap<String, String>,
    pub security_level: Option<String>,
    pub scope: Option<String>,
}

impl SecurityTagInfo {
    pub fn source(&self) -> String {
        match &self.file {
            Some(file) => format!("{}:{}", file, self.line),
            None => format!("<unknown>:{}", self.line),
        }
    }
}

pub fn is_security_tag(tag: &Tag) -> bool {
    if tag.tag_type.as_str().starts_with("security") {
        return true;
    }
    let content = tag.content.to_lowercase();
    SECURITY_KEYWORDS.iter().any(|k| content.contains(k))
}

/// Comma-split, trimmed, empties dropped, first occurrence wins.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// Parses `k=v,k2=v2`; pairs without `=` are ignored.
pub fn parse_conditions(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

fn list_attribute(tag: &Tag, singular: &str, plural: &str) -> Vec<String> {
    let mut out = Vec::new();
    for key in [singular, plural] {
        if let Some(raw) = tag.attribute(key) {
            for item in split_list(raw) {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
        }
    }
    out
}

/// Explicit `resource` attribute, then the tag value, then a non-generic type.
fn infer_resource(tag: &Tag) -> Option<String> {
    if let Some(resource) = tag.attribute("resource").filter(|r| !r.trim().is_empty()) {
        return Some(resource.trim().to_string());
    }
    if let Some(value) = tag.value.as_deref().filter(|v| !v.is_empty()) {
        return Some(value.to_string());
    }
    let tag_type = tag.tag_type.as_str();
    (tag_type.starts_with("security") && tag_type != "security").then(|| tag_type.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct PolicySynthesizer;

impl PolicySynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Every security-relevant tag in scan order.
    pub fn collect(&self, analysis: &ProjectAnalysis) -> Vec<SecurityTagInfo> {
        analysis
            .tags
            .iter()
            .filter(|t| is_security_tag(t))
            .map(|tag| {
                let module = tag
                    .file
                    .as_deref()
                    .and_then(|path| analysis.file(path))
                    .map(|f| f.owning_module().to_string())
                    .unwrap_or_default();
                SecurityTagInfo {
                    module,
                    file: tag.file.clone(),
                    line: tag.line,
                    tag_type: tag.tag_type.to_string(),
                    resource: infer_resource(tag),
                    roles: list_attribute(tag, "role", "roles"),
                    permissions: list_attribute(tag, "permission", "permissions"),
                    actions: list_attribute(tag, "action", "actions"),
                    conditions: tag
                        .attribute("condition")
                        .map(parse_conditions)
                        .unwrap_or_default(),
                    security_level: tag.attribute("level").map(str::to_string),
                    scope: tag.attribute("scope").map(str::to_string),
                }
            })
            .collect()
    }

    #[tracing::instrument(skip_all, fields(root = %analysis.root.display()))]
    pub fn synthesize(&self, analysis: &ProjectAnalysis) -> PolicyBatch {
        let infos = self.collect(analysis);
        let batch = self.synthesize_from(&infos);
        info!(
            tags = infos.len(),
            policies = batch.policies.len(),
            roles = batch.roles.len(),
            "Policies synthesized"
        );
        batch
    }

    pub fn synthesize_from(&self, infos: &[SecurityTagInfo]) -> PolicyBatch {
        let mut batch = PolicyBatch {
            roles: builtin_roles(),
            ..PolicyBatch::default()
        };
        let mut permissions: BTreeMap<String, Permission> = BTreeMap::new();

        for info in infos {
            for role in &info.roles {
                if !batch.roles.iter().any(|r| &r.id == role) {
                    debug!("Discovered role {} at {}", role, info.source());
                    batch
                        .roles
                        .push(Role::new(role.as_str(), DISCOVERED_ROLE_LEVEL).with_permissions(&["read"]));
                }
            }
            for perm in &info.permissions {
                let entry = permissions
                    .entry(perm.clone())
                    .or_insert_with(|| Permission::new(perm.as_str()));
                if !info.module.is_empty() && !entry.modules.contains(&info.module) {
                    entry.modules.push(info.module.clone());
                }
            }

            if let Some(policy) = policy_for(info) {
                if let Some(existing) = batch.policies.iter_mut().find(|p| p.id == policy.id) {
                    *existing = policy;
                } else {
                    batch.policies.push(policy);
                }
            }
        }

        batch.permissions = permissions.into_values().collect();
        batch
    }
}

fn policy_for(info: &SecurityTagInfo) -> Option<SecurityPolicy> {
    if info.roles.is_empty() && info.permissions.is_empty() {
        return None;
    }
    let resource = info
        .resource
        .clone()
        .unwrap_or_else(|| DEFAULT_RESOURCE.to_string());

    let mut policy = SecurityPolicy::new(policy_id(info, &resource), resource);
    policy.module = info.module.clone();
    policy.actions = if info.actions.is_empty() {
        vec![DEFAULT_ACTION.to_string()]
    } else {
        info.actions.clone()
    };
    policy.required_roles = if info.roles.is_empty() {
        vec![ROLE_AUTHENTICATED.to_string()]
    } else {
        info.roles.clone()
    };
    policy.permissions = info.permissions.clone();
    policy.conditions = info.conditions.clone();
    policy.security_level = info.security_level.clone();
    policy.scope = info.scope.clone();
    policy.source = Some(info.source());
    Some(policy)
}

fn policy_id(info: &SecurityTagInfo, resource: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        info.module.as_str(),
        resource,
        info.file.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(info.line.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("policy-{}", hex)
}
