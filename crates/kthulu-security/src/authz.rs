// ABOUTME: In-memory authorization core with role inheritance and a TTL decision cache
// ABOUTME: Decisions are always returned as AccessResult; internal faults deny without caching

use crate::model::{
    builtin_roles, AccessRequest, AccessResult, AuditEntry, Permission, PolicyBatch, Role,
    SecurityPolicy,
};
use chrono::Utc;
use kthulu_cache::{CacheStats, TtlStore};
use kthulu_core::{AuthzConfig, KthuluError, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const REASON_NO_POLICY: &str = "no applicable security policies found";
pub const REASON_DEFAULT_ALLOW: &str = "no applicable security policies found (default allow)";
pub const REASON_NOT_SATISFIED: &str = "user lacks required roles or conditions not met";
pub const REASON_INVALID_REQUEST: &str = "invalid_request";
pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_ERROR: &str = "authorization_error";

const MAX_AUDIT_ENTRIES: usize = 10_000;

/// Requests differing in any of these fields are decided separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionKey {
    subject: String,
    resource: String,
    action: String,
    roles: Vec<String>,
    context: Vec<(String, String)>,
}

impl DecisionKey {
    fn new(request: &AccessRequest) -> Self {
        let mut roles = request.roles.clone();
        roles.sort();
        roles.dedup();
        Self {
            subject: request.subject.clone(),
            resource: request.resource.clone(),
            action: request.action.clone(),
            roles,
            context: request
                .context
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Owns policies, roles, permissions and the decision cache.
///
/// Stores sit behind `RwLock`s; the decision cache and audit log behind
/// their own `Mutex`es so lookups never contend with policy reads.
pub struct AuthorizationCore {
    config: AuthzConfig,
    policies: RwLock<BTreeMap<String, SecurityPolicy>>,
    roles: RwLock<BTreeMap<String, Role>>,
    permissions: RwLock<BTreeMap<String, Permission>>,
    decisions: Mutex<TtlStore<DecisionKey, AccessResult>>,
    audit: Mutex<VecDeque<AuditEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for AuthorizationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCore")
            .field("config", &self.config)
            .field("policies", &self.policies.read().len())
            .field("roles", &self.roles.read().len())
            .finish()
    }
}

impl AuthorizationCore {
    /// Starts with the built-in roles and no policies.
    pub fn new(config: AuthzConfig) -> Result<Self> {
        config.validate()?;
        let roles = builtin_roles()
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let decisions = TtlStore::new(config.cache_max_entries, Some(config.cache_ttl()));
        Ok(Self {
            config,
            policies: RwLock::new(BTreeMap::new()),
            roles: RwLock::new(roles),
            permissions: RwLock::new(BTreeMap::new()),
            decisions: Mutex::new(decisions),
            audit: Mutex::new(VecDeque::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn check_access(&self, request: &AccessRequest) -> AccessResult {
        self.decide(request, None)
    }

    /// Like `check_access`, but gives up with reason `timeout` when the
    /// stores cannot be read within `timeout`.
    pub fn check_access_within(&self, request: &AccessRequest, timeout: Duration) -> AccessResult {
        self.decide(request, Some(Instant::now() + timeout))
    }

    /// Propagates internal failures instead of folding them into a denial.
    pub fn try_check_access(&self, request: &AccessRequest) -> Result<AccessResult> {
        let started = Instant::now();
        let mut result = self.evaluate(request, None, started)?;
        self.finish(request, &mut result);
        Ok(result)
    }

    fn decide(&self, request: &AccessRequest, deadline: Option<Instant>) -> AccessResult {
        let started = Instant::now();
        let mut result = match self.evaluate(request, deadline, started) {
            Ok(result) => result,
            Err(KthuluError::Timeout(what)) => {
                warn!(subject = %request.subject, "Authorization timed out waiting for {}", what);
                AccessResult::deny(REASON_TIMEOUT, Vec::new())
            }
            Err(e) => {
                error!(subject = %request.subject, resource = %request.resource, "Authorization failed: {}", e);
                AccessResult::deny(REASON_ERROR, Vec::new())
            }
        };
        result.duration = started.elapsed();
        self.finish(request, &mut result);
        result
    }

    fn evaluate(
        &self,
        request: &AccessRequest,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<AccessResult> {
        if self.config.strict_mode && !request.is_well_formed() {
            debug!(request_id = %request.request_id, "Rejecting malformed request");
            return Ok(AccessResult::deny(REASON_INVALID_REQUEST, Vec::new()));
        }

        let key = DecisionKey::new(request);
        if self.config.cache_enabled {
            if let Some(mut cached) = self.decisions.lock().get(&key) {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(KthuluError::Timeout("decision cache".into()));
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                cached.cache_hit = true;
                cached.duration = started.elapsed();
                return Ok(cached);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let policies = read_before(&self.policies, deadline, "policy store")?;
        let roles = read_before(&self.roles, deadline, "role store")?;

        let effective = self.effective_roles(&request.roles, &roles)?;
        let mut matched = Vec::new();
        let mut allowed_by = None;
        for policy in policies.values() {
            if !policy.matches_resource(&request.resource) || !policy.matches_action(&request.action) {
                continue;
            }
            matched.push(policy.id.clone());
            if allowed_by.is_none() && self.satisfies(policy, request, &effective, &roles) {
                allowed_by = Some(policy.id.clone());
            }
        }

        let mut result = match allowed_by {
            Some(id) => AccessResult::allow(format!("allowed by policy {}", id), matched),
            None if !matched.is_empty() => AccessResult::deny(REASON_NOT_SATISFIED, matched),
            None if self.config.default_deny => AccessResult::deny(REASON_NO_POLICY, matched),
            None => AccessResult::allow(REASON_DEFAULT_ALLOW, matched),
        };
        result.duration = started.elapsed();

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(KthuluError::Timeout("policy evaluation".into()));
        }
        // Inserted under the store guards so a writer's invalidation runs after it.
        if self.config.cache_enabled {
            self.decisions.lock().insert(key, result.clone());
        }
        drop(roles);
        drop(policies);
        Ok(result)
    }

    /// Attaches the audit entry. Runs for every decision, cached or not.
    fn finish(&self, request: &AccessRequest, result: &mut AccessResult) {
        debug!(
            subject = %request.subject,
            resource = %request.resource,
            action = %request.action,
            allowed = result.allowed,
            cache_hit = result.cache_hit,
            "Access decided"
        );
        if !self.config.audit_enabled {
            return;
        }
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            request_id: request.request_id,
            timestamp: Utc::now(),
            subject: request.subject.clone(),
            action: request.action.clone(),
            resource: request.resource.clone(),
            allowed: result.allowed,
            reason: result.reason.clone(),
            cache_hit: result.cache_hit,
            context: request.context.clone(),
        };
        let mut audit = self.audit.lock();
        if audit.len() >= MAX_AUDIT_ENTRIES {
            audit.pop_front();
        }
        audit.push_back(entry.clone());
        result.audit = Some(entry);
    }

    /// Declared roles plus, with hierarchy on, every transitive parent.
    /// Deactivated roles are dropped and not walked through.
    fn effective_roles(
        &self,
        declared: &[String],
        roles: &BTreeMap<String, Role>,
    ) -> Result<BTreeSet<String>> {
        let mut effective = BTreeSet::new();
        for id in declared {
            if !self.config.hierarchical_roles {
                if is_active(roles, id) {
                    effective.insert(id.clone());
                }
                continue;
            }
            collect_ancestors(id, roles, &mut effective, &mut Vec::new())?;
        }
        Ok(effective)
    }

    fn satisfies(
        &self,
        policy: &SecurityPolicy,
        request: &AccessRequest,
        effective: &BTreeSet<String>,
        roles: &BTreeMap<String, Role>,
    ) -> bool {
        if !policy.required_roles.iter().any(|r| effective.contains(r)) {
            return false;
        }
        let granted = policy.permissions.iter().all(|perm| {
            effective
                .iter()
                .filter_map(|id| roles.get(id))
                .any(|role| role.grants(perm))
        });
        if !granted {
            return false;
        }
        if !self.config.contextual_security {
            return true;
        }
        policy
            .conditions
            .iter()
            .all(|(k, v)| request.context.get(k) == Some(v))
    }

    /// Inserts or replaces by id. A replacement keeps `created_at`, bumps
    /// `updated_at` and drops every cached decision it could affect.
    pub fn add_policy(&self, policy: SecurityPolicy) -> Result<bool> {
        validate_policy(&policy)?;
        let mut policies = self.policies.write();
        let inserted = upsert_policy(&mut policies, policy.clone());
        self.invalidate_policy(&policy);
        drop(policies);
        debug!(id = %policy.id, inserted, "Policy stored");
        Ok(inserted)
    }

    pub fn remove_policy(&self, id: &str) -> Result<SecurityPolicy> {
        let mut policies = self.policies.write();
        let removed = policies
            .remove(id)
            .ok_or_else(|| KthuluError::NotFound(format!("policy {}", id)))?;
        self.invalidate_policy(&removed);
        Ok(removed)
    }

    pub fn get_policy(&self, id: &str) -> Option<SecurityPolicy> {
        self.policies.read().get(id).cloned()
    }

    /// Snapshot sorted by id.
    pub fn policies(&self) -> Vec<SecurityPolicy> {
        self.policies.read().values().cloned().collect()
    }

    /// Inserts or replaces by id. Parents must exist and must not lead back
    /// to the role. A replaced role keeps its active state.
    pub fn add_role(&self, role: Role) -> Result<()> {
        let mut roles = self.roles.write();
        stage_role(&mut roles, role)?;
        self.clear_cache();
        Ok(())
    }

    pub fn deactivate_role(&self, id: &str) -> Result<()> {
        self.set_role_active(id, false)
    }

    pub fn activate_role(&self, id: &str) -> Result<()> {
        self.set_role_active(id, true)
    }

    fn set_role_active(&self, id: &str, active: bool) -> Result<()> {
        {
            let mut roles = self.roles.write();
            let role = roles
                .get_mut(id)
                .ok_or_else(|| KthuluError::NotFound(format!("role {}", id)))?;
            role.active = active;
            role.updated_at = Utc::now();
            self.clear_cache();
        }
        info!(role = %id, active, "Role state changed");
        Ok(())
    }

    pub fn get_role(&self, id: &str) -> Option<Role> {
        self.roles.read().get(id).cloned()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.roles.read().values().cloned().collect()
    }

    /// Returns false when the id was already registered; module lists merge.
    pub fn add_permission(&self, permission: Permission) -> bool {
        let mut permissions = self.permissions.write();
        match permissions.get_mut(&permission.id) {
            Some(existing) => {
                for module in permission.modules {
                    if !existing.modules.contains(&module) {
                        existing.modules.push(module);
                    }
                }
                if existing.description.is_none() {
                    existing.description = permission.description;
                }
                false
            }
            None => {
                permissions.insert(permission.id.clone(), permission);
                true
            }
        }
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.permissions.read().values().cloned().collect()
    }

    /// All or nothing: roles and policies are validated against a staged
    /// copy before either store changes.
    ///
    /// Roles already stored are merged rather than replaced: their active
    /// state, level and name stay, and the batch can only add parents and
    /// permissions.
    pub fn apply_batch(&self, batch: PolicyBatch) -> Result<()> {
        for policy in &batch.policies {
            validate_policy(policy)?;
        }
        {
            let mut policies = self.policies.write();
            let mut roles = self.roles.write();

            let mut staged = roles.clone();
            for role in batch.roles.iter().cloned() {
                let role = match staged.get(&role.id) {
                    Some(existing) => merge_role(existing, role),
                    None => role,
                };
                stage_role(&mut staged, role)?;
            }
            *roles = staged;
            for policy in batch.policies.iter().cloned() {
                upsert_policy(&mut policies, policy);
            }
            for permission in batch.permissions.iter().cloned() {
                self.add_permission(permission);
            }
            self.clear_cache();
        }
        info!(
            policies = batch.policies.len(),
            roles = batch.roles.len(),
            "Policy batch applied"
        );
        Ok(())
    }

    /// Most recent `limit` entries, oldest first.
    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        let audit = self.audit.lock();
        let skip = audit.len().saturating_sub(limit);
        audit.iter().skip(skip).cloned().collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let decisions = self.decisions.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: decisions.evictions(),
            entries: decisions.len(),
            capacity: decisions.capacity(),
        }
    }

    pub fn clear_cache(&self) {
        self.decisions.lock().clear();
    }

    fn invalidate_policy(&self, policy: &SecurityPolicy) {
        let dropped = self.decisions.lock().remove_where(|key, result| {
            result.applied_policies.iter().any(|id| id == &policy.id)
                || policy.matches_resource(&key.resource)
        });
        if dropped > 0 {
            debug!(id = %policy.id, dropped, "Invalidated cached decisions");
        }
    }
}

fn is_active(roles: &BTreeMap<String, Role>, id: &str) -> bool {
    roles.get(id).map(|r| r.active).unwrap_or(true)
}

/// Post-order walk up the parent relation. Stored roles are a DAG, so meeting
/// a role already on the path is an invariant violation.
fn collect_ancestors(
    id: &str,
    roles: &BTreeMap<String, Role>,
    done: &mut BTreeSet<String>,
    path: &mut Vec<String>,
) -> Result<()> {
    if path.iter().any(|p| p == id) {
        return Err(KthuluError::Internal(format!(
            "role hierarchy has a cycle through {}",
            id
        )));
    }
    if done.contains(id) || !is_active(roles, id) {
        return Ok(());
    }
    path.push(id.to_string());
    if let Some(role) = roles.get(id) {
        for parent in &role.parents {
            collect_ancestors(parent, roles, done, path)?;
        }
    }
    path.pop();
    done.insert(id.to_string());
    Ok(())
}

fn read_before<'a, T>(
    lock: &'a RwLock<T>,
    deadline: Option<Instant>,
    what: &str,
) -> Result<RwLockReadGuard<'a, T>> {
    match deadline {
        None => Ok(lock.read()),
        Some(deadline) => lock
            .try_read_until(deadline)
            .ok_or_else(|| KthuluError::Timeout(what.to_string())),
    }
}

fn validate_policy(policy: &SecurityPolicy) -> Result<()> {
    if policy.id.trim().is_empty() {
        return Err(KthuluError::InvalidInput("policy id cannot be empty".into()));
    }
    if policy.resource.trim().is_empty() {
        return Err(KthuluError::InvalidInput(format!(
            "policy {} has an empty resource pattern",
            policy.id
        )));
    }
    if policy.required_roles.is_empty() && policy.conditions.is_empty() {
        return Err(KthuluError::InvalidInput(format!(
            "policy {} needs at least one role or condition",
            policy.id
        )));
    }
    Ok(())
}

fn upsert_policy(policies: &mut BTreeMap<String, SecurityPolicy>, mut policy: SecurityPolicy) -> bool {
    match policies.get(&policy.id) {
        Some(existing) => {
            policy.created_at = existing.created_at;
            policy.updated_at = Utc::now();
            policies.insert(policy.id.clone(), policy);
            false
        }
        None => {
            policies.insert(policy.id.clone(), policy);
            true
        }
    }
}

/// Inserts into `roles` only if the parent relation stays acyclic.
fn stage_role(roles: &mut BTreeMap<String, Role>, mut role: Role) -> Result<()> {
    if role.id.trim().is_empty() {
        return Err(KthuluError::InvalidInput("role id cannot be empty".into()));
    }
    for parent in &role.parents {
        if parent == &role.id {
            return Err(KthuluError::InvalidInput(format!(
                "role {} cannot inherit from itself",
                role.id
            )));
        }
        if !roles.contains_key(parent) {
            return Err(KthuluError::InvalidInput(format!(
                "role {} names unknown parent {}",
                role.id, parent
            )));
        }
    }
    if reaches(roles, &role.parents, &role.id) {
        return Err(KthuluError::InvalidInput(format!(
            "role {} would create an inheritance cycle",
            role.id
        )));
    }
    if let Some(existing) = roles.get(&role.id) {
        role.active = existing.active;
        role.created_at = existing.created_at;
        role.updated_at = Utc::now();
    }
    roles.insert(role.id.clone(), role);
    Ok(())
}

/// Stored definition plus any parents or permissions `incoming` adds.
fn merge_role(existing: &Role, incoming: Role) -> Role {
    let mut merged = existing.clone();
    for parent in incoming.parents {
        if !merged.parents.contains(&parent) {
            merged.parents.push(parent);
        }
    }
    for permission in incoming.permissions {
        if !merged.permissions.contains(&permission) {
            merged.permissions.push(permission);
        }
    }
    merged
}

fn reaches(roles: &BTreeMap<String, Role>, from: &[String], target: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = from.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(role) = roles.get(id) {
            stack.extend(role.parents.iter().map(String::as_str));
        }
    }
    false
}
