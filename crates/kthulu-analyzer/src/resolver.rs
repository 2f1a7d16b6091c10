// ABOUTME: Resolves requested feature modules into an install plan
// ABOUTME: Transitive closure, name-ordered Kahn layering, conflicts, warnings and suggestions

use crate::recommendation::{Recommendation, Severity};
use kthulu_core::{KthuluError, ProjectAnalysis, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, info, warn};

const FINANCIAL: [&str; 3] = ["invoice", "payment", "verifactu"];
const INTERACTIVE: [&str; 3] = ["calendar", "contact", "notification"];
const OBSERVABILITY_THRESHOLD: usize = 3;

/// name -> related names, for dependencies, incompatibilities and optionals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub deps: BTreeMap<String, Vec<String>>,
    pub incompatibles: BTreeMap<String, Vec<String>>,
    pub optionals: BTreeMap<String, Vec<String>>,
}

fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

impl RuleTable {
    pub fn builtin() -> Self {
        Self {
            deps: table(&[
                ("auth", &["user"]),
                ("organization", &["user", "auth"]),
                ("contact", &["user", "organization"]),
                ("product", &["user", "organization"]),
                ("invoice", &["user", "organization", "product", "contact"]),
                ("payment", &["user", "invoice"]),
                ("inventory", &["user", "organization", "product"]),
                ("calendar", &["user", "organization", "contact"]),
                ("realtime", &["user", "auth"]),
                ("audit", &["user"]),
                ("notification", &["user"]),
            ]),
            incompatibles: table(&[
                ("sqlite", &["mysql", "postgresql"]),
                ("mysql", &["postgresql"]),
                ("local_auth", &["oauthsso"]),
            ]),
            optionals: table(&[
                ("user", &["notification", "audit"]),
                ("organization", &["contact", "calendar"]),
                ("product", &["inventory", "pricing"]),
                ("invoice", &["payment", "verifactu"]),
                ("contact", &["calendar", "communication"]),
            ]),
        }
    }

    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let deps = self.deps.entry(from.to_string()).or_default();
        if from != to && !deps.iter().any(|d| d == to) {
            deps.push(to.to_string());
        }
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.deps.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when either side lists the other.
    pub fn are_incompatible(&self, a: &str, b: &str) -> bool {
        let lists = |x: &str, y: &str| {
            self.incompatibles
                .get(x)
                .map_or(false, |v| v.iter().any(|n| n == y))
        };
        lists(a, b) || lists(b, a)
    }

    /// Every name mentioned anywhere in the tables.
    pub fn known_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for map in [&self.deps, &self.incompatibles, &self.optionals] {
            for (k, vs) in map {
                names.insert(k.as_str());
                names.extend(vs.iter().map(String::as_str));
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Incompatible,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Incompatible => write!(f, "incompatible"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Sorted pair of module names.
    pub modules: Vec<String>,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub requested: Vec<String>,
    pub required_modules: BTreeSet<String>,
    pub install_order: Vec<String>,
    pub optional_modules: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<Recommendation>,
}

impl ResolutionPlan {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Position of `name` in the install order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.install_order.iter().position(|n| n == name)
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    rules: RuleTable,
    core: BTreeSet<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Resolver {
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            core: ["user", "auth"].iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(RuleTable::builtin())
    }

    /// Adds the project's declared module dependencies to the rule table.
    pub fn with_project(mut self, analysis: &ProjectAnalysis) -> Self {
        for module in &analysis.modules {
            for dep in &module.dependencies {
                self.rules.add_dependency(&module.name, dep);
            }
        }
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    #[tracing::instrument(skip_all, fields(requested = requested.len()))]
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<ResolutionPlan> {
        let mut plan = ResolutionPlan::default();
        for name in requested {
            let name = name.as_ref().trim();
            if !name.is_empty() && !plan.requested.iter().any(|r| r == name) {
                plan.requested.push(name.to_string());
            }
        }

        let known = self.rules.known_names();
        for name in &plan.requested {
            if !known.contains(name.as_str()) {
                warn!("Unknown module {} requested", name);
                plan.warnings
                    .push(format!("unknown module {} has no rules; treated as a leaf", name));
            }
        }

        plan.required_modules = self.closure(&plan.requested);
        plan.install_order = self.install_order(&plan.required_modules)?;
        plan.conflicts = self.conflicts(&plan.required_modules);

        if !plan.required_modules.is_empty()
            && !plan.required_modules.iter().any(|m| self.core.contains(m))
        {
            let core: Vec<&str> = self.core.iter().map(String::as_str).collect();
            plan.warnings.push(format!(
                "no core module ({}) in the plan; most features expect one",
                core.join(", ")
            ));
        }

        plan.recommendations = recommendations(&plan.required_modules);
        plan.optional_modules = self.optionals(&plan.required_modules);

        info!(
            required = plan.required_modules.len(),
            conflicts = plan.conflicts.len(),
            optional = plan.optional_modules.len(),
            "Resolution complete"
        );
        Ok(plan)
    }

    fn closure(&self, requested: &[String]) -> BTreeSet<String> {
        let mut closed = BTreeSet::new();
        let mut queue: VecDeque<&str> = requested.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !closed.insert(name.to_string()) {
                continue;
            }
            for dep in self.rules.dependencies_of(name) {
                if !closed.contains(dep) {
                    queue.push_back(dep);
                }
            }
        }
        closed
    }

    /// Kahn's algorithm, one name-sorted layer at a time.
    fn install_order(&self, required: &BTreeSet<String>) -> Result<Vec<String>> {
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in required {
            let deps: BTreeSet<&str> = self
                .rules
                .dependencies_of(name)
                .iter()
                .map(String::as_str)
                .filter(|d| required.contains(*d) && *d != name.as_str())
                .collect();
            pending.insert(name.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(name.as_str());
            }
        }

        let mut order = Vec::with_capacity(required.len());
        let mut layer: Vec<&str> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(name, _)| *name)
            .collect();
        while !layer.is_empty() {
            layer.sort_unstable();
            let mut next = Vec::new();
            for name in &layer {
                pending.remove(name);
                order.push(name.to_string());
                for dependent in dependents.get(name).into_iter().flatten() {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            debug!("Install layer: {:?}", layer);
            layer = next;
        }

        if !pending.is_empty() {
            let modules: Vec<String> = pending.keys().map(|s| s.to_string()).collect();
            warn!("Unresolvable modules: {:?}", modules);
            return Err(KthuluError::CircularDependency { modules });
        }
        Ok(order)
    }

    fn conflicts(&self, required: &BTreeSet<String>) -> Vec<Conflict> {
        let names: Vec<&String> = required.iter().collect();
        let mut conflicts = Vec::new();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if self.rules.are_incompatible(a, b) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::Incompatible,
                        modules: vec![a.to_string(), b.to_string()],
                        message: format!("{} and {} cannot be installed together", a, b),
                        suggestions: vec![
                            format!("Remove {} from the request", a),
                            format!("Remove {} from the request", b),
                        ],
                    });
                }
            }
        }
        conflicts
    }

    fn optionals(&self, required: &BTreeSet<String>) -> Vec<String> {
        let mut optional = BTreeSet::new();
        for name in required {
            for candidate in self.rules.optionals.get(name).into_iter().flatten() {
                if !required.contains(candidate) {
                    optional.insert(candidate.clone());
                }
            }
        }
        optional.into_iter().collect()
    }
}

fn recommendations(required: &BTreeSet<String>) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    let has = |name: &str| required.contains(name);

    let financial: Vec<&str> = FINANCIAL.iter().copied().filter(|m| has(m)).collect();
    if !financial.is_empty() && !has("audit") {
        recs.push(
            Recommendation::new(
                "audit_logging",
                Severity::Info,
                format!(
                    "financial modules ({}) benefit from audit logging",
                    financial.join(", ")
                ),
            )
            .with_suggestions(&["Add the audit module to the request"])
            .with_metadata("module", "audit")
            .auto_apply(),
        );
    }

    if required.len() > OBSERVABILITY_THRESHOLD && !has("observability") {
        recs.push(
            Recommendation::new(
                "observability",
                Severity::Info,
                format!(
                    "{} modules benefit from observability (metrics, tracing)",
                    required.len()
                ),
            )
            .with_suggestions(&["Enable the observability module"])
            .with_metadata("module", "observability"),
        );
    }

    let interactive: Vec<&str> = INTERACTIVE.iter().copied().filter(|m| has(m)).collect();
    if !interactive.is_empty() && !has("realtime") {
        recs.push(
            Recommendation::new(
                "realtime",
                Severity::Info,
                format!(
                    "interactive modules ({}) benefit from realtime updates",
                    interactive.join(", ")
                ),
            )
            .with_suggestions(&["Add the realtime module to the request"])
            .with_metadata("module", "realtime"),
        );
    }

    recs.sort_by(|a, b| a.metadata.get("module").cmp(&b.metadata.get("module")));
    recs
}
