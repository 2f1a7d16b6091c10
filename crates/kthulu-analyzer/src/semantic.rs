// ABOUTME: Architectural pattern detection, module/project metrics and recommendations
// ABOUTME: Pure over a ProjectAnalysis plus its DependencyGraph; every list is sorted

use crate::recommendation::{Recommendation, Severity};
use kthulu_core::{FileAnalysis, Module, ProjectAnalysis, Tag, TagType};
use kthulu_graph::{DependencyGraph, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

const LAYER_TAGS: [TagType; 4] = [
    TagType::HANDLER,
    TagType::SERVICE,
    TagType::REPOSITORY,
    TagType::DOMAIN,
];
const DI_MODULE_THRESHOLD: usize = 2;
const LOW_COVERAGE: f64 = 0.5;
const COUPLING_LIMIT: usize = 5;
const DEPTH_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Architectural,
    Domain,
    Infrastructural,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Architectural => write!(f, "architectural"),
            PatternKind::Domain => write!(f, "domain"),
            PatternKind::Infrastructural => write!(f, "infrastructural"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePattern {
    pub name: String,
    pub kind: PatternKind,
    pub occurrences: usize,
    pub files: Vec<String>,
    /// Always within [0, 1].
    pub confidence: f64,
    pub metadata: BTreeMap<String, String>,
}

impl CodePattern {
    fn new(name: &str, kind: PatternKind, occurrences: usize, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            occurrences,
            files: Vec::new(),
            confidence: clamp01(confidence),
            metadata: BTreeMap::new(),
        }
    }

    fn with_files<'a>(mut self, tags: impl IntoIterator<Item = &'a Tag>) -> Self {
        let files: BTreeSet<String> = tags.into_iter().filter_map(|t| t.file.clone()).collect();
        self.files = files.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetrics {
    pub name: String,
    /// Files listed by the module plus untagged files of the same package.
    pub file_count: usize,
    pub tagged_file_count: usize,
    pub tag_count: usize,
    pub dependency_count: usize,
    pub line_count: usize,
    pub coverage: f64,
    pub quality: f64,
    pub tag_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    pub module_count: usize,
    pub file_count: usize,
    pub tagged_file_count: usize,
    pub tag_count: usize,
    pub dependency_count: usize,
    pub cycle_count: usize,
    pub max_depth: usize,
    pub line_count: usize,
    pub coverage: f64,
    pub quality: f64,
    pub complexity: f64,
    pub tag_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticInsights {
    pub patterns: Vec<CodePattern>,
    pub module_metrics: Vec<ModuleMetrics>,
    pub project_metrics: ProjectMetrics,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default)]
pub struct SemanticAnalyzer;

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[tracing::instrument(skip_all)]
    pub fn analyze(&self, analysis: &ProjectAnalysis, graph: &DependencyGraph) -> SemanticInsights {
        let patterns = self.detect_patterns(analysis);
        let module_metrics: Vec<ModuleMetrics> = analysis
            .modules
            .iter()
            .map(|m| module_metrics(m, analysis))
            .collect();
        let project_metrics = project_metrics(analysis, graph, &module_metrics);
        let recommendations = recommendations(analysis, graph, &module_metrics);

        info!(
            patterns = patterns.len(),
            recommendations = recommendations.len(),
            complexity = project_metrics.complexity,
            "Semantic analysis complete"
        );
        SemanticInsights {
            patterns,
            module_metrics,
            project_metrics,
            recommendations,
        }
    }

    /// Each detector yields at most one pattern; output is sorted by name.
    pub fn detect_patterns(&self, analysis: &ProjectAnalysis) -> Vec<CodePattern> {
        let mut patterns = Vec::new();
        for (tag_type, token) in [
            (TagType::REPOSITORY, "repository"),
            (TagType::SERVICE, "service"),
            (TagType::HANDLER, "handler"),
        ] {
            patterns.extend(detect_layer(analysis, &tag_type, token));
        }
        patterns.extend(detect_domain_driven(analysis));
        patterns.extend(detect_dependency_injection(analysis));
        patterns.extend(detect_layered(analysis));
        patterns.extend(detect_modular(analysis));
        patterns.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Detected {} patterns", patterns.len());
        patterns
    }
}

fn tags_of<'a>(analysis: &'a ProjectAnalysis, tag_type: &TagType) -> Vec<&'a Tag> {
    analysis.tags.iter().filter(|t| t.is(tag_type)).collect()
}

fn detect_layer(analysis: &ProjectAnalysis, tag_type: &TagType, token: &str) -> Option<CodePattern> {
    let tags = tags_of(analysis, tag_type);
    if tags.is_empty() {
        return None;
    }
    let named_symbols = analysis
        .files
        .iter()
        .flat_map(|f| &f.symbols)
        .filter(|s| s.name.to_lowercase().contains(token))
        .count();

    let mut confidence = 0.4 + 0.1 * tags.len().min(4) as f64;
    if named_symbols > 0 {
        confidence += 0.2;
    }
    let mut pattern = CodePattern::new(token, PatternKind::Architectural, tags.len(), confidence)
        .with_files(tags.iter().copied());
    pattern
        .metadata
        .insert("named_symbols".into(), named_symbols.to_string());
    Some(pattern)
}

fn detect_domain_driven(analysis: &ProjectAnalysis) -> Option<CodePattern> {
    let tags = tags_of(analysis, &TagType::DOMAIN);
    if tags.is_empty() {
        return None;
    }
    let aggregates = tags.iter().filter(|t| t.has_flag("aggregate")).count();
    let confidence = if aggregates > 0 { 0.9 } else { 0.6 };
    let mut pattern = CodePattern::new("domain_driven", PatternKind::Domain, tags.len(), confidence)
        .with_files(tags.iter().copied());
    pattern
        .metadata
        .insert("aggregates".into(), aggregates.to_string());
    Some(pattern)
}

fn detect_dependency_injection(analysis: &ProjectAnalysis) -> Option<CodePattern> {
    let tags = tags_of(analysis, &TagType::PROVIDES);
    if tags.is_empty() || analysis.modules.len() < DI_MODULE_THRESHOLD {
        return None;
    }
    let confidence = 0.5 + 0.1 * tags.len() as f64;
    Some(
        CodePattern::new(
            "dependency_injection",
            PatternKind::Infrastructural,
            tags.len(),
            confidence,
        )
        .with_files(tags.iter().copied()),
    )
}

fn detect_layered(analysis: &ProjectAnalysis) -> Option<CodePattern> {
    let present = LAYER_TAGS
        .iter()
        .all(|t| analysis.tags.iter().any(|tag| tag.is(t)));
    if !present {
        return None;
    }
    let layer_tags: Vec<&Tag> = analysis
        .tags
        .iter()
        .filter(|tag| LAYER_TAGS.iter().any(|t| tag.is(t)))
        .collect();
    Some(
        CodePattern::new("layered", PatternKind::Architectural, layer_tags.len(), 0.9)
            .with_files(layer_tags),
    )
}

fn detect_modular(analysis: &ProjectAnalysis) -> Option<CodePattern> {
    let modules: Vec<&Module> = analysis
        .modules
        .iter()
        .filter(|m| {
            m.tags.iter().any(|tag| {
                tag.is(&TagType::HANDLER) || tag.is(&TagType::SERVICE) || tag.is(&TagType::REPOSITORY)
            })
        })
        .collect();
    if modules.len() < 2 {
        return None;
    }
    let confidence = 0.5 + 0.1 * modules.len() as f64;
    let mut pattern = CodePattern::new(
        "modular_decomposition",
        PatternKind::Architectural,
        modules.len(),
        confidence,
    );
    let files: BTreeSet<String> = modules.iter().flat_map(|m| m.files.iter().cloned()).collect();
    pattern.files = files.into_iter().collect();
    pattern.metadata.insert(
        "modules".into(),
        modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(","),
    );
    Some(pattern)
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Listed files plus untagged files in the module's package.
fn member_files<'a>(module: &Module, analysis: &'a ProjectAnalysis) -> Vec<&'a FileAnalysis> {
    analysis
        .files
        .iter()
        .filter(|f| {
            module.files.contains(&f.path)
                || (f.module.is_none() && f.package_name == module.package_name)
        })
        .collect()
}

pub fn dependency_discount(dependency_count: usize) -> f64 {
    match dependency_count {
        0..=5 => 1.0,
        6..=10 => 0.5,
        _ => 0.2,
    }
}

/// 0.4 coverage + 0.3 tag-type diversity (capped at five types) + 0.3 dependency discount.
pub fn quality_score(coverage: f64, distinct_tag_types: usize, dependency_count: usize) -> f64 {
    let diversity = distinct_tag_types.min(5) as f64 / 5.0;
    clamp01(0.4 * coverage + 0.3 * diversity + 0.3 * dependency_discount(dependency_count))
}

pub fn complexity_score(modules: usize, dependencies: usize, cycles: usize, depth: usize) -> f64 {
    clamp01(
        0.3 * clamp01(modules as f64 * 0.1)
            + 0.3 * clamp01(dependencies as f64 * 0.05)
            + 0.2 * clamp01(cycles as f64 * 0.2)
            + 0.2 * clamp01(depth as f64 * 0.1),
    )
}

fn distribution<'a>(tags: impl IntoIterator<Item = &'a Tag>) -> BTreeMap<String, usize> {
    let mut dist = BTreeMap::new();
    for tag in tags {
        *dist.entry(tag.tag_type.to_string()).or_insert(0) += 1;
    }
    dist
}

fn module_metrics(module: &Module, analysis: &ProjectAnalysis) -> ModuleMetrics {
    let members = member_files(module, analysis);
    let tagged = members.iter().filter(|f| f.has_tags()).count();
    let coverage = if members.is_empty() {
        0.0
    } else {
        tagged as f64 / members.len() as f64
    };
    let tag_distribution = distribution(&module.tags);
    let quality = quality_score(coverage, tag_distribution.len(), module.dependencies.len());

    ModuleMetrics {
        name: module.name.clone(),
        file_count: members.len(),
        tagged_file_count: tagged,
        tag_count: module.tags.len(),
        dependency_count: module.dependencies.len(),
        line_count: members.iter().map(|f| f.line_count).sum(),
        coverage: clamp01(coverage),
        quality,
        tag_distribution,
    }
}

fn project_metrics(
    analysis: &ProjectAnalysis,
    graph: &DependencyGraph,
    modules: &[ModuleMetrics],
) -> ProjectMetrics {
    let file_count = analysis.files.len();
    let tagged_file_count = analysis.files.iter().filter(|f| f.has_tags()).count();
    let coverage = if file_count == 0 {
        0.0
    } else {
        tagged_file_count as f64 / file_count as f64
    };
    let quality = if modules.is_empty() {
        0.0
    } else {
        modules.iter().map(|m| m.quality).sum::<f64>() / modules.len() as f64
    };
    let max_depth = graph.max_depth();

    ProjectMetrics {
        module_count: analysis.modules.len(),
        file_count,
        tagged_file_count,
        tag_count: analysis.tags.len(),
        dependency_count: analysis.dependencies.len(),
        cycle_count: graph.cycles.len(),
        max_depth,
        line_count: analysis.files.iter().map(|f| f.line_count).sum(),
        coverage: clamp01(coverage),
        quality: clamp01(quality),
        complexity: complexity_score(
            analysis.modules.len(),
            analysis.dependencies.len(),
            graph.cycles.len(),
            max_depth,
        ),
        tag_distribution: analysis.tag_counts(),
    }
}

fn recommendations(
    analysis: &ProjectAnalysis,
    graph: &DependencyGraph,
    modules: &[ModuleMetrics],
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    for m in modules {
        if m.coverage < LOW_COVERAGE {
            recs.push(
                Recommendation::new(
                    "module_coverage",
                    Severity::Info,
                    format!(
                        "module {} has {} of {} files annotated ({:.0}% coverage)",
                        m.name,
                        m.tagged_file_count,
                        m.file_count,
                        m.coverage * 100.0
                    ),
                )
                .with_suggestions(&[
                    "Add @kthulu:module tags to the untagged files",
                    "Annotate exported handlers, services and repositories",
                ])
                .with_metadata("module", &m.name),
            );
        }
        if m.dependency_count > COUPLING_LIMIT {
            recs.push(
                Recommendation::new(
                    "module_coupling",
                    Severity::Warning,
                    format!(
                        "module {} declares {} dependencies (limit {})",
                        m.name, m.dependency_count, COUPLING_LIMIT
                    ),
                )
                .with_suggestions(&[
                    "Split the module along its responsibilities",
                    "Depend on interfaces provided by a shared module",
                ])
                .with_metadata("module", &m.name),
            );
        }
    }

    let present: Vec<&TagType> = LAYER_TAGS
        .iter()
        .filter(|t| analysis.tags.iter().any(|tag| tag.is(t)))
        .collect();
    if !present.is_empty() && present.len() < LAYER_TAGS.len() {
        let missing: Vec<&str> = LAYER_TAGS
            .iter()
            .filter(|t| !present.contains(t))
            .map(|t| t.as_str())
            .collect();
        recs.push(
            Recommendation::new(
                "architecture_completeness",
                Severity::Info,
                format!(
                    "{} of {} architectural layers annotated; missing: {}",
                    present.len(),
                    LAYER_TAGS.len(),
                    missing.join(", ")
                ),
            )
            .with_suggestions(&[
                "Tag the missing layers so pattern detection can see them",
            ])
            .with_metadata("missing", missing.join(",")),
        );
    }

    for cycle in &graph.cycles {
        let mut path = cycle.clone();
        if let Some(first) = cycle.first() {
            path.push(first.clone());
        }
        recs.push(
            Recommendation::new(
                "circular_dependency",
                Severity::Warning,
                format!(
                    "circular dependency across {} modules: {}",
                    cycle.len(),
                    path.join(" -> ")
                ),
            )
            .with_suggestions(&[
                "Extract the shared contract into a separate module",
                "Invert one of the dependencies through an interface",
            ])
            .with_metadata("modules", cycle.join(",")),
        );
    }

    let depth = graph.max_depth();
    if depth > DEPTH_LIMIT {
        recs.push(
            Recommendation::new(
                "dependency_depth",
                Severity::Warning,
                format!("dependency chain depth is {} (limit {})", depth, DEPTH_LIMIT),
            )
            .with_suggestions(&["Flatten long dependency chains"]),
        );
    }

    if analysis.modules.len() > 1 {
        for node in graph.nodes.values() {
            if node.kind == NodeKind::Module && node.in_degree == 0 && node.out_degree == 0 {
                recs.push(
                    Recommendation::new(
                        "module_connectivity",
                        Severity::Warning,
                        format!(
                            "module {} has no dependencies and no dependents among {} modules",
                            node.id,
                            analysis.modules.len()
                        ),
                    )
                    .with_suggestions(&[
                        "Declare its dependencies with @kthulu:dependency tags",
                        "Remove the module if it is unused",
                    ])
                    .with_metadata("module", &node.id),
                );
            }
        }
    }

    recs.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.message.cmp(&b.message)));
    recs
}
