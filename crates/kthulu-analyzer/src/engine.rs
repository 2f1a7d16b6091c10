use crate::insights::Insights;
use crate::project::{AnalyzeOptions, ProjectAnalyzer};
use crate::resolver::{ResolutionPlan, Resolver};
use crate::semantic::{SemanticAnalyzer, SemanticInsights};
use kthulu_core::{KthuluConfig, ProjectAnalysis, Result};
use kthulu_graph::DependencyGraph;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Everything one full run produces.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub analysis: ProjectAnalysis,
    pub graph: DependencyGraph,
    pub semantics: SemanticInsights,
}

/// Composition root: builds each component once from configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    config: KthuluConfig,
    analyzer: ProjectAnalyzer,
    semantic: SemanticAnalyzer,
    resolver: Resolver,
}

impl Engine {
    pub fn new(config: KthuluConfig) -> Result<Self> {
        config.validate()?;
        let analyzer = ProjectAnalyzer::new(config.analyzer.clone());
        Ok(Self {
            config,
            analyzer,
            semantic: SemanticAnalyzer::new(),
            resolver: Resolver::builtin(),
        })
    }

    pub fn config(&self) -> &KthuluConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &ProjectAnalyzer {
        &self.analyzer
    }

    pub fn insights(&self) -> Insights {
        Insights::new(self.analyzer.clone())
    }

    pub fn analyze_project(&self, root: impl AsRef<Path>, opts: &AnalyzeOptions) -> Result<ProjectAnalysis> {
        self.analyzer.analyze(root, opts)
    }

    /// Cycles are dropped when circular detection is switched off.
    pub fn build_graph(&self, analysis: &ProjectAnalysis) -> DependencyGraph {
        let mut graph = DependencyGraph::from_analysis(analysis);
        if !self.config.analyzer.circular_detection {
            debug!("Circular detection disabled; discarding {} cycles", graph.cycles.len());
            graph.cycles.clear();
        }
        graph
    }

    pub fn analyze_semantics(&self, analysis: &ProjectAnalysis, graph: &DependencyGraph) -> SemanticInsights {
        if !self.config.analyzer.semantic_analysis {
            debug!("Semantic analysis disabled");
            return SemanticInsights::default();
        }
        self.semantic.analyze(analysis, graph)
    }

    /// Resolves against the built-in rule table only.
    pub fn resolve_dependencies<S: AsRef<str>>(&self, requested: &[S]) -> Result<ResolutionPlan> {
        self.resolver.resolve(requested)
    }

    /// Resolves with the project's declared module dependencies merged in.
    pub fn resolve_for_project<S: AsRef<str>>(
        &self,
        analysis: &ProjectAnalysis,
        requested: &[S],
    ) -> Result<ResolutionPlan> {
        self.resolver.clone().with_project(analysis).resolve(requested)
    }

    /// Scan, graph and semantics, checking for cancellation between phases.
    pub fn run(&self, root: impl AsRef<Path>, opts: &AnalyzeOptions) -> Result<EngineReport> {
        let analysis = self.analyze_project(root, opts)?;
        opts.check()?;
        let graph = self.build_graph(&analysis);
        opts.check()?;
        let semantics = self.analyze_semantics(&analysis, &graph);
        opts.check()?;
        info!(
            modules = analysis.modules.len(),
            cycles = graph.cycles.len(),
            patterns = semantics.patterns.len(),
            "Engine run complete"
        );
        Ok(EngineReport {
            analysis,
            graph,
            semantics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kthulu_core::{CancellationToken, KthuluError};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn disabled_phases_yield_empty_results() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.go"), "// @kthulu:module:a\n// @kthulu:dependency:a2\npackage a\n").unwrap();
        fs::write(dir.path().join("b.go"), "// @kthulu:module:a2\n// @kthulu:dependency:a\npackage a\n").unwrap();

        let mut config = KthuluConfig::default();
        config.analyzer.semantic_analysis = false;
        config.analyzer.circular_detection = false;
        let engine = Engine::new(config).unwrap();
        let report = engine.run(dir.path(), &AnalyzeOptions::default()).unwrap();
        assert!(report.graph.cycles.is_empty());
        assert!(report.semantics.patterns.is_empty());
        assert_eq!(report.semantics.project_metrics.module_count, 0);
    }

    #[test]
    fn run_honours_cancellation() {
        let dir = tempdir().unwrap();
        let engine = Engine::new(KthuluConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = engine
            .run(dir.path(), &AnalyzeOptions::with_cancel(token))
            .unwrap_err();
        assert!(matches!(err, KthuluError::Cancelled));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = KthuluConfig::default();
        config.analyzer.max_file_size = 0;
        assert!(matches!(Engine::new(config), Err(KthuluError::InvalidInput(_))));
    }
}
