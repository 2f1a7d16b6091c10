use kthulu_analyzer::{
    render_dependencies, render_guide, render_modules, render_overview, render_tags,
    AnalyzeOptions, ConflictKind, Engine, OverviewOptions, ProjectAnalyzer, Resolver,
};
use kthulu_core::{AnalyzerConfig, KthuluConfig, KthuluError};
use kthulu_graph::DependencyGraph;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn analyzer(cache_enabled: bool) -> ProjectAnalyzer {
    ProjectAnalyzer::new(AnalyzerConfig {
        cache_enabled,
        workers: 4,
        ..AnalyzerConfig::default()
    })
}

fn payments_fixture(root: &Path) {
    write(
        root,
        "payments/charge.go",
        r#"// @kthulu:module:payments
// @kthulu:dependency:core
package payments

// Charge captures a payment.
// @kthulu:service:charge
func Charge(amount int) error {
	return nil
}
"#,
    );
    write(
        root,
        "payments/refund.go",
        "package payments\n\nfunc Refund(amount int) error {\n\treturn nil\n}\n",
    );
}

#[test]
fn fixture_a_overview_and_reports() {
    let dir = tempdir().unwrap();
    payments_fixture(dir.path());
    let analysis = analyzer(false)
        .analyze(dir.path(), &AnalyzeOptions::default())
        .unwrap();

    let overview = render_overview(&analysis, OverviewOptions::default());
    assert!(overview.contains("Modules: 1"), "{overview}");
    assert!(overview.contains("Dependencies: 1"), "{overview}");
    assert!(overview.contains("Tags: 3"), "{overview}");

    let modules = render_modules(&analysis);
    assert!(modules.contains("payments"));
    assert!(modules.contains("Files: 1"), "{modules}");

    let deps = render_dependencies(&analysis);
    assert!(deps.contains("payments -> core"), "{deps}");

    let tags = render_tags(&analysis);
    for tag_type in ["module", "dependency", "service"] {
        assert!(tags.contains(tag_type), "{tags}");
    }

    let service = analysis
        .tags
        .iter()
        .find(|t| t.tag_type == "service")
        .unwrap();
    assert_eq!(service.symbol.as_deref(), Some("Charge"));
    assert_eq!(service.file.as_deref(), Some("payments/charge.go"));
}

fn cycle_fixture(root: &Path) {
    for (name, next) in [("A", "B"), ("B", "C"), ("C", "A")] {
        let lower = name.to_lowercase();
        write(
            root,
            &format!("{lower}/{lower}.go"),
            &format!("// @kthulu:module:{name}\n// @kthulu:dependency:{next}\npackage {lower}\n"),
        );
    }
}

#[test]
fn fixture_b_cycle_in_graph_and_resolver() {
    let dir = tempdir().unwrap();
    cycle_fixture(dir.path());
    let analysis = analyzer(true)
        .analyze(dir.path(), &AnalyzeOptions::default())
        .unwrap();

    let graph = DependencyGraph::from_analysis(&analysis);
    assert_eq!(graph.cycles, vec![vec!["A", "B", "C"]]);
    let out: usize = graph.nodes.values().map(|n| n.out_degree).sum();
    let inn: usize = graph.nodes.values().map(|n| n.in_degree).sum();
    assert_eq!(out, graph.edges.len());
    assert_eq!(inn, graph.edges.len());

    let err = Resolver::builtin()
        .with_project(&analysis)
        .resolve(&["A"])
        .unwrap_err();
    match err {
        KthuluError::CircularDependency { modules } => assert_eq!(modules, vec!["A", "B", "C"]),
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn fixture_c_resolver_happy_path() {
    let resolver = Resolver::builtin();
    let plan = resolver.resolve(&["invoice"]).unwrap();

    for name in ["user", "organization", "product", "contact", "invoice"] {
        assert!(plan.required_modules.contains(name), "missing {name}");
    }
    // organization pulls in auth through the rule table.
    assert!(plan.required_modules.contains("auth"));
    assert_eq!(plan.install_order.len(), plan.required_modules.len());
    assert_eq!(plan.install_order.first().map(String::as_str), Some("user"));
    assert_eq!(plan.install_order.last().map(String::as_str), Some("invoice"));
    assert!(plan.position("product") < plan.position("invoice"));
    assert!(plan.position("contact") < plan.position("invoice"));

    for name in &plan.install_order {
        for dep in resolver.rules().dependencies_of(name) {
            assert!(plan.position(dep) < plan.position(name));
        }
    }

    assert!(plan.optional_modules.contains(&"payment".to_string()));
    assert!(plan.optional_modules.contains(&"verifactu".to_string()));
    let mut sorted = plan.optional_modules.clone();
    sorted.sort();
    assert_eq!(sorted, plan.optional_modules);
    assert!(plan.conflicts.is_empty());
}

#[test]
fn fixture_d_incompatibility() {
    let plan = Resolver::builtin()
        .resolve(&["sqlite", "postgresql"])
        .unwrap();
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].kind, ConflictKind::Incompatible);
    assert_eq!(plan.conflicts[0].modules, vec!["postgresql", "sqlite"]);
}

#[test]
fn fixture_e_guide() {
    let dir = tempdir().unwrap();
    write(dir.path(), "user.go", "// @kthulu:module:user\npackage user\n");
    write(
        dir.path(),
        "order/service.go",
        "package order\n\ntype OrderService struct{}\n\nfunc (s *OrderService) Place() {}\n",
    );

    let analysis = analyzer(false)
        .analyze(dir.path(), &AnalyzeOptions::default())
        .unwrap();
    let guide = render_guide(&analysis);
    assert!(guide.contains("order/service.go"), "{guide}");
    assert!(guide.contains("@kthulu:module:order"), "{guide}");
    assert!(guide.contains("OrderService"), "{guide}");
    assert!(!guide.contains("user.go"), "{guide}");
}

#[test]
fn analysis_is_idempotent() {
    let dir = tempdir().unwrap();
    payments_fixture(dir.path());
    cycle_fixture(dir.path());

    for cache_enabled in [false, true] {
        let analyzer = analyzer(cache_enabled);
        let first = analyzer.analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        let mut second = analyzer.analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        second.scanned_at = first.scanned_at;
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }
}

#[test]
fn graph_json_round_trips_project_graph() {
    let dir = tempdir().unwrap();
    payments_fixture(dir.path());
    cycle_fixture(dir.path());
    let analysis = analyzer(false)
        .analyze(dir.path(), &AnalyzeOptions::default())
        .unwrap();
    let graph = DependencyGraph::from_analysis(&analysis);
    let json = graph.to_json().unwrap();
    let back = DependencyGraph::from_json(&json).unwrap();
    assert_eq!(back, graph_sorted(graph));
}

/// `from_json` stores edges in sorted order; align the original for comparison.
fn graph_sorted(mut graph: DependencyGraph) -> DependencyGraph {
    graph.edges = graph.sorted_edges().into_iter().cloned().collect();
    graph
}

#[test]
fn empty_project_boundaries() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(KthuluConfig::default()).unwrap();
    let report = engine.run(dir.path(), &AnalyzeOptions::default()).unwrap();
    assert!(report.analysis.is_empty());
    assert_eq!(report.graph.node_count(), 0);
    assert!(report.semantics.recommendations.is_empty());

    let insights = engine.insights();
    assert!(insights.modules(dir.path()).unwrap().contains("<none>"));
    assert!(insights.guide(dir.path()).unwrap().contains("<none>"));
}

#[test]
fn unknown_tags_are_counted_but_inert() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "flags/flags.go",
        "// @kthulu:module:flags\n// @kthulu:feature_flag:beta owner=growth\npackage flags\n",
    );
    let analysis = analyzer(false)
        .analyze(dir.path(), &AnalyzeOptions::default())
        .unwrap();
    assert_eq!(analysis.tag_counts().get("feature_flag"), Some(&1));
    assert!(analysis.dependencies.is_empty());
    assert!(render_tags(&analysis).contains("feature_flag: 1"));
}

#[test]
fn oversized_files_warn_instead_of_failing() {
    let dir = tempdir().unwrap();
    write(dir.path(), "small.go", "// @kthulu:module:small\npackage small\n");
    write(dir.path(), "huge.go", &format!("package huge\n{}", "// filler\n".repeat(64)));

    let analyzer = ProjectAnalyzer::new(AnalyzerConfig {
        max_file_size: 128,
        ..AnalyzerConfig::default()
    });
    let analysis = analyzer.analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
    assert!(analysis.has_module("small"));
    assert_eq!(analysis.files.len(), 1);
    assert!(analysis
        .warnings
        .iter()
        .any(|w| w.path.as_deref() == Some("huge.go")));
}

#[test]
fn semantic_insights_over_layered_project() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "orders/handler.go",
        "// @kthulu:module:orders\n// @kthulu:dependency:users\npackage orders\n\n// @kthulu:handler:orders\ntype OrderHandler struct{}\n",
    );
    write(
        dir.path(),
        "orders/service.go",
        "// @kthulu:module:orders\npackage orders\n\n// @kthulu:service:orders\ntype OrderService struct{}\n",
    );
    write(
        dir.path(),
        "users/repo.go",
        "// @kthulu:module:users\npackage users\n\n// @kthulu:repository:users\ntype UserRepository struct{}\n\n// @kthulu:domain:user aggregate\ntype User struct{}\n",
    );

    let engine = Engine::new(KthuluConfig::default()).unwrap();
    let report = engine.run(dir.path(), &AnalyzeOptions::default()).unwrap();
    let names: Vec<_> = report
        .semantics
        .patterns
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert!(names.contains(&"layered"));
    assert!(names.contains(&"domain_driven"));
    assert!(names.contains(&"modular_decomposition"));
    for p in &report.semantics.patterns {
        assert!((0.0..=1.0).contains(&p.confidence));
    }
    let metrics = &report.semantics.project_metrics;
    assert_eq!(metrics.module_count, 2);
    assert_eq!(metrics.max_depth, 1);
    assert!((0.0..=1.0).contains(&metrics.complexity));
    approx::assert_abs_diff_eq!(metrics.coverage, 1.0);
}
