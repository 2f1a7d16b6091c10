use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use kthulu_analyzer::{AnalyzeOptions, Engine, OverviewOptions, ResolutionPlan, SemanticInsights};
use kthulu_core::{KthuluConfig, ProjectAnalysis};
use kthulu_graph::DependencyGraph;
use kthulu_security::{AuthorizationCore, PolicyBatch, PolicySynthesizer};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kthulu")]
#[command(about = "Kthulu - annotation-driven project intelligence for Go sources", long_about = None)]
#[command(version)]
struct Cli {
    /// Explicit configuration file (layered over <root>/kthulu.toml)
    #[arg(short, long, global = true, env = "KTHULU_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project and summarise modules, tags and warnings
    Analyze {
        root: PathBuf,
        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Project overview
    Overview {
        root: PathBuf,
        /// Include dependency edges
        #[arg(long)]
        deps: bool,
    },

    /// Module details
    Modules { root: PathBuf },

    /// Tag counts by type
    Tags { root: PathBuf },

    /// Module dependency edges
    Deps { root: PathBuf },

    /// Annotation suggestions for untagged files
    Guide { root: PathBuf },

    /// Export the module dependency graph
    Graph {
        root: PathBuf,
        #[arg(short, long, value_enum, default_value = "dot")]
        format: GraphFormat,
    },

    /// Detected patterns, metrics and recommendations
    Semantics {
        root: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Install order and conflicts for a set of modules
    Resolve {
        #[arg(required = true)]
        modules: Vec<String>,
        /// Merge the declared dependencies of this project into the rule table
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Access policies synthesized from security annotations
    Policies {
        root: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Dot,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Err(e) = execute_command(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kthulu=debug" } else { "kthulu=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn engine_for(cli: &Cli, root: Option<&Path>) -> Result<Engine> {
    let config = KthuluConfig::load(cli.config.as_deref(), root)
        .context("Failed to load configuration")?;
    debug!(?config, "Effective configuration");
    Engine::new(config).context("Failed to initialise engine")
}

fn execute_command(cli: &Cli) -> Result<()> {
    let opts = AnalyzeOptions::default();
    match &cli.command {
        Commands::Analyze { root, json } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            let analysis = analyze(&engine, root, &opts)?;
            if *json {
                println!("{}", analysis.to_json()?);
            } else {
                print_analysis(&analysis);
            }
        }
        Commands::Overview { root, deps } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            let text = engine
                .insights()
                .overview(root, OverviewOptions { show_dependencies: *deps })
                .with_context(|| format!("Failed to analyse {}", root.display()))?;
            print_report(&text);
        }
        Commands::Modules { root } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            print_report(&engine.insights().modules(root)?);
        }
        Commands::Tags { root } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            print_report(&engine.insights().tags(root)?);
        }
        Commands::Deps { root } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            print_report(&engine.insights().dependencies(root)?);
        }
        Commands::Guide { root } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            print_report(&engine.insights().guide(root)?);
        }
        Commands::Graph { root, format } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            let analysis = analyze(&engine, root, &opts)?;
            let graph = engine.build_graph(&analysis);
            print_graph(&graph, *format)?;
        }
        Commands::Semantics { root, json } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            let report = engine.run(root, &opts)?;
            if *json {
                print_json(&report.semantics)?;
            } else {
                print_semantics(&report.semantics);
            }
        }
        Commands::Resolve { modules, root, json } => {
            let engine = engine_for(cli, root.as_deref())?;
            let plan = match root {
                Some(root) => {
                    let analysis = analyze(&engine, root, &opts)?;
                    engine.resolve_for_project(&analysis, modules.as_slice())?
                }
                None => engine.resolve_dependencies(modules.as_slice())?,
            };
            if *json {
                print_json(&plan)?;
            } else {
                print_plan(&plan);
            }
        }
        Commands::Policies { root, json } => {
            let engine = engine_for(cli, Some(root.as_path()))?;
            let analysis = analyze(&engine, root, &opts)?;
            let batch = PolicySynthesizer::new().synthesize(&analysis);
            // Loading the batch validates role parents and policy shapes.
            AuthorizationCore::new(engine.config().authz.clone())?
                .apply_batch(batch.clone())
                .context("Synthesized policies were rejected")?;
            if *json {
                println!("{}", batch.to_json()?);
            } else {
                print_policies(&batch);
            }
        }
    }
    Ok(())
}

fn analyze(engine: &Engine, root: &Path, opts: &AnalyzeOptions) -> Result<ProjectAnalysis> {
    engine
        .analyze_project(root, opts)
        .with_context(|| format!("Failed to analyse {}", root.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Unindented lines are headings.
fn print_report(text: &str) {
    for line in text.lines() {
        if !line.is_empty() && !line.starts_with(' ') {
            println!("{}", line.cyan().bold());
        } else {
            println!("{}", line);
        }
    }
}

fn heading(title: &str) {
    println!("{}", title.cyan().bold());
}

fn print_analysis(analysis: &ProjectAnalysis) {
    heading(&format!("Project: {}", analysis.root.display()));
    if let Some(module_path) = &analysis.module_path {
        println!("  module path: {}", module_path);
    }
    println!("  files:        {}", analysis.files.len().to_string().yellow());
    println!("  modules:      {}", analysis.modules.len().to_string().yellow());
    println!("  tags:         {}", analysis.tags.len().to_string().yellow());
    println!("  dependencies: {}", analysis.dependencies.len().to_string().yellow());

    if !analysis.warnings.is_empty() {
        println!();
        heading(&format!("Warnings ({})", analysis.warnings.len()));
        for warning in &analysis.warnings {
            match &warning.path {
                Some(path) => println!("  {} {}: {}", "!".yellow(), path, warning.message),
                None => println!("  {} {}", "!".yellow(), warning.message),
            }
        }
    }
}

fn print_graph(graph: &DependencyGraph, format: GraphFormat) -> Result<()> {
    match format {
        GraphFormat::Dot => print!("{}", graph.to_dot()),
        GraphFormat::Json => println!("{}", graph.to_json()?),
    }
    Ok(())
}

fn print_semantics(insights: &SemanticInsights) {
    let metrics = &insights.project_metrics;
    heading("Metrics");
    println!(
        "  modules {}  files {}  tags {}  cycles {}  max depth {}",
        metrics.module_count, metrics.file_count, metrics.tag_count, metrics.cycle_count, metrics.max_depth
    );
    println!(
        "  coverage {:.2}  quality {:.2}  complexity {:.2}",
        metrics.coverage, metrics.quality, metrics.complexity
    );

    println!();
    heading("Patterns");
    if insights.patterns.is_empty() {
        println!("  <none>");
    }
    for pattern in &insights.patterns {
        println!(
            "  {} ({}, {} occurrences, confidence {:.2})",
            pattern.name.green(),
            pattern.kind,
            pattern.occurrences,
            pattern.confidence
        );
    }

    println!();
    heading("Recommendations");
    if insights.recommendations.is_empty() {
        println!("  <none>");
    }
    for rec in &insights.recommendations {
        println!("  {}", rec);
        for suggestion in &rec.suggestions {
            println!("    - {}", suggestion);
        }
    }
}

fn print_plan(plan: &ResolutionPlan) {
    heading("Install order");
    for (i, name) in plan.install_order.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    if !plan.optional_modules.is_empty() {
        println!();
        heading("Optional modules");
        println!("  {}", plan.optional_modules.join(", "));
    }
    if !plan.conflicts.is_empty() {
        println!();
        heading("Conflicts");
        for conflict in &plan.conflicts {
            println!("  {} {}", "x".red().bold(), conflict.message);
            for suggestion in &conflict.suggestions {
                println!("    - {}", suggestion);
            }
        }
    }
    for warning in &plan.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
    if !plan.recommendations.is_empty() {
        println!();
        heading("Recommendations");
        for rec in &plan.recommendations {
            let marker = if rec.auto_apply { " (auto)" } else { "" };
            println!("  {}{}", rec, marker);
        }
    }
}

fn print_policies(batch: &PolicyBatch) {
    heading(&format!("Policies ({})", batch.policies.len()));
    if batch.policies.is_empty() {
        println!("  <none>");
    }
    for policy in &batch.policies {
        println!(
            "  {} {} [{}] roles: {}",
            policy.id.green(),
            policy.resource,
            policy.actions.join(","),
            policy.required_roles.join(",")
        );
        if !policy.permissions.is_empty() {
            println!("    permissions: {}", policy.permissions.join(","));
        }
        for (k, v) in &policy.conditions {
            println!("    when {}={}", k, v);
        }
        if let Some(source) = &policy.source {
            println!("    from {}", source);
        }
    }

    println!();
    heading(&format!("Roles ({})", batch.roles.len()));
    let mut roles: Vec<_> = batch.roles.iter().collect();
    roles.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.id.cmp(&b.id)));
    for role in roles {
        let parents = if role.parents.is_empty() {
            String::new()
        } else {
            format!(" inherits {}", role.parents.join(","))
        };
        println!("  {} (level {}){}", role.id, role.level, parents);
    }
}
