pub mod engine;
pub mod insights;
pub mod project;
pub mod recommendation;
pub mod resolver;
pub mod semantic;

pub use engine::{Engine, EngineReport};
pub use insights::{
    render_dependencies, render_guide, render_modules, render_overview, render_tags, Insights,
    OverviewOptions,
};
pub use project::{AnalyzeOptions, ProjectAnalyzer};
pub use recommendation::{Recommendation, Severity};
pub use resolver::{Conflict, ConflictKind, ResolutionPlan, Resolver, RuleTable};
pub use semantic::{
    CodePattern, ModuleMetrics, PatternKind, ProjectMetrics, SemanticAnalyzer, SemanticInsights,
};
