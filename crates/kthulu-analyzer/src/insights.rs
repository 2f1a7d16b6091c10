// ABOUTME: Read-only text reports over a ProjectAnalysis
// ABOUTME: Every enumerated set is sorted; empty sections render as <none>

use crate::project::{AnalyzeOptions, ProjectAnalyzer};
use kthulu_core::{FileAnalysis, ProjectAnalysis, Result, SymbolKind};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::Path;

pub const NONE: &str = "<none>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverviewOptions {
    pub show_dependencies: bool,
}

pub fn render_overview(analysis: &ProjectAnalysis, opts: OverviewOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project: {}", analysis.root.display());
    let _ = writeln!(out, "Modules: {}", analysis.modules.len());
    let _ = writeln!(out, "Dependencies: {}", analysis.dependencies.len());
    let _ = writeln!(out, "Tags: {}", analysis.tags.len());
    out.push('\n');

    out.push_str("Module list:\n");
    let mut modules: Vec<_> = analysis.modules.iter().collect();
    modules.sort_by(|a, b| a.name.cmp(&b.name));
    if modules.is_empty() {
        let _ = writeln!(out, "  {}", NONE);
    }
    for m in modules {
        let _ = writeln!(
            out,
            "  {} (package {}, {} files)",
            m.name,
            m.package_name,
            m.files.len()
        );
    }

    if opts.show_dependencies {
        out.push('\n');
        out.push_str(&render_dependencies(analysis));
    }
    out
}

pub fn render_modules(analysis: &ProjectAnalysis) -> String {
    let mut out = String::new();
    let mut modules: Vec<_> = analysis.modules.iter().collect();
    modules.sort_by(|a, b| a.name.cmp(&b.name));
    if modules.is_empty() {
        let _ = writeln!(out, "Modules:\n  {}", NONE);
        return out;
    }

    for (i, m) in modules.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "Module: {}", m.name);
        let _ = writeln!(out, "  Package: {}", m.package_name);
        let _ = writeln!(out, "  Files: {}", m.files.len());
        write_list(&mut out, m.files.iter().map(String::as_str));
        let _ = writeln!(out, "  Dependencies: {}", m.dependencies.len());
        write_list(&mut out, m.dependencies.iter().map(String::as_str));
    }
    out
}

pub fn render_tags(analysis: &ProjectAnalysis) -> String {
    let mut out = String::from("Tags by type:\n");
    let counts = analysis.tag_counts();
    if counts.is_empty() {
        let _ = writeln!(out, "  {}", NONE);
    }
    for (tag_type, count) in counts {
        let _ = writeln!(out, "  {}: {}", tag_type, count);
    }
    out
}

pub fn render_dependencies(analysis: &ProjectAnalysis) -> String {
    let mut out = String::from("Dependencies:\n");
    let mut deps: Vec<_> = analysis.dependencies.iter().collect();
    deps.sort_by(|a, b| (&a.from, &a.to, a.kind).cmp(&(&b.from, &b.to, b.kind)));
    if deps.is_empty() {
        let _ = writeln!(out, "  {}", NONE);
    }
    for d in deps {
        let _ = writeln!(out, "  {} -> {} ({})", d.from, d.to, d.kind);
    }
    out
}

/// Suggests annotations for every scanned file that has none.
pub fn render_guide(analysis: &ProjectAnalysis) -> String {
    let mut out = String::from("Annotation guide\n");
    let mut untagged: Vec<&FileAnalysis> =
        analysis.files.iter().filter(|f| !f.has_tags()).collect();
    untagged.sort_by(|a, b| a.path.cmp(&b.path));

    let _ = writeln!(out, "Untagged files: {}", untagged.len());
    if untagged.is_empty() {
        let _ = writeln!(out, "  {}", NONE);
        return out;
    }

    for file in untagged {
        out.push('\n');
        let _ = writeln!(out, "{}", file.path);
        let _ = writeln!(
            out,
            "  // @kthulu:module:{}",
            infer_module_name(file, analysis)
        );

        let mut hints = BTreeSet::new();
        for symbol in &file.symbols {
            if let Some(tag_type) = symbol_hint(&symbol.name, symbol.kind) {
                hints.insert((symbol.name.as_str(), tag_type));
            }
        }
        for (name, tag_type) in hints {
            let _ = writeln!(out, "  {}: // @kthulu:{}:{}", name, tag_type, name);
        }
    }
    out
}

/// Package name when it names an existing module, else the parent directory.
pub fn infer_module_name<'a>(file: &'a FileAnalysis, analysis: &ProjectAnalysis) -> &'a str {
    if analysis.has_module(&file.package_name) {
        return &file.package_name;
    }
    Path::new(&file.path)
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(&file.package_name)
}

/// Tag type suggested for an exported symbol, by name substring.
pub fn symbol_hint(name: &str, kind: SymbolKind) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.contains("handler") {
        Some("handler")
    } else if lower.contains("service") {
        Some("service")
    } else if lower.contains("repository") || lower.contains("repo") {
        Some("repository")
    } else if kind == SymbolKind::Type {
        Some("domain")
    } else {
        None
    }
}

fn write_list<'a>(out: &mut String, items: impl Iterator<Item = &'a str>) {
    let mut items: Vec<&str> = items.collect();
    items.sort_unstable();
    if items.is_empty() {
        let _ = writeln!(out, "    {}", NONE);
    }
    for item in items {
        let _ = writeln!(out, "    - {}", item);
    }
}

/// Runs a fresh analysis per call and renders one report.
#[derive(Debug, Clone)]
pub struct Insights {
    analyzer: ProjectAnalyzer,
    options: AnalyzeOptions,
}

impl Insights {
    pub fn new(analyzer: ProjectAnalyzer) -> Self {
        Self {
            analyzer,
            options: AnalyzeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnalyzeOptions) -> Self {
        self.options = options;
        self
    }

    fn analyze(&self, root: &Path) -> Result<ProjectAnalysis> {
        self.analyzer.analyze(root, &self.options)
    }

    pub fn overview(&self, root: impl AsRef<Path>, opts: OverviewOptions) -> Result<String> {
        Ok(render_overview(&self.analyze(root.as_ref())?, opts))
    }

    pub fn modules(&self, root: impl AsRef<Path>) -> Result<String> {
        Ok(render_modules(&self.analyze(root.as_ref())?))
    }

    pub fn tags(&self, root: impl AsRef<Path>) -> Result<String> {
        Ok(render_tags(&self.analyze(root.as_ref())?))
    }

    pub fn dependencies(&self, root: impl AsRef<Path>) -> Result<String> {
        Ok(render_dependencies(&self.analyze(root.as_ref())?))
    }

    pub fn guide(&self, root: impl AsRef<Path>) -> Result<String> {
        Ok(render_guide(&self.analyze(root.as_ref())?))
    }
}
