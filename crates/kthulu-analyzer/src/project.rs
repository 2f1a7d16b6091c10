// ABOUTME: Drives scanner, extractor and tag parser over a tree and merges the results
// ABOUTME: Files are parsed on a scoped worker pool; merging happens serially in scan order

use crossbeam_channel::{bounded, unbounded};
use kthulu_cache::{fingerprint, CacheStats, FileCache, MemoryFileCache, NoopFileCache};
use kthulu_core::{
    ensure_active, AnalyzerConfig, CancellationToken, Dependency, DependencyKind, FileAnalysis,
    KthuluError, Module, ProjectAnalysis, Result, ScanWarning, TagType,
};
use kthulu_parser::{analyze_source, ScanEntry, ScannerConfig, SourceScanner};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Per-call options for a project scan.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Checked between files and between phases.
    pub cancel: Option<CancellationToken>,
}

impl AnalyzeOptions {
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    pub fn check(&self) -> Result<()> {
        ensure_active(self.cancel.as_ref())
    }
}

#[derive(Clone)]
pub struct ProjectAnalyzer {
    config: AnalyzerConfig,
    cache: Arc<dyn FileCache>,
}

impl std::fmt::Debug for ProjectAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAnalyzer")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

impl ProjectAnalyzer {
    /// Picks the in-memory cache when caching is enabled, the no-op one otherwise.
    pub fn new(config: AnalyzerConfig) -> Self {
        let cache: Arc<dyn FileCache> = if config.cache_enabled {
            Arc::new(MemoryFileCache::new(
                config.cache_max_entries,
                config.cache_ttl(),
            ))
        } else {
            Arc::new(NoopFileCache::new())
        };
        Self { config, cache }
    }

    pub fn with_cache(config: AnalyzerConfig, cache: Arc<dyn FileCache>) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[tracing::instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn analyze(&self, root: impl AsRef<Path>, opts: &AnalyzeOptions) -> Result<ProjectAnalysis> {
        let root = root.as_ref();
        self.config.validate()?;
        opts.check()?;

        let scanner = SourceScanner::new(root, ScannerConfig::from(&self.config))?;
        let module_path = self
            .config
            .module_path
            .clone()
            .or_else(|| read_module_path(root));

        let (outcomes, mut warnings) = self.parse_all(&scanner, opts)?;
        opts.check()?;

        let mut analysis = ProjectAnalysis::new(root);
        analysis.module_path = module_path;
        let mut files = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(file) => files.push(file),
                Err(warning) => warnings.push(warning),
            }
        }

        for file in &files {
            merge_file(&mut analysis, file, &mut warnings);
        }
        analysis.files = files;
        analysis.warnings = warnings;

        info!(
            files = analysis.files.len(),
            modules = analysis.modules.len(),
            dependencies = analysis.dependencies.len(),
            tags = analysis.tags.len(),
            warnings = analysis.warnings.len(),
            "Project analysis complete"
        );
        Ok(analysis)
    }

    /// Parses every scanned file on a worker pool. Outcomes come back in scan
    /// order regardless of which worker finished first.
    fn parse_all(
        &self,
        scanner: &SourceScanner,
        opts: &AnalyzeOptions,
    ) -> Result<(Vec<std::result::Result<FileAnalysis, ScanWarning>>, Vec<ScanWarning>)> {
        let workers = self.config.worker_count();
        let (entries, faults) = scanner.scan();
        let (work_tx, work_rx) = bounded::<(usize, ScanEntry)>(workers * 2);
        let (result_tx, result_rx) = unbounded();
        let mut cancelled = false;

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (idx, entry) in work_rx.iter() {
                        if opts.check().is_err() {
                            break;
                        }
                        let outcome = self.analyze_entry(&entry);
                        if result_tx.send((idx, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (idx, entry) in entries.enumerate() {
                if opts.check().is_err() {
                    cancelled = true;
                    break;
                }
                if work_tx.send((idx, entry)).is_err() {
                    break;
                }
            }
            drop(work_tx);
        });

        if cancelled {
            warn!("Scan cancelled");
            return Err(KthuluError::Cancelled);
        }

        let mut outcomes: Vec<_> = result_rx.try_iter().collect();
        outcomes.sort_by_key(|(idx, _)| *idx);
        let warnings = faults
            .try_iter()
            .map(|fault| ScanWarning::for_path(fault.path(), fault.to_string()))
            .collect();
        Ok((outcomes.into_iter().map(|(_, o)| o).collect(), warnings))
    }

    fn analyze_entry(&self, entry: &ScanEntry) -> std::result::Result<FileAnalysis, ScanWarning> {
        // Absolute path, so one cache can serve several roots.
        let key = fingerprint(&entry.path.to_string_lossy(), entry.modtime);
        if let Some(bytes) = self.cache.get(&key) {
            match serde_json::from_slice::<FileAnalysis>(&bytes) {
                Ok(cached) => {
                    debug!("Cache hit for {}", entry.relative);
                    return Ok(cached);
                }
                Err(e) => {
                    warn!("Dropping undecodable cache entry for {}: {}", entry.relative, e);
                    self.cache.delete(&key);
                }
            }
        }

        let source = fs::read_to_string(&entry.path).map_err(|e| {
            warn!("Failed to read {}: {}", entry.relative, e);
            ScanWarning::for_path(&entry.relative, format!("read failed: {}", e))
        })?;

        let analysis = analyze_source(&entry.relative, &source).map_err(|e| {
            warn!("Skipping {}: {}", entry.relative, e);
            ScanWarning::for_path(&entry.relative, e.to_string())
        })?;

        match serde_json::to_vec(&analysis) {
            Ok(bytes) => self.cache.set(&key, bytes),
            Err(e) => warn!("Not caching {}: {}", entry.relative, e),
        }
        debug!(
            tags = analysis.tags.len(),
            symbols = analysis.symbols.len(),
            "Analyzed {}",
            entry.relative
        );
        Ok(analysis)
    }
}

/// Folds one file into the project model.
fn merge_file(analysis: &mut ProjectAnalysis, file: &FileAnalysis, warnings: &mut Vec<ScanWarning>) {
    analysis.tags.extend(file.tags.iter().cloned());

    for tag in file.tags_of(&TagType::MODULE) {
        let name = tag.value_str();
        if name.is_empty() {
            continue;
        }
        if analysis.module(name).is_none() {
            debug!("Module {} first declared in {}", name, file.path);
            analysis
                .modules
                .push(Module::new(name, file.package_name.as_str()));
        }
        if let Some(module) = analysis.module_mut(name) {
            if module.package_name != file.package_name {
                warnings.push(ScanWarning::for_path(
                    &file.path,
                    format!(
                        "module {} already uses package {}, ignoring package {}",
                        name, module.package_name, file.package_name
                    ),
                ));
            }
            if module.add_file(&file.path) {
                module.tags.extend(file.tags.iter().cloned());
            }
        }
    }

    let from = file.owning_module().to_string();
    for (tag_type, kind) in [
        (&TagType::DEPENDENCY, DependencyKind::Module),
        (&TagType::REQUIRES, DependencyKind::Requires),
    ] {
        for tag in file.tags_of(tag_type) {
            let to = tag.value_str();
            if to.is_empty() || to == from {
                continue;
            }
            analysis.add_dependency(Dependency::new(&from, to, kind).at_line(tag.line));
            if let Some(module) = analysis.module_mut(&from) {
                module.add_dependency(to);
            }
        }
    }

    if let Some(module) = file.module.as_deref() {
        for import in &file.imports {
            if let Some(target) = module_import_target(import, analysis.module_path.as_deref()) {
                if target != module {
                    analysis.add_dependency(Dependency::new(module, target, DependencyKind::Import));
                }
            }
        }
    }
}

/// `<module_path>/.../modules/<name>` yields `<name>`. Without a module path
/// any import whose penultimate segment is `modules` qualifies.
pub fn module_import_target<'a>(import: &'a str, module_path: Option<&str>) -> Option<&'a str> {
    if let Some(prefix) = module_path {
        let rest = import.strip_prefix(prefix)?;
        if !rest.starts_with('/') {
            return None;
        }
    }
    let mut segments = import.rsplit('/');
    let last = segments.next()?;
    let penultimate = segments.next()?;
    (penultimate == "modules" && !last.is_empty()).then_some(last)
}

/// Reads the `module` directive of `go.mod` at the root, if present.
pub fn read_module_path(root: &Path) -> Option<String> {
    let content = fs::read_to_string(root.join("go.mod")).ok()?;
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let path = rest.trim().trim_matches('"');
        (!path.is_empty()).then(|| path.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn analyzer() -> ProjectAnalyzer {
        ProjectAnalyzer::new(AnalyzerConfig {
            workers: 2,
            ..AnalyzerConfig::default()
        })
    }

    #[test]
    fn import_rule_honours_module_path() {
        let mp = Some("github.com/acme/shop");
        assert_eq!(
            module_import_target("github.com/acme/shop/internal/modules/user", mp),
            Some("user")
        );
        assert_eq!(module_import_target("github.com/other/modules/user", mp), None);
        assert_eq!(module_import_target("github.com/acme/shopping/modules/x", mp), None);
        assert_eq!(
            module_import_target("github.com/other/modules/user", None),
            Some("user")
        );
        assert_eq!(module_import_target("fmt", None), None);
    }

    #[test]
    fn go_mod_directive_is_read() {
        let dir = tempdir().unwrap();
        write(dir.path(), "go.mod", "// comment\nmodule github.com/acme/shop\n\ngo 1.22\n");
        assert_eq!(
            read_module_path(dir.path()).as_deref(),
            Some("github.com/acme/shop")
        );
    }

    #[test]
    fn first_file_fixes_package_and_conflicts_warn() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a/a.go", "// @kthulu:module:shared\npackage alpha\n");
        write(dir.path(), "b/b.go", "// @kthulu:module:shared\npackage beta\n");

        let analysis = analyzer().analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        let module = analysis.module("shared").unwrap();
        assert_eq!(module.package_name, "alpha");
        assert_eq!(module.files, vec!["a/a.go", "b/b.go"]);
        assert_eq!(analysis.warnings.len(), 1);
        assert_eq!(analysis.warnings[0].path.as_deref(), Some("b/b.go"));
    }

    #[test]
    fn dependencies_come_from_tags_and_imports() {
        let dir = tempdir().unwrap();
        write(dir.path(), "go.mod", "module github.com/acme/shop\n");
        write(
            dir.path(),
            "internal/modules/invoice/invoice.go",
            r#"// @kthulu:module:invoice
// @kthulu:dependency:user
// @kthulu:requires:product
package invoice

import (
	"fmt"
	"github.com/acme/shop/internal/modules/contact"
	"github.com/elsewhere/modules/ignored"
)

var _ = fmt.Sprintf
var _ = contact.X
var _ = ignored.Y
"#,
        );

        let analysis = analyzer().analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        let kinds: Vec<_> = analysis
            .dependencies
            .iter()
            .map(|d| (d.to.as_str(), d.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("user", DependencyKind::Module),
                ("product", DependencyKind::Requires),
                ("contact", DependencyKind::Import),
            ]
        );
        assert_eq!(
            analysis.module("invoice").unwrap().dependencies,
            vec!["user", "product"]
        );
        assert_eq!(analysis.module_path.as_deref(), Some("github.com/acme/shop"));
    }

    #[test]
    fn parse_failures_become_warnings() {
        let dir = tempdir().unwrap();
        write(dir.path(), "ok.go", "// @kthulu:module:ok\npackage ok\n");
        write(dir.path(), "broken.go", "package broken\nfunc (\n");

        let analysis = analyzer().analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        assert!(analysis.has_module("ok"));
        assert_eq!(analysis.files.len(), 1);
        assert!(analysis
            .warnings
            .iter()
            .any(|w| w.path.as_deref() == Some("broken.go")));
    }

    #[test]
    fn second_scan_is_served_from_cache() {
        let dir = tempdir().unwrap();
        write(dir.path(), "x.go", "// @kthulu:module:x\npackage x\n");
        let analyzer = analyzer();
        analyzer.analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        analyzer.analyze(dir.path(), &AnalyzeOptions::default()).unwrap();
        let stats = analyzer.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn cache_keeps_roots_apart() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write(first.path(), "svc/x.go", "// @kthulu:module:alpha\npackage svc\n");
        write(second.path(), "svc/x.go", "// @kthulu:module:beta\npackage svc\n");
        let stamp = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        for dir in [&first, &second] {
            fs::File::options()
                .write(true)
                .open(dir.path().join("svc/x.go"))
                .unwrap()
                .set_modified(stamp)
                .unwrap();
        }

        let analyzer = analyzer();
        let a = analyzer.analyze(first.path(), &AnalyzeOptions::default()).unwrap();
        let b = analyzer.analyze(second.path(), &AnalyzeOptions::default()).unwrap();
        assert!(a.has_module("alpha"));
        assert!(b.has_module("beta"));
        assert!(!b.has_module("alpha"));
        assert_eq!(analyzer.cache_stats().hits, 0);
    }

    #[test]
    fn cancelled_token_aborts() {
        let dir = tempdir().unwrap();
        write(dir.path(), "x.go", "package x\n");
        let token = CancellationToken::new();
        token.cancel();
        let err = analyzer()
            .analyze(dir.path(), &AnalyzeOptions::with_cancel(token))
            .unwrap_err();
        assert!(matches!(err, KthuluError::Cancelled));
    }

    #[test]
    fn missing_root_is_invalid() {
        let dir = tempdir().unwrap();
        let err = analyzer()
            .analyze(dir.path().join("nope"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(matches!(err, KthuluError::InvalidRoot(_)));
    }
}
