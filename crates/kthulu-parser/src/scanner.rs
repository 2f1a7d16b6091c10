// ABOUTME: Walks a project root and streams source files that survive the ignore filter
// ABOUTME: Per-file stat failures and oversized files go to a fault channel, never abort the walk

use crossbeam_channel::{unbounded, Receiver, Sender};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use kthulu_core::{AnalyzerConfig, KthuluError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Configuration for file collection
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub extension: String,
    pub ignore_patterns: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from(&AnalyzerConfig::default())
    }
}

impl From<&AnalyzerConfig> for ScannerConfig {
    fn from(cfg: &AnalyzerConfig) -> Self {
        Self {
            extension: cfg.extension.trim_start_matches('.').to_string(),
            ignore_patterns: cfg.ignore_patterns.clone(),
            max_file_size: cfg.max_file_size,
        }
    }
}

/// One file yielded by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: PathBuf,
    /// Root-relative, `/`-separated.
    pub relative: String,
    pub modtime: SystemTime,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFault {
    Io { path: String, message: String },
    Oversized { path: String, size: u64, limit: u64 },
}

impl ScanFault {
    pub fn path(&self) -> &str {
        match self {
            ScanFault::Io { path, .. } | ScanFault::Oversized { path, .. } => path,
        }
    }
}

impl fmt::Display for ScanFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFault::Io { path, message } => write!(f, "{}: {}", path, message),
            ScanFault::Oversized { path, size, limit } => write!(
                f,
                "{}: skipped, {} bytes exceeds max_file_size {}",
                path, size, limit
            ),
        }
    }
}

/// Ignore filter: glob on the base name, substring on the relative path.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    globs: GlobSet,
    substrings: Vec<String>,
}

impl IgnoreMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                KthuluError::InvalidInput(format!("bad ignore pattern {:?}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| KthuluError::InvalidInput(format!("ignore patterns: {}", e)))?;

        Ok(Self {
            globs,
            substrings: patterns
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
        })
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        if relative.is_empty() {
            return false;
        }
        let base = relative.rsplit('/').next().unwrap_or(relative);
        self.globs.is_match(base) || self.substrings.iter().any(|s| relative.contains(s.as_str()))
    }
}

pub struct SourceScanner {
    root: PathBuf,
    config: ScannerConfig,
    matcher: Arc<IgnoreMatcher>,
}

impl SourceScanner {
    pub fn new(root: impl AsRef<Path>, config: ScannerConfig) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(KthuluError::InvalidRoot(format!(
                "{} does not exist",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(KthuluError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = root.canonicalize().map_err(|e| {
            KthuluError::InvalidRoot(format!("{} cannot be resolved: {}", root.display(), e))
        })?;
        let matcher = Arc::new(IgnoreMatcher::new(&config.ignore_patterns)?);
        Ok(Self {
            root,
            config,
            matcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walks the tree in path order. Faults arrive on the returned
    /// receiver; it disconnects once the iterator is dropped.
    pub fn scan(&self) -> (ScanIter, Receiver<ScanFault>) {
        let (tx, rx) = unbounded();
        info!("Scanning source files under {:?}", self.root);

        let root = self.root.clone();
        let matcher = self.matcher.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .ignore(true)
            .sort_by_file_path(|a, b| walk_key(a).cmp(&walk_key(b)))
            .filter_entry(move |entry| {
                let rel = relative_path(&root, entry.path());
                !matcher.is_ignored(&rel)
            })
            .build();

        let iter = ScanIter {
            root: self.root.clone(),
            walker,
            config: self.config.clone(),
            faults: tx,
            yielded: 0,
        };
        (iter, rx)
    }

    /// Eager convenience over [`scan`](Self::scan).
    pub fn collect(&self) -> (Vec<ScanEntry>, Vec<ScanFault>) {
        let (iter, faults) = self.scan();
        let entries: Vec<ScanEntry> = iter.collect();
        (entries, faults.try_iter().collect())
    }
}

pub struct ScanIter {
    root: PathBuf,
    walker: ignore::Walk,
    config: ScannerConfig,
    faults: Sender<ScanFault>,
    yielded: usize,
}

impl ScanIter {
    fn report(&self, fault: ScanFault) {
        warn!("{}", fault);
        // Receiver may already be gone; faults are advisory.
        let _ = self.faults.send(fault);
    }
}

impl Iterator for ScanIter {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<ScanEntry> {
        loop {
            let dent = match self.walker.next()? {
                Ok(d) => d,
                Err(e) => {
                    self.report(ScanFault::Io {
                        path: String::new(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !dent.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = dent.path();
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == self.config.extension)
                .unwrap_or(false);
            if !matches_ext {
                continue;
            }

            let relative = relative_path(&self.root, path);
            let meta = match dent.metadata() {
                Ok(m) => m,
                Err(e) => {
                    self.report(ScanFault::Io {
                        path: relative,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let size = meta.len();
            if size > self.config.max_file_size {
                self.report(ScanFault::Oversized {
                    path: relative,
                    size,
                    limit: self.config.max_file_size,
                });
                continue;
            }

            let modtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            self.yielded += 1;
            debug!("Scanned {} ({} bytes)", relative, size);
            return Some(ScanEntry {
                path: path.to_path_buf(),
                relative,
                modtime,
                size,
            });
        }
    }
}

impl Drop for ScanIter {
    fn drop(&mut self) {
        debug!("Scan iterator finished after {} files", self.yielded);
    }
}

/// Sibling order key. A directory sorts as `name/`, which makes the walk
/// yield files in plain string order of their relative paths.
fn walk_key(path: &Path) -> Vec<u8> {
    let mut key = path
        .file_name()
        .map(|n| n.as_encoded_bytes().to_vec())
        .unwrap_or_default();
    if path.is_dir() {
        key.push(b'/');
    }
    key
}

pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
