use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Annotation type. Known types are named constants; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagType(Cow<'static, str>);

impl TagType {
    pub const MODULE: TagType = TagType(Cow::Borrowed("module"));
    pub const DEPENDENCY: TagType = TagType(Cow::Borrowed("dependency"));
    pub const REQUIRES: TagType = TagType(Cow::Borrowed("requires"));
    pub const PROVIDES: TagType = TagType(Cow::Borrowed("provides"));
    pub const OBSERVABLE: TagType = TagType(Cow::Borrowed("observable"));
    pub const SECURITY: TagType = TagType(Cow::Borrowed("security"));
    pub const COMPLIANCE: TagType = TagType(Cow::Borrowed("compliance"));
    pub const HANDLER: TagType = TagType(Cow::Borrowed("handler"));
    pub const SERVICE: TagType = TagType(Cow::Borrowed("service"));
    pub const REPOSITORY: TagType = TagType(Cow::Borrowed("repository"));
    pub const DOMAIN: TagType = TagType(Cow::Borrowed("domain"));
    pub const GENERATED: TagType = TagType(Cow::Borrowed("generated"));
    pub const PROJECT: TagType = TagType(Cow::Borrowed("project"));

    const KNOWN: [&'static str; 13] = [
        "module",
        "dependency",
        "requires",
        "provides",
        "observable",
        "security",
        "compliance",
        "handler",
        "service",
        "repository",
        "domain",
        "generated",
        "project",
    ];

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match Self::KNOWN.iter().find(|k| **k == name) {
            Some(known) => TagType(Cow::Borrowed(*known)),
            None => TagType(Cow::Owned(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the closed set of engine types; custom types return false.
    pub fn is_known(&self) -> bool {
        Self::KNOWN.iter().any(|k| *k == self.as_str())
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TagType {
    fn from(s: &str) -> Self {
        TagType::new(s)
    }
}

impl PartialEq<str> for TagType {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for TagType {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A parsed `@kthulu:<type>[:<value>] [attrs]` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub tag_type: TagType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub line: u32,
    pub content: String,
    /// Exported declaration whose doc comment carried this tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Root-relative path of the file the tag came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Tag {
    pub fn new(tag_type: impl Into<TagType>, line: u32) -> Self {
        Self {
            tag_type: tag_type.into(),
            value: None,
            attributes: BTreeMap::new(),
            line,
            content: String::new(),
            symbol: None,
            file: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn is(&self, tag_type: &TagType) -> bool {
        &self.tag_type == tag_type
    }

    /// Value with the empty string standing in for "absent".
    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Bare keys parse to `true`; this also accepts an explicit `key=true`.
    pub fn has_flag(&self, key: &str) -> bool {
        self.attribute(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@kthulu:{}", self.tag_type)?;
        if let Some(value) = &self.value {
            write!(f, ":{}", value)?;
        }
        for (k, v) in &self.attributes {
            if v.contains(|c: char| c == ' ' || c == ',') {
                write!(f, " {}=\"{}\"", k, v)?;
            } else {
                write!(f, " {}={}", k, v)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Type,
    Variable,
    Constant,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Function => "function",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
        };
        write!(f, "{}", s)
    }
}

/// Exported named entity of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line: u32,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            line,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Root-relative, `/`-separated.
    pub path: String,
    pub package_name: String,
    /// Value of the first `module` tag in the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub imports: Vec<String>,
    pub tags: Vec<Tag>,
    pub symbols: Vec<Symbol>,
    pub line_count: usize,
    pub size: u64,
}

impl FileAnalysis {
    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn tags_of<'a>(&'a self, tag_type: &'a TagType) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.is(tag_type))
    }

    /// Module the file's dependencies are attributed to.
    pub fn owning_module(&self) -> &str {
        self.module.as_deref().unwrap_or(&self.package_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub package_name: String,
    pub files: Vec<String>,
    pub dependencies: Vec<String>,
    pub tags: Vec<Tag>,
}

impl Module {
    pub fn new(name: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package_name: package_name.into(),
            files: Vec::new(),
            dependencies: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Returns false when the file was already listed.
    pub fn add_file(&mut self, path: &str) -> bool {
        if self.files.iter().any(|f| f == path) {
            return false;
        }
        self.files.push(path.to_string());
        true
    }

    pub fn add_dependency(&mut self, name: &str) -> bool {
        if name == self.name || self.dependencies.iter().any(|d| d == name) {
            return false;
        }
        self.dependencies.push(name.to_string());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Module,
    Import,
    Requires,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Module => "module",
            DependencyKind::Import => "import",
            DependencyKind::Requires => "requires",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "module" => Ok(DependencyKind::Module),
            "import" => Ok(DependencyKind::Import),
            "requires" => Ok(DependencyKind::Requires),
            other => Err(format!("unknown dependency kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Dependency {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    fn same_edge(&self, other: &Dependency) -> bool {
        self.from == other.from && self.to == other.to && self.kind == other.kind
    }
}

/// Recoverable per-file fault surfaced by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl ScanWarning {
    pub fn for_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Project-level model produced by one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    /// Insertion order is the order of first-contributing file.
    pub modules: Vec<Module>,
    pub dependencies: Vec<Dependency>,
    pub tags: Vec<Tag>,
    pub files: Vec<FileAnalysis>,
    #[serde(default)]
    pub warnings: Vec<ScanWarning>,
    pub scanned_at: DateTime<Utc>,
}

impl ProjectAnalysis {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            module_path: None,
            modules: Vec::new(),
            dependencies: Vec::new(),
            tags: Vec::new(),
            files: Vec::new(),
            warnings: Vec::new(),
            scanned_at: Utc::now(),
        }
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.name == name)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn file(&self, path: &str) -> Option<&FileAnalysis> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Appends unless an edge with the same (from, to, kind) exists.
    pub fn add_dependency(&mut self, dependency: Dependency) -> bool {
        if self.dependencies.iter().any(|d| d.same_edge(&dependency)) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for tag in &self.tags {
            *counts.entry(tag.tag_type.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.dependencies.is_empty() && self.tags.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
