// ABOUTME: Go syntax extractor built on tree-sitter
// ABOUTME: Emits package name, imports, comment groups and exported symbols for one file

use kthulu_core::{KthuluError, Result, Symbol, SymbolKind};
use tree_sitter::{Node, Parser, Tree};

/// Consecutive comments on adjacent lines, as Go groups them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentGroup {
    /// 1-based line of the first comment.
    pub line: u32,
    pub end_line: u32,
    /// Raw comment texts with their line, delimiters included.
    pub comments: Vec<(u32, String)>,
    /// Exported declaration this group documents, if it sits directly above one.
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFile {
    pub package_name: String,
    pub imports: Vec<String>,
    pub comment_groups: Vec<CommentGroup>,
    pub symbols: Vec<Symbol>,
    pub line_count: usize,
}

/// Declared name plus the line its doc comment must end right above.
struct Declared {
    symbol: Symbol,
    exported: bool,
    anchor_line: u32,
}

pub struct GoExtractor;

impl GoExtractor {
    pub fn extract(source: &str, file_path: &str) -> Result<ExtractedFile> {
        let tree = Self::parse(source, file_path)?;
        let root = tree.root_node();
        if root.has_error() {
            let (line, message) = first_error(root);
            return Err(KthuluError::Parse {
                file: file_path.to_string(),
                line,
                message,
            });
        }

        let mut collector = GoCollector::new(source);
        collector.visit_top_level(root);
        collector.collect_comments(root);
        Ok(collector.finish(source))
    }

    fn parse(source: &str, file_path: &str) -> Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| KthuluError::Internal(format!("loading Go grammar: {}", e)))?;
        parser.parse(source, None).ok_or_else(|| KthuluError::Parse {
            file: file_path.to_string(),
            line: 1,
            message: "parser produced no tree".to_string(),
        })
    }
}

/// Exported per Go's convention: the name starts with an uppercase letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_uppercase())
}

fn first_error(node: Node) -> (u32, String) {
    if node.is_error() || node.is_missing() {
        let line = node.start_position().row as u32 + 1;
        let msg = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        return (line, msg);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error(child);
        }
    }
    (node.start_position().row as u32 + 1, "syntax error".to_string())
}

struct GoCollector<'a> {
    content: &'a str,
    package_name: String,
    imports: Vec<String>,
    declared: Vec<Declared>,
    comments: Vec<(u32, u32, String)>,
}

impl<'a> GoCollector<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            package_name: String::new(),
            imports: Vec::new(),
            declared: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn visit_top_level(&mut self, root: Node) {
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            match node.kind() {
                "package_clause" => {
                    let mut c = node.walk();
                    if let Some(id) = node
                        .named_children(&mut c)
                        .find(|n| n.kind() == "package_identifier")
                    {
                        self.package_name = self.node_text(&id);
                    };
                }
                "import_declaration" => self.extract_imports(node),
                "function_declaration" | "method_declaration" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        let line = line_of(&node);
                        self.declare(self.node_text(&name), SymbolKind::Function, line, line);
                    }
                }
                "type_declaration" => self.extract_specs(node, &["type_spec", "type_alias"], SymbolKind::Type),
                "var_declaration" => self.extract_specs(node, &["var_spec"], SymbolKind::Variable),
                "const_declaration" => self.extract_specs(node, &["const_spec"], SymbolKind::Constant),
                _ => {}
            }
        }
    }

    fn extract_imports(&mut self, node: Node) {
        let mut specs = Vec::new();
        descendants_of_kind(node, &["import_spec"], &mut specs);
        for spec in specs {
            if let Some(path_node) = spec.child_by_field_name("path") {
                let path = self
                    .node_text(&path_node)
                    .trim_matches(|c| c == '"' || c == '`')
                    .to_string();
                if !path.is_empty() {
                    self.imports.push(path);
                }
            }
        }
    }

    /// Specs inside a parenthesised group anchor on their own line; a lone
    /// spec anchors on the `type`/`var`/`const` keyword line.
    fn extract_specs(&mut self, decl: Node, kinds: &[&str], kind: SymbolKind) {
        let decl_line = line_of(&decl);
        let mut specs = Vec::new();
        descendants_of_kind(decl, kinds, &mut specs);
        let grouped = specs.first().map_or(false, |first| {
            self.content[decl.start_byte()..first.start_byte()].contains('(')
        });

        for spec in specs {
            let anchor = if grouped { line_of(&spec) } else { decl_line };
            let mut c = spec.walk();
            let names: Vec<Node> = spec
                .children_by_field_name("name", &mut c)
                .filter(|n| n.is_named())
                .collect();
            for name in names {
                let text = self.node_text(&name);
                if text == "_" {
                    continue;
                }
                self.declare(text, kind, line_of(&spec), anchor);
            }
        }
    }

    fn declare(&mut self, name: String, kind: SymbolKind, line: u32, anchor_line: u32) {
        if name.is_empty() {
            return;
        }
        let exported = is_exported(&name);
        self.declared.push(Declared {
            symbol: Symbol::new(name, kind, line),
            exported,
            anchor_line,
        });
    }

    fn collect_comments(&mut self, node: Node) {
        let mut found = Vec::new();
        descendants_of_kind(node, &["comment"], &mut found);
        for c in found {
            let start = c.start_position().row as u32 + 1;
            let end = c.end_position().row as u32 + 1;
            self.comments.push((start, end, self.node_text(&c)));
        }
        self.comments.sort_by_key(|(start, _, _)| *start);
    }

    fn group_comments(&self) -> Vec<CommentGroup> {
        let mut groups: Vec<CommentGroup> = Vec::new();
        for (start, end, text) in &self.comments {
            match groups.last_mut() {
                Some(g) if *start <= g.end_line + 1 => {
                    g.end_line = (*end).max(g.end_line);
                    g.comments.push((*start, text.clone()));
                }
                _ => groups.push(CommentGroup {
                    line: *start,
                    end_line: *end,
                    comments: vec![(*start, text.clone())],
                    symbol: None,
                }),
            }
        }

        for group in &mut groups {
            group.symbol = self
                .declared
                .iter()
                .find(|d| d.exported && d.anchor_line == group.end_line + 1)
                .map(|d| d.symbol.name.clone());
        }
        groups
    }

    fn finish(self, source: &str) -> ExtractedFile {
        let comment_groups = self.group_comments();
        let symbols = self
            .declared
            .into_iter()
            .filter(|d| d.exported)
            .map(|d| d.symbol)
            .collect();
        ExtractedFile {
            package_name: self.package_name,
            imports: self.imports,
            comment_groups,
            symbols,
            line_count: source.lines().count(),
        }
    }

    fn node_text(&self, node: &Node) -> String {
        node.utf8_text(self.content.as_bytes())
            .unwrap_or("")
            .to_string()
    }
}

fn line_of(node: &Node) -> u32 {
    node.start_position().row as u32 + 1
}

fn descendants_of_kind<'t>(node: Node<'t>, kinds: &[&str], out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            out.push(child);
        } else {
            descendants_of_kind(child, kinds, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"package billing

import (
	"fmt"
	api "github.com/acme/shop/internal/modules/user"
)

import "strings"

// InvoiceService creates invoices.
// @kthulu:service:invoice
type InvoiceService struct{}

type helper struct{}

// NewInvoiceService wires the service.
func NewInvoiceService() *InvoiceService { return &InvoiceService{} }

func (s *InvoiceService) Issue() error {
	// inside body
	return fmt.Errorf("x")
}

const (
	// MaxLines caps invoice lines.
	MaxLines = 10
	minLines = 1
)

var Default, other = 1, 2
"#;

    #[test]
    fn extracts_package_and_imports() {
        let file = GoExtractor::extract(SAMPLE, "billing/service.go").unwrap();
        assert_eq!(file.package_name, "billing");
        assert_eq!(
            file.imports,
            vec!["fmt", "github.com/acme/shop/internal/modules/user", "strings"]
        );
        assert_eq!(file.line_count, SAMPLE.lines().count());
    }

    #[test]
    fn only_exported_symbols_are_kept() {
        let file = GoExtractor::extract(SAMPLE, "billing/service.go").unwrap();
        let names: Vec<_> = file.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"InvoiceService"));
        assert!(names.contains(&"NewInvoiceService"));
        assert!(names.contains(&"Issue"));
        assert!(names.contains(&"MaxLines"));
        assert!(names.contains(&"Default"));
        assert!(!names.contains(&"helper"));
        assert!(!names.contains(&"minLines"));
        assert!(!names.contains(&"other"));

        let svc = file.symbols.iter().find(|s| s.name == "InvoiceService").unwrap();
        assert_eq!(svc.kind, SymbolKind::Type);
        let max = file.symbols.iter().find(|s| s.name == "MaxLines").unwrap();
        assert_eq!(max.kind, SymbolKind::Constant);
    }

    #[test]
    fn doc_groups_attach_to_following_declaration() {
        let file = GoExtractor::extract(SAMPLE, "billing/service.go").unwrap();
        let doc = file
            .comment_groups
            .iter()
            .find(|g| g.comments.iter().any(|(_, t)| t.contains("@kthulu:service")))
            .unwrap();
        assert_eq!(doc.comments.len(), 2);
        assert_eq!(doc.symbol.as_deref(), Some("InvoiceService"));

        let grouped = file
            .comment_groups
            .iter()
            .find(|g| g.comments.iter().any(|(_, t)| t.contains("MaxLines caps")))
            .unwrap();
        assert_eq!(grouped.symbol.as_deref(), Some("MaxLines"));

        let body = file
            .comment_groups
            .iter()
            .find(|g| g.comments.iter().any(|(_, t)| t.contains("inside body")))
            .unwrap();
        assert_eq!(body.symbol, None);
    }

    #[test]
    fn syntax_errors_report_file_and_line() {
        let src = "package broken\n\nfunc Oops( {\n";
        let err = GoExtractor::extract(src, "broken.go").unwrap_err();
        match err {
            KthuluError::Parse { file, line, .. } => {
                assert_eq!(file, "broken.go");
                assert!(line >= 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn export_rule_follows_case() {
        assert!(is_exported("Handler"));
        assert!(!is_exported("handler"));
        assert!(!is_exported(""));
    }
}
