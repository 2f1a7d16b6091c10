pub mod extractor;
pub mod scanner;
pub mod tags;

pub use extractor::*;
pub use scanner::*;
pub use tags::*;

use kthulu_core::{FileAnalysis, Result, TagType};

/// Runs the syntax extractor and the tag parser over one file's source.
pub fn analyze_source(path: &str, source: &str) -> Result<FileAnalysis> {
    let extracted = GoExtractor::extract(source, path)?;

    let mut tags: Vec<_> = extracted
        .comment_groups
        .iter()
        .flat_map(TagParser::parse_group)
        .collect();
    for tag in &mut tags {
        tag.file = Some(path.to_string());
    }

    let module = tags
        .iter()
        .find(|t| t.is(&TagType::MODULE) && !t.value_str().is_empty())
        .map(|t| t.value_str().to_string());

    Ok(FileAnalysis {
        path: path.to_string(),
        package_name: extracted.package_name,
        module,
        imports: extracted.imports,
        tags,
        symbols: extracted.symbols,
        line_count: extracted.line_count,
        size: source.len() as u64,
    })
}
