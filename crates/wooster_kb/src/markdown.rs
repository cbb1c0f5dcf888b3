//! Markdown partitioning: frontmatter, block tree, references.

use crate::types::{BlockKind, RefKind};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::sync::OnceLock;

/// A block extracted from a document, offsets relative to the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    /// Structural kind.
    pub kind: BlockKind,
    /// Breadcrumb of headings leading to (and for headings, including) this
    /// block.
    pub heading_path: Vec<String>,
    /// Byte offset of the block start.
    pub start_offset: usize,
    /// Byte offset one past the block end.
    pub end_offset: usize,
    /// Plain-text content.
    pub text: String,
}

/// A wikilink-style reference found inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    /// Index into [`ParsedDocument::blocks`] of the containing block.
    pub block_index: usize,
    /// The reference target as written (before resolution).
    pub target: String,
    /// How the reference was written.
    pub ref_kind: RefKind,
}

/// The result of partitioning one Markdown document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// Frontmatter `id`.
    pub id: Option<String>,
    /// Frontmatter `title`.
    pub title: Option<String>,
    /// Frontmatter `aliases`.
    pub aliases: Vec<String>,
    /// Frontmatter `tags`.
    pub tags: Vec<String>,
    /// Frontmatter `type`.
    pub doc_type: Option<String>,
    /// Content blocks in source order.
    pub blocks: Vec<ParsedBlock>,
    /// References found inside blocks.
    pub links: Vec<ParsedLink>,
}

/// Partitions Markdown into frontmatter metadata, blocks, and references.
///
/// Block offsets index into `source` (including the frontmatter region), so
/// they are stable citation ranges for the file as stored on disk.
#[must_use]
pub fn partition_markdown(source: &str) -> ParsedDocument {
    let mut parsed = ParsedDocument::default();

    let (frontmatter, body_start) = split_frontmatter(source);
    if let Some(frontmatter) = frontmatter {
        apply_frontmatter(&mut parsed, frontmatter);
    }
    let body = &source[body_start..];

    collect_blocks(body, body_start, &mut parsed);
    collect_links(&mut parsed);
    parsed
}

// ─────────────────────────────────────────────────────────────────────────────
// Frontmatter
// ─────────────────────────────────────────────────────────────────────────────

/// Splits a leading `---` fenced frontmatter region off the source.
///
/// Returns the frontmatter text (without fences) and the byte offset where
/// the body begins.
fn split_frontmatter(source: &str) -> (Option<&str>, usize) {
    let Some(rest) = source.strip_prefix("---\n").or_else(|| source.strip_prefix("---\r\n"))
    else {
        return (None, 0);
    };
    let fence_len = source.len() - rest.len();

    for terminator in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(terminator) {
            let body_start = fence_len + end + terminator.len();
            return (Some(&rest[..end]), body_start);
        }
    }
    // Unterminated frontmatter: treat the whole file as body.
    (None, 0)
}

fn apply_frontmatter(parsed: &mut ParsedDocument, frontmatter: &str) {
    let value: serde_yml::Value = match serde_yml::from_str(frontmatter) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(%err, "ignoring unparsable frontmatter");
            return;
        }
    };

    parsed.id = yaml_string(&value, "id");
    parsed.title = yaml_string(&value, "title");
    parsed.doc_type = yaml_string(&value, "type");
    parsed.aliases = yaml_string_list(&value, "aliases");
    parsed.tags = yaml_string_list(&value, "tags");
}

fn yaml_string(value: &serde_yml::Value, key: &str) -> Option<String> {
    match value.get(key)? {
        serde_yml::Value::String(text) => Some(text.clone()),
        serde_yml::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn yaml_string_list(value: &serde_yml::Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(serde_yml::Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match item {
                serde_yml::Value::String(text) => Some(text.clone()),
                _ => None,
            })
            .collect(),
        Some(serde_yml::Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Block walk
// ─────────────────────────────────────────────────────────────────────────────

/// State for one in-progress block capture.
struct Capture {
    kind: BlockKind,
    start: usize,
    text: String,
    /// Heading level from the start tag, for heading blocks.
    heading_level: Option<u32>,
    /// Nesting depth of same-shaped tags, so an item inside an item closes
    /// at the right `End` event.
    depth: u32,
}

fn collect_blocks(body: &str, base_offset: usize, parsed: &mut ParsedDocument) {
    let parser = Parser::new_ext(body, Options::empty());
    let mut heading_stack: Vec<(u32, String)> = Vec::new();
    let mut capture: Option<Capture> = None;

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(tag) => {
                let kind = block_kind_of(&tag);
                let heading_level = match &tag {
                    Tag::Heading { level, .. } => Some(*level as u32),
                    _ => None,
                };
                match (&mut capture, kind) {
                    (Some(open), Some(kind)) if open.kind == kind => open.depth += 1,
                    (Some(_), _) => {}
                    (None, Some(kind)) => {
                        capture = Some(Capture {
                            kind,
                            start: base_offset + range.start,
                            text: String::new(),
                            heading_level,
                            depth: 0,
                        });
                    }
                    (None, None) => {}
                }
            }
            Event::End(tag_end) => {
                let kind = block_kind_of_end(tag_end);
                let Some(open) = &mut capture else { continue };
                if kind != Some(open.kind) {
                    continue;
                }
                if open.depth > 0 {
                    open.depth -= 1;
                    continue;
                }
                let open = capture.take().expect("capture is present");
                finish_block(open, base_offset + range.end, &mut heading_stack, parsed);
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(open) = &mut capture {
                    open.text.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(open) = &mut capture {
                    open.text.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn finish_block(
    capture: Capture,
    end_offset: usize,
    heading_stack: &mut Vec<(u32, String)>,
    parsed: &mut ParsedDocument,
) {
    let text = capture.text.trim().to_string();
    if text.is_empty() {
        return;
    }

    let heading_path = if capture.kind == BlockKind::Heading {
        // Headings re-shape the breadcrumb: pop anything at the same or a
        // deeper level, then push this heading.
        let level = capture.heading_level.unwrap_or(1);
        heading_stack.retain(|(l, _)| *l < level);
        heading_stack.push((level, text.clone()));
        heading_stack.iter().map(|(_, h)| h.clone()).collect()
    } else {
        heading_stack.iter().map(|(_, h)| h.clone()).collect()
    };

    parsed.blocks.push(ParsedBlock {
        kind: capture.kind,
        heading_path,
        start_offset: capture.start,
        end_offset,
        text,
    });
}

fn block_kind_of(tag: &Tag<'_>) -> Option<BlockKind> {
    match tag {
        Tag::Heading { .. } => Some(BlockKind::Heading),
        Tag::Paragraph => Some(BlockKind::Paragraph),
        Tag::CodeBlock(_) => Some(BlockKind::Code),
        Tag::Item => Some(BlockKind::ListItem),
        _ => None,
    }
}

fn block_kind_of_end(tag_end: TagEnd) -> Option<BlockKind> {
    match tag_end {
        TagEnd::Heading(_) => Some(BlockKind::Heading),
        TagEnd::Paragraph => Some(BlockKind::Paragraph),
        TagEnd::CodeBlock => Some(BlockKind::Code),
        TagEnd::Item => Some(BlockKind::ListItem),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// References
// ─────────────────────────────────────────────────────────────────────────────

fn wikilink_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(!?)\[\[([^\]\|]+)(\|[^\]]*)?\]\]").expect("wikilink regex compiles")
    })
}

fn collect_links(parsed: &mut ParsedDocument) {
    // Code blocks are literal text; references inside them are not links.
    for (index, block) in parsed.blocks.iter().enumerate() {
        if block.kind == BlockKind::Code {
            continue;
        }
        for captures in wikilink_regex().captures_iter(&block.text) {
            let transclusion = !captures[1].is_empty();
            let has_alias = captures.get(3).is_some();
            let ref_kind = if transclusion {
                RefKind::Transclusion
            } else if has_alias {
                RefKind::Alias
            } else {
                RefKind::Wikilink
            };
            parsed.links.push(ParsedLink {
                block_index: index,
                target: captures[2].trim().to_string(),
                ref_kind,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_fields_parse() {
        let source = "---\nid: note-1\ntitle: Hybrid Retrieval\naliases: [hybrid, retrieval]\ntags:\n  - search\n  - rag\ntype: note\n---\n\nBody text.\n";
        let parsed = partition_markdown(source);

        assert_eq!(parsed.id.as_deref(), Some("note-1"));
        assert_eq!(parsed.title.as_deref(), Some("Hybrid Retrieval"));
        assert_eq!(parsed.aliases, vec!["hybrid", "retrieval"]);
        assert_eq!(parsed.tags, vec!["search", "rag"]);
        assert_eq!(parsed.doc_type.as_deref(), Some("note"));
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.blocks[0].text, "Body text.");
    }

    #[test]
    fn missing_frontmatter_is_fine() {
        let parsed = partition_markdown("Just a paragraph.\n");
        assert!(parsed.id.is_none());
        assert_eq!(parsed.blocks.len(), 1);
    }

    #[test]
    fn blocks_carry_heading_breadcrumbs() {
        let source = "# Hybrid Retrieval\n\nWe combine BM25 + vector search.\n\n## Scoring\n\nWeighted sum.\n";
        let parsed = partition_markdown(source);

        let kinds: Vec<BlockKind> = parsed.blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Heading,
                BlockKind::Paragraph,
                BlockKind::Heading,
                BlockKind::Paragraph
            ]
        );
        assert_eq!(parsed.blocks[1].heading_path, vec!["Hybrid Retrieval"]);
        assert_eq!(
            parsed.blocks[3].heading_path,
            vec!["Hybrid Retrieval", "Scoring"]
        );
    }

    #[test]
    fn block_offsets_point_into_the_source() {
        let source = "# Title\n\nFirst paragraph.\n\nSecond paragraph.\n";
        let parsed = partition_markdown(source);

        let second = &parsed.blocks[2];
        assert_eq!(second.kind, BlockKind::Paragraph);
        assert_eq!(
            source[second.start_offset..second.end_offset].trim_end(),
            "Second paragraph."
        );
    }

    #[test]
    fn offsets_account_for_frontmatter() {
        let source = "---\ntitle: T\n---\nParagraph here.\n";
        let parsed = partition_markdown(source);

        let block = &parsed.blocks[0];
        assert_eq!(
            source[block.start_offset..block.end_offset].trim_end(),
            "Paragraph here."
        );
    }

    #[test]
    fn code_and_list_blocks_are_captured() {
        let source = "- first item\n- second item\n\n```rust\nfn main() {}\n```\n";
        let parsed = partition_markdown(source);

        let kinds: Vec<BlockKind> = parsed.blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::ListItem, BlockKind::ListItem, BlockKind::Code]
        );
        assert_eq!(parsed.blocks[2].text, "fn main() {}");
    }

    #[test]
    fn nested_list_items_fold_into_the_outer_item() {
        let source = "- outer\n  - inner\n";
        let parsed = partition_markdown(source);

        assert_eq!(parsed.blocks.len(), 1);
        assert!(parsed.blocks[0].text.contains("outer"));
        assert!(parsed.blocks[0].text.contains("inner"));
    }

    #[test]
    fn references_classify_by_shape() {
        let source =
            "See [[Daily Notes]] and ![[Embedded Doc]] and [[target-note|shown text]].\n";
        let parsed = partition_markdown(source);

        let kinds: Vec<(String, RefKind)> = parsed
            .links
            .iter()
            .map(|l| (l.target.clone(), l.ref_kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("Daily Notes".to_string(), RefKind::Wikilink),
                ("Embedded Doc".to_string(), RefKind::Transclusion),
                ("target-note".to_string(), RefKind::Alias),
            ]
        );
    }

    #[test]
    fn links_in_code_blocks_are_ignored() {
        let source = "```\n[[not-a-link]]\n```\n\nBut [[real-link]] counts.\n";
        let parsed = partition_markdown(source);

        assert_eq!(parsed.links.len(), 1);
        assert_eq!(parsed.links[0].target, "real-link");
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        /// Lines that stress the block walker: headings, prose, lists,
        /// fences, blanks.
        fn arbitrary_line() -> impl Strategy<Value = String> {
            prop_oneof![
                Just(String::new()),
                "[a-z ]{1,30}",
                "#{1,4} [a-z ]{1,20}",
                "- [a-z ]{1,20}",
                Just("```".to_string()),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            /// Whatever the input shape, every block's offsets index into
            /// the source, blocks appear in source order, and block text
            /// is never empty.
            #[test]
            fn partition_offsets_are_well_formed(
                lines in prop::collection::vec(arbitrary_line(), 0..30)
            ) {
                let source = lines.join("\n");
                let parsed = partition_markdown(&source);

                let mut previous_start = 0usize;
                for block in &parsed.blocks {
                    prop_assert!(block.start_offset < block.end_offset);
                    prop_assert!(block.end_offset <= source.len());
                    prop_assert!(block.start_offset >= previous_start);
                    prop_assert!(!block.text.is_empty());
                    previous_start = block.start_offset;
                }
                for link in &parsed.links {
                    prop_assert!(link.block_index < parsed.blocks.len());
                }
            }
        }
    }
}
