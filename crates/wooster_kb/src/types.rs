//! Knowledge base records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source Markdown document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (frontmatter `id` when present, else derived).
    pub id: String,
    /// Absolute source path.
    pub path: String,
    /// Title (frontmatter `title` or the file stem).
    pub title: String,
    /// Alternative names this document resolves under.
    pub aliases: Vec<String>,
    /// Frontmatter tags.
    pub tags: Vec<String>,
    /// First-ingestion time.
    pub created_at: DateTime<Utc>,
    /// Last-change time.
    pub updated_at: DateTime<Utc>,
    /// Digest of the normalized document text; the re-ingestion gate.
    pub content_hash: String,
    /// Logical partition (e.g. `notes` vs `profile`).
    pub namespace: String,
}

/// The structural kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// A heading line.
    Heading,
    /// A prose paragraph.
    Paragraph,
    /// A fenced or indented code block.
    Code,
    /// One list item.
    ListItem,
}

impl BlockKind {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Heading => "heading",
            BlockKind::Paragraph => "paragraph",
            BlockKind::Code => "code",
            BlockKind::ListItem => "list_item",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "heading" => Some(BlockKind::Heading),
            "paragraph" => Some(BlockKind::Paragraph),
            "code" => Some(BlockKind::Code),
            "list_item" => Some(BlockKind::ListItem),
            _ => None,
        }
    }
}

/// One content block of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Stable identifier.
    pub id: String,
    /// Owning document.
    pub doc_id: String,
    /// Structural kind.
    pub kind: BlockKind,
    /// Breadcrumb of ancestor headings (outermost first).
    pub heading_path: Vec<String>,
    /// Byte offset of the block start in the source text.
    pub start_offset: usize,
    /// Byte offset one past the block end.
    pub end_offset: usize,
    /// The block text.
    pub text: String,
    /// Digest of the block text; unchanged blocks are not re-embedded.
    pub block_hash: String,
}

/// How a reference was written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// `[[target]]`
    Wikilink,
    /// `![[target]]`
    Transclusion,
    /// `[[target|shown text]]`
    Alias,
}

impl RefKind {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Wikilink => "wikilink",
            RefKind::Transclusion => "transclusion",
            RefKind::Alias => "alias",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wikilink" => Some(RefKind::Wikilink),
            "transclusion" => Some(RefKind::Transclusion),
            "alias" => Some(RefKind::Alias),
            _ => None,
        }
    }
}

/// A link from a block to another document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    /// The block containing the reference.
    pub src_block_id: String,
    /// The reference text as written.
    pub dst_reference: String,
    /// The resolved target document, when resolution succeeded.
    pub resolved_doc_id: Option<String>,
    /// How the reference was written.
    pub ref_kind: RefKind,
}

/// A stable citation: document plus byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// The cited document.
    pub doc_id: String,
    /// Block start offset in the source text.
    pub start_offset: usize,
    /// Block end offset in the source text.
    pub end_offset: usize,
}

/// Diagnostic record persisted for every hybrid query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTrace {
    /// Trace identifier.
    pub id: String,
    /// When the query ran.
    pub timestamp: DateTime<Utc>,
    /// The query text.
    pub query: String,
    /// Block ids returned by the lexical leg, best first.
    pub fts_hits: Vec<String>,
    /// Block ids returned by the dense leg, best first.
    pub vector_hits: Vec<String>,
    /// Post-rerank scores by block id, best first.
    pub rerank_scores: Vec<(String, f32)>,
    /// Block ids ultimately selected.
    pub selected: Vec<String>,
    /// End-to-end latency.
    pub latency_ms: u64,
    /// Whether the dense leg was unavailable.
    pub degraded: bool,
}
