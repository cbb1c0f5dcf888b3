//! The ingestion service: hash-gated incremental Markdown ingestion.

use crate::error::KbError;
use crate::markdown::{ParsedDocument, partition_markdown};
use crate::store::KbStore;
use crate::types::{Block, Document, LinkRecord};
use crate::vector::VectorIndex;
use chrono::Utc;
use globset::{Glob, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Namespace assigned to documents whose frontmatter `type` is `profile`.
const PROFILE_NAMESPACE: &str = "profile";

/// Summary of one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents (re-)ingested because their content changed.
    pub ingested: usize,
    /// Documents skipped because their content hash was unchanged.
    pub unchanged: usize,
    /// Documents removed because their source file disappeared.
    pub removed: usize,
    /// Documents that failed and were recorded for retry.
    pub failed: usize,
}

/// Ingests Markdown files into the store and keeps the vector index pruned.
///
/// Per-document failures are recorded in the store's retry table and never
/// poison the rest of a pass.
pub struct IngestionService {
    store: Arc<KbStore>,
    index: Arc<dyn VectorIndex>,
    default_namespace: String,
}

impl IngestionService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<KbStore>,
        index: Arc<dyn VectorIndex>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index,
            default_namespace: default_namespace.into(),
        }
    }

    /// Ingests a set of paths or glob patterns.
    ///
    /// Directories are walked recursively for `.md` files; glob patterns are
    /// matched from their longest literal prefix.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures (storage). Bad
    /// documents are counted in the report and recorded for retry.
    pub fn ingest(&self, paths_or_globs: &[String]) -> Result<IngestReport, KbError> {
        let mut report = IngestReport::default();
        for path in expand_inputs(paths_or_globs) {
            self.ingest_one(&path, &mut report);
        }
        Ok(report)
    }

    /// Ingests a single file, updating the report.
    fn ingest_one(&self, path: &Path, report: &mut IngestReport) {
        match self.ingest_file(path) {
            Ok(true) => report.ingested += 1,
            Ok(false) => report.unchanged += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(path = %path.display(), %err, "document ingestion failed");
                if let Err(record_err) = self
                    .store
                    .record_ingest_failure(&path.to_string_lossy(), &err.to_string())
                {
                    tracing::error!(%record_err, "cannot record ingestion failure");
                }
            }
        }
    }

    /// Ingests one file; returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or stored; the caller
    /// records it as a retryable failure.
    pub fn ingest_file(&self, path: &Path) -> Result<bool, KbError> {
        let raw = std::fs::read_to_string(path).map_err(|err| KbError::io(path, err))?;
        // Normalized text is the canonical form: hashes and citation offsets
        // both refer to it.
        let source = raw.replace("\r\n", "\n");
        let content_hash = hex_digest(source.as_bytes());
        let path_text = path.to_string_lossy().into_owned();

        if self.store.content_hash_of_path(&path_text)? == Some(content_hash.clone()) {
            return Ok(false);
        }

        let parsed = partition_markdown(&source);
        let (document, blocks, links) =
            self.materialize(&path_text, &content_hash, parsed)?;

        let stale_vector_ids: Vec<String> = self
            .store
            .block_ids_of(&document.id)?
            .into_iter()
            .filter(|id| !blocks.iter().any(|block| &block.id == id))
            .collect();

        self.store.upsert_document(&document, &blocks, &links)?;
        for stale in stale_vector_ids {
            self.index.remove(&stale);
        }
        self.store.clear_ingest_failure(&path_text)?;
        tracing::debug!(path = %path.display(), doc_id = %document.id, blocks = blocks.len(), "document ingested");
        Ok(true)
    }

    /// Removes the document backing a deleted file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cascade fails.
    pub fn remove_file(&self, path: &Path) -> Result<bool, KbError> {
        let path_text = path.to_string_lossy();
        let Some(document) = self.store.document_by_path(&path_text)? else {
            return Ok(false);
        };
        for block_id in self.store.block_ids_of(&document.id)? {
            self.index.remove(&block_id);
        }
        self.store.delete_document(&document.id)?;
        tracing::debug!(path = %path.display(), doc_id = %document.id, "document removed");
        Ok(true)
    }

    /// Full reconciliation pass over the watched roots.
    ///
    /// Re-derives the set of present documents, ingests changed ones (the
    /// hash gate makes this cheap), and drops documents whose files are
    /// gone. Run at startup to recover from watcher downtime.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the document list cannot be read.
    pub fn reconcile(&self, roots: &[PathBuf]) -> Result<IngestReport, KbError> {
        let mut report = IngestReport::default();
        let mut present = std::collections::HashSet::new();

        for root in roots {
            for path in walk_markdown(root) {
                present.insert(path.to_string_lossy().into_owned());
                self.ingest_one(&path, &mut report);
            }
        }

        for document in self.store.documents(None)? {
            if !present.contains(&document.path) {
                self.remove_file(Path::new(&document.path))?;
                report.removed += 1;
            }
        }
        Ok(report)
    }

    /// Builds storable records from a parsed document.
    fn materialize(
        &self,
        path: &str,
        content_hash: &str,
        parsed: ParsedDocument,
    ) -> Result<(Document, Vec<Block>, Vec<LinkRecord>), KbError> {
        let doc_id = parsed
            .id
            .clone()
            .unwrap_or_else(|| format!("doc-{}", &hex_digest(path.as_bytes())[..16]));
        let title = parsed.title.clone().unwrap_or_else(|| {
            Path::new(path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string())
        });
        let namespace = if parsed.doc_type.as_deref() == Some("profile") {
            PROFILE_NAMESPACE.to_string()
        } else {
            self.default_namespace.clone()
        };

        let now = Utc::now();
        let created_at = self
            .store
            .document_by_path(path)?
            .map_or(now, |existing| existing.created_at);

        let document = Document {
            id: doc_id.clone(),
            path: path.to_string(),
            title,
            aliases: parsed.aliases.clone(),
            tags: parsed.tags.clone(),
            created_at,
            updated_at: now,
            content_hash: content_hash.to_string(),
            namespace,
        };

        // Block ids derive from content so unchanged blocks keep their
        // vectors; a duplicate-text block gets an ordinal suffix.
        let mut seen_hashes: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let blocks: Vec<Block> = parsed
            .blocks
            .iter()
            .map(|parsed_block| {
                let block_hash = hex_digest(parsed_block.text.as_bytes());
                let ordinal = seen_hashes.entry(block_hash.clone()).or_insert(0);
                let id_seed = format!("{doc_id}\u{1f}{block_hash}\u{1f}{ordinal}");
                *ordinal += 1;
                Block {
                    id: format!("blk-{}", &hex_digest(id_seed.as_bytes())[..24]),
                    doc_id: doc_id.clone(),
                    kind: parsed_block.kind,
                    heading_path: parsed_block.heading_path.clone(),
                    start_offset: parsed_block.start_offset,
                    end_offset: parsed_block.end_offset,
                    text: parsed_block.text.clone(),
                    block_hash,
                }
            })
            .collect();

        let mut links = Vec::new();
        for parsed_link in &parsed.links {
            let Some(block) = blocks.get(parsed_link.block_index) else {
                continue;
            };
            let resolved = self.store.resolve_reference(&parsed_link.target)?;
            links.push(LinkRecord {
                src_block_id: block.id.clone(),
                dst_reference: parsed_link.target.clone(),
                resolved_doc_id: resolved,
                ref_kind: parsed_link.ref_kind,
            });
        }

        Ok((document, blocks, links))
    }
}

impl core::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestionService")
            .field("default_namespace", &self.default_namespace)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Path expansion
// ─────────────────────────────────────────────────────────────────────────────

/// Expands inputs into concrete Markdown file paths, sorted and deduped.
fn expand_inputs(paths_or_globs: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for input in paths_or_globs {
        let path = Path::new(input);
        if path.is_dir() {
            out.extend(walk_markdown(path));
        } else if path.is_file() {
            out.push(path.to_path_buf());
        } else if input.contains(['*', '?', '[']) {
            out.extend(expand_glob(input));
        } else {
            tracing::warn!(input = %input, "ingest input does not exist");
        }
    }
    out.sort();
    out.dedup();
    out
}

fn expand_glob(pattern: &str) -> Vec<PathBuf> {
    let glob = match Glob::new(pattern) {
        Ok(glob) => glob,
        Err(err) => {
            tracing::warn!(pattern, %err, "invalid glob pattern");
            return Vec::new();
        }
    };
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    let Ok(set) = builder.build() else {
        return Vec::new();
    };

    // Walk from the longest literal prefix of the pattern.
    let literal_prefix: PathBuf = Path::new(pattern)
        .components()
        .take_while(|component| {
            !component
                .as_os_str()
                .to_string_lossy()
                .contains(['*', '?', '['])
        })
        .collect();
    let root = if literal_prefix.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        literal_prefix
    };

    walk_markdown(&root)
        .into_iter()
        .filter(|path| set.is_match(path))
        .collect()
}

/// Recursively collects `.md` files under `root`, sorted.
fn walk_markdown(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                // Skip hidden directories and on-disk index artifacts.
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !name.starts_with('.') && name != "vectorStore" && name != "vector_data" {
                    stack.push(path);
                }
            } else if path.extension().is_some_and(|ext| ext == "md") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
