//! C2: the full-text index. Tantivy index keyed by chunk id, with a query
//! builder (`build_match`) that ports the heuristic term-selection used by
//! the original BM25-over-FTS5 implementation: lowercase, drop stopwords
//! and short tokens, dedupe preserving first occurrence, cap the term
//! count.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, Value as TantivyValue, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::{RagError, Result};

/// Exact stopword set from the original BM25 query builder, plus the
/// RAG-specific words the original adds on top of the usual English list.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "not", "to", "of", "in", "on", "for", "with", "by", "from",
        "is", "are", "was", "were", "be", "been", "being", "as", "at", "it", "this", "that",
        "these", "those", "i", "you", "we", "they", "he", "she", "my", "your", "our", "their",
        "summarize", "summary", "main", "points", "cite", "sources", "document", "documents",
        "uploaded",
    ]
    .into_iter()
    .collect()
});

static WORD_RE: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"\w+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Raw,
    Heuristic,
}

/// Build the tantivy query string for a user question. `raw` joins every
/// lowercase token as-is; `heuristic` drops stopwords and tokens shorter
/// than 3 characters, dedupes preserving first occurrence, and keeps at
/// most `max_terms` tokens.
pub fn build_match(user_query: &str, mode: QueryMode, max_terms: usize) -> String {
    let tokens: Vec<String> = WORD_RE
        .find_iter(user_query)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    match mode {
        QueryMode::Raw => tokens.join(" "),
        QueryMode::Heuristic => {
            let mut seen = HashSet::new();
            let mut selected = Vec::new();
            for token in tokens {
                if token.len() < 3 || STOPWORDS.contains(token.as_str()) {
                    continue;
                }
                if seen.insert(token.clone()) {
                    selected.push(token);
                }
                if selected.len() >= max_terms {
                    break;
                }
            }
            selected.join(" ")
        }
    }
}

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: schema::Field,
    text_field: schema::Field,
}

impl LexicalIndex {
    fn build_schema() -> (Schema, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        (sb.build(), id_field, text_field)
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let (schema, id_field, text_field) = Self::build_schema();

        let dir = tantivy::directory::MmapDirectory::open(path)?;
        let index = if Index::exists(&dir)? {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, schema)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
        })
    }

    pub fn open_in_ram() -> Result<Self> {
        let (schema, id_field, text_field) = Self::build_schema();
        let index = Index::create_in_ram(schema);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(50_000_000)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
        })
    }

    pub fn index_chunks(&self, chunks: &[(i64, String)]) -> Result<()> {
        let writer = self.writer.lock();
        for (id, text) in chunks {
            writer.add_document(doc!(
                self.id_field => id.to_string(),
                self.text_field => text.as_str(),
            ))?;
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Search, returning (chunk_id, score) pairs ordered by descending
    /// tantivy BM25 score. An unparseable query falls back to a literal
    /// phrase match rather than erroring.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(i64, f32)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let parsed_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                let escaped = query.replace('"', "");
                query_parser.parse_query(&format!("\"{escaped}\""))?
            }
        };

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(k))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id_text) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                let id: i64 = id_text
                    .parse()
                    .map_err(|_| RagError::Other(format!("non-numeric chunk id in lexical index: {id_text}")))?;
                hits.push((id, score));
            }
        }
        Ok(hits)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.count().unwrap_or(0) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_mode_drops_stopwords_and_short_tokens() {
        let q = build_match("What is the main idea of this uploaded document?", QueryMode::Heuristic, 10);
        assert!(!q.split(' ').any(|t| t == "is" || t == "of" || t == "the"));
        assert!(!q.contains("document"));
    }

    #[test]
    fn heuristic_mode_dedupes_preserving_first_occurrence() {
        let q = build_match("rust rust rust performance", QueryMode::Heuristic, 10);
        assert_eq!(q, "rust performance");
    }

    #[test]
    fn heuristic_mode_caps_term_count() {
        let q = build_match("alpha beta gamma delta epsilon zeta", QueryMode::Heuristic, 3);
        assert_eq!(q.split(' ').count(), 3);
    }

    #[test]
    fn build_match_is_idempotent() {
        let once = build_match("neural network retrieval systems", QueryMode::Heuristic, 10);
        let twice = build_match(&once, QueryMode::Heuristic, 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn index_and_search_roundtrip() {
        let index = LexicalIndex::open_in_ram().unwrap();
        index
            .index_chunks(&[
                (1, "rust ownership and borrowing".to_string()),
                (2, "python dynamic typing".to_string()),
            ])
            .unwrap();
        index.commit().unwrap();
        let hits = index.search("rust ownership", 5).unwrap();
        assert_eq!(hits.first().map(|(id, _)| *id), Some(1));
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let index = LexicalIndex::open_in_ram().unwrap();
        assert!(index.search("", 5).unwrap().is_empty());
    }
}
