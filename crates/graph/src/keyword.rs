//! Full-text index backing `search_keyword`
//!
//! A tantivy RAM index over node display text, one document per node. The
//! graph state is the source of truth; this index is derived data and is
//! rebuilt on process start by replaying writes.

use parking_lot::Mutex;
use tantivy::{
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};
use tracing::warn;

use engram_core::{MemoryError, NodeLabel, Result};

const WRITER_HEAP_BYTES: usize = 32_000_000;

/// One document to (re)index
#[derive(Debug, Clone)]
pub struct KeywordDoc {
    pub id: String,
    pub end_user_id: String,
    pub label: NodeLabel,
    pub content: String,
}

/// A keyword match with its BM25 score
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub score: f32,
}

pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    end_user_field: Field,
    label_field: Field,
    content_field: Field,
}

impl KeywordIndex {
    pub fn new() -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let end_user_field = schema_builder.add_text_field("end_user_id", STRING);
        let label_field = schema_builder.add_text_field("label", STRING);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        let reader = index
            .reader()
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            end_user_field,
            label_field,
            content_field,
        })
    }

    /// Upsert documents: existing ids are deleted first (MERGE-on-id)
    pub fn upsert_many(&self, docs: &[KeywordDoc]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        for doc in docs {
            writer.delete_term(Term::from_field_text(self.id_field, &doc.id));
            let mut document = TantivyDocument::default();
            document.add_text(self.id_field, &doc.id);
            document.add_text(self.end_user_field, &doc.end_user_id);
            document.add_text(self.label_field, doc.label.as_str());
            document.add_text(self.content_field, &doc.content);
            writer
                .add_document(document)
                .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        }
        writer
            .commit()
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        drop(writer);

        self.reader
            .reload()
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        for id in ids {
            writer.delete_term(Term::from_field_text(self.id_field, id));
        }
        writer
            .commit()
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        drop(writer);
        self.reader
            .reload()
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
        Ok(())
    }

    /// BM25 search filtered by tenant and label set. The caller has already
    /// escaped reserved characters; a query that still fails to parse
    /// returns no hits rather than an error.
    pub fn search(
        &self,
        end_user_id: &str,
        query: &str,
        labels: &[NodeLabel],
        k: usize,
    ) -> Result<Vec<KeywordHit>> {
        if query.trim().is_empty() || labels.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let content_query = match parser.parse_query(query) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(query, error = %e, "keyword query failed to parse, returning no hits");
                return Ok(Vec::new());
            }
        };

        let tenant_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.end_user_field, end_user_id),
            IndexRecordOption::Basic,
        ));

        let label_clauses: Vec<(Occur, Box<dyn Query>)> = labels
            .iter()
            .map(|label| {
                let q: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(self.label_field, label.as_str()),
                    IndexRecordOption::Basic,
                ));
                (Occur::Should, q)
            })
            .collect();

        let combined = BooleanQuery::new(vec![
            (Occur::Must, content_query),
            (Occur::Must, tenant_query),
            (Occur::Must, Box::new(BooleanQuery::new(label_clauses))),
        ]);

        let searcher = self.reader.searcher();
        let top = searcher
            .search(&combined, &TopDocs::with_limit(k))
            .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| MemoryError::transient("keyword_index", e.to_string()))?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|value| match value {
                    OwnedValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            if !id.is_empty() {
                hits.push(KeywordHit { id, score });
            }
        }
        Ok(hits)
    }
}
