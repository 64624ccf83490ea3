use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, BoostQuery, Occur, PhraseQuery, Query, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{entry::Entry, error::Result};

/// Memory budget handed to every index writer.
pub const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const ENTRY_ID: &str = "entry_id";
    pub const TITLE: &str = "title";
    pub const QUESTION: &str = "question";
    pub const ANSWER: &str = "answer";
}

const TOKENIZER: &str = "en_stem";
const TITLE_BOOST: f32 = 2.0;

/// Full-text phrase index over entry titles, questions and answers.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    schema: Schema,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub entry_id: Field,
    pub title: Field,
    pub question: Field,
    pub answer: Field,
}

/// A phrase match, in index ranking order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhraseHit {
    pub score: f32,
    pub entry_id: u64,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_u64_field(fields::ENTRY_ID, INDEXED | STORED | FAST);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    builder.add_text_field(fields::TITLE, text_opts.clone());
    builder.add_text_field(fields::QUESTION, text_opts.clone());
    builder.add_text_field(fields::ANSWER, text_opts);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(TOKENIZER, en_stem);
}

impl SearchIndex {
    /// Open or create a search index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let schema = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                schema.clone(),
                tantivy::IndexSettings::default(),
            )?
        };

        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            schema,
        })
    }

    /// Create an in-memory search index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            schema,
        })
    }

    /// Get the resolved field handles.
    pub fn fields(&self) -> Result<SchemaFields> {
        Ok(SchemaFields {
            entry_id: self.schema.get_field(fields::ENTRY_ID)?,
            title: self.schema.get_field(fields::TITLE)?,
            question: self.schema.get_field(fields::QUESTION)?,
            answer: self.schema.get_field(fields::ANSWER)?,
        })
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add an entry to the index via the given writer, replacing any
    /// previous version of it.
    pub fn add_entry(&self, writer: &IndexWriter, entry: &Entry) -> Result<()> {
        let f = self.fields()?;

        writer.delete_term(Term::from_field_u64(f.entry_id, entry.id));
        writer.add_document(doc!(
            f.entry_id => entry.id,
            f.title => entry.title.as_str(),
            f.question => entry.question.as_str(),
            f.answer => entry.answer.as_str(),
        ))?;

        Ok(())
    }

    /// Delete a single entry by id.
    pub fn delete_entry(&self, writer: &IndexWriter, entry_id: u64) -> Result<()> {
        let f = self.fields()?;
        writer.delete_term(Term::from_field_u64(f.entry_id, entry_id));
        Ok(())
    }

    /// Replace the whole index content with `entries` and commit.
    pub fn rebuild(&self, entries: &[Entry]) -> Result<usize> {
        self.rebuild_with(entries, |_| Ok(()))
    }

    /// Same as [`rebuild`](Self::rebuild), calling `on_entry` after each
    /// entry is queued. An error from the callback aborts without
    /// committing.
    pub fn rebuild_with(
        &self,
        entries: &[Entry],
        mut on_entry: impl FnMut(&Entry) -> Result<()>,
    ) -> Result<usize> {
        let mut writer = self.writer(WRITER_MEMORY_BUDGET)?;
        writer.delete_all_documents()?;
        for entry in entries {
            self.add_entry(&writer, entry)?;
            on_entry(entry)?;
        }
        writer.commit()?;
        Ok(entries.len())
    }

    /// Number of live documents visible to searchers.
    pub fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Search for entries containing `phrase` as an exact phrase.
    ///
    /// The phrase goes through the same analyzer as the indexed text, so
    /// matching is case-insensitive and stemmed, but every token has to
    /// appear in the same field at the same relative position. Hits are
    /// BM25-ranked with the title boosted 2x.
    pub fn search_phrase(
        &self,
        phrase: &str,
        limit: usize,
    ) -> Result<Vec<PhraseHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields()?;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in [
            (f.title, TITLE_BOOST),
            (f.question, 1.0),
            (f.answer, 1.0),
        ] {
            if let Some(query) = self.field_phrase_query(field, phrase)? {
                let query: Box<dyn Query> = if boost == 1.0 {
                    query
                } else {
                    Box::new(BoostQuery::new(query, boost))
                };
                clauses.push((Occur::Should, query));
            }
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        self.reader.reload()?;
        let searcher = self.reader.searcher();
        // TopDocs preallocates from the limit.
        let limit = limit.min(searcher.num_docs() as usize);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = BooleanQuery::new(clauses);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            hits.push(PhraseHit {
                score,
                entry_id: extract_u64(&doc, f.entry_id),
            });
        }

        Ok(hits)
    }

    /// Build the query matching `phrase` inside a single field, or `None`
    /// when the analyzer leaves no tokens.
    fn field_phrase_query(
        &self,
        field: Field,
        phrase: &str,
    ) -> Result<Option<Box<dyn Query>>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut terms: Vec<(usize, Term)> = Vec::new();
        {
            let mut stream = analyzer.token_stream(phrase);
            while stream.advance() {
                let token = stream.token();
                terms.push((
                    token.position,
                    Term::from_field_text(field, &token.text),
                ));
            }
        }

        let query: Box<dyn Query> = match terms.len() {
            0 => return Ok(None),
            1 => {
                let (_, term) = terms.remove(0);
                Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
            }
            _ => Box::new(PhraseQuery::new_with_offset(terms)),
        };
        Ok(Some(query))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryDraft;

    fn entry(id: u64, title: &str, question: &str, answer: &str) -> Entry {
        Entry::from_draft(id, 0, EntryDraft::new(title, question, answer, 1))
    }

    fn index_with(entries: &[Entry]) -> SearchIndex {
        let idx = SearchIndex::open_in_ram().unwrap();
        let mut writer = idx.writer(WRITER_MEMORY_BUDGET).unwrap();
        for e in entries {
            idx.add_entry(&writer, e).unwrap();
        }
        writer.commit().unwrap();
        idx
    }

    fn ids(hits: &[PhraseHit]) -> Vec<u64> {
        hits.iter().map(|h| h.entry_id).collect()
    }

    #[test]
    fn exact_phrase_matches() {
        let idx = index_with(&[
            entry(1, "Reset password", "How to reset it?", "Click reset."),
            entry(2, "Billing", "Where is my invoice?", "Billing tab."),
        ]);

        let hits = idx.search_phrase("reset password", 10).unwrap();
        assert_eq!(ids(&hits), vec![1]);
    }

    #[test]
    fn phrase_requires_adjacent_terms() {
        let idx = index_with(&[entry(
            1,
            "Password reset steps",
            "Steps to follow",
            "Open settings",
        )]);

        // Both words are present, but not in this order.
        assert!(idx.search_phrase("reset password", 10).unwrap().is_empty());
        assert_eq!(
            ids(&idx.search_phrase("password reset", 10).unwrap()),
            vec![1]
        );
    }

    #[test]
    fn phrase_is_case_insensitive_and_stemmed() {
        let idx = index_with(&[entry(
            1,
            "Invoices",
            "Downloading invoices",
            "Use the portal",
        )]);

        assert_eq!(
            ids(&idx.search_phrase("DOWNLOAD INVOICE", 10).unwrap()),
            vec![1]
        );
    }

    #[test]
    fn single_token_phrase_uses_term_match() {
        let idx = index_with(&[
            entry(1, "Invoice copy", "q", "a"),
            entry(2, "Other", "Lost invoice", "a"),
            entry(3, "Unrelated", "q", "a"),
        ]);

        let mut found = ids(&idx.search_phrase("invoice", 10).unwrap());
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn title_boost_ranks_title_match_first() {
        let idx = index_with(&[
            entry(1, "General", "q", "your invoice is attached"),
            entry(2, "Invoice", "q", "a"),
        ]);

        let hits = idx.search_phrase("invoice", 10).unwrap();
        assert_eq!(hits[0].entry_id, 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn punctuation_only_phrase_matches_nothing() {
        let idx = index_with(&[entry(1, "T", "Q", "A")]);
        assert!(idx.search_phrase("?!", 10).unwrap().is_empty());
    }

    #[test]
    fn limit_is_respected() {
        let idx = index_with(&[
            entry(1, "invoice", "q", "a"),
            entry(2, "invoice", "q", "a"),
            entry(3, "invoice", "q", "a"),
        ]);
        assert_eq!(idx.search_phrase("invoice", 2).unwrap().len(), 2);
        assert!(idx.search_phrase("invoice", 0).unwrap().is_empty());
    }

    #[test]
    fn oversized_limit_returns_every_match() {
        let idx = index_with(&[
            entry(1, "invoice", "q", "a"),
            entry(2, "Other", "Lost invoice", "a"),
            entry(3, "Unrelated", "q", "a"),
        ]);

        let mut found = ids(&idx.search_phrase("invoice", usize::MAX).unwrap());
        found.sort();
        assert_eq!(found, vec![1, 2]);
        assert_eq!(idx.search_phrase("invoice", 1 << 40).unwrap().len(), 2);
    }

    #[test]
    fn empty_index_with_large_limit() {
        let idx = SearchIndex::open_in_ram().unwrap();
        assert!(idx.search_phrase("invoice", usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn re_adding_entry_replaces_it() {
        let idx = index_with(&[entry(1, "Old title", "q", "a")]);

        let mut writer = idx.writer(WRITER_MEMORY_BUDGET).unwrap();
        idx.add_entry(&writer, &entry(1, "New title", "q", "a"))
            .unwrap();
        writer.commit().unwrap();

        assert!(idx.search_phrase("old title", 10).unwrap().is_empty());
        assert_eq!(ids(&idx.search_phrase("new title", 10).unwrap()), vec![1]);
        assert_eq!(idx.num_docs().unwrap(), 1);
    }

    #[test]
    fn delete_entry_removes_it() {
        let idx = index_with(&[entry(1, "invoice", "q", "a")]);

        let mut writer = idx.writer(WRITER_MEMORY_BUDGET).unwrap();
        idx.delete_entry(&writer, 1).unwrap();
        writer.commit().unwrap();

        assert!(idx.search_phrase("invoice", 10).unwrap().is_empty());
    }

    #[test]
    fn rebuild_replaces_everything() {
        let idx = index_with(&[entry(1, "stale", "q", "a")]);

        let count = idx
            .rebuild(&[entry(5, "fresh", "q", "a"), entry(6, "fresh", "q", "a")])
            .unwrap();
        assert_eq!(count, 2);
        assert!(idx.search_phrase("stale", 10).unwrap().is_empty());
        assert_eq!(idx.num_docs().unwrap(), 2);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("tantivy");

        {
            let idx = SearchIndex::open(&dir).unwrap();
            let mut writer = idx.writer(WRITER_MEMORY_BUDGET).unwrap();
            idx.add_entry(&writer, &entry(9, "persistent data", "q", "a"))
                .unwrap();
            writer.commit().unwrap();
        }

        {
            let idx = SearchIndex::open(&dir).unwrap();
            let hits = idx.search_phrase("persistent data", 10).unwrap();
            assert_eq!(ids(&hits), vec![9]);
        }
    }
}
