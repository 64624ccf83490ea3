use serde::{Deserialize, Serialize};

use crate::{
    encoder::Encoder,
    entry::Entry,
    error::{Error, Result},
    ranker,
    store::EntryStore,
};

/// Number of entries returned when the caller does not ask for a count.
pub const DEFAULT_TOP_N: usize = 5;

/// Which retrieval stages a search may use.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Exact phrase match first, semantic ranking only when it finds nothing.
    #[default]
    Auto,
    /// Exact phrase match only.
    FullTextOnly,
    /// Semantic ranking over the whole corpus only.
    SemanticOnly,
}

/// The stage that produced a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FullText,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub phrase: String,
    pub top_n: usize,
    pub mode: SearchMode,
    /// Drop semantic hits scoring below this value.
    pub min_score: Option<f32>,
}

impl SearchParams {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            top_n: DEFAULT_TOP_N,
            mode: SearchMode::Auto,
            min_score: None,
        }
    }
}

/// One ranked entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 1-based position in the result list.
    pub rank: usize,
    /// Cosine similarity for semantic hits; full-text hits keep the store's
    /// order and carry no score.
    ///
    /// A semantic hit against a zero-magnitude vector scores `-inf`, which
    /// JSON cannot represent, so it serializes as `"score": null` too. Tell
    /// the two apart by the outcome's `stage`.
    pub score: Option<f32>,
    pub entry: Entry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub stage: Stage,
    pub hits: Vec<SearchHit>,
}

impl SearchOutcome {
    fn empty(stage: Stage) -> Self {
        Self {
            stage,
            hits: Vec::new(),
        }
    }

    /// The matched entries, in rank order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.hits.iter().map(|h| &h.entry)
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.hits.into_iter().map(|h| h.entry).collect()
    }
}

/// Find the entries most relevant to `phrase`.
///
/// Shorthand for [`execute_search`] in [`SearchMode::Auto`].
pub fn search(
    phrase: &str,
    top_n: usize,
    store: &dyn EntryStore,
    encoder: &dyn Encoder,
) -> Result<Vec<Entry>> {
    let params = SearchParams {
        top_n,
        ..SearchParams::new(phrase)
    };
    Ok(execute_search(&params, store, encoder)?.into_entries())
}

/// Execute the search pipeline.
///
/// 1. Reject blank phrases and a zero result count
/// 2. Exact phrase match against the store's full-text index
/// 3. If that succeeded with no hits, embed the whole corpus and the phrase
///    and rank by cosine similarity
///
/// Store and encoder failures are returned as
/// [`Error::StoreUnavailable`] and [`Error::Encoding`]; a failing full-text
/// query never falls through to the semantic stage.
pub fn execute_search(
    params: &SearchParams,
    store: &dyn EntryStore,
    encoder: &dyn Encoder,
) -> Result<SearchOutcome> {
    let phrase = params.phrase.trim();
    if phrase.is_empty() {
        return Err(Error::InvalidQuery(
            "search phrase must not be empty".to_string(),
        ));
    }
    if params.top_n == 0 {
        return Err(Error::InvalidQuery(
            "result count must be at least 1".to_string(),
        ));
    }

    if params.mode != SearchMode::SemanticOnly {
        let matches = store
            .full_text_search(phrase, params.top_n)
            .map_err(|e| Error::store_fault("full-text search", e))?;

        if !matches.is_empty() || params.mode == SearchMode::FullTextOnly {
            tracing::debug!(count = matches.len(), "full-text stage answered");
            return Ok(full_text_outcome(matches));
        }
        tracing::debug!("no full-text match, falling back to semantic search");
    }

    semantic_search(phrase, params, store, encoder)
}

fn full_text_outcome(matches: Vec<Entry>) -> SearchOutcome {
    SearchOutcome {
        stage: Stage::FullText,
        hits: matches
            .into_iter()
            .enumerate()
            .map(|(i, entry)| SearchHit {
                rank: i + 1,
                score: None,
                entry,
            })
            .collect(),
    }
}

fn semantic_search(
    phrase: &str,
    params: &SearchParams,
    store: &dyn EntryStore,
    encoder: &dyn Encoder,
) -> Result<SearchOutcome> {
    let corpus = store
        .fetch_all()
        .map_err(|e| Error::store_fault("bulk fetch", e))?;
    if corpus.is_empty() {
        return Ok(SearchOutcome::empty(Stage::Semantic));
    }

    let texts: Vec<String> = corpus.iter().map(Entry::searchable_text).collect();
    tracing::debug!(
        count = texts.len(),
        model = encoder.model_id(),
        "encoding corpus"
    );
    let corpus_embeddings =
        encoder.encode(&texts).map_err(Error::encoding_fault)?;
    if corpus_embeddings.len() != corpus.len() {
        return Err(Error::Encoding(format!(
            "encoder returned {} embeddings for {} entries",
            corpus_embeddings.len(),
            corpus.len()
        )));
    }

    let query_embedding =
        encoder.encode_one(phrase).map_err(Error::encoding_fault)?;

    let candidates = corpus.into_iter().zip(corpus_embeddings).collect();
    let ranked = ranker::rank(&query_embedding, candidates, params.top_n)?;

    for candidate in &ranked {
        tracing::debug!(
            id = candidate.item.id,
            score = candidate.score,
            title = %candidate.item.title,
            "semantic candidate"
        );
    }

    let hits = ranked
        .into_iter()
        .filter(|c| params.min_score.is_none_or(|min| c.score >= min))
        .enumerate()
        .map(|(i, c)| SearchHit {
            rank: i + 1,
            score: Some(c.score),
            entry: c.item,
        })
        .collect();

    Ok(SearchOutcome {
        stage: Stage::Semantic,
        hits,
    })
}

/// Format an outcome for terminal output.
pub fn format_human(outcome: &SearchOutcome) {
    if outcome.hits.is_empty() {
        println!("No entries found.");
        return;
    }

    for hit in &outcome.hits {
        match hit.score {
            Some(score) => println!(
                "{:>3}. [{:.3}] #{} {}",
                hit.rank, score, hit.entry.id, hit.entry.title
            ),
            None => {
                println!("{:>3}. #{} {}", hit.rank, hit.entry.id, hit.entry.title)
            }
        }
        if !hit.entry.question.is_empty() {
            println!("     {}", hit.entry.question);
        }
    }

    let via = match outcome.stage {
        Stage::FullText => "exact phrase match",
        Stage::Semantic => "semantic similarity",
    };
    println!("\n{} result(s) by {via}", outcome.hits.len());
}

/// Format an outcome as a single JSON document.
pub fn format_json(outcome: &SearchOutcome, phrase: &str) -> Result<()> {
    let value = serde_json::json!({
        "phrase": phrase,
        "stage": outcome.stage,
        "result_count": outcome.hits.len(),
        "results": outcome.hits,
    });
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}
