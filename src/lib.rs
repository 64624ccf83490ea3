//! kbseek - knowledge-base lookup with exact phrase search and a semantic
//! fallback.
//!
//! A query phrase is first matched as an exact phrase against a
//! [Tantivy](https://github.com/quickwit-oss/tantivy) index of entry titles,
//! questions and answers. Only when that finds nothing is every entry
//! embedded with a sentence-embedding model and ranked by cosine similarity
//! to the phrase.
//!
//! # Quick start
//!
//! ```no_run
//! use kbseek::{DataDir, EncoderKind, KnowledgeBase, build_encoder};
//! use kbseek::search::{self, SearchParams};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let kb = KnowledgeBase::open(
//!     &data_dir.entries_db(),
//!     &data_dir.tantivy_dir().unwrap(),
//! )
//! .unwrap();
//! let model_id = kbseek::resolve_model_id(None, kb.db()).unwrap();
//! let encoder = build_encoder(EncoderKind::Sentence, &model_id);
//!
//! let params = SearchParams {
//!     top_n: 3,
//!     ..SearchParams::new("how do I reset my password")
//! };
//! let outcome = search::execute_search(&params, &kb, encoder.as_ref()).unwrap();
//! for hit in &outcome.hits {
//!     println!("{} #{} {}", hit.rank, hit.entry.id, hit.entry.title);
//! }
//! ```

pub mod data_dir;
pub mod encoder;
pub mod entry;
pub mod entry_db;
pub mod error;
pub mod http;
pub mod mcp;
pub mod model_manager;
pub mod ranker;
pub mod search;
pub mod service;
pub mod store;
pub mod tantivy_index;

pub use data_dir::DataDir;
pub use encoder::{Embedding, Encoder, EncoderKind, HashingEncoder, build_encoder};
pub use entry::{Entry, EntryDraft};
pub use entry_db::EntryDb;
pub use error::{Error, Result};
pub use model_manager::{ModelManager, resolve_model_id};
pub use service::SearchService;
pub use store::{EntryStore, KnowledgeBase};
pub use tantivy_index::SearchIndex;
