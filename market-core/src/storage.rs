//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `articles` - Article records (key: article id, big-endian)
//! - `events` - Append-only event log (key: position, big-endian)
//!
//! Big-endian keys make RocksDB's byte order match numeric order, so a
//! forward scan yields ascending ids / positions.

use crate::{
    error::{Error, Result},
    types::{Article, ArticleId, EventRecord},
    Config,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;

/// Column family names
const CF_ARTICLES: &str = "articles";
const CF_EVENTS: &str = "events";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ARTICLES, Self::cf_options_articles()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_events()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_articles() -> Options {
        let mut opts = Options::default();
        // Articles are read on every refresh, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_events() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Article operations

    /// Get article by id
    pub fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        let cf = self.cf_handle(CF_ARTICLES)?;

        match self.db.get_cf(cf, id.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All articles in ascending id order
    pub fn load_articles(&self) -> Result<Vec<Article>> {
        let cf = self.cf_handle(CF_ARTICLES)?;

        let mut articles = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            articles.push(bincode::deserialize(&value)?);
        }

        Ok(articles)
    }

    // Event operations

    /// Get event by position
    pub fn get_event(&self, position: u64) -> Result<Option<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;

        match self.db.get_cf(cf, position.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Events in `[from, to)` in position order
    pub fn events_range(&self, from: u64, to: u64) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let start = from.to_be_bytes();

        let mut events = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (_, value) = item?;
            let record: EventRecord = bincode::deserialize(&value)?;
            if record.position >= to {
                break;
            }
            events.push(record);
        }

        Ok(events)
    }

    /// Last appended event
    pub fn latest_event(&self) -> Result<Option<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;

        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    // Batch operations (atomic)

    /// Write an article together with the event it caused (atomic)
    pub fn commit_transition(&self, article: &Article, record: &EventRecord) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_articles = self.cf_handle(CF_ARTICLES)?;
        batch.put_cf(cf_articles, article.id.to_key(), bincode::serialize(article)?);

        let cf_events = self.cf_handle(CF_EVENTS)?;
        batch.put_cf(
            cf_events,
            record.position.to_be_bytes(),
            bincode::serialize(record)?,
        );

        self.db.write(batch)?;

        tracing::debug!(
            article_id = %article.id,
            position = record.position,
            kind = %record.kind(),
            "Transition committed"
        );

        Ok(())
    }

    /// Append an event on its own (used by recovery)
    pub fn put_event(&self, record: &EventRecord) -> Result<()> {
        let cf = self.cf_handle(CF_EVENTS)?;
        self.db
            .put_cf(cf, record.position.to_be_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Write an article on its own
    pub fn put_article(&self, article: &Article) -> Result<()> {
        let cf = self.cf_handle(CF_ARTICLES)?;
        self.db
            .put_cf(cf, article.id.to_key(), bincode::serialize(article)?)?;
        Ok(())
    }
}
