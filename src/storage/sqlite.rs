//! SQLite storage backend

use super::traits::{
    ActiveUserSource, CorpusSource, DiscoveryFilter, DiscoveryRepository, SnapshotStore,
    StorageError, StorageResult,
};
use crate::corpus::{
    CorpusExport, CorpusSnapshot, CorpusView, Document, DocumentId, Passage, PassageId,
    SnapshotId, UserId,
};
use crate::discovery::Discovery;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed store implementing every boundary trait.
///
/// Uses a single database file with tables for documents, passages,
/// discoveries and snapshots. Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                references_json TEXT NOT NULL,
                embedding_json TEXT,
                ingested_at TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_ingested
                ON documents(ingested_at);

            CREATE TABLE IF NOT EXISTS passages (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                body TEXT NOT NULL,
                embedding_json TEXT,
                PRIMARY KEY (user_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_passages_document
                ON passages(user_id, document_id, ordinal);

            CREATE TABLE IF NOT EXISTS discoveries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                discovery_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                dedup_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                UNIQUE (user_id, dedup_key)
            );

            CREATE INDEX IF NOT EXISTS idx_discoveries_user_type
                ON discoveries(user_id, discovery_type);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                document_count INTEGER NOT NULL,
                prevalence_json TEXT NOT NULL,
                UNIQUE (user_id, window_start)
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Ingest a corpus export for a user, replacing rows with the same ids.
    ///
    /// Returns the number of (documents, passages) written.
    pub fn import_corpus(&self, user_id: &UserId, export: &CorpusExport) -> StorageResult<(usize, usize)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ingested_at = timestamp(Utc::now());

        for doc in &export.documents {
            let embedding = doc.embedding.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                r#"
                INSERT INTO documents (user_id, id, title, body, created_at, references_json, embedding_json, ingested_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(user_id, id) DO UPDATE SET
                    title = excluded.title,
                    body = excluded.body,
                    created_at = excluded.created_at,
                    references_json = excluded.references_json,
                    embedding_json = excluded.embedding_json,
                    ingested_at = excluded.ingested_at
                "#,
                params![
                    user_id.as_str(),
                    doc.id.as_str(),
                    doc.title,
                    doc.text,
                    timestamp(doc.created_at),
                    serde_json::to_string(&doc.references)?,
                    embedding,
                    ingested_at,
                ],
            )?;
        }

        for passage in &export.passages {
            let embedding = passage.embedding.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                r#"
                INSERT INTO passages (user_id, id, document_id, ordinal, body, embedding_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(user_id, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    ordinal = excluded.ordinal,
                    body = excluded.body,
                    embedding_json = excluded.embedding_json
                "#,
                params![
                    user_id.as_str(),
                    passage.id.as_str(),
                    passage.document_id.as_str(),
                    passage.ordinal,
                    passage.text,
                    embedding,
                ],
            )?;
        }

        tx.commit()?;
        Ok((export.documents.len(), export.passages.len()))
    }

    fn load_discovery(conn: &Connection, user_id: &str, dedup_key: &str) -> StorageResult<Option<Discovery>> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM discoveries WHERE user_id = ?1 AND dedup_key = ?2",
                params![user_id, dedup_key],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StorageError::from))
            .transpose()
    }
}

fn parse_embedding(raw: Option<String>) -> StorageResult<Option<Vec<f32>>> {
    raw.map(|s| serde_json::from_str(&s).map_err(StorageError::from))
        .transpose()
}

#[async_trait]
impl CorpusSource for SqliteStore {
    async fn fetch_corpus(&self, user_id: &UserId) -> StorageResult<CorpusView> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, body, created_at, references_json, embedding_json
             FROM documents WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        let mut documents = Vec::new();
        for row in rows {
            let (id, title, body, created_at, references, embedding) = row?;
            let references: Vec<String> = serde_json::from_str(&references)?;
            let mut doc = Document::new(DocumentId::from_string(id), title, body)
                .with_created_at(parse_timestamp(&created_at)?)
                .with_references(references);
            doc.embedding = parse_embedding(embedding)?;
            documents.push(doc);
        }

        let mut stmt = conn.prepare(
            "SELECT id, document_id, ordinal, body, embedding_json
             FROM passages WHERE user_id = ?1 ORDER BY document_id, ordinal",
        )?;
        let rows = stmt.query_map(params![user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut passages = Vec::new();
        for row in rows {
            let (id, document_id, ordinal, body, embedding) = row?;
            let mut passage = Passage::new(
                PassageId::from_string(id),
                DocumentId::from_string(document_id),
                ordinal,
                body,
            );
            passage.embedding = parse_embedding(embedding)?;
            passages.push(passage);
        }

        Ok(CorpusView::new(user_id.clone(), documents, passages))
    }
}

#[async_trait]
impl DiscoveryRepository for SqliteStore {
    async fn list(&self, filter: &DiscoveryFilter) -> StorageResult<Vec<Discovery>> {
        let conn = self.conn()?;
        let mut sql = String::from("SELECT payload_json FROM discoveries WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user) = &filter.user_id {
            args.push(Box::new(user.as_str().to_string()));
            sql.push_str(&format!(" AND user_id = ?{}", args.len()));
        }
        if let Some(t) = filter.discovery_type {
            args.push(Box::new(t.as_str()));
            sql.push_str(&format!(" AND discovery_type = ?{}", args.len()));
        }
        if let Some(min) = filter.min_confidence {
            args.push(Box::new(min));
            sql.push_str(&format!(" AND confidence >= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY confidence DESC, created_at DESC");
        if let Some(limit) = filter.limit {
            args.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, String>(0),
        )?;
        let mut found = Vec::new();
        for payload in rows {
            found.push(serde_json::from_str(&payload?)?);
        }
        Ok(found)
    }

    async fn upsert(&self, discovery: &Discovery) -> StorageResult<Discovery> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let stored = match Self::load_discovery(&tx, discovery.user_id().as_str(), discovery.dedup_key())? {
            Some(existing) if existing.id() == discovery.id() => existing,
            Some(existing) => existing.refreshed(discovery),
            None => discovery.clone(),
        };

        tx.execute(
            r#"
            INSERT INTO discoveries (id, user_id, discovery_type, confidence, dedup_key, created_at, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, dedup_key) DO UPDATE SET
                confidence = excluded.confidence,
                created_at = excluded.created_at,
                payload_json = excluded.payload_json
            "#,
            params![
                stored.id().to_string(),
                stored.user_id().as_str(),
                stored.discovery_type().as_str(),
                stored.confidence(),
                stored.dedup_key(),
                timestamp(stored.created_at()),
                serde_json::to_string(&stored)?,
            ],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    async fn list_active_dedup_keys(&self, user_id: &UserId) -> StorageResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT dedup_key FROM discoveries WHERE user_id = ?1")?;
        let keys = stmt
            .query_map(params![user_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }
}

#[async_trait]
impl ActiveUserSource for SqliteStore {
    async fn list_users_with_recent_activity(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<UserId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM documents WHERE ingested_at >= ?1 ORDER BY user_id",
        )?;
        let users = stmt
            .query_map(params![timestamp(since)], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::from_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn list_snapshots(&self, user_id: &UserId) -> StorageResult<Vec<CorpusSnapshot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, window_start, window_end, document_count, prevalence_json
             FROM snapshots WHERE user_id = ?1 ORDER BY window_start",
        )?;
        let rows = stmt.query_map(params![user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (id, start, end, count, prevalence) = row?;
            let count = usize::try_from(count)
                .map_err(|_| StorageError::InvalidRecord(format!("negative document count in {}", id)))?;
            snapshots.push(CorpusSnapshot {
                id: SnapshotId::from_string(id),
                user_id: user_id.clone(),
                window_start: parse_timestamp(&start)?,
                window_end: parse_timestamp(&end)?,
                document_count: count,
                topic_prevalence: serde_json::from_str(&prevalence)?,
            });
        }
        Ok(snapshots)
    }

    async fn save_snapshot(&self, snapshot: &CorpusSnapshot) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO snapshots (id, user_id, window_start, window_end, document_count, prevalence_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, window_start) DO UPDATE SET
                window_end = excluded.window_end,
                document_count = excluded.document_count,
                prevalence_json = excluded.prevalence_json
            "#,
            params![
                snapshot.id.as_str(),
                snapshot.user_id.as_str(),
                timestamp(snapshot.window_start),
                timestamp(snapshot.window_end),
                snapshot.document_count as i64,
                serde_json::to_string(&snapshot.topic_prevalence)?,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryCandidate, DiscoverySummary, DiscoveryType, EvidenceRef};
    use chrono::Duration;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn export() -> CorpusExport {
        CorpusExport {
            documents: vec![
                Document::new("d1", "Stars", "Telescopes reveal stars")
                    .with_references(["10.1000/abc"])
                    .with_embedding(vec![0.5, 0.5]),
                Document::new("d2", "Plants", "Leaves and flowers"),
            ],
            passages: vec![
                Passage::new("p2", "d1", 1, "reveal stars"),
                Passage::new("p1", "d1", 0, "Telescopes"),
            ],
        }
    }

    fn gap(user: &str, topic: &str, confidence: f64) -> Discovery {
        let candidate = DiscoveryCandidate::new(
            confidence,
            vec![EvidenceRef::topic(topic), EvidenceRef::document("d1")],
            DiscoverySummary::Gap {
                topic: topic.to_string(),
                description: String::new(),
                coverage: 1.0 - confidence,
            },
        )
        .unwrap();
        Discovery::from_candidate(user, candidate)
    }

    #[tokio::test]
    async fn import_then_fetch_round_trips_corpus() {
        let store = create_test_store();
        let user = UserId::from("u1");
        assert_eq!(store.import_corpus(&user, &export()).unwrap(), (2, 2));

        let view = store.fetch_corpus(&user).await.unwrap();
        assert_eq!(view.document_count(), 2);
        let d1 = view.document(&"d1".into()).unwrap();
        assert_eq!(d1.references, vec!["10.1000/abc".to_string()]);
        assert_eq!(d1.embedding.as_deref(), Some(&[0.5f32, 0.5][..]));
        let ordinals: Vec<u32> = view.passages().iter().map(|p| p.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);

        assert!(store.fetch_corpus(&"other".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_identity_per_dedup_key() {
        let store = create_test_store();
        let first = store.upsert(&gap("u1", "ethics", 0.8)).await.unwrap();
        let again = store.upsert(&gap("u1", "ethics", 0.95)).await.unwrap();
        assert_eq!(first.id(), again.id());
        assert_eq!(again.confidence(), 0.95);

        store.upsert(&gap("u1", "law", 0.5)).await.unwrap();
        let keys = store.list_active_dedup_keys(&"u1".into()).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(first.dedup_key()));
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let store = create_test_store();
        store.upsert(&gap("u1", "a", 0.9)).await.unwrap();
        store.upsert(&gap("u1", "b", 0.4)).await.unwrap();
        store.upsert(&gap("u2", "c", 0.99)).await.unwrap();

        let listed = store
            .list(&DiscoveryFilter::for_user("u1").with_min_confidence(0.5))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].confidence(), 0.9);

        let none = store
            .list(&DiscoveryFilter::for_user("u1").with_type(DiscoveryType::Trend))
            .await
            .unwrap();
        assert!(none.is_empty());

        let top = store.list(&DiscoveryFilter::new().with_limit(1)).await.unwrap();
        assert_eq!(top[0].user_id().as_str(), "u2");
    }

    #[tokio::test]
    async fn active_users_from_ingestion_time() {
        let store = create_test_store();
        store.import_corpus(&"u1".into(), &export()).unwrap();
        let past = Utc::now() - Duration::minutes(5);
        let future = Utc::now() + Duration::minutes(5);
        assert_eq!(
            store.list_users_with_recent_activity(past).await.unwrap(),
            vec![UserId::from("u1")]
        );
        assert!(store
            .list_users_with_recent_activity(future)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn snapshots_unique_per_window() {
        let store = create_test_store();
        let day = Utc::now() - Duration::days(2);
        let a = CorpusSnapshot::new("u1", day, day + Duration::days(1)).with_prevalence("t", 0.2);
        let b = CorpusSnapshot::new("u1", day, day + Duration::days(1)).with_prevalence("t", 0.3);
        let later = CorpusSnapshot::new("u1", day + Duration::days(1), day + Duration::days(2));
        store.save_snapshot(&later).await.unwrap();
        store.save_snapshot(&a).await.unwrap();
        store.save_snapshot(&b).await.unwrap();

        let stored = store.list_snapshots(&"u1".into()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, a.id);
        assert_eq!(stored[0].prevalence("t"), Some(0.3));
        assert_eq!(stored[1].id, later.id);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("discovery.db");
        SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }
}
