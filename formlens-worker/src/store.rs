use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use formlens_core::entities::{truncate_label, FieldDetection};

use crate::models::{Document, DocumentStatus, FieldRegionRow};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("query failed")]
    Query(#[source] rusqlite::Error),

    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id                   TEXT PRIMARY KEY,
    user_id              TEXT NOT NULL,
    file_name            TEXT NOT NULL,
    mime_type            TEXT NOT NULL,
    storage_key_original TEXT NOT NULL,
    storage_key_filled   TEXT,
    status               TEXT NOT NULL DEFAULT 'imported',
    page_count           INTEGER,
    hash_fingerprint     TEXT,
    acroform             INTEGER NOT NULL DEFAULT 0,
    error_message        TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS field_regions (
    id           TEXT PRIMARY KEY,
    document_id  TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    page_index   INTEGER NOT NULL CHECK (page_index >= 0),
    x            REAL NOT NULL,
    y            REAL NOT NULL,
    width        REAL NOT NULL,
    height       REAL NOT NULL,
    field_type   TEXT NOT NULL DEFAULT 'unknown',
    label        TEXT NOT NULL,
    confidence   REAL NOT NULL,
    template_key TEXT,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_field_regions_document_id ON field_regions(document_id);
CREATE INDEX IF NOT EXISTS idx_field_regions_template_key ON field_regions(template_key);
"#;

/// SQLite-backed store for documents and their field regions.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connection(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::Connection)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Connection)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Query)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::Query)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO documents (id, user_id, file_name, mime_type, storage_key_original,
                                   storage_key_filled, status, page_count, hash_fingerprint,
                                   acroform, error_message, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                doc.id.to_string(),
                doc.user_id.to_string(),
                doc.file_name,
                doc.mime_type,
                doc.storage_key_original,
                doc.storage_key_filled,
                doc.status.as_str(),
                doc.page_count,
                doc.hash_fingerprint,
                doc.acroform,
                doc.error_message,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    pub fn get_document(&self, id: &Uuid) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, file_name, mime_type, storage_key_original, storage_key_filled, \
             status, page_count, hash_fingerprint, acroform, error_message, created_at, updated_at \
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            document_from_row,
        )
        .optional()
        .map_err(StoreError::Query)?
        .transpose()
    }

    /// Claim the document for processing. The update is conditional so
    /// that of two concurrent workers at most one wins; the loser sees
    /// zero affected rows and treats the job as a no-op.
    ///
    /// Only `imported` and `failed` documents are claimable without
    /// `force`; `force` reclaims a document in any state, including
    /// `ready` ones whose field regions will be replaced.
    pub fn claim_for_processing(&self, id: &Uuid, force: bool) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE documents SET status = 'processing', updated_at = ?2 \
                 WHERE id = ?1 AND (status IN ('imported', 'failed') OR ?3)",
                params![id.to_string(), Utc::now().to_rfc3339(), force],
            )
            .map_err(StoreError::Query)?;
        Ok(rows > 0)
    }

    /// Replace the document's field regions and mark it ready, in one
    /// transaction. A failure at any point rolls everything back so the
    /// document never ends up `ready` with a partial field set.
    pub fn finish_processing(
        &self,
        document_id: &Uuid,
        detections: &[FieldDetection],
        page_count: usize,
        acroform: bool,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(StoreError::Query)?;
        let now = Utc::now().to_rfc3339();
        let doc_id = document_id.to_string();

        tx.execute(
            "DELETE FROM field_regions WHERE document_id = ?1",
            params![doc_id],
        )
        .map_err(StoreError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO field_regions (id, document_id, page_index, x, y, width, height, \
                     field_type, label, confidence, template_key, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .map_err(StoreError::Query)?;
            for detection in detections {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    doc_id,
                    detection.page_index as i64,
                    detection.bbox.x,
                    detection.bbox.y,
                    detection.bbox.width,
                    detection.bbox.height,
                    detection.field_type.as_str(),
                    truncate_label(&detection.label),
                    detection.confidence,
                    detection.template_key,
                    now,
                ])
                .map_err(StoreError::Query)?;
            }
        }

        tx.execute(
            "UPDATE documents SET status = 'ready', page_count = ?2, acroform = ?3, \
             error_message = NULL, updated_at = ?4 WHERE id = ?1",
            params![doc_id, page_count as i64, acroform, now],
        )
        .map_err(StoreError::Query)?;

        tx.commit().map_err(StoreError::Query)?;
        Ok(detections.len())
    }

    pub fn mark_failed(&self, id: &Uuid, error_message: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE documents SET status = 'failed', error_message = ?2, updated_at = ?3 \
             WHERE id = ?1",
            params![id.to_string(), error_message, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    pub fn list_field_regions(&self, document_id: &Uuid) -> Result<Vec<FieldRegionRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, page_index, x, y, width, height, field_type, label, \
                 confidence, template_key, created_at \
                 FROM field_regions WHERE document_id = ?1 ORDER BY page_index, id",
            )
            .map_err(StoreError::Query)?;
        let rows = stmt
            .query_map(params![document_id.to_string()], field_region_from_row)
            .map_err(StoreError::Query)?;

        let mut regions = Vec::new();
        for row in rows {
            regions.push(row.map_err(StoreError::Query)??);
        }
        Ok(regions)
    }

    pub fn delete_document(&self, id: &Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "DELETE FROM documents WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(StoreError::Query)?;
        Ok(rows > 0)
    }
}

fn parse_uuid(value: String) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&value).map_err(|e| StoreError::Corrupt(format!("bad uuid {value}: {e}")))
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {value}: {e}")))
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Document, StoreError>> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    let file_name: String = row.get(2)?;
    let mime_type: String = row.get(3)?;
    let storage_key_original: String = row.get(4)?;
    let storage_key_filled: Option<String> = row.get(5)?;
    let page_count: Option<i64> = row.get(7)?;
    let hash_fingerprint: Option<String> = row.get(8)?;
    let acroform: bool = row.get(9)?;
    let error_message: Option<String> = row.get(10)?;

    Ok((|| {
        Ok(Document {
            id: parse_uuid(id)?,
            user_id: parse_uuid(user_id)?,
            file_name,
            mime_type,
            storage_key_original,
            storage_key_filled,
            status: DocumentStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("bad status {status}")))?,
            page_count,
            hash_fingerprint,
            acroform,
            error_message,
            created_at: parse_timestamp(created_at)?,
            updated_at: parse_timestamp(updated_at)?,
        })
    })())
}

fn field_region_from_row(row: &Row<'_>) -> rusqlite::Result<Result<FieldRegionRow, StoreError>> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let created_at: String = row.get(11)?;

    let page_index: i64 = row.get(2)?;
    let x: f64 = row.get(3)?;
    let y: f64 = row.get(4)?;
    let width: f64 = row.get(5)?;
    let height: f64 = row.get(6)?;
    let field_type: String = row.get(7)?;
    let label: String = row.get(8)?;
    let confidence: f64 = row.get(9)?;
    let template_key: Option<String> = row.get(10)?;

    Ok((|| {
        Ok(FieldRegionRow {
            id: parse_uuid(id)?,
            document_id: parse_uuid(document_id)?,
            page_index,
            x,
            y,
            width,
            height,
            field_type,
            label,
            confidence,
            template_key,
            created_at: parse_timestamp(created_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use formlens_core::entities::{BBox, DetectionSource, FieldType};

    fn imported_doc() -> Document {
        Document::new_imported(
            Uuid::new_v4(),
            "form.pdf",
            "application/pdf",
            "originals/form.pdf",
            Some("abc123".into()),
        )
    }

    fn detection(page_index: usize, x: f64) -> FieldDetection {
        FieldDetection::new(
            page_index,
            BBox::new(x, 0.1, 0.2, 0.05).unwrap(),
            FieldType::Text,
            "Name",
            0.9,
            DetectionSource::Structure,
            Some("field_001".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();

        let loaded = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.id, doc.id);
        assert_eq!(loaded.status, DocumentStatus::Imported);
        assert_eq!(loaded.storage_key_original, doc.storage_key_original);
        assert_eq!(loaded.hash_fingerprint.as_deref(), Some("abc123"));
        assert!(!loaded.acroform);

        assert!(store.get_document(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_claim_is_conditional() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();

        // First claim wins, second sees 'processing' and loses.
        assert!(store.claim_for_processing(&doc.id, false).unwrap());
        assert!(!store.claim_for_processing(&doc.id, false).unwrap());

        // Force reclaims regardless of state.
        assert!(store.claim_for_processing(&doc.id, true).unwrap());

        let loaded = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
    }

    #[test]
    fn test_finish_processing_replaces_regions() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();
        store.claim_for_processing(&doc.id, false).unwrap();

        store
            .finish_processing(&doc.id, &[detection(0, 0.1), detection(1, 0.3)], 2, true)
            .unwrap();
        assert_eq!(store.list_field_regions(&doc.id).unwrap().len(), 2);

        let loaded = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert_eq!(loaded.page_count, Some(2));
        assert!(loaded.acroform);

        // Reprocessing replaces wholesale.
        store
            .finish_processing(&doc.id, &[detection(0, 0.5)], 2, false)
            .unwrap();
        let regions = store.list_field_regions(&doc.id).unwrap();
        assert_eq!(regions.len(), 1);
        assert!((regions[0].x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mark_failed_and_recover() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();

        store
            .mark_failed(&doc.id, "StorageFailure: download timed out")
            .unwrap();
        let loaded = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Failed);
        assert_eq!(
            loaded.error_message.as_deref(),
            Some("StorageFailure: download timed out")
        );

        // A successful rerun clears the error.
        store.claim_for_processing(&doc.id, false).unwrap();
        store.finish_processing(&doc.id, &[], 1, false).unwrap();
        let loaded = store.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert!(loaded.error_message.is_none());
    }

    #[test]
    fn test_delete_cascades_to_field_regions() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();
        store
            .finish_processing(&doc.id, &[detection(0, 0.1)], 1, false)
            .unwrap();
        assert_eq!(store.list_field_regions(&doc.id).unwrap().len(), 1);

        assert!(store.delete_document(&doc.id).unwrap());
        assert!(store.list_field_regions(&doc.id).unwrap().is_empty());
    }

    #[test]
    fn test_labels_truncated_to_column_width() {
        let store = Store::open_in_memory().unwrap();
        let doc = imported_doc();
        store.insert_document(&doc).unwrap();

        let mut long = detection(0, 0.1);
        long.label = "y".repeat(300);
        store.finish_processing(&doc.id, &[long], 1, false).unwrap();

        let regions = store.list_field_regions(&doc.id).unwrap();
        assert_eq!(regions[0].label.chars().count(), 255);
    }
}
