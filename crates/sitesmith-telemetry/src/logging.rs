use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A warning or error persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
}

/// Filters for reading persisted logs back.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink for warn+ events.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 session_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &LogEntry) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.session_id,
            ],
        );
    }

    /// Most recent records first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, fields, session_id FROM logs
             WHERE (?1 IS NULL OR level = ?1) AND (?2 IS NULL OR session_id = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![q.level, q.session_id, q.limit.unwrap_or(100)],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    session_id: row.get(6)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
}

/// tracing Layer that writes warn+ events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    session_id: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Session id captured from a span, inherited by events inside it.
struct SpanSession(String);

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                visitor.session_id = scope
                    .into_iter()
                    .find_map(|span| span.extensions().get::<SpanSession>().map(|s| s.0.clone()));
            }
        }

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::to_string(&visitor.fields).unwrap_or_default());

        self.sink.insert(&LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            session_id: visitor.session_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if let (Some(session_id), Some(span)) = (visitor.session_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanSession(session_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: &str, message: &str, session: Option<&str>) -> LogEntry {
        LogEntry {
            timestamp: "2026-10-16T12:00:00Z".into(),
            level: level.into(),
            target: "sitesmith_engine::workspace".into(),
            message: message.into(),
            fields: None,
            session_id: session.map(Into::into),
        }
    }

    #[test]
    fn file_sink_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("nested/logs.db")).unwrap();
        sink.insert(&entry("WARN", "slow upstream", None));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_filters_by_level_and_session() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&entry("WARN", "rate limited", Some("site_a")));
        sink.insert(&entry("ERROR", "persist failed", Some("site_a")));
        sink.insert(&entry("ERROR", "upstream 500", Some("site_b")));

        let errors = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 2);

        let session_a = sink
            .query(&LogQuery {
                session_id: Some("site_a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session_a.len(), 2);
        // Most recent first
        assert_eq!(session_a[0].message, "persist failed");
    }

    #[test]
    fn query_respects_limit() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..5 {
            sink.insert(&entry("WARN", &format!("msg {i}"), None));
        }
        let rows = sink
            .query(&LogQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "msg 4");
    }

    #[test]
    fn layer_persists_only_warnings_with_span_session() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber =
            tracing_subscriber::registry().with(SqliteLogLayer::new(Arc::clone(&sink)));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("command", session_id = "site_xyz");
            let _enter = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(elapsed_ms = 12u64, "cooldown not elapsed");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].message, "cooldown not elapsed");
        assert_eq!(rows[0].session_id.as_deref(), Some("site_xyz"));
        assert!(rows[0].fields.as_deref().unwrap_or("").contains("elapsed_ms"));
    }
}
