// src/store/mod.rs

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Output format for timestamp fields: `dd-MM-yyyy HH:mm:ss`, local time.
pub const MOMENT_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// One sensor reading reduced to the fields the report template needs.
/// Immutable after construction; absent source fields are empty strings,
/// never null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub device_id: String,
    pub cpm: String,
    pub usvh: String,
    pub mrh: String,
    pub mrh_level: String,
    pub alarm: String,
    pub moment: String,
}

impl Row {
    /// Reduce a loosely-typed document to the fixed field set via explicit
    /// per-field lookup. Extra document fields are ignored.
    pub fn from_document(doc: &Map<String, Value>) -> Self {
        Row {
            device_id: text_field(doc, "deviceId"),
            cpm: text_field(doc, "cpm"),
            usvh: text_field(doc, "uSvh"),
            mrh: text_field(doc, "mRh"),
            mrh_level: text_field(doc, "mrhLevel"),
            alarm: text_field(doc, "alarm"),
            moment: moment_field(doc, "moment"),
        }
    }
}

fn text_field(doc: &Map<String, Value>, key: &str) -> String {
    match doc.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A timestamp stored as epoch milliseconds is rendered in local time as
/// `dd-MM-yyyy HH:mm:ss`; any other type is rendered verbatim.
fn moment_field(doc: &Map<String, Value>, key: &str) -> String {
    if let Some(Value::Number(n)) = doc.get(key) {
        if let Some(millis) = n.as_i64() {
            if let Some(dt) = Local.timestamp_millis_opt(millis).single() {
                return dt.format(MOMENT_FORMAT).to_string();
            }
        }
    }
    text_field(doc, key)
}

/// Document store backed by SQLite: one table per collection, one JSON
/// object per row. Every call opens its own connection and drops it on
/// return, so nothing is shared between pipeline phases.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store { path: path.into() }
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("opening store {}", self.path.display()))
    }

    /// Insert documents into `collection`, creating it if needed.
    pub fn insert(&self, collection: &str, docs: &[Value]) -> Result<()> {
        let table = table_name(collection)?;
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, doc TEXT NOT NULL)"
            ),
            [],
        )?;
        let mut stmt = conn.prepare(&format!("INSERT INTO {table} (doc) VALUES (?1)"))?;
        for doc in docs {
            stmt.execute(params![doc.to_string()])?;
        }
        info!(collection, docs = docs.len(), "inserted");
        Ok(())
    }

    /// Fetch up to `limit` documents from `collection`, ascending by
    /// `sort_field`, each reduced to a `Row`. Sort and cap are applied in
    /// the query itself.
    #[instrument(level = "info", skip(self))]
    pub fn fetch_rows(&self, collection: &str, sort_field: &str, limit: usize) -> Result<Vec<Row>> {
        let table = table_name(collection)?;
        let sort_path = json_path(sort_field)?;
        let conn = self.connect()?;
        let sql = format!(
            "SELECT doc FROM {table} ORDER BY json_extract(doc, '{sort_path}') ASC LIMIT ?1"
        );
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("querying collection `{collection}`"))?;
        let docs = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut rows = Vec::new();
        for doc in docs {
            let raw = doc?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("malformed document in `{collection}`"))?;
            match value {
                Value::Object(map) => rows.push(Row::from_document(&map)),
                other => bail!("non-object document in `{collection}`: {other}"),
            }
        }
        info!(rows = rows.len(), "fetched");
        Ok(rows)
    }
}

/// Collection names become table names, so they are restricted to
/// identifier characters rather than interpolated blindly.
fn table_name(collection: &str) -> Result<String> {
    if collection.is_empty()
        || collection.starts_with(|c: char| c.is_ascii_digit())
        || !collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("invalid collection name `{collection}`");
    }
    Ok(collection.to_string())
}

fn json_path(field: &str) -> Result<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid sort field `{field}`");
    }
    Ok(format!("$.{field}"))
}
