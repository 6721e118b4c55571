//! Project-scoped bug tracking over an embedded SQLite store.
//!
//! Each project keeps its own database under `.bugtracker/bugs.db`; stores
//! opened during the process are registered so `search_bugs_global` can fan
//! out across all of them. The `project_path` argument of every tool is
//! routed through the security engine's path sanitization when an engine is
//! attached.
//!
//! Every `update_bug` call records one history entry combining the fields
//! that actually changed (as `{field: [old, new]}`) with an optional note,
//! so a note-only update still leaves a trace.

use crate::plugins::base::{Plugin, ToolDefinition, ToolResult};
use crate::security::engine::SecurityEngine;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const DB_DIR: &str = ".bugtracker";
const DB_FILE: &str = "bugs.db";

pub const STATUSES: &[&str] = &["open", "in_progress", "closed"];
pub const PRIORITIES: &[&str] = &["low", "medium", "high", "critical"];
pub const RELATIONSHIPS: &[&str] = &["duplicate_of", "blocks", "related_to"];

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A directed link from one bug to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedBug {
    pub bug_id: i64,
    pub relationship: String,
}

#[derive(Debug, Clone, Serialize)]
struct BugSummary {
    id: i64,
    title: String,
    status: String,
    priority: String,
    tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Bug {
    id: i64,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    resolution: Option<String>,
    tags: Vec<String>,
    related_bugs: Vec<RelatedBug>,
    created_at: String,
    updated_at: String,
    history: Vec<HistoryEntry>,
}

/// One update to a bug: the fields that changed, each as `[old, new]`,
/// plus the note attached to that update.
#[derive(Debug, Clone, Serialize)]
struct HistoryEntry {
    timestamp: String,
    changes: Map<String, Value>,
    note: Option<String>,
}

/// Field updates for one `update_bug` call. Absent fields are untouched.
#[derive(Debug, Default)]
struct BugPatch {
    status: Option<String>,
    priority: Option<String>,
    resolution: Option<String>,
    tags: Option<Vec<String>>,
    related_bugs: Option<Vec<RelatedBug>>,
    note: Option<String>,
}

struct BugStore {
    conn: Mutex<Connection>,
}

impl BugStore {
    fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bugs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL,
                 description TEXT,
                 status TEXT NOT NULL DEFAULT 'open',
                 priority TEXT NOT NULL DEFAULT 'medium',
                 resolution TEXT,
                 tags TEXT NOT NULL DEFAULT '[]',
                 related_bugs TEXT NOT NULL DEFAULT '[]',
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS history (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 bug_id INTEGER NOT NULL REFERENCES bugs(id),
                 changes TEXT NOT NULL DEFAULT '{}',
                 note TEXT,
                 changed_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn add_bug(
        &self,
        title: &str,
        description: Option<&str>,
        priority: &str,
        tags: &[String],
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().expect("bug store lock");
        let timestamp = now();
        conn.execute(
            "INSERT INTO bugs (title, description, status, priority, tags, created_at, updated_at)
             VALUES (?1, ?2, 'open', ?3, ?4, ?5, ?5)",
            params![
                title,
                description,
                priority,
                serde_json::to_string(tags)?,
                timestamp
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_bug(&self, bug_id: i64) -> anyhow::Result<Option<Bug>> {
        let conn = self.conn.lock().expect("bug store lock");
        let mut stmt = conn.prepare(
            "SELECT id, title, description, status, priority, resolution, tags, related_bugs,
                    created_at, updated_at
             FROM bugs WHERE id = ?1",
        )?;
        let bug = stmt
            .query_row(params![bug_id], |row| {
                Ok(Bug {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    status: row.get(3)?,
                    priority: row.get(4)?,
                    resolution: row.get(5)?,
                    tags: serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                    related_bugs: serde_json::from_str(&row.get::<_, String>(7)?)
                        .unwrap_or_default(),
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                    history: Vec::new(),
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(mut bug) = bug else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT changes, note, changed_at FROM history WHERE bug_id = ?1 ORDER BY id",
        )?;
        bug.history = stmt
            .query_map(params![bug_id], |row| {
                Ok(HistoryEntry {
                    changes: serde_json::from_str(&row.get::<_, String>(0)?)
                        .unwrap_or_default(),
                    note: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        Ok(Some(bug))
    }

    /// Apply a patch, recording the changed fields and the note as a single
    /// history entry. Returns false when the bug does not exist.
    fn update_bug(&self, bug_id: i64, patch: &BugPatch) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("bug store lock");
        let timestamp = now();

        type CurrentRow = (String, String, Option<String>, String, String);
        let current: Option<CurrentRow> = match conn.query_row(
            "SELECT status, priority, resolution, tags, related_bugs FROM bugs WHERE id = ?1",
            params![bug_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((old_status, old_priority, old_resolution, old_tags_json, old_related_json)) =
            current
        else {
            return Ok(false);
        };

        let mut changes = Map::new();

        if let Some(new_status) = &patch.status {
            if *new_status != old_status {
                changes.insert("status".into(), json!([old_status, new_status]));
                conn.execute(
                    "UPDATE bugs SET status = ?1 WHERE id = ?2",
                    params![new_status, bug_id],
                )?;
            }
        }
        if let Some(new_priority) = &patch.priority {
            if *new_priority != old_priority {
                changes.insert("priority".into(), json!([old_priority, new_priority]));
                conn.execute(
                    "UPDATE bugs SET priority = ?1 WHERE id = ?2",
                    params![new_priority, bug_id],
                )?;
            }
        }
        if let Some(new_resolution) = &patch.resolution {
            if old_resolution.as_deref() != Some(new_resolution.as_str()) {
                changes.insert("resolution".into(), json!([old_resolution, new_resolution]));
                conn.execute(
                    "UPDATE bugs SET resolution = ?1 WHERE id = ?2",
                    params![new_resolution, bug_id],
                )?;
            }
        }
        if let Some(new_tags) = &patch.tags {
            let old_tags: Vec<String> =
                serde_json::from_str(&old_tags_json).unwrap_or_default();
            if *new_tags != old_tags {
                changes.insert("tags".into(), json!([old_tags, new_tags]));
                conn.execute(
                    "UPDATE bugs SET tags = ?1 WHERE id = ?2",
                    params![serde_json::to_string(new_tags)?, bug_id],
                )?;
            }
        }
        if let Some(new_related) = &patch.related_bugs {
            let old_related: Vec<RelatedBug> =
                serde_json::from_str(&old_related_json).unwrap_or_default();
            if *new_related != old_related {
                changes.insert("related_bugs".into(), json!([old_related, new_related]));
                conn.execute(
                    "UPDATE bugs SET related_bugs = ?1 WHERE id = ?2",
                    params![serde_json::to_string(new_related)?, bug_id],
                )?;
            }
        }

        if changes.is_empty() && patch.note.is_none() {
            return Ok(true);
        }

        conn.execute(
            "INSERT INTO history (bug_id, changes, note, changed_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                bug_id,
                serde_json::to_string(&changes)?,
                patch.note,
                timestamp
            ],
        )?;
        conn.execute(
            "UPDATE bugs SET updated_at = ?1 WHERE id = ?2",
            params![timestamp, bug_id],
        )?;

        Ok(true)
    }

    fn summaries(&self) -> anyhow::Result<Vec<BugSummary>> {
        let conn = self.conn.lock().expect("bug store lock");
        let mut stmt =
            conn.prepare("SELECT id, title, status, priority, tags FROM bugs ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(BugSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                priority: row.get(3)?,
                tags: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Bugs matching every given filter. `tags` requires ALL listed tags
    /// to be present; `query` is a case-insensitive substring match on the
    /// title.
    fn find_bugs(
        &self,
        query: Option<&str>,
        status: Option<&str>,
        priority: Option<&str>,
        tags: &[String],
    ) -> anyhow::Result<Vec<BugSummary>> {
        let query_lower = query.map(str::to_lowercase);
        let bugs = self
            .summaries()?
            .into_iter()
            .filter(|bug| status.is_none_or(|s| bug.status == s))
            .filter(|bug| priority.is_none_or(|p| bug.priority == p))
            .filter(|bug| tags.iter().all(|t| bug.tags.contains(t)))
            .filter(|bug| {
                query_lower
                    .as_deref()
                    .is_none_or(|q| bug.title.to_lowercase().contains(q))
            })
            .collect();
        Ok(bugs)
    }
}

pub struct BugTrackerPlugin {
    stores: Mutex<HashMap<PathBuf, Arc<BugStore>>>,
    engine: Option<Arc<SecurityEngine>>,
}

impl BugTrackerPlugin {
    pub fn new(engine: Option<Arc<SecurityEngine>>) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            engine,
        }
    }

    fn db_path(project_path: &Path) -> PathBuf {
        project_path.join(DB_DIR).join(DB_FILE)
    }

    /// Open (and register) the store for a project, creating it when
    /// `create` is set. A missing store without `create` is a user error,
    /// not a crash.
    fn store_for(&self, project_path: &Path, create: bool) -> Result<Arc<BugStore>, ToolResult> {
        let mut stores = self.stores.lock().expect("store registry lock");
        if let Some(store) = stores.get(project_path) {
            return Ok(store.clone());
        }

        let db_path = Self::db_path(project_path);
        if !create && !db_path.exists() {
            return Err(ToolResult::error(format!(
                "Bug tracker not initialized for project: {}. Run init_bugtracker first.",
                project_path.display()
            )));
        }

        match BugStore::open(&db_path) {
            Ok(store) => {
                debug!("bugtracker: opened store at {}", db_path.display());
                let store = Arc::new(store);
                stores.insert(project_path.to_path_buf(), store.clone());
                Ok(store)
            }
            Err(e) => Err(ToolResult::error(format!(
                "Failed to open bug store: {}",
                e
            ))),
        }
    }

    /// Run the arguments through the engine's validation (schema pass plus
    /// path sanitization of `project_path`) when an engine is attached.
    fn sanitize_arguments(&self, tool_name: &str, arguments: &Value) -> Result<Value, ToolResult> {
        let Some(engine) = &self.engine else {
            return Ok(arguments.clone());
        };
        let Some(schema) = self
            .tools()
            .into_iter()
            .find(|t| t.name == tool_name)
            .map(|t| t.input_schema)
        else {
            return Ok(arguments.clone());
        };
        engine
            .validate_input(tool_name, &schema, arguments)
            .map_err(|e| ToolResult::error(e.to_string()))
    }

    fn project_path(arguments: &Value) -> Result<PathBuf, ToolResult> {
        arguments
            .get("project_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| ToolResult::error("Missing required argument: project_path"))
    }

    fn bug_id(arguments: &Value) -> Result<i64, ToolResult> {
        arguments
            .get("bug_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolResult::error("Missing required argument: bug_id"))
    }

    fn check_enum(value: &str, allowed: &[&str], field: &str) -> Result<(), ToolResult> {
        if allowed.contains(&value) {
            Ok(())
        } else {
            Err(ToolResult::error(format!(
                "Invalid {}: '{}' (expected one of: {})",
                field,
                value,
                allowed.join(", ")
            )))
        }
    }

    fn string_list(arguments: &Value, key: &str) -> Option<Vec<String>> {
        arguments.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
    }

    fn related_bugs(arguments: &Value) -> Result<Option<Vec<RelatedBug>>, ToolResult> {
        let Some(raw) = arguments.get("related_bugs") else {
            return Ok(None);
        };
        let related: Vec<RelatedBug> = serde_json::from_value(raw.clone()).map_err(|e| {
            ToolResult::error(format!("Invalid related_bugs: {}", e))
        })?;
        for link in &related {
            Self::check_enum(&link.relationship, RELATIONSHIPS, "relationship")?;
        }
        Ok(Some(related))
    }

    fn handle(&self, tool_name: &str, arguments: &Value) -> Result<ToolResult, ToolResult> {
        match tool_name {
            "init_bugtracker" => {
                let project = Self::project_path(arguments)?;
                if !project.is_dir() {
                    return Err(ToolResult::error(format!(
                        "Project path does not exist: {}",
                        project.display()
                    )));
                }
                self.store_for(&project, true)?;
                Ok(ToolResult::text(format!(
                    "Bug tracker initialized for project: {}",
                    project.display()
                )))
            }
            "add_bug" => {
                let project = Self::project_path(arguments)?;
                let title = arguments
                    .get("title")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolResult::error("Missing required argument: title"))?;
                let description = arguments.get("description").and_then(Value::as_str);
                let priority = arguments
                    .get("priority")
                    .and_then(Value::as_str)
                    .unwrap_or("medium");
                Self::check_enum(priority, PRIORITIES, "priority")?;
                let tags = Self::string_list(arguments, "tags").unwrap_or_default();

                let store = self.store_for(&project, false)?;
                let id = store
                    .add_bug(title, description, priority, &tags)
                    .map_err(|e| ToolResult::error(format!("Failed to add bug: {}", e)))?;
                Ok(ToolResult::text(
                    json!({"id": id, "title": title, "status": "open", "priority": priority})
                        .to_string(),
                ))
            }
            "get_bug" => {
                let project = Self::project_path(arguments)?;
                let id = Self::bug_id(arguments)?;
                let store = self.store_for(&project, false)?;
                let bug = store
                    .get_bug(id)
                    .map_err(|e| ToolResult::error(format!("Failed to read bug: {}", e)))?;
                match bug {
                    Some(bug) => Ok(ToolResult::text(
                        serde_json::to_string_pretty(&bug).unwrap_or_default(),
                    )),
                    None => Err(ToolResult::error(format!("Bug not found: {}", id))),
                }
            }
            "update_bug" | "close_bug" => {
                let project = Self::project_path(arguments)?;
                let id = Self::bug_id(arguments)?;

                let mut patch = BugPatch::default();
                if tool_name == "close_bug" {
                    patch.status = Some("closed".to_string());
                } else {
                    if let Some(status) = arguments.get("status").and_then(Value::as_str) {
                        Self::check_enum(status, STATUSES, "status")?;
                        patch.status = Some(status.to_string());
                    }
                    if let Some(priority) = arguments.get("priority").and_then(Value::as_str) {
                        Self::check_enum(priority, PRIORITIES, "priority")?;
                        patch.priority = Some(priority.to_string());
                    }
                    patch.tags = Self::string_list(arguments, "tags");
                    patch.related_bugs = Self::related_bugs(arguments)?;
                }
                patch.resolution = arguments
                    .get("resolution")
                    .and_then(Value::as_str)
                    .map(String::from);
                patch.note = arguments
                    .get("note")
                    .and_then(Value::as_str)
                    .map(String::from);

                let store = self.store_for(&project, false)?;
                let found = store
                    .update_bug(id, &patch)
                    .map_err(|e| ToolResult::error(format!("Failed to update bug: {}", e)))?;
                if !found {
                    return Err(ToolResult::error(format!("Bug not found: {}", id)));
                }
                Ok(ToolResult::text(format!("Bug {} updated", id)))
            }
            "list_bugs" => {
                let project = Self::project_path(arguments)?;
                let status = arguments.get("status").and_then(Value::as_str);
                if let Some(s) = status {
                    Self::check_enum(s, STATUSES, "status")?;
                }
                let priority = arguments.get("priority").and_then(Value::as_str);
                if let Some(p) = priority {
                    Self::check_enum(p, PRIORITIES, "priority")?;
                }
                let tags = Self::string_list(arguments, "tags").unwrap_or_default();

                let store = self.store_for(&project, false)?;
                let bugs = store
                    .find_bugs(None, status, priority, &tags)
                    .map_err(|e| ToolResult::error(format!("Failed to list bugs: {}", e)))?;
                Ok(ToolResult::text(
                    serde_json::to_string_pretty(&bugs).unwrap_or_default(),
                ))
            }
            "search_bugs_global" => {
                let query = arguments.get("query").and_then(Value::as_str);
                let status = arguments.get("status").and_then(Value::as_str);
                if let Some(s) = status {
                    Self::check_enum(s, STATUSES, "status")?;
                }
                let tags = Self::string_list(arguments, "tags").unwrap_or_default();

                let stores: Vec<(PathBuf, Arc<BugStore>)> = {
                    let registry = self.stores.lock().expect("store registry lock");
                    registry
                        .iter()
                        .map(|(path, store)| (path.clone(), store.clone()))
                        .collect()
                };

                let mut results = Vec::new();
                for (path, store) in stores {
                    let hits = store
                        .find_bugs(query, status, None, &tags)
                        .map_err(|e| ToolResult::error(format!("Search failed: {}", e)))?;
                    for hit in hits {
                        results.push(json!({
                            "project_path": path.display().to_string(),
                            "id": hit.id,
                            "title": hit.title,
                            "status": hit.status,
                            "priority": hit.priority,
                            "tags": hit.tags,
                        }));
                    }
                }
                Ok(ToolResult::text(
                    serde_json::to_string_pretty(&results).unwrap_or_default(),
                ))
            }
            other => Err(ToolResult::error(format!("Unknown tool: {}", other))),
        }
    }
}

fn project_schema(extra_properties: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "project_path": {
            "type": "string",
            "format": "path",
            "description": "Path of the project whose bug store to use",
        },
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra_properties.as_object())
    {
        for (k, v) in extra {
            props.insert(k.clone(), v.clone());
        }
    }
    let mut req: Vec<&str> = vec!["project_path"];
    req.extend(required);
    json!({
        "type": "object",
        "properties": properties,
        "required": req,
    })
}

fn related_bugs_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "bug_id": {"type": "integer"},
                "relationship": {"type": "string", "enum": RELATIONSHIPS},
            },
            "required": ["bug_id", "relationship"],
        },
        "description": "Links to other bugs in the same store",
    })
}

#[async_trait]
impl Plugin for BugTrackerPlugin {
    fn name(&self) -> &str {
        "bugtracker"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "init_bugtracker",
                "Initialize a bug tracker store for a project.",
                project_schema(json!({}), &[]),
            )
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "add_bug",
                "Record a new bug in a project's tracker.",
                project_schema(
                    json!({
                        "title": {"type": "string", "maxLength": 500},
                        "description": {"type": "string", "maxLength": 5000},
                        "priority": {"type": "string", "enum": PRIORITIES},
                        "tags": {"type": "array", "items": {"type": "string"}},
                    }),
                    &["title"],
                ),
            )
            .with_aliases(&["report_bug", "file_bug"])
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "get_bug",
                "Fetch a bug with its related bugs and change history.",
                project_schema(json!({"bug_id": {"type": "integer"}}), &["bug_id"]),
            )
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "update_bug",
                "Update a bug's status, priority, tags, resolution, or related bugs, \
                 or append a note. Changed fields and the note are recorded as one \
                 history entry.",
                project_schema(
                    json!({
                        "bug_id": {"type": "integer"},
                        "status": {"type": "string", "enum": STATUSES},
                        "priority": {"type": "string", "enum": PRIORITIES},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "related_bugs": related_bugs_schema(),
                        "resolution": {"type": "string"},
                        "note": {"type": "string"},
                    }),
                    &["bug_id"],
                ),
            )
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "close_bug",
                "Close a bug, optionally recording a resolution.",
                project_schema(
                    json!({
                        "bug_id": {"type": "integer"},
                        "resolution": {"type": "string"},
                        "note": {"type": "string"},
                    }),
                    &["bug_id"],
                ),
            )
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "list_bugs",
                "List a project's bugs, filtered by status, priority, and/or tags \
                 (a bug must carry every listed tag).",
                project_schema(
                    json!({
                        "status": {"type": "string", "enum": STATUSES},
                        "priority": {"type": "string", "enum": PRIORITIES},
                        "tags": {"type": "array", "items": {"type": "string"}},
                    }),
                    &[],
                ),
            )
            .with_intent_categories(&["bug tracking"]),
            ToolDefinition::new(
                "search_bugs_global",
                "Search bugs across every store opened this session, by title \
                 substring, tags, and/or status.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "maxLength": 200},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "status": {"type": "string", "enum": STATUSES},
                    },
                }),
            )
            .with_intent_categories(&["bug tracking", "search"]),
        ]
    }

    async fn execute(&self, tool_name: &str, arguments: &Value) -> anyhow::Result<ToolResult> {
        let sanitized = match self.sanitize_arguments(tool_name, arguments) {
            Ok(args) => args,
            Err(error_result) => return Ok(error_result),
        };
        match self.handle(tool_name, &sanitized) {
            Ok(result) => Ok(result),
            Err(error_result) => Ok(error_result),
        }
    }
}
