//! Process-wide job status table.
//!
//! Every stage reports progress here and the console and HTTP surfaces read
//! it. Records are keyed by the task's `src`, created lazily on first write
//! and never removed.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Task progress, in pipeline order. `Error` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    Error,
    Wait,
    Video,
    Misc,
    Mux,
    Final,
    Done,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Wait => "WAIT",
            Self::Video => "VIDEO",
            Self::Misc => "MISC",
            Self::Mux => "MUX",
            Self::Final => "FINAL",
            Self::Done => "DONE",
        }
    }

    /// `Error` and `Done` end a task's life.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Done)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub id: u64,
    pub src: String,
    pub code: StatusCode,
    pub desc: String,
}

/// Concurrent status table.
///
/// Id allocation uses its own lock, which is only ever taken while a table
/// shard lock may be held and never the other way around.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    table: DashMap<String, Status>,
    next_id: Mutex<u64>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    fn entry(&self, src: &str) -> RefMut<'_, String, Status> {
        if let Some(existing) = self.table.get_mut(src) {
            return existing;
        }
        self.table
            .entry(src.to_string())
            .or_insert_with(|| Status {
                id: self.allocate_id(),
                src: src.to_string(),
                code: StatusCode::Wait,
                desc: String::new(),
            })
    }

    pub fn set_status_code(&self, src: &str, code: StatusCode) {
        self.entry(src).code = code;
    }

    pub fn set_status_desc(&self, src: &str, desc: impl Into<String>) {
        self.entry(src).desc = desc.into();
    }

    /// Update code and description together.
    pub fn set_status(&self, src: &str, code: StatusCode, desc: impl Into<String>) {
        let mut status = self.entry(src);
        status.code = code;
        status.desc = desc.into();
    }

    pub fn get(&self, src: &str) -> Option<Status> {
        self.table.get(src).map(|s| s.clone())
    }

    /// Whether `src` belongs to a task that is still in the pipeline.
    pub fn is_live(&self, src: &str) -> bool {
        self.table
            .get(src)
            .is_some_and(|s| !s.code.is_terminal())
    }

    /// Snapshot of every record, ordered by id.
    pub fn get_all(&self) -> Vec<Status> {
        let mut all: Vec<Status> = self.table.iter().map(|s| s.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// JSON object keyed by `src`.
    pub fn get_all_serialized(&self) -> serde_json::Result<String> {
        let map: BTreeMap<String, Status> = self
            .get_all()
            .into_iter()
            .map(|s| (s.src.clone(), s))
            .collect();
        serde_json::to_string(&map)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Plain-text table for the console.
    pub fn render_table(&self) -> String {
        let all = self.get_all();
        let src_width = all
            .iter()
            .map(|s| s.src.chars().count())
            .max()
            .unwrap_or(0)
            .max("SOURCE".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:<5} {:<src_width$} {:<6} DETAIL", "ID", "SOURCE", "CODE");
        for status in &all {
            let _ = writeln!(
                out,
                "{:<5} {:<src_width$} {:<6} {}",
                status.id, status.src, status.code, status.desc
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn codes_are_ordered_along_the_pipeline() {
        assert!(StatusCode::Error < StatusCode::Wait);
        assert!(StatusCode::Wait < StatusCode::Video);
        assert!(StatusCode::Video < StatusCode::Misc);
        assert!(StatusCode::Misc < StatusCode::Mux);
        assert!(StatusCode::Mux < StatusCode::Final);
        assert!(StatusCode::Final < StatusCode::Done);
    }

    #[test]
    fn records_are_created_lazily_with_increasing_ids() {
        let registry = StatusRegistry::new();
        registry.set_status_desc("b.mkv", "waiting");
        registry.set_status_code("a.mkv", StatusCode::Video);
        registry.set_status_code("b.mkv", StatusCode::Wait);

        let all = registry.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].src, "b.mkv");
        assert_eq!(all[0].id, 0);
        assert_eq!(all[0].desc, "waiting");
        assert_eq!(all[1].src, "a.mkv");
        assert_eq!(all[1].id, 1);
        assert_eq!(all[1].code, StatusCode::Video);
    }

    #[test]
    fn set_status_updates_both_fields() {
        let registry = StatusRegistry::new();
        registry.set_status("a.mkv", StatusCode::Error, "unknown video codec: vp9");
        let status = registry.get("a.mkv").unwrap();
        assert_eq!(status.code, StatusCode::Error);
        assert_eq!(status.desc, "unknown video codec: vp9");
        assert!(!registry.is_live("a.mkv"));
        assert!(registry.get("b.mkv").is_none());
    }

    #[test]
    fn liveness_follows_terminal_codes() {
        let registry = StatusRegistry::new();
        registry.set_status("a.mkv", StatusCode::Mux, "muxing mkv");
        assert!(registry.is_live("a.mkv"));
        registry.set_status("a.mkv", StatusCode::Done, "everything is finished");
        assert!(!registry.is_live("a.mkv"));
    }

    #[test]
    fn serialized_form_is_keyed_by_source() {
        let registry = StatusRegistry::new();
        registry.set_status("a.mkv", StatusCode::Wait, "waiting");
        let json: serde_json::Value =
            serde_json::from_str(&registry.get_all_serialized().unwrap()).unwrap();
        assert_eq!(json["a.mkv"]["code"], "WAIT");
        assert_eq!(json["a.mkv"]["desc"], "waiting");
        assert_eq!(json["a.mkv"]["id"], 0);
    }

    #[test]
    fn table_lists_every_record() {
        let registry = StatusRegistry::new();
        registry.set_status("a.mkv", StatusCode::Video, "hevc encoding frame: 10/100");
        let table = registry.render_table();
        assert!(table.starts_with("ID"));
        assert!(table.contains("a.mkv"));
        assert!(table.contains("VIDEO"));
        assert!(table.contains("hevc encoding frame: 10/100"));
    }

    #[test]
    fn concurrent_writers_get_unique_ids() {
        let registry = Arc::new(StatusRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry.set_status(&format!("{t}-{i}.mkv"), StatusCode::Wait, "waiting");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut ids: Vec<u64> = registry.get_all().iter().map(|s| s.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(ids, (0..400).collect::<Vec<_>>());
    }
}
