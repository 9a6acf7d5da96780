//! Append-only JSONL event logs with one-generation rotation.
//!
//! Each session owns `<sessions_dir>/<id>/events.jsonl`. When the live
//! file crosses [`MAX_LOG_BYTES`] it is rotated to `events.jsonl.1`,
//! replacing any previous generation. Readers replay the rotated file
//! first so order survives rotation; malformed lines are skipped.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use minder_protocol::{EventEnvelope, EventType};

/// Rotation threshold for the live log file.
pub const MAX_LOG_BYTES: u64 = 5_000_000;

/// Path of the live log file for a session.
pub fn log_path(sessions_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir.join(session_id).join("events.jsonl")
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".1");
    PathBuf::from(os)
}

/// Append one event to the session log, rotating first if needed.
pub fn append_event(sessions_dir: &Path, event: &EventEnvelope) -> Result<()> {
    let path = log_path(sessions_dir, &event.session_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating event log directory: {}", parent.display()))?;
    }

    if let Ok(meta) = fs::metadata(&path)
        && meta.len() > MAX_LOG_BYTES
    {
        let rotated = rotated_path(&path);
        let _ = fs::remove_file(&rotated);
        fs::rename(&path, &rotated)
            .with_context(|| format!("rotating event log: {}", path.display()))?;
    }

    let line = serde_json::to_string(event).context("encoding event")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening event log: {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Read persisted events for a session, oldest first.
///
/// Replays the rotated generation before the live file. Events with
/// `seq <= since_seq` are skipped, as are blank or malformed lines.
pub fn read_events(
    sessions_dir: &Path,
    session_id: &str,
    since_seq: u64,
    limit: Option<usize>,
) -> Vec<EventEnvelope> {
    let path = log_path(sessions_dir, session_id);
    let mut events = Vec::new();
    for candidate in [rotated_path(&path), path] {
        if read_file_into(&candidate, since_seq, limit, &mut events) {
            break;
        }
    }
    events
}

/// Returns true once `limit` is reached.
fn read_file_into(
    path: &Path,
    since_seq: u64,
    limit: Option<usize>,
    events: &mut Vec<EventEnvelope>,
) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            return false;
        };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<EventEnvelope>(&line) else {
            continue;
        };
        if event.seq > 0 && event.seq <= since_seq {
            continue;
        }
        events.push(event);
        if let Some(limit) = limit
            && events.len() >= limit
        {
            return true;
        }
    }
    false
}

/// Highest sequence number present in the session's log files.
///
/// Used to resume numbering after a restart so replay stays gap-free.
pub fn last_seq(sessions_dir: &Path, session_id: &str) -> u64 {
    read_events(sessions_dir, session_id, 0, None)
        .iter()
        .map(|event| event.seq)
        .max()
        .unwrap_or(0)
}

/// Aggregated token and cost usage for a session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

/// Sum `metadata` events keyed `tokens` and `cost` across the log.
///
/// Malformed lines and unknown keys are ignored; cost is rounded to four
/// decimal places.
pub fn session_usage(sessions_dir: &Path, session_id: &str) -> SessionUsage {
    let mut input_tokens: u64 = 0;
    let mut output_tokens: u64 = 0;
    let mut total_cost: f64 = 0.0;

    for event in read_events(sessions_dir, session_id, 0, None) {
        if event.event_type != EventType::Metadata {
            continue;
        }
        let Some(key) = event.data.get("key").and_then(|v| v.as_str()) else {
            continue;
        };
        match key {
            "tokens" => {
                if let Some(value) = event.data.get("value") {
                    input_tokens += value.get("input").and_then(|v| v.as_u64()).unwrap_or(0);
                    output_tokens += value.get("output").and_then(|v| v.as_u64()).unwrap_or(0);
                }
            }
            "cost" => {
                total_cost += event
                    .data
                    .get("value")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
            }
            _ => {}
        }
    }

    SessionUsage {
        input_tokens,
        output_tokens,
        total_cost_usd: (total_cost * 10_000.0).round() / 10_000.0,
    }
}

/// Remove a session's log directory entirely.
pub fn remove_session_logs(sessions_dir: &Path, session_id: &str) {
    let dir = sessions_dir.join(session_id);
    let _ = fs::remove_dir_all(dir);
}
