//! Durable, filesystem-backed run storage.
//!
//! Layout per run, under `<runs_dir>/<run_id>/`:
//!   state.json     - latest snapshot, replaced atomically (write + rename)
//!   timeline.jsonl - append-only event log, one JSON object per line
//!   seq.txt        - last assigned event sequence number
//!
//! `timeline.jsonl` is the ground truth: an event is always appended
//! before `state.json` is rewritten, so a crash between the two leaves
//! the timeline ahead of the snapshot, never the reverse.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use supervisor_core::events::Event;
use supervisor_core::types::{RunId, RunState};

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize run data: {0}")]
    Serde(#[source] serde_json::Error),
    #[error("run {0} not found")]
    NotFound(RunId),
    #[error("corrupt event at line {line}: {source}")]
    CorruptEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(run_id.as_ref())
    }

    fn io_err(path: &Path, source: std::io::Error) -> RunStoreError {
        RunStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn create_run_dir(&self, run_id: &RunId) -> Result<(), RunStoreError> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).map_err(|e| Self::io_err(&dir, e))
    }

    pub fn run_exists(&self, run_id: &RunId) -> bool {
        self.run_dir(run_id).join("state.json").exists()
    }

    /// Atomically replace `state.json`: write to a sibling temp file then
    /// rename over the target, so readers never observe a partial write.
    pub fn save_state(&self, state: &RunState) -> Result<(), RunStoreError> {
        let dir = self.run_dir(&state.run_id);
        fs::create_dir_all(&dir).map_err(|e| Self::io_err(&dir, e))?;
        let target = dir.join("state.json");
        let tmp = dir.join("state.json.tmp");
        let json = serde_json::to_vec_pretty(state).map_err(RunStoreError::Serde)?;
        {
            let mut f = File::create(&tmp).map_err(|e| Self::io_err(&tmp, e))?;
            f.write_all(&json).map_err(|e| Self::io_err(&tmp, e))?;
            f.sync_all().map_err(|e| Self::io_err(&tmp, e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| Self::io_err(&target, e))?;
        Ok(())
    }

    pub fn load_state(&self, run_id: &RunId) -> Result<RunState, RunStoreError> {
        let path = self.run_dir(run_id).join("state.json");
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunStoreError::NotFound(run_id.clone())
            } else {
                Self::io_err(&path, e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(RunStoreError::Serde)
    }

    fn next_seq(&self, run_id: &RunId) -> Result<u64, RunStoreError> {
        let path = self.run_dir(run_id).join("seq.txt");
        let current = match fs::read_to_string(&path) {
            Ok(s) => s.trim().parse::<u64>().unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Self::io_err(&path, e)),
        };
        let next = current + 1;
        fs::write(&path, next.to_string()).map_err(|e| Self::io_err(&path, e))?;
        Ok(next)
    }

    /// Append one event to `timeline.jsonl`, assigning it the next
    /// sequence number. Returns the assigned event with `seq` filled in.
    pub fn append_event(&self, mut event: Event) -> Result<Event, RunStoreError> {
        let dir = self.run_dir(&event.run_id);
        fs::create_dir_all(&dir).map_err(|e| Self::io_err(&dir, e))?;
        event.seq = self.next_seq(&event.run_id)?;
        if event.at.timestamp_micros() == 0 {
            event.at = Utc::now();
        }
        let path = dir.join("timeline.jsonl");
        let line = event.to_jsonl_line().map_err(RunStoreError::Serde)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Self::io_err(&path, e))?;
        writeln!(f, "{line}").map_err(|e| Self::io_err(&path, e))?;
        f.sync_all().map_err(|e| Self::io_err(&path, e))?;
        Ok(event)
    }

    pub fn read_timeline(&self, run_id: &RunId) -> Result<Vec<Event>, RunStoreError> {
        let path = self.run_dir(run_id).join("timeline.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let f = File::open(&path).map_err(|e| Self::io_err(&path, e))?;
        let reader = BufReader::new(f);
        let mut events = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Self::io_err(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let event = Event::from_jsonl_line(&line)
                .map_err(|source| RunStoreError::CorruptEvent { line: idx + 1, source })?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn tail_events(&self, run_id: &RunId, n: usize) -> Result<Vec<Event>, RunStoreError> {
        let mut events = self.read_timeline(run_id)?;
        if events.len() > n {
            events = events.split_off(events.len() - n);
        }
        Ok(events)
    }

    pub fn list_run_ids(&self) -> Result<Vec<RunId>, RunStoreError> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.runs_dir).map_err(|e| Self::io_err(&self.runs_dir, e))? {
            let entry = entry.map_err(|e| Self::io_err(&self.runs_dir, e))?;
            if entry.path().join("state.json").exists() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(RunId::from_string(name));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supervisor_core::events::{EventPayload, EventType, PhaseTransitionPayload};
    use supervisor_core::state_machine::create_initial_state;
    use supervisor_core::types::{Phase, ScopeLock};

    fn sample_state(run_id: &RunId) -> RunState {
        create_initial_state(run_id.clone(), vec![], ScopeLock::default(), vec![], Utc::now())
    }

    #[test]
    fn save_and_load_state_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let run_id = RunId::from_string("20260731090000");
        let state = sample_state(&run_id);
        store.save_state(&state).unwrap();
        let loaded = store.load_state(&run_id).unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.phase, Phase::Init);
    }

    #[test]
    fn load_missing_run_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let err = store.load_state(&RunId::from_string("nope")).unwrap_err();
        assert!(matches!(err, RunStoreError::NotFound(_)));
    }

    #[test]
    fn append_event_assigns_increasing_seq() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let run_id = RunId::from_string("20260731090000");
        let make_event = || Event {
            seq: 0,
            run_id: run_id.clone(),
            event_type: EventType::PhaseEntered,
            at: Utc::now(),
            phase: Some(Phase::Plan),
            payload: EventPayload::PhaseTransition(PhaseTransitionPayload {
                from: None,
                to: Phase::Plan,
                reason: None,
            }),
        };
        let e1 = store.append_event(make_event()).unwrap();
        let e2 = store.append_event(make_event()).unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn read_timeline_returns_all_appended_events_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let run_id = RunId::from_string("20260731090000");
        for _ in 0..3 {
            store
                .append_event(Event {
                    seq: 0,
                    run_id: run_id.clone(),
                    event_type: EventType::WorkerInvoked,
                    at: Utc::now(),
                    phase: None,
                    payload: EventPayload::Generic(serde_json::json!({})),
                })
                .unwrap();
        }
        let events = store.read_timeline(&run_id).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[2].seq, 3);
    }

    #[test]
    fn list_run_ids_only_returns_dirs_with_state_json() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let run_id = RunId::from_string("20260731090000");
        store.save_state(&sample_state(&run_id)).unwrap();
        fs::create_dir_all(tmp.path().join("not_a_run")).unwrap();
        let ids = store.list_run_ids().unwrap();
        assert_eq!(ids, vec![run_id]);
    }

    #[test]
    fn tail_events_returns_last_n() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let run_id = RunId::from_string("20260731090000");
        for _ in 0..5 {
            store
                .append_event(Event {
                    seq: 0,
                    run_id: run_id.clone(),
                    event_type: EventType::WorkerInvoked,
                    at: Utc::now(),
                    phase: None,
                    payload: EventPayload::Generic(serde_json::json!({})),
                })
                .unwrap();
        }
        let tail = store.tail_events(&run_id, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].seq, 5);
    }
}
