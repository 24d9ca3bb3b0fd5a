//! Append-only game records.
//!
//! Every match writes a stream of [`RecordEntry`] values to a [`RecordSink`] obtained from a
//! [`RecordStore`]. Records are never read back during play; [`UsageTracker::replay`] is the
//! only consumer inside this crate.
//!
//! [`UsageTracker::replay`]: crate::usage::UsageTracker::replay

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::{
    engine::StopReason,
    rules::{Action, Winner},
};

/// A seat as announced at the start of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatRecord {
    /// Position in the roster.
    pub id: usize,
    /// Display name.
    pub name: String,
    /// Model identifier.
    pub model: String,
    /// Role name.
    pub role: String,
    /// Faction the role plays for.
    pub faction: String,
}

/// One line of a game record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEntry {
    /// First line of every record.
    MatchStarted {
        /// Identifier of this record.
        match_id: String,
        /// Rule set played.
        variant: String,
        /// Seed of the match RNG.
        seed: u64,
        /// Roster with the dealt roles.
        seats: Vec<SeatRecord>,
    },
    /// A phase began.
    PhaseStarted {
        /// Round the phase belongs to.
        round: u32,
        /// Phase name.
        phase: String,
    },
    /// A validated decision, with the raw reply and its provenance.
    Action(Action),
    /// A phase was resolved.
    Resolution {
        /// Round the phase belongs to.
        round: u32,
        /// Phase name.
        phase: String,
        /// Public events, in order.
        events: Vec<String>,
        /// Seats whose last life was taken by this resolution.
        eliminated: Vec<String>,
    },
    /// Last line of a finished match.
    MatchEnded {
        /// Winner of the match.
        winner: Winner,
        /// Why it ended.
        stop_reason: StopReason,
        /// Rounds played.
        rounds: u32,
    },
    /// A model took part in a match; `round` is the batch round of that match.
    Appearance {
        /// Model identifier.
        model: String,
        /// Seat the model played.
        seat: String,
        /// Batch round of the match.
        round: u64,
    },
}

/// Where a single match writes its record.
pub trait RecordSink: Send {
    /// Appends one entry.
    ///
    /// # Errors
    /// I/O or serialization failure. Callers log it and keep playing.
    fn append(&mut self, entry: &RecordEntry) -> anyhow::Result<()>;
}

/// Hands out one sink per match.
pub trait RecordStore: Send + Sync {
    /// Opens the record stream of `match_id`.
    ///
    /// # Errors
    /// When the stream cannot be created.
    fn open(&self, match_id: &str) -> anyhow::Result<Box<dyn RecordSink>>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn append(&mut self, _entry: &RecordEntry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One JSON object per line, in `<dir>/<match_id>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    dir: PathBuf,
}

impl JsonLinesStore {
    /// Store writing into `dir`, created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the `.jsonl` files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads back one record file.
    ///
    /// # Errors
    /// I/O failure or a line that is not a [`RecordEntry`].
    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Vec<RecordEntry>> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        let mut entries = vec![];
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Reads every `.jsonl` file of the store, in file name order.
    ///
    /// # Errors
    /// See [`read`](Self::read).
    pub fn read_all(&self) -> anyhow::Result<Vec<RecordEntry>> {
        let mut paths = fs::read_dir(&self.dir)
            .with_context(|| format!("could not list {}", self.dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect::<Vec<_>>();
        paths.sort();
        let mut entries = vec![];
        for path in paths {
            entries.extend(Self::read(path)?);
        }
        Ok(entries)
    }
}

impl RecordStore for JsonLinesStore {
    fn open(&self, match_id: &str) -> anyhow::Result<Box<dyn RecordSink>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create {}", self.dir.display()))?;
        let path = self.dir.join(format!("{match_id}.jsonl"));
        let file =
            File::create(&path).with_context(|| format!("could not create {}", path.display()))?;
        Ok(Box::new(JsonLinesSink {
            writer: BufWriter::new(file),
        }))
    }
}

struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl RecordSink for JsonLinesSink {
    fn append(&mut self, entry: &RecordEntry) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        // a crashed match still leaves a readable prefix
        self.writer.flush()?;
        Ok(())
    }
}

type Streams = Arc<Mutex<BTreeMap<String, Vec<RecordEntry>>>>;

/// Keeps every stream in memory. Clones share the same streams.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    streams: Streams,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of one match, empty if unknown.
    pub fn entries(&self, match_id: &str) -> Vec<RecordEntry> {
        self.streams
            .lock()
            .map(|s| s.get(match_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Every entry of every match, streams in match id order.
    pub fn all(&self) -> Vec<RecordEntry> {
        self.streams
            .lock()
            .map(|s| s.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Match ids seen so far.
    pub fn match_ids(&self) -> Vec<String> {
        self.streams
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl RecordStore for MemoryStore {
    fn open(&self, match_id: &str) -> anyhow::Result<Box<dyn RecordSink>> {
        self.streams
            .lock()
            .map_err(|_| anyhow!("record store poisoned"))?
            .entry(match_id.to_owned())
            .or_default();
        Ok(Box::new(MemorySink {
            match_id: match_id.to_owned(),
            streams: self.streams.clone(),
        }))
    }
}

struct MemorySink {
    match_id: String,
    streams: Streams,
}

impl RecordSink for MemorySink {
    fn append(&mut self, entry: &RecordEntry) -> anyhow::Result<()> {
        self.streams
            .lock()
            .map_err(|_| anyhow!("record store poisoned"))?
            .entry(self.match_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        retry::Provenance,
        rules::{Move, SeatId},
    };

    fn sample() -> Vec<RecordEntry> {
        vec![
            RecordEntry::PhaseStarted {
                round: 1,
                phase: "vote".into(),
            },
            RecordEntry::Action(Action {
                seat: SeatId(0),
                phase: "vote".into(),
                round: 1,
                decision: Move::Vote(None),
                raw: Some("{\"choice\": \"abstain\"}".into()),
                provenance: Provenance::Genuine,
                attempts: 1,
            }),
            RecordEntry::MatchEnded {
                winner: Winner::Draw,
                stop_reason: StopReason::RoundLimit,
                rounds: 1,
            },
        ]
    }

    #[test]
    fn json_lines_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::new(dir.path().join("records"));
        let mut sink = store.open("m-1").unwrap();
        for entry in sample() {
            sink.append(&entry).unwrap();
        }
        drop(sink);

        let read = JsonLinesStore::read(store.dir().join("m-1.jsonl")).unwrap();
        assert_eq!(read, sample());
        assert_eq!(store.read_all().unwrap().len(), 3);
    }

    #[test]
    fn entries_are_tagged() {
        let line = serde_json::to_string(&RecordEntry::Appearance {
            model: "llama3".into(),
            seat: "Ann".into(),
            round: 4,
        })
        .unwrap();
        assert!(line.starts_with("{\"type\":\"appearance\""));
        let line = serde_json::to_string(&sample()[2]).unwrap();
        assert!(line.contains("\"stop_reason\":\"round-limit\""));
    }

    #[test]
    fn memory_store_is_shared() {
        let store = MemoryStore::new();
        let mut sink = store.clone().open("a").unwrap();
        sink.append(&sample()[0]).unwrap();
        assert_eq!(store.entries("a").len(), 1);
        assert_eq!(store.match_ids(), ["a"]);
        assert!(store.entries("b").is_empty());
    }
}
