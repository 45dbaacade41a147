//! One JSON document per position on the local filesystem.
//!
//! Layout under the store root:
//!
//! ```text
//! <strategy>/live/{open,closed}/<id>.json
//! <strategy>/backtests/<run>/{open,closed}/<id>.json
//! <strategy>/.../run.json
//! ```
//!
//! Every write goes to a temporary file that is synced and then renamed into
//! place. Closing writes the closed document before removing the open one,
//! so a crash in between leaves both; readers treat the closed copy as
//! authoritative.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::ThalesError;
use crate::domain::position::{Metadata, Position, Side};
use crate::domain::scope::{Partition, RunScope};
use crate::ports::position_port::PositionStore;

const OPEN_DIR: &str = "open";
const CLOSED_DIR: &str = "closed";
const BACKTESTS_DIR: &str = "backtests";
const RUN_FILE: &str = "run.json";

/// On-disk form: the position plus read-only convenience fields for people
/// auditing the files by hand. Only the position fields are read back.
#[derive(Serialize)]
struct PositionDocument<'a> {
    #[serde(flatten)]
    position: &'a Position,
    is_open: bool,
    delta: Option<f64>,
    strategy: &'a str,
    scope: &'a str,
}

pub struct FilePositionStore {
    root: PathBuf,
}

fn storage_err(path: &Path, reason: impl ToString) -> ThalesError {
    ThalesError::Storage {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Write `bytes` to `path` via a synced temporary file and rename.
fn write_durably(path: &Path, bytes: &[u8]) -> Result<(), ThalesError> {
    let parent = path
        .parent()
        .ok_or_else(|| storage_err(path, "path has no parent directory"))?;
    fs::create_dir_all(parent).map_err(|e| storage_err(parent, e))?;

    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| storage_err(&tmp, e))?;
    file.write_all(bytes).map_err(|e| storage_err(&tmp, e))?;
    file.sync_all().map_err(|e| storage_err(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| storage_err(path, e))?;

    // Persist the rename itself. Not every platform can open a directory.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn read_position(path: &Path) -> Result<Position, ThalesError> {
    let text = fs::read_to_string(path).map_err(|e| storage_err(path, e))?;
    let position: Position = serde_json::from_str(&text).map_err(|e| storage_err(path, e))?;
    position.check_record().map_err(|reason| storage_err(path, reason))?;
    Ok(position)
}

/// Ids of the `<uuid>.json` documents in `dir`; a missing directory is empty.
fn document_ids(dir: &Path) -> Result<Vec<Uuid>, ThalesError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_err(dir, e)),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| storage_err(dir, e))?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(id) = name_str
            .strip_suffix(".json")
            .and_then(|stem| Uuid::parse_str(stem).ok())
        {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn sort_positions(positions: &mut [Position]) {
    positions.sort_by(|a, b| {
        a.open_time()
            .cmp(&b.open_time())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

impl FilePositionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn strategy_dir(&self, strategy: &str) -> PathBuf {
        self.root.join(strategy)
    }

    fn scope_dir(&self, partition: &Partition) -> PathBuf {
        let base = self.strategy_dir(partition.strategy());
        match partition.scope() {
            RunScope::Live => base.join("live"),
            RunScope::Backtest(name) => base.join(BACKTESTS_DIR).join(name),
        }
    }

    fn doc_path(&self, partition: &Partition, state: &str, id: Uuid) -> PathBuf {
        self.scope_dir(partition)
            .join(state)
            .join(format!("{}.json", id))
    }

    fn write_position(&self, partition: &Partition, position: &Position) -> Result<(), ThalesError> {
        let state = if position.is_open() { OPEN_DIR } else { CLOSED_DIR };
        let path = self.doc_path(partition, state, position.id());
        let doc = PositionDocument {
            position,
            is_open: position.is_open(),
            delta: position.delta(),
            strategy: partition.strategy(),
            scope: partition.scope().name(),
        };
        let text = serde_json::to_string_pretty(&doc).map_err(|e| storage_err(&path, e))?;
        write_durably(&path, text.as_bytes())
    }

    fn read_state(&self, partition: &Partition, state: &str) -> Result<Vec<Position>, ThalesError> {
        let dir = self.scope_dir(partition).join(state);
        let mut positions = document_ids(&dir)?
            .into_iter()
            .map(|id| read_position(&dir.join(format!("{}.json", id))))
            .collect::<Result<Vec<_>, _>>()?;
        sort_positions(&mut positions);
        Ok(positions)
    }

    fn not_found(partition: &Partition, id: Uuid) -> ThalesError {
        ThalesError::PositionNotFound {
            id: id.to_string(),
            partition: partition.to_string(),
        }
    }
}

impl PositionStore for FilePositionStore {
    fn open(
        &mut self,
        partition: &Partition,
        side: Side,
        open_time: NaiveDateTime,
        open_price: f64,
        size: f64,
        metadata: Metadata,
    ) -> Result<Position, ThalesError> {
        let position = Position::open(side, open_time, open_price, size, metadata)?;
        self.write_position(partition, &position)?;
        info!(
            %partition,
            id = %position.id(),
            %side,
            %open_time,
            open_price,
            size,
            "opened position"
        );
        Ok(position)
    }

    fn close(
        &mut self,
        partition: &Partition,
        id: Uuid,
        close_time: NaiveDateTime,
        close_price: f64,
        metadata: Metadata,
    ) -> Result<Position, ThalesError> {
        if self.doc_path(partition, CLOSED_DIR, id).exists() {
            return Err(ThalesError::PositionAlreadyClosed { id: id.to_string() });
        }
        let open_path = self.doc_path(partition, OPEN_DIR, id);
        if !open_path.exists() {
            return Err(Self::not_found(partition, id));
        }

        let mut position = read_position(&open_path)?;
        position.close(close_time, close_price, metadata)?;
        self.write_position(partition, &position)?;
        fs::remove_file(&open_path).map_err(|e| storage_err(&open_path, e))?;

        info!(
            %partition,
            %id,
            %close_time,
            close_price,
            delta = position.delta().unwrap_or_default(),
            "closed position"
        );
        Ok(position)
    }

    fn get(&self, partition: &Partition, id: Uuid) -> Result<Position, ThalesError> {
        for state in [CLOSED_DIR, OPEN_DIR] {
            let path = self.doc_path(partition, state, id);
            if path.exists() {
                return read_position(&path);
            }
        }
        Err(Self::not_found(partition, id))
    }

    fn list_open(&self, partition: &Partition) -> Result<Vec<Position>, ThalesError> {
        let closed: HashSet<Uuid> = document_ids(&self.scope_dir(partition).join(CLOSED_DIR))?
            .into_iter()
            .collect();
        let mut open = self.read_state(partition, OPEN_DIR)?;
        open.retain(|p| {
            let stale = closed.contains(&p.id());
            if stale {
                warn!(%partition, id = %p.id(), "ignoring open document of a closed position");
            }
            !stale
        });
        Ok(open)
    }

    fn list_closed(&self, partition: &Partition) -> Result<Vec<Position>, ThalesError> {
        self.read_state(partition, CLOSED_DIR)
    }

    fn purge(&mut self, partition: &Partition, confirm_live: bool) -> Result<usize, ThalesError> {
        if partition.scope().is_live() && !confirm_live {
            return Err(ThalesError::LivePurgeRefused {
                strategy: partition.strategy().to_string(),
            });
        }

        let dir = self.scope_dir(partition);
        let mut ids: HashSet<Uuid> = document_ids(&dir.join(OPEN_DIR))?.into_iter().collect();
        ids.extend(document_ids(&dir.join(CLOSED_DIR))?);

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| storage_err(&dir, e))?;
        }
        info!(%partition, removed = ids.len(), "purged positions");
        Ok(ids.len())
    }

    fn list_runs(&self, strategy: &str) -> Result<Vec<RunScope>, ThalesError> {
        let dir = self.strategy_dir(strategy).join(BACKTESTS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&dir, e)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage_err(&dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match RunScope::backtest(name) {
                Ok(scope) => runs.push(scope),
                Err(e) => warn!(dir = %dir.display(), error = %e, "skipping run directory"),
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn save_run_metadata(&mut self, partition: &Partition, data: Metadata) -> Result<(), ThalesError> {
        let mut merged = self.run_metadata(partition)?;
        merged.extend(data);
        let path = self.scope_dir(partition).join(RUN_FILE);
        let text = serde_json::to_string_pretty(&merged).map_err(|e| storage_err(&path, e))?;
        write_durably(&path, text.as_bytes())
    }

    fn run_metadata(&self, partition: &Partition) -> Result<Metadata, ThalesError> {
        let path = self.scope_dir(partition).join(RUN_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| storage_err(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(storage_err(&path, e)),
        }
    }
}
