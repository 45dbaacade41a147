//! Position persistence port trait.
//!
//! Implementations persist every `open`/`close` durably before returning and
//! keep the open and closed sets of a partition disjoint.
//!
//! Stores assume a single writer per partition. They do no cross-process
//! locking; two runners writing the same partition can corrupt it.

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::domain::error::ThalesError;
use crate::domain::position::{Metadata, Position, Side};
use crate::domain::scope::{Partition, RunScope};

pub trait PositionStore {
    fn open(
        &mut self,
        partition: &Partition,
        side: Side,
        open_time: NaiveDateTime,
        open_price: f64,
        size: f64,
        metadata: Metadata,
    ) -> Result<Position, ThalesError>;

    fn close(
        &mut self,
        partition: &Partition,
        id: Uuid,
        close_time: NaiveDateTime,
        close_price: f64,
        metadata: Metadata,
    ) -> Result<Position, ThalesError>;

    fn get(&self, partition: &Partition, id: Uuid) -> Result<Position, ThalesError>;

    /// Open positions ordered by open time.
    fn list_open(&self, partition: &Partition) -> Result<Vec<Position>, ThalesError>;

    /// Closed positions ordered by open time.
    fn list_closed(&self, partition: &Partition) -> Result<Vec<Position>, ThalesError>;

    /// Irreversibly delete every position in the partition. Live partitions
    /// are refused unless `confirm_live` is set. Returns the number removed.
    fn purge(&mut self, partition: &Partition, confirm_live: bool) -> Result<usize, ThalesError>;

    /// Backtest scopes recorded for `strategy`, oldest name first.
    fn list_runs(&self, strategy: &str) -> Result<Vec<RunScope>, ThalesError>;

    /// Merge `data` into the partition's run metadata (new keys win).
    fn save_run_metadata(
        &mut self,
        partition: &Partition,
        data: Metadata,
    ) -> Result<(), ThalesError>;

    fn run_metadata(&self, partition: &Partition) -> Result<Metadata, ThalesError>;

    /// Most recent backtest scope for `strategy`, if any.
    fn latest_run(&self, strategy: &str) -> Result<Option<RunScope>, ThalesError> {
        Ok(self.list_runs(strategy)?.pop())
    }
}
