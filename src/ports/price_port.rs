//! Price data port trait.
//!
//! Sources deliver raw observations one calendar-year chunk at a time;
//! `PriceSeries` stitches the chunks together and de-duplicates them.

use crate::domain::bar::RawBar;
use crate::domain::error::ThalesError;

pub trait PriceChunkPort {
    /// Years for which the source holds data for `instrument`, ascending.
    fn chunk_years(&self, instrument: &str) -> Result<Vec<i32>, ThalesError>;

    /// All raw observations in one year chunk, in source order.
    fn load_chunk(&self, instrument: &str, year: i32) -> Result<Vec<RawBar>, ThalesError>;
}
