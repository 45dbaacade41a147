//! Trade decision interface.
//!
//! A policy looks at one bar, the positions currently open, and the auxiliary
//! signals for that bar, and answers with actions. It never touches the
//! position store itself; the runner applies what it returns.

use uuid::Uuid;

use crate::domain::bar::Bar;
use crate::domain::error::ThalesError;
use crate::domain::position::{Metadata, Position, Side};
use crate::ports::signal_port::Signals;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenLong {
        price: f64,
        size: f64,
        metadata: Metadata,
    },
    OpenShort {
        price: f64,
        size: f64,
        metadata: Metadata,
    },
    Close {
        position_id: Uuid,
        price: f64,
        metadata: Metadata,
    },
    Hold,
}

impl Action {
    pub fn open(side: Side, price: f64, size: f64, metadata: Metadata) -> Self {
        match side {
            Side::Long => Action::OpenLong {
                price,
                size,
                metadata,
            },
            Side::Short => Action::OpenShort {
                price,
                size,
                metadata,
            },
        }
    }
}

pub trait TradeDecisionPolicy {
    /// Identifier recorded in run metadata.
    fn name(&self) -> &str;

    /// Signal keys that must be present for `decide` to be called. Bars
    /// missing any of them are skipped by the runner.
    fn required_signals(&self) -> &[&'static str] {
        &[]
    }

    fn decide(
        &mut self,
        bar: &Bar,
        open_positions: &[Position],
        signals: &Signals,
    ) -> Result<Vec<Action>, ThalesError>;
}
