//! # Store Error Types
//!
//! Errors raised by the lifecycle state machine and the region store.
//!
//! Pipeline failures never reach the host: the store logs them and keeps
//! its bookkeeping consistent. These types surface where a caller can act
//! on them (configuration, collaborator I/O, lifecycle misuse in tests).

use thiserror::Error;

use crate::coord::RegionCoord;
use crate::lifecycle::{SaveStage, Stage};

/// An illegal lifecycle transition was requested.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// A stage transition was attempted from the wrong stage.
    #[error("illegal stage transition to {target:?}: region is {found:?}")]
    IllegalStage {
        /// The stage the caller tried to reach.
        target: Stage,
        /// The stage the region was actually in.
        found: Stage,
    },

    /// A save was finished while no save was running.
    #[error("save finished while save stage was {found:?}")]
    IllegalSaveStage {
        /// The save stage observed.
        found: SaveStage,
    },

    /// An anchor counter would drop below zero.
    #[error("anchor counter underflow")]
    AnchorUnderflow,
}

/// Errors surfaced by the region store and its collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A lifecycle transition failed.
    #[error("region {coord}: {source}")]
    Lifecycle {
        /// Region the transition was attempted on.
        coord: RegionCoord,
        /// The underlying transition error.
        #[source]
        source: LifecycleError,
    },

    /// The simulation thread handle was already handed out.
    #[error("simulation thread already claimed for this store")]
    SimulationAlreadyClaimed,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Collaborator I/O failed.
    #[error("region i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted region failed validation.
    #[error("corrupt region {coord}: {reason}")]
    CorruptRegion {
        /// Region whose persisted unit is corrupt.
        coord: RegionCoord,
        /// What failed to validate.
        reason: String,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
