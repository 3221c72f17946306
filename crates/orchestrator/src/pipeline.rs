//! Named checkpoints of one exchange call.
//!
//! An exchange moves through these stages strictly in order; stages that do
//! not apply (sorting in `update_neighbors`, the remote stages on a single
//! rank) are skipped, never revisited. Host-side reads of particle data are
//! only valid once the stage that produced them has been reached.

use std::fmt;

/// Stage of an exchange call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExchangeStage {
    /// Nothing done yet.
    Idle,
    /// Ghost segments reset.
    Cleared,
    /// Real particles classified and sorted by region.
    Sorted,
    /// Same-rank copies appended.
    LocalCopied,
    /// Per-rank send buffers encoded.
    Packed,
    /// Byte counts exchanged, receive buffer laid out.
    SizesAnnounced,
    /// All point-to-point transfers complete.
    Transferred,
    /// Received groups appended to their grids.
    Unpacked,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeStage::Idle => "idle",
            ExchangeStage::Cleared => "cleared",
            ExchangeStage::Sorted => "sorted",
            ExchangeStage::LocalCopied => "local-copied",
            ExchangeStage::Packed => "packed",
            ExchangeStage::SizesAnnounced => "sizes-announced",
            ExchangeStage::Transferred => "transferred",
            ExchangeStage::Unpacked => "unpacked",
        };
        f.write_str(name)
    }
}

/// Tracks the stage of one exchange call on one rank.
#[derive(Debug)]
pub struct ExchangePipeline {
    operation: &'static str,
    rank: usize,
    stage: ExchangeStage,
}

impl ExchangePipeline {
    /// Start tracking `operation` on `rank`.
    pub fn begin(operation: &'static str, rank: usize) -> Self {
        Self {
            operation,
            rank,
            stage: ExchangeStage::Idle,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> ExchangeStage {
        self.stage
    }

    /// True once `stage` has been reached.
    pub fn reached(&self, stage: ExchangeStage) -> bool {
        self.stage >= stage
    }

    /// Advance to `next`.
    ///
    /// # Panics
    /// If `next` does not come after the current stage.
    pub fn checkpoint(&mut self, next: ExchangeStage) {
        assert!(
            next > self.stage,
            "{} on rank {}: stage {} after {}",
            self.operation,
            self.rank,
            next,
            self.stage
        );
        tracing::trace!("{} rank {}: {} -> {}", self.operation, self.rank, self.stage, next);
        self.stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_and_may_skip() {
        let mut p = ExchangePipeline::begin("test", 0);
        p.checkpoint(ExchangeStage::Cleared);
        p.checkpoint(ExchangeStage::LocalCopied);
        assert!(p.reached(ExchangeStage::Sorted));
        assert!(!p.reached(ExchangeStage::Packed));
        p.checkpoint(ExchangeStage::Unpacked);
        assert_eq!(p.stage(), ExchangeStage::Unpacked);
    }

    #[test]
    #[should_panic(expected = "stage cleared after local-copied")]
    fn going_back_panics() {
        let mut p = ExchangePipeline::begin("test", 0);
        p.checkpoint(ExchangeStage::LocalCopied);
        p.checkpoint(ExchangeStage::Cleared);
    }
}
