//! Adaptive throughput (QPI) governor.
//!
//! Rate-limited runs cut the qpi used by the next start; clean runs walk it
//! back up toward the configured nominal value.

use crate::config::QpiConfig;

#[derive(Debug, Clone)]
pub struct QpiGovernor {
    config: QpiConfig,
    /// Reduced qpi, `None` while running at nominal.
    reduced: Option<u32>,
}

impl QpiGovernor {
    pub fn new(config: QpiConfig) -> Self {
        Self {
            config,
            reduced: None,
        }
    }

    /// Qpi to launch with, never above what the operator asked for.
    pub fn effective(&self, nominal: u32) -> u32 {
        match self.reduced {
            Some(reduced) => reduced.min(nominal),
            None => nominal,
        }
    }

    pub fn is_reduced(&self) -> bool {
        self.reduced.is_some()
    }

    /// Cut throughput after a rate-limited run. Returns the new qpi.
    pub fn reduce(&mut self, nominal: u32) -> u32 {
        let current = self.effective(nominal) as f64;
        let floor = self.config.floor.max(1);
        let next = ((current * self.config.reduction_factor).floor() as u32).max(floor);
        self.reduced = Some(next);
        tracing::warn!(from = current as u32, to = next, "reducing crawler qpi after rate limiting");
        next
    }

    /// Step back toward nominal after a clean run. Returns the new qpi.
    pub fn restore(&mut self, nominal: u32) -> u32 {
        let Some(current) = self.reduced else {
            return nominal;
        };

        let stepped = (current as f64 * self.config.restore_factor).ceil() as u32;
        let next = stepped.max(current + 1);
        if next >= nominal {
            self.reduced = None;
            tracing::info!(qpi = nominal, "crawler qpi restored to nominal");
            nominal
        } else {
            self.reduced = Some(next);
            tracing::info!(from = current, to = next, "raising crawler qpi");
            next
        }
    }
}
