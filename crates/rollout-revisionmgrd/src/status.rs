//! Conflict-retrying status updates.
//!
//! Every write to the operator status goes through [`update_status`]: read
//! the singleton, apply the mutators to a copy and write it back with the
//! version token that was read. A stale token re-reads and re-applies.

use std::time::Duration;

use rand::Rng;
use rollout_common::{
    set_condition, Condition, ConditionStatus, OperatorStatus, StatusClient,
};
use tracing::{debug, warn};

use crate::error::{ControllerError, ControllerResult};
use crate::types::FAILING_CONDITION;

/// A single change applied to a copy of the status.
pub type UpdateStatusFn = Box<dyn Fn(&mut OperatorStatus) -> ControllerResult<()> + Send + Sync>;

/// Backoff between conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictBackoff {
    /// Total attempts, including the first.
    pub steps: u32,
    /// Delay after the first conflict.
    pub initial: Duration,
    /// Multiplier applied after each conflict.
    pub factor: f64,
    /// Up to this fraction of the delay is added at random.
    pub jitter: f64,
}

impl ConflictBackoff {
    /// Delay before attempt `attempt + 1`, without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.initial.mul_f64(self.factor.powi(exponent))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        base + base.mul_f64(extra)
    }
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }
}

/// Applies `mutators` to the stored status with the default backoff.
///
/// Returns the resulting status and whether anything was written.
pub async fn update_status(
    client: &dyn StatusClient,
    mutators: &[UpdateStatusFn],
) -> ControllerResult<(OperatorStatus, bool)> {
    update_status_with_backoff(client, mutators, ConflictBackoff::default()).await
}

/// Applies `mutators` to the stored status, retrying stale writes.
///
/// Mutator errors are returned immediately. If the mutated status equals
/// the stored one nothing is written.
pub async fn update_status_with_backoff(
    client: &dyn StatusClient,
    mutators: &[UpdateStatusFn],
    backoff: ConflictBackoff,
) -> ControllerResult<(OperatorStatus, bool)> {
    let mut attempt = 0;
    loop {
        let snapshot = client.get().await?;
        let mut updated = snapshot.status.clone();
        for mutate in mutators {
            mutate(&mut updated)?;
        }

        if updated == snapshot.status {
            return Ok((updated, false));
        }

        match client.update_status(&snapshot.version, updated.clone()).await {
            Ok(version) => {
                debug!(version = %version, "Status updated");
                return Ok((updated, true));
            }
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Status update conflicted; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Sets (or replaces) a condition.
pub fn update_condition_fn(condition: Condition) -> UpdateStatusFn {
    Box::new(move |status| {
        set_condition(&mut status.conditions, condition.clone());
        Ok(())
    })
}

/// Marks the controller failing with the given reason and message.
pub fn set_failing_fn(reason: &str, message: impl Into<String>) -> UpdateStatusFn {
    update_condition_fn(
        Condition::new(FAILING_CONDITION, ConditionStatus::True)
            .with_reason(reason)
            .with_message(message),
    )
}

/// Marks the controller not failing.
pub fn clear_failing_fn() -> UpdateStatusFn {
    update_condition_fn(Condition::new(FAILING_CONDITION, ConditionStatus::False))
}

/// Advances `latest_available_revision` to `revision`.
///
/// Fails with [`ControllerError::RevisionConflict`] if the stored revision
/// is already at or past `revision`.
pub fn advance_revision_fn(revision: i32) -> UpdateStatusFn {
    Box::new(move |status| {
        if status.latest_available_revision >= revision {
            return Err(ControllerError::RevisionConflict {
                current: status.latest_available_revision,
                attempted: revision,
            });
        }
        status.latest_available_revision = revision;
        Ok(())
    })
}
