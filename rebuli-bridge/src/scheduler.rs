use std::time::Duration;

use rebuli_core::EntityKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::PipelineInput;
use crate::registry::DeviceRecord;

/// Handle to an armed auto-off timer, stored on its [`DeviceRecord`].
#[derive(Debug)]
pub struct AutoOffTimer {
    generation: u64,
    cancel: CancellationToken,
}

impl AutoOffTimer {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the timer. Safe to call any number of times, also after it fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Sent back into the pipeline when a timer runs out uninterrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoOffExpired {
    pub key: EntityKey,
    pub generation: u64,
}

/// What [`AutoOffScheduler::on_state_change`] did to a record's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerChange {
    /// The record is not a self-resetting binary device.
    NotApplicable,
    /// Any previous timer was cancelled and none was armed.
    Cleared,
    /// A new timer was armed with this generation.
    Armed(u64),
}

/// Arms and cancels per-device auto-off timers.
///
/// Timers never touch device state themselves: on expiry they send an
/// [`AutoOffExpired`] through the pipeline input channel, and the pipeline
/// applies it only if the generation still matches the record's timer.
pub struct AutoOffScheduler {
    tx: mpsc::Sender<PipelineInput>,
    next_generation: u64,
}

impl AutoOffScheduler {
    pub fn new(tx: mpsc::Sender<PipelineInput>) -> Self {
        Self {
            tx,
            next_generation: 0,
        }
    }

    pub fn on_state_change(
        &mut self,
        record: &mut DeviceRecord,
        new_value: bool,
        timeout: Duration,
    ) -> TimerChange {
        if !record.kind().is_binary() || !record.auto_off() {
            return TimerChange::NotApplicable;
        }

        Self::cancel(record);

        if !new_value {
            return TimerChange::Cleared;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        let expired = AutoOffExpired {
            key: record.key().clone(),
            generation,
        };
        let cancelled = cancel.clone();
        let tx = self.tx.clone();
        // the deadline is fixed here, not when the task first runs
        let delay = tokio::time::sleep(timeout);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(entity = %expired.key, generation, "Auto-off timer cancelled");
                }
                _ = delay => {
                    debug!(entity = %expired.key, generation, "Auto-off timer expired");
                    if tx.send(PipelineInput::AutoOff(expired)).await.is_err() {
                        debug!("Pipeline closed before auto-off could be delivered");
                    }
                }
            }
        });

        record.timer = Some(AutoOffTimer { generation, cancel });
        debug!(
            entity = %record.key(),
            generation,
            timeout_ms = timeout.as_millis() as u64,
            "Auto-off timer armed"
        );

        TimerChange::Armed(generation)
    }

    /// Cancel and clear the record's timer. Returns whether one was active.
    pub fn cancel(record: &mut DeviceRecord) -> bool {
        match record.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Consume an expiry for `record`.
    ///
    /// Returns `true` and clears the timer only if the expiry belongs to the
    /// timer currently armed on the record; stale expiries return `false`.
    pub fn take_expired(record: &mut DeviceRecord, generation: u64) -> bool {
        match &record.timer {
            Some(timer) if timer.generation == generation => {
                record.timer = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all<'a>(records: impl Iterator<Item = &'a mut DeviceRecord>) -> usize {
        records
            .map(|record| Self::cancel(record))
            .filter(|cancelled| *cancelled)
            .count()
    }
}
