//! The scheduler: drives the parser from `put_changed` and coordinates the
//! scheduled/unscheduled state machine.
//!
//! The scheduler is Scheduled while `unscheduled_count == 0` and Unscheduled
//! otherwise; every reason to pause (a decoder deferral, an embedder hold)
//! contributes one count, and command processing is gated on the count being
//! zero. An optional legacy reschedule timeout recovers liveness on
//! platforms whose unblock events can get lost: it forcibly drains the
//! count, then absorbs the real unblock signals when they eventually arrive
//! so they are not double-counted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opal_protocol::{CommandBufferError, CommandError};
use tracing::{debug, trace};

use crate::buffer::TransferBuffer;
use crate::decoder::Decoder;
use crate::parser::CommandParser;
use crate::preempt::PreemptionFlag;
use crate::service::CommandBufferService;
use crate::time::{MonotonicClock, TimeSource};

/// Callback invoked on every Scheduled↔Unscheduled transition.
pub type SchedulingChangedCallback = Box<dyn FnMut(bool)>;
/// Callback invoked after each successfully executed command.
pub type CommandProcessedCallback = Box<dyn FnMut()>;

#[derive(Clone, Debug)]
pub struct GpuSchedulerConfig {
    /// Commands decoded per parser call before preemption is re-checked.
    pub commands_per_slice: u32,
    /// Arm a one-shot forced reschedule whenever the scheduler becomes
    /// unscheduled. Only for platforms whose unblock events are unreliable;
    /// the timeout recovers liveness, never correctness.
    pub enable_legacy_reschedule: bool,
    pub legacy_reschedule_timeout: Duration,
}

impl Default for GpuSchedulerConfig {
    fn default() -> Self {
        Self {
            commands_per_slice: 20,
            enable_legacy_reschedule: false,
            legacy_reschedule_timeout: Duration::from_millis(1000),
        }
    }
}

/// Diagnostics counters, in the spirit of device-model stats registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub put_changed_calls: u64,
    pub commands_processed: u64,
    pub deferrals: u64,
    pub preempt_yields: u64,
    pub forced_reschedules: u64,
}

/// Orchestrates one GPU command stream.
///
/// Owns the decoder and the (lazily created) parser; the command-buffer
/// service is passed into each operation that touches shared state. All
/// mutating methods take `&mut self`: callers serialize them by confining
/// the scheduler to one task queue, and reentrancy from inside a state
/// transition is impossible by construction.
pub struct GpuScheduler {
    cfg: GpuSchedulerConfig,
    decoder: Box<dyn Decoder>,
    clock: Arc<dyn TimeSource>,
    parser: Option<CommandParser>,

    unscheduled_count: i32,
    /// Forced-reschedule bookkeeping: how many incoming `set_scheduled(true)`
    /// calls to absorb because the timeout already cleared their counts.
    rescheduled_count: i32,
    reschedule_deadline: Option<Instant>,

    preemption_flag: Option<Arc<PreemptionFlag>>,
    /// Last observed preemption state; tracks edges for trace events only.
    was_preempted: bool,

    scheduling_changed_callback: Option<SchedulingChangedCallback>,
    command_processed_callback: Option<CommandProcessedCallback>,

    stats: SchedulerStats,
}

impl GpuScheduler {
    pub fn new(cfg: GpuSchedulerConfig, decoder: Box<dyn Decoder>) -> Self {
        Self::with_clock(cfg, decoder, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        cfg: GpuSchedulerConfig,
        decoder: Box<dyn Decoder>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            cfg,
            decoder,
            clock,
            parser: None,
            unscheduled_count: 0,
            rescheduled_count: 0,
            reschedule_deadline: None,
            preemption_flag: None,
            was_preempted: false,
            scheduling_changed_callback: None,
            command_processed_callback: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn set_preemption_flag(&mut self, flag: Arc<PreemptionFlag>) {
        self.preemption_flag = Some(flag);
    }

    pub fn set_scheduling_changed_callback(&mut self, callback: SchedulingChangedCallback) {
        self.scheduling_changed_callback = Some(callback);
    }

    pub fn set_command_processed_callback(&mut self, callback: CommandProcessedCallback) {
        self.command_processed_callback = Some(callback);
    }

    pub fn is_scheduled(&self) -> bool {
        self.unscheduled_count == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Add or remove one reason the scheduler must not run.
    ///
    /// `false` increments the unscheduled count; `true` decrements it, or is
    /// absorbed if a forced reschedule already cleared the matching count.
    /// The scheduling-changed callback fires on 0↔1 transitions only.
    pub fn set_scheduled(&mut self, scheduled: bool) {
        trace!(
            scheduled,
            unscheduled_count = self.unscheduled_count,
            rescheduled_count = self.rescheduled_count,
            "set_scheduled"
        );

        if scheduled {
            if self.rescheduled_count > 0 {
                // Stale unblock: the forced reschedule already ran these
                // commands; swallow the signal instead of double-counting.
                self.rescheduled_count -= 1;
                return;
            }
            debug_assert!(
                self.unscheduled_count > 0,
                "set_scheduled(true) without a matching set_scheduled(false)"
            );
            if self.unscheduled_count == 0 {
                return;
            }
            self.unscheduled_count -= 1;
            if self.unscheduled_count == 0 {
                self.reschedule_deadline = None;
                debug!("scheduler resumed");
                self.notify_scheduling_changed(true);
            }
        } else {
            self.unscheduled_count += 1;
            if self.unscheduled_count == 1 {
                debug!("scheduler yielded");
                if self.cfg.enable_legacy_reschedule {
                    self.reschedule_deadline =
                        Some(self.clock.now() + self.cfg.legacy_reschedule_timeout);
                }
                self.notify_scheduling_changed(false);
            }
        }
    }

    /// Timer pump. The embedder's poll loop calls this; when the legacy
    /// reschedule deadline has passed, the scheduler forces itself back to
    /// Scheduled.
    pub fn tick(&mut self) {
        let Some(deadline) = self.reschedule_deadline else {
            return;
        };
        if self.clock.now() < deadline {
            return;
        }
        self.reschedule_deadline = None;
        self.reschedule_time_out();
    }

    /// Forced reschedule after the legacy timeout.
    ///
    /// Running a batch early is safe (processing checks the schedule state
    /// before each slice); the snapshot/absorb dance keeps the real unblock
    /// signals, when they finally arrive, from driving the count negative.
    fn reschedule_time_out(&mut self) {
        debug!(
            unscheduled_count = self.unscheduled_count,
            "forced reschedule after timeout"
        );
        self.stats.forced_reschedules += 1;

        let new_count = self.unscheduled_count + self.rescheduled_count;
        self.rescheduled_count = 0;
        while self.unscheduled_count > 0 {
            self.set_scheduled(true);
        }
        self.rescheduled_count = new_count;
    }

    /// Live read of the preemption flag. `false` when no flag is configured.
    pub fn is_preempted(&mut self) -> bool {
        observe_preemption(self.preemption_flag.as_deref(), &mut self.was_preempted)
    }

    /// React to the producer advancing `put`: decode and dispatch commands
    /// until the ring is empty, an error is recorded, the decoder defers,
    /// preemption is observed, or the scheduler becomes unscheduled.
    ///
    /// Never returns an error; every failure is recorded on `service`.
    pub fn put_changed(&mut self, service: &mut dyn CommandBufferService) {
        self.stats.put_changed_calls += 1;

        let state = service.last_state();
        let Some(parser) = self.parser.as_mut() else {
            // No ring bound yet; the producer must not have committed
            // anything the service believes is unconsumed.
            debug_assert_eq!(
                state.get_offset, state.put_offset,
                "put advanced before a ring buffer was bound"
            );
            return;
        };

        if !parser.set_put(state.put_offset) {
            service.set_parse_error(CommandBufferError::OutOfBounds);
            return;
        }
        if state.error.is_some() {
            // The buffer is already broken; do not process against it.
            return;
        }
        if self.unscheduled_count > 0 {
            return;
        }

        self.decoder.begin_decoding();
        let start = self.clock.now();

        let commands_per_slice = self.cfg.commands_per_slice;
        let mut deferred = false;
        {
            let Self {
                parser,
                decoder,
                command_processed_callback,
                preemption_flag,
                was_preempted,
                stats,
                unscheduled_count,
                ..
            } = self;
            let parser = parser.as_mut().expect("parser bound above");

            while !parser.is_empty() {
                if observe_preemption(preemption_flag.as_deref(), was_preempted) {
                    stats.preempt_yields += 1;
                    break;
                }
                debug_assert_eq!(*unscheduled_count, 0);

                let result = parser.process_commands(decoder.as_mut(), commands_per_slice, || {
                    stats.commands_processed += 1;
                    if let Some(callback) = command_processed_callback.as_mut() {
                        callback();
                    }
                });

                match result {
                    Err(CommandError::Defer) => {
                        // Cursor still sits on the deferred command; do not
                        // publish progress past it.
                        deferred = true;
                        break;
                    }
                    Ok(()) => {
                        service.set_get_offset(parser.get());
                        if *unscheduled_count > 0 {
                            break;
                        }
                    }
                    Err(CommandError::Fatal(error)) => {
                        service.set_get_offset(parser.get());
                        service.set_context_lost_reason(decoder.context_lost_reason());
                        service.set_parse_error(error);
                        break;
                    }
                }
            }
        }

        if deferred {
            // Take the blocking condition's unscheduled count on the
            // decoder's behalf; the embedder re-schedules once it clears.
            self.stats.deferrals += 1;
            self.set_scheduled(false);
            debug_assert!(self.unscheduled_count > 0);
        }

        if service.last_state().error.is_none() && self.decoder.was_context_lost() {
            service.set_context_lost_reason(self.decoder.context_lost_reason());
            service.set_parse_error(CommandBufferError::LostContext);
        }

        self.decoder.end_decoding();
        self.decoder
            .add_processing_commands_time(self.clock.now().saturating_duration_since(start));
    }

    /// Bind (or rebind) the ring buffer identified by `transfer_buffer_id`,
    /// creating the parser on first use. Returns `false` if the buffer does
    /// not resolve.
    pub fn set_get_buffer(
        &mut self,
        transfer_buffer_id: i32,
        service: &mut dyn CommandBufferService,
    ) -> bool {
        let Some(buffer) = service.transfer_buffer(transfer_buffer_id) else {
            return false;
        };

        let end = buffer.len_entries() as i32;
        match self.parser.as_mut() {
            Some(parser) => parser.set_buffer(buffer, 0, end),
            None => self.parser = Some(CommandParser::new(buffer, 0, end)),
        }
        let ok = self.set_get_offset(0);
        debug_assert!(ok, "offset 0 is always in range for a fresh binding");
        true
    }

    /// Validate and set the consumer cursor. `false` means the offset was
    /// out of range (or no ring is bound) and the caller must fail the
    /// command buffer.
    pub fn set_get_offset(&mut self, offset: i32) -> bool {
        match self.parser.as_mut() {
            Some(parser) => parser.set_get(offset),
            None => false,
        }
    }

    pub fn get_offset(&self) -> i32 {
        self.parser.as_ref().map_or(0, CommandParser::get)
    }

    /// Echo a client-managed fence value onto the shared state.
    pub fn set_token(&self, service: &mut dyn CommandBufferService, token: i32) {
        service.set_token(token);
    }

    /// Resolve a transfer buffer for decoder-side access.
    pub fn shared_memory_buffer(
        &self,
        service: &dyn CommandBufferService,
        id: i32,
    ) -> Option<TransferBuffer> {
        service.transfer_buffer(id)
    }

    /// Whether the embedder's outer poll loop should keep scheduling this
    /// stream even with an empty ring.
    pub fn has_more_work(&self) -> bool {
        self.decoder.has_pending_queries() || self.decoder.has_more_idle_work()
    }

    pub fn perform_idle_work(&mut self) {
        self.decoder.process_pending_queries(false);
        self.decoder.perform_idle_work();
    }

    fn notify_scheduling_changed(&mut self, scheduled: bool) {
        if let Some(callback) = self.scheduling_changed_callback.as_mut() {
            callback(scheduled);
        }
    }
}

/// Live read of the preemption flag, tracking edges for trace output.
///
/// The flag itself provides the memory-visibility guarantee; `was_preempted`
/// never gates correctness.
fn observe_preemption(flag: Option<&PreemptionFlag>, was_preempted: &mut bool) -> bool {
    let Some(flag) = flag else {
        return false;
    };
    let preempted = flag.is_set();
    if preempted != *was_preempted {
        trace!(preempted, "preemption state changed");
        *was_preempted = preempted;
    }
    preempted
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::decoder::NoopDecoder;

    fn scheduler() -> GpuScheduler {
        GpuScheduler::new(GpuSchedulerConfig::default(), Box::new(NoopDecoder::new()))
    }

    #[test]
    fn starts_scheduled_with_clean_stats() {
        let s = scheduler();
        assert!(s.is_scheduled());
        assert_eq!(s.stats(), SchedulerStats::default());
        assert_eq!(s.get_offset(), 0);
    }

    #[test]
    fn unscheduled_count_nests() {
        let mut s = scheduler();
        s.set_scheduled(false);
        s.set_scheduled(false);
        assert!(!s.is_scheduled());

        s.set_scheduled(true);
        assert!(!s.is_scheduled());
        s.set_scheduled(true);
        assert!(s.is_scheduled());
    }

    #[test]
    fn set_get_offset_without_a_bound_ring_fails() {
        let mut s = scheduler();
        assert!(!s.set_get_offset(0));
    }

    #[test]
    fn has_more_work_reflects_decoder_hooks() {
        struct IdleWorkDecoder;
        impl Decoder for IdleWorkDecoder {
            fn do_command(&mut self, _opcode: u16, _args: &[u32]) -> opal_protocol::CommandResult {
                Ok(())
            }
            fn has_more_idle_work(&self) -> bool {
                true
            }
        }

        let s = GpuScheduler::new(GpuSchedulerConfig::default(), Box::new(IdleWorkDecoder));
        assert!(s.has_more_work());
        assert!(!scheduler().has_more_work());
    }

    #[test]
    fn perform_idle_work_polls_queries_then_runs_idle_work() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Default)]
        struct Counters {
            polls: AtomicUsize,
            idle_runs: AtomicUsize,
        }

        struct CountingDecoder(Arc<Counters>);
        impl Decoder for CountingDecoder {
            fn do_command(&mut self, _opcode: u16, _args: &[u32]) -> opal_protocol::CommandResult {
                Ok(())
            }
            fn process_pending_queries(&mut self, _did_finish: bool) -> bool {
                self.0.polls.fetch_add(1, Ordering::Relaxed);
                false
            }
            fn perform_idle_work(&mut self) {
                self.0.idle_runs.fetch_add(1, Ordering::Relaxed);
            }
        }

        let counters = Arc::new(Counters::default());
        let mut s = GpuScheduler::new(
            GpuSchedulerConfig::default(),
            Box::new(CountingDecoder(Arc::clone(&counters))),
        );

        s.perform_idle_work();
        s.perform_idle_work();
        assert_eq!(counters.polls.load(Ordering::Relaxed), 2);
        assert_eq!(counters.idle_runs.load(Ordering::Relaxed), 2);
    }
}
