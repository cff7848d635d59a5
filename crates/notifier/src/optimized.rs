//! Catch-up aware notifier decorator
//!
//! While sync sources are still fetching history, every incoming message
//! would trigger a notification rebuild. The decorator holds those
//! rebuilds back and runs only the last one once the burst settles. Once
//! every source has caught up, refreshes go straight through.

use crate::notifier::{Notifier, ThreadId, UpdateRequest};
use notigate_core::{
    CatchUpGate, DebouncedDispatcher, DispatchConfig, DispatchStats, ExecError, Job, SourceSlot,
    UiAffinity,
};
use std::sync::Arc;
use tracing::debug;

/// Wraps a notifier, gating its `update_*` family on catch-up state
pub struct OptimizedNotifier<N: Notifier> {
    wrapped: Arc<N>,
    gate: CatchUpGate,
    dispatcher: DebouncedDispatcher,
}

impl<N: Notifier> OptimizedNotifier<N> {
    pub fn new(wrapped: N, gate: CatchUpGate, dispatcher: DebouncedDispatcher) -> Self {
        Self {
            wrapped: Arc::new(wrapped),
            gate,
            dispatcher,
        }
    }

    /// Wire up from configuration
    ///
    /// Call on the UI thread: `affinity` is normally
    /// [`UiAffinity::capture_current`].
    pub fn from_config(
        wrapped: N,
        sources: Vec<SourceSlot>,
        config: &DispatchConfig,
        affinity: UiAffinity,
    ) -> Result<Self, ExecError> {
        let gate = CatchUpGate::new(sources).with_slow_threshold(config.slow_source_threshold());
        let ctx = config.build_context(affinity)?;
        let dispatcher = DebouncedDispatcher::new(config.debounce_window(), ctx)?;
        Ok(Self::new(wrapped, gate, dispatcher))
    }

    pub fn wrapped(&self) -> &N {
        &self.wrapped
    }

    pub fn gate(&self) -> &CatchUpGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &DebouncedDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Drop a held-back refresh without running it
    pub fn cancel_pending_updates(&self) -> bool {
        self.dispatcher.cancel_pending()
    }

    fn route(&self, ctx: &N::Context, request: UpdateRequest) {
        let wrapped = self.wrapped.clone();
        let ctx = ctx.clone();
        let task: Job = Box::new(move || request.apply(wrapped.as_ref(), &ctx));

        if self.gate.is_caught_up() {
            debug!("Sources caught up, running {} now", request);
            self.dispatcher.run_now(task);
        } else {
            debug!("Sources still catching up, deferring {}", request);
            self.dispatcher.run_debounced(task);
        }
    }
}

impl<N: Notifier> Notifier for OptimizedNotifier<N> {
    type Context = N::Context;
    type Recipient = N::Recipient;

    fn set_visible_thread(&self, thread: Option<ThreadId>) {
        self.wrapped.set_visible_thread(thread);
    }

    fn set_last_desktop_activity_timestamp(&self, timestamp_ms: u64) {
        self.wrapped.set_last_desktop_activity_timestamp(timestamp_ms);
    }

    fn notify_message_delivery_failed(
        &self,
        ctx: &Self::Context,
        recipient: &Self::Recipient,
        thread: ThreadId,
    ) {
        self.wrapped.notify_message_delivery_failed(ctx, recipient, thread);
    }

    fn cancel_delayed_notifications(&self) {
        self.wrapped.cancel_delayed_notifications();
    }

    fn clear_reminder(&self, ctx: &Self::Context) {
        self.wrapped.clear_reminder(ctx);
    }

    fn update_notification(&self, ctx: &Self::Context) {
        self.route(ctx, UpdateRequest::All);
    }

    fn update_thread_notification(&self, ctx: &Self::Context, thread: ThreadId) {
        self.route(ctx, UpdateRequest::Thread(thread));
    }

    fn update_thread_notification_signal(&self, ctx: &Self::Context, thread: ThreadId, signal: bool) {
        self.route(ctx, UpdateRequest::ThreadSignal { thread, signal });
    }

    fn update_reminder_notification(&self, ctx: &Self::Context, signal: bool, reminder_count: u32) {
        self.route(
            ctx,
            UpdateRequest::Reminder {
                signal,
                reminder_count,
            },
        );
    }
}

impl<N: Notifier> std::fmt::Debug for OptimizedNotifier<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedNotifier")
            .field("gate", &self.gate)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
