//! The notifier capability set

use std::fmt;

/// Identifier of a conversation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub i64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Everything a messaging client asks of its notification layer
///
/// `Context` is the platform handle the renderer needs; it is cloned into
/// deferred work, so it must be cheap to clone and thread-safe.
pub trait Notifier: Send + Sync + 'static {
    type Context: Clone + Send + Sync + 'static;
    type Recipient;

    /// Thread currently on screen (`None` when no conversation is open)
    fn set_visible_thread(&self, thread: Option<ThreadId>);

    fn set_last_desktop_activity_timestamp(&self, timestamp_ms: u64);

    fn notify_message_delivery_failed(
        &self,
        ctx: &Self::Context,
        recipient: &Self::Recipient,
        thread: ThreadId,
    );

    fn cancel_delayed_notifications(&self);

    fn clear_reminder(&self, ctx: &Self::Context);

    /// Rebuild notifications for every thread
    fn update_notification(&self, ctx: &Self::Context);

    /// Rebuild notifications after activity in one thread
    fn update_thread_notification(&self, ctx: &Self::Context, thread: ThreadId);

    /// Same as [`Notifier::update_thread_notification`], optionally alerting
    fn update_thread_notification_signal(&self, ctx: &Self::Context, thread: ThreadId, signal: bool);

    /// Rebuild notifications for a reminder pass
    fn update_reminder_notification(&self, ctx: &Self::Context, signal: bool, reminder_count: u32);
}

/// One call from the `update_*` family, captured for deferred execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRequest {
    All,
    Thread(ThreadId),
    ThreadSignal { thread: ThreadId, signal: bool },
    Reminder { signal: bool, reminder_count: u32 },
}

impl UpdateRequest {
    /// Replay the request against a notifier
    pub fn apply<N: Notifier + ?Sized>(self, notifier: &N, ctx: &N::Context) {
        match self {
            Self::All => notifier.update_notification(ctx),
            Self::Thread(thread) => notifier.update_thread_notification(ctx, thread),
            Self::ThreadSignal { thread, signal } => {
                notifier.update_thread_notification_signal(ctx, thread, signal)
            }
            Self::Reminder {
                signal,
                reminder_count,
            } => notifier.update_reminder_notification(ctx, signal, reminder_count),
        }
    }
}

impl fmt::Display for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "update(all)"),
            Self::Thread(thread) => write!(f, "update({})", thread),
            Self::ThreadSignal { thread, signal } => {
                write!(f, "update({}, signal={})", thread, signal)
            }
            Self::Reminder {
                signal,
                reminder_count,
            } => write!(f, "update(signal={}, reminders={})", signal, reminder_count),
        }
    }
}
