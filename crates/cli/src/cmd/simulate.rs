//! Replay a refresh scenario through the optimized notifier
//!
//! A blocking task plays the UI thread: it wires a recording notifier
//! behind `OptimizedNotifier`, fires the scenario's refresh requests, and
//! waits for any held-back refresh to drain before reporting.

use anyhow::{Context, Result};
use clap::ValueEnum;
use notigate::{Notifier, OptimizedNotifier, ThreadId, UpdateRequest};
use notigate_core::{
    CaughtUpFlag, ChannelCatchUp, DispatchConfig, DispatchStats, ExecutorKind, SourceSlot,
    UiAffinity,
};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Extra wait after the window so spawned refreshes can finish
const DRAIN_MARGIN: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Sources stay behind for the whole burst
    Burst,
    /// Sources catch up halfway through the burst
    Flip,
    /// Sources are caught up from the start
    CaughtUp,
}

impl Scenario {
    fn describe(self) -> &'static str {
        match self {
            Self::Burst => "sources behind for every request",
            Self::Flip => "sources catch up halfway through",
            Self::CaughtUp => "sources caught up from the start",
        }
    }
}

/// Command-line overrides for one simulation run
#[derive(Debug, Clone)]
pub struct Options {
    pub scenario: Scenario,
    pub requests: u32,
    pub spacing_ms: u64,
    pub window_ms: Option<u64>,
    pub executor: Option<ExecutorKind>,
}

/// One call that reached the wrapped notifier
#[derive(Debug, Clone)]
pub struct Delivery {
    pub at: Duration,
    pub thread: String,
    pub call: String,
    pub on_ui_thread: bool,
}

/// Outcome of a simulation run
#[derive(Debug)]
pub struct Report {
    pub deliveries: Vec<Delivery>,
    pub stats: DispatchStats,
    /// Installed sources out of registered slots
    pub sources_present: usize,
    pub sources_total: usize,
    /// Gate verdict once the run settled
    pub caught_up_at_end: bool,
    /// A refresh was still waiting when the run ended
    pub still_pending: bool,
}

/// Wrapped notifier that records each call it receives
struct RecordingNotifier {
    started: Instant,
    ui_thread: thread::ThreadId,
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotifier {
    fn record(&self, call: String) {
        let current = thread::current();
        self.deliveries.lock().push(Delivery {
            at: self.started.elapsed(),
            thread: current.name().unwrap_or("<unnamed>").to_string(),
            call,
            on_ui_thread: current.id() == self.ui_thread,
        });
    }
}

impl Notifier for RecordingNotifier {
    type Context = &'static str;
    type Recipient = String;

    fn set_visible_thread(&self, thread: Option<ThreadId>) {
        let shown = thread.map_or_else(|| "none".to_string(), |t| t.to_string());
        self.record(format!("set_visible_thread({})", shown));
    }

    fn set_last_desktop_activity_timestamp(&self, timestamp_ms: u64) {
        self.record(format!("set_last_desktop_activity_timestamp({})", timestamp_ms));
    }

    fn notify_message_delivery_failed(&self, _ctx: &&'static str, recipient: &String, thread: ThreadId) {
        self.record(format!("notify_message_delivery_failed({}, {})", recipient, thread));
    }

    fn cancel_delayed_notifications(&self) {
        self.record("cancel_delayed_notifications()".to_string());
    }

    fn clear_reminder(&self, _ctx: &&'static str) {
        self.record("clear_reminder()".to_string());
    }

    fn update_notification(&self, _ctx: &&'static str) {
        self.record(UpdateRequest::All.to_string());
    }

    fn update_thread_notification(&self, _ctx: &&'static str, thread: ThreadId) {
        self.record(UpdateRequest::Thread(thread).to_string());
    }

    fn update_thread_notification_signal(&self, _ctx: &&'static str, thread: ThreadId, signal: bool) {
        self.record(UpdateRequest::ThreadSignal { thread, signal }.to_string());
    }

    fn update_reminder_notification(&self, _ctx: &&'static str, signal: bool, reminder_count: u32) {
        self.record(
            UpdateRequest::Reminder {
                signal,
                reminder_count,
            }
            .to_string(),
        );
    }
}

/// Apply command-line overrides on top of the loaded configuration
pub fn effective_config(mut config: DispatchConfig, options: &Options) -> Result<DispatchConfig> {
    if let Some(window_ms) = options.window_ms {
        config.dispatch.debounce_window_ms = window_ms;
    }
    if let Some(kind) = options.executor {
        config.executor.kind = kind;
    }
    config.validate().context("Invalid simulation settings")?;
    Ok(config)
}

/// Run the scenario on the calling thread, which acts as the UI thread
///
/// The runtime executor needs a tokio runtime entered on this thread.
pub fn replay(config: &DispatchConfig, options: &Options) -> Result<Report> {
    let started = Instant::now();
    let wrapped = RecordingNotifier {
        started,
        ui_thread: thread::current().id(),
        deliveries: Mutex::new(Vec::new()),
    };

    let poller = Arc::new(CaughtUpFlag::new("poller"));
    let channels = Arc::new(ChannelCatchUp::new("open-groups"));
    channels.track("general");
    channels.track("announcements");
    if options.scenario == Scenario::CaughtUp {
        poller.mark_caught_up();
        channels.mark_caught_up("general");
        channels.mark_caught_up("announcements");
    }

    // Third slot stands for a poller that never started
    let sources = vec![
        SourceSlot::with_source(poller.clone()),
        SourceSlot::with_source(channels.clone()),
        SourceSlot::empty(),
    ];

    let notifier = OptimizedNotifier::from_config(
        wrapped,
        sources,
        config,
        UiAffinity::capture_current(),
    )
    .context("Failed to start dispatcher")?;

    let ctx: &'static str = "desktop";
    let flip_at = options.requests / 2;
    for i in 1..=options.requests {
        if options.scenario == Scenario::Flip && i == flip_at + 1 {
            info!("Marking sources caught up before request {}", i);
            poller.mark_caught_up();
            channels.mark_caught_up("general");
            channels.mark_caught_up("announcements");
        }

        let signal = i == options.requests;
        notifier.update_thread_notification_signal(&ctx, ThreadId(i64::from(i)), signal);

        if i < options.requests {
            thread::sleep(Duration::from_millis(options.spacing_ms));
        }
    }

    thread::sleep(config.debounce_window() + DRAIN_MARGIN);

    let slots = notifier.gate().slots();
    let mut deliveries = std::mem::take(&mut *notifier.wrapped().deliveries.lock());
    deliveries.sort_by_key(|d| d.at);

    Ok(Report {
        deliveries,
        stats: notifier.stats(),
        sources_present: slots.iter().filter(|slot| slot.is_present()).count(),
        sources_total: slots.len(),
        caught_up_at_end: notifier.gate().is_caught_up(),
        still_pending: notifier.dispatcher().is_pending(),
    })
}

pub async fn run(config_path: &Path, options: Options) -> Result<()> {
    let config = DispatchConfig::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let config = effective_config(config, &options)?;

    println!("{}", "Notification Dispatch Simulation".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Scenario:   {} {}",
        format!("{:?}", options.scenario).to_lowercase().cyan(),
        format!("({})", options.scenario.describe()).dimmed()
    );
    println!(
        "Requests:   {} every {}ms",
        options.requests, options.spacing_ms
    );
    println!(
        "Window:     {}ms, executor: {}",
        config.dispatch.debounce_window_ms, config.executor.kind
    );
    println!();

    let replay_config = config.clone();
    let replay_options = options.clone();
    let report = tokio::task::spawn_blocking(move || replay(&replay_config, &replay_options))
        .await
        .context("Simulation task failed")??;

    println!("{}", "Delivered calls".bold());
    if report.deliveries.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for delivery in &report.deliveries {
        let thread_note = if delivery.on_ui_thread {
            format!("{} (UI thread!)", delivery.thread).red().to_string()
        } else {
            delivery.thread.dimmed().to_string()
        };
        println!(
            "  {:>6}ms  {}  {}",
            delivery.at.as_millis(),
            delivery.call.green(),
            thread_note
        );
    }
    println!();

    let stats = report.stats;
    println!("{}", "Dispatcher stats".bold());
    println!("  {:<12}{}", "immediate", stats.immediate);
    println!("  {:<12}{}", "debounced", stats.debounced);
    println!("  {:<12}{}", "superseded", stats.superseded);
    println!("  {:<12}{}", "fired", stats.fired);
    println!("  {:<12}{}", "cancelled", stats.cancelled);
    println!("  {:<12}{}", "panicked", stats.panicked);
    println!();

    println!("{}", "Final state".bold());
    println!(
        "  sources     {}/{} installed, {}",
        report.sources_present,
        report.sources_total,
        if report.caught_up_at_end {
            "caught up".green().to_string()
        } else {
            "behind".yellow().to_string()
        }
    );
    println!(
        "  pending     {}",
        if report.still_pending { "yes" } else { "no" }
    );
    println!();

    println!(
        "{} {} requests collapsed into {} calls",
        "✓".green(),
        options.requests,
        report.deliveries.len()
    );

    Ok(())
}
