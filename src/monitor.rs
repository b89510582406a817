//! The availability monitor.
//!
//! All history state is owned by a single actor task. `MonitorHandle` is the
//! cloneable front end: probes run on the caller's task and only their completed
//! results are sent to the actor, so each result is recorded and persisted as
//! one step, in completion order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::SubsecRound;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    Clock, HealthCheckResult, HistoryRecord, HistoryStore, Prober, StatusSnapshot, MAX_HISTORY,
};

enum Command {
    Record {
        result: HealthCheckResult,
        respond_to: oneshot::Sender<HealthCheckResult>,
    },
    Status {
        respond_to: oneshot::Sender<StatusSnapshot>,
    },
    Clear {
        respond_to: oneshot::Sender<()>,
    },
    Start {
        interval: Duration,
        respond_to: oneshot::Sender<bool>,
    },
    Stop {
        respond_to: oneshot::Sender<bool>,
    },
    IsMonitoring {
        respond_to: oneshot::Sender<bool>,
    },
}

struct MonitorActor {
    receiver: mpsc::UnboundedReceiver<Command>,
    // Weak so that a running ticker does not keep the actor alive on its own.
    sender: mpsc::WeakUnboundedSender<Command>,
    prober: Arc<dyn Prober>,
    store: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    history: VecDeque<HistoryRecord>,
    ticker: Option<JoinHandle<()>>,
}

impl MonitorActor {
    fn handle_command(&mut self, command: Command) {
        // Send errors only mean the requester stopped waiting. The state change stands.
        match command {
            Command::Record { result, respond_to } => {
                let _ = respond_to.send(self.record(result));
            }
            Command::Status { respond_to } => {
                let _ = respond_to.send(StatusSnapshot::from_history(
                    &self.history,
                    self.clock.now(),
                ));
            }
            Command::Clear { respond_to } => {
                self.history.clear();
                self.persist();
                info!("Status history cleared");
                let _ = respond_to.send(());
            }
            Command::Start {
                interval,
                respond_to,
            } => {
                let _ = respond_to.send(self.start(interval));
            }
            Command::Stop { respond_to } => {
                let _ = respond_to.send(self.stop());
            }
            Command::IsMonitoring { respond_to } => {
                let _ = respond_to.send(self.ticker.is_some());
            }
        }
    }

    fn record(&mut self, mut result: HealthCheckResult) -> HealthCheckResult {
        // Millisecond precision is what the store keeps.
        result.checked_at = self.clock.now().trunc_subsecs(3);
        self.history.push_front(HistoryRecord::from(result.clone()));
        self.history.truncate(MAX_HISTORY);
        self.persist();
        result
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(self.history.make_contiguous()) {
            warn!("Failed to save status history, keeping it in memory only: {e}");
        }
    }

    fn start(&mut self, interval: Duration) -> bool {
        if self.ticker.is_some() {
            return false;
        }
        if interval.is_zero() {
            warn!("Refusing to monitor with a zero interval");
            return false;
        }
        self.ticker = Some(spawn_ticker(
            self.sender.clone(),
            Arc::clone(&self.prober),
            Arc::clone(&self.clock),
            interval,
        ));
        info!("Monitoring started, probing every {interval:?}");
        true
    }

    fn stop(&mut self) -> bool {
        match self.ticker.take() {
            Some(ticker) => {
                ticker.abort();
                info!("Monitoring stopped");
                true
            }
            None => false,
        }
    }

    async fn run(&mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle_command(command);
        }
        self.stop();
    }
}

/// Fires a check every `interval`, starting one interval from now. Each check runs
/// on its own task so aborting the ticker never cancels a probe already in flight.
fn spawn_ticker(
    sender: mpsc::WeakUnboundedSender<Command>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = time::interval_at(Instant::now() + interval, interval);
        // After a stall, fire once and restart the schedule rather than catching up.
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let Some(sender) = sender.upgrade() else {
                break;
            };
            let handle = MonitorHandle {
                sender,
                prober: Arc::clone(&prober),
                clock: Arc::clone(&clock),
            };
            tokio::spawn(async move {
                handle.check_now().await;
            });
        }
    })
}

/// Front end of the availability monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::UnboundedSender<Command>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
}

impl MonitorHandle {
    /// Loads prior history from `store` and spawns the monitor. Starts Idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        prober: Arc<dyn Prober>,
        store: Arc<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let history = load_history(store.as_ref());
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut actor = MonitorActor {
            receiver,
            sender: sender.downgrade(),
            prober: Arc::clone(&prober),
            store,
            clock: Arc::clone(&clock),
            history,
            ticker: None,
        };
        tokio::spawn(async move { actor.run().await });

        Self {
            sender,
            prober,
            clock,
        }
    }

    /// Probes once, records the result and returns it.
    pub async fn check_now(&self) -> HealthCheckResult {
        let result = self.prober.probe().await;
        let recorded = self
            .request(|respond_to| Command::Record {
                result: result.clone(),
                respond_to,
            })
            .await;
        recorded.unwrap_or(result)
    }

    /// Current status, history and uptime. Never probes.
    pub async fn status(&self) -> StatusSnapshot {
        self.request(|respond_to| Command::Status { respond_to })
            .await
            .unwrap_or_else(|| {
                StatusSnapshot::from_history(
                    std::iter::empty::<&HistoryRecord>(),
                    self.clock.now(),
                )
            })
    }

    pub async fn clear_history(&self) {
        self.request(|respond_to| Command::Clear { respond_to }).await;
    }

    /// Starts periodic checks. Returns `false` if monitoring was already running.
    pub async fn start_monitoring(&self, interval: Duration) -> bool {
        self.request(|respond_to| Command::Start {
            interval,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    /// Stops periodic checks. Returns `false` if monitoring was not running.
    pub async fn stop_monitoring(&self) -> bool {
        self.request(|respond_to| Command::Stop { respond_to })
            .await
            .unwrap_or(false)
    }

    pub async fn is_monitoring(&self) -> bool {
        self.request(|respond_to| Command::IsMonitoring { respond_to })
            .await
            .unwrap_or(false)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (send, recv) = oneshot::channel();
        // If this send fails, so does the recv.await below.
        let _ = self.sender.send(command(send));
        match recv.await {
            Ok(response) => Some(response),
            Err(_) => {
                error!("Monitor actor has been killed");
                None
            }
        }
    }
}

fn load_history(store: &dyn HistoryStore) -> VecDeque<HistoryRecord> {
    match store.load() {
        Ok(mut history) => {
            history.truncate(MAX_HISTORY);
            info!("Loaded {} status records", history.len());
            history.into()
        }
        Err(e) => {
            warn!("Failed to load status history, starting empty: {e}");
            VecDeque::new()
        }
    }
}
