//! Provider registry and cron scheduler.
//!
//! The manager is the single entry point for executing a provider,
//! whether the trigger is a cron tick, a one-off admin request or the
//! bulk fetch orchestrator. It owns the dispatcher for the scheduled path.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::providers::{ensure_supported, Provider};
use crate::types::{IngestError, RunOptions};

/// Number of fields in a provider schedule (no seconds field).
const SCHEDULE_FIELDS: usize = 5;

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// Lifecycle of the dispatcher. There is no way back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::NotStarted => write!(f, "NOT_STARTED"),
            SchedulerState::Running => write!(f, "RUNNING"),
            SchedulerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ProviderManager {
    providers: Vec<Arc<dyn Provider>>,
    state: Mutex<SchedulerState>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            state: Mutex::new(SchedulerState::NotStarted),
        }
    }

    /// Append a provider. Names must be unique; lookup returns the first match.
    pub fn register_provider(&mut self, provider: Arc<dyn Provider>) {
        info!(
            provider = %provider.name(),
            enabled = provider.config().enabled,
            schedule = %provider.config().schedule,
            "Provider registered"
        );
        self.providers.push(provider);
    }

    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run a provider by name.
    ///
    /// A disabled provider is refused on every path, scheduled or not.
    /// With `opts`, the zone and currency are checked against the provider's
    /// capabilities before the targeted run.
    pub async fn run_provider(
        &self,
        cancel: &CancellationToken,
        name: &str,
        opts: Option<&RunOptions>,
    ) -> Result<(), IngestError> {
        let provider = self
            .get_provider(name)
            .ok_or_else(|| IngestError::ProviderNotFound(name.to_string()))?;

        if !provider.config().enabled {
            return Err(IngestError::ProviderDisabled(name.to_string()));
        }

        match opts {
            Some(opts) => {
                ensure_supported(provider.as_ref(), &opts.zone, &opts.currency)?;
                provider.run_with_options(cancel, opts).await
            }
            None => provider.run(cancel).await,
        }
    }

    /// Register every enabled provider with the cron dispatcher, start it and
    /// block until `cancel` fires.
    ///
    /// All schedules are validated before the dispatcher is created: one bad
    /// schedule aborts startup for every provider.
    pub async fn start_scheduler(&self, cancel: CancellationToken) -> Result<(), IngestError> {
        if self.scheduler_state() != SchedulerState::NotStarted {
            return Err(IngestError::SchedulerAlreadyStarted);
        }

        let mut jobs = Vec::new();
        for provider in self.providers.iter().filter(|p| p.config().enabled) {
            let expression = cron_expression(provider.name(), &provider.config().schedule)?;
            let job = scheduled_job(provider.clone(), &expression, cancel.clone())?;
            jobs.push((provider.name().to_string(), expression, job));
        }

        if jobs.is_empty() {
            warn!("No enabled providers, scheduler will idle");
        }

        let mut scheduler = JobScheduler::new().await?;
        for (name, expression, job) in jobs {
            scheduler.add(job).await?;
            info!(provider = %name, cron = %expression, "Provider scheduled");
        }

        scheduler.start().await?;
        self.set_state(SchedulerState::Running);
        info!(providers = self.providers.len(), "Scheduler running");

        cancel.cancelled().await;

        info!("Shutdown requested, stopping scheduler");
        let stopped = scheduler.shutdown().await;
        self.set_state(SchedulerState::Stopped);
        stopped?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduling helpers
// ---------------------------------------------------------------------------

/// Validate a 5-field schedule and expand it to the dispatcher's
/// seconds-first form.
fn cron_expression(provider: &str, schedule: &str) -> Result<String, IngestError> {
    let schedule = schedule.trim();
    if schedule.is_empty() {
        return Err(IngestError::MissingSchedule(provider.to_string()));
    }

    let fields = schedule.split_whitespace().count();
    if fields != SCHEDULE_FIELDS {
        return Err(IngestError::InvalidSchedule {
            provider: provider.to_string(),
            schedule: schedule.to_string(),
            reason: format!("expected {SCHEDULE_FIELDS} fields, got {fields}"),
        });
    }

    Ok(format!("0 {schedule}"))
}

fn scheduled_job(
    provider: Arc<dyn Provider>,
    expression: &str,
    cancel: CancellationToken,
) -> Result<Job, IngestError> {
    let name = provider.name().to_string();
    Job::new_async(expression.to_string(), move |_id, _scheduler| {
        let provider = provider.clone();
        let cancel = cancel.clone();
        Box::pin(async move {
            run_scheduled(provider.as_ref(), &cancel).await;
        })
    })
    .map_err(|e| IngestError::InvalidSchedule {
        provider: name,
        schedule: expression.to_string(),
        reason: e.to_string(),
    })
}

/// One scheduler tick. Errors are logged and never escape.
async fn run_scheduled(provider: &dyn Provider, cancel: &CancellationToken) {
    let started = Instant::now();
    info!(provider = %provider.name(), "Scheduled run starting");

    match provider.run(cancel).await {
        Ok(()) => info!(
            provider = %provider.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scheduled run finished"
        ),
        Err(e) => error!(
            provider = %provider.name(),
            error = %e,
            "Scheduled run failed"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
