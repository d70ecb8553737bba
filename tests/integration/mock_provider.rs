//! Mock provider for integration testing.
//!
//! A deterministic `Provider` that records every call and can be told to
//! fail, all in-memory with no external dependencies.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use dayahead::providers::Provider;
use dayahead::types::{IngestError, ProviderConfig, RunOptions};

pub struct MockProvider {
    name: String,
    config: ProviderConfig,
    scheduled_runs: Arc<Mutex<usize>>,
    targeted_runs: Arc<Mutex<Vec<RunOptions>>>,
    /// If set, every run returns this upstream error message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockProvider {
    pub fn new(name: &str, config: ProviderConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            scheduled_runs: Arc::new(Mutex::new(0)),
            targeted_runs: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// An enabled provider on a daily schedule covering SE3 and SE4 in EUR.
    pub fn enabled(name: &str) -> Self {
        Self::new(
            name,
            ProviderConfig::new("0 13 * * *", true, ["SE3", "SE4"], ["EUR"]),
        )
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn scheduled_runs(&self) -> usize {
        *self.scheduled_runs.lock().unwrap()
    }

    pub fn targeted_runs(&self) -> Vec<RunOptions> {
        self.targeted_runs.lock().unwrap().clone()
    }

    fn forced(&self) -> Result<(), IngestError> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(IngestError::Upstream {
                status: 500,
                body: msg.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<(), IngestError> {
        *self.scheduled_runs.lock().unwrap() += 1;
        self.forced()
    }

    async fn run_with_options(
        &self,
        _cancel: &CancellationToken,
        opts: &RunOptions,
    ) -> Result<(), IngestError> {
        self.targeted_runs.lock().unwrap().push(opts.clone());
        self.forced()
    }
}
