// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::aggregate;
use crate::config::RunConfig;
use crate::controller::{ApplicationLookup, ControllerClient, SnapshotQuery, TransactionSource};
use crate::directory::TransactionDirectory;
use crate::error::HarvestError;
use crate::harvester::Harvester;
use crate::sink::ResultSink;
use crate::window::plan_from_now;

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub application_id: i64,
    pub windows: usize,
    pub snapshots: usize,
    pub errors: usize,
}

/// Sequences application lookup, directory resolution, harvest, aggregation
/// and persistence. Each step fails with its own [`HarvestError`] kind; nothing
/// is persisted unless every step before the sink succeeded.
pub struct Orchestrator {
    applications: Arc<dyn ApplicationLookup>,
    transactions: Arc<dyn TransactionSource>,
    snapshots: Arc<dyn SnapshotQuery>,
    sink: Box<dyn ResultSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        applications: Arc<dyn ApplicationLookup>,
        transactions: Arc<dyn TransactionSource>,
        snapshots: Arc<dyn SnapshotQuery>,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        Orchestrator {
            applications,
            transactions,
            snapshots,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_client(client: ControllerClient, sink: Box<dyn ResultSink>) -> Self {
        let client = Arc::new(client);
        Self::new(client.clone(), client.clone(), client, sink)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, config: &RunConfig) -> Result<RunSummary, HarvestError> {
        config.validate()?;

        let requested = config.application_id.to_string();
        let application = self
            .applications
            .get_application(&requested)
            .await
            .map_err(|e| HarvestError::ApplicationResolution {
                application: requested.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            "Application {requested} resolved to {} ({})",
            application.id, application.name
        );

        let directory =
            TransactionDirectory::resolve(self.transactions.as_ref(), application.id).await?;

        info!("Calculating all time ranges...");
        let windows = plan_from_now(
            config.lookback_minutes,
            config.window_minutes,
            config.remainder_policy,
        )?;

        let harvester = Harvester::new(
            Arc::clone(&self.snapshots),
            config.max_concurrency,
            config.query_timeout,
        )
        .with_cancellation(self.cancel.clone());
        let records = harvester
            .harvest(application.id, config.lookback_minutes, &windows)
            .await?;
        let snapshots = records.len();

        let table = aggregate(records, &directory, config.counting_policy);
        self.sink.persist(&table)?;

        Ok(RunSummary {
            application_id: application.id,
            windows: windows.len(),
            snapshots,
            errors: table.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregator::{CountingPolicy, FrequencyTable};
    use crate::controller::ControllerError;
    use crate::model::{
        Application, BusinessTransaction, ErrorDetail, SnapshotFilters, SnapshotRecord,
    };
    use crate::window::TimeWindow;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeController {
        known_application: Option<i64>,
        snapshots_fail: bool,
        snapshots_called: AtomicBool,
    }

    impl FakeController {
        fn healthy() -> Self {
            FakeController {
                known_application: Some(17),
                snapshots_fail: false,
                snapshots_called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ApplicationLookup for FakeController {
        async fn get_application(&self, application: &str) -> Result<Application, ControllerError> {
            self.known_application
                .map(|id| Application {
                    id,
                    name: "storefront".to_string(),
                })
                .ok_or_else(|| ControllerError::ApplicationNotFound(application.to_string()))
        }
    }

    #[async_trait]
    impl TransactionSource for FakeController {
        async fn get_business_transactions(
            &self,
            application_id: i64,
        ) -> Result<Vec<BusinessTransaction>, ControllerError> {
            assert_eq!(application_id, 17);
            Ok(vec![BusinessTransaction {
                id: 1,
                name: "Checkout".to_string(),
            }])
        }
    }

    #[async_trait]
    impl SnapshotQuery for FakeController {
        async fn get_snapshots(
            &self,
            application_id: i64,
            _total_minutes: u32,
            _window: TimeWindow,
            _filters: SnapshotFilters,
        ) -> Result<Vec<SnapshotRecord>, ControllerError> {
            assert_eq!(application_id, 17);
            self.snapshots_called.store(true, Ordering::SeqCst);
            if self.snapshots_fail {
                return Err(ControllerError::Status {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                });
            }
            Ok(vec![SnapshotRecord {
                business_transaction_id: 1,
                error_details: vec![ErrorDetail {
                    id: 0,
                    name: "NullPointerException".to_string(),
                    value: String::new(),
                }],
            }])
        }
    }

    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Option<FrequencyTable>>>);

    impl ResultSink for MemorySink {
        fn persist(&self, table: &FrequencyTable) -> Result<(), HarvestError> {
            *self.0.lock().unwrap() = Some(table.clone());
            Ok(())
        }
    }

    fn orchestrator(
        controller: FakeController,
        sink: MemorySink,
    ) -> (Orchestrator, Arc<FakeController>) {
        let controller = Arc::new(controller);
        let orchestrator = Orchestrator::new(
            controller.clone(),
            controller.clone(),
            controller.clone(),
            Box::new(sink),
        );
        (orchestrator, controller)
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let sink = MemorySink::default();
        let (orchestrator, _) = orchestrator(FakeController::healthy(), sink.clone());
        let config = RunConfig {
            lookback_minutes: 60,
            ..RunConfig::default()
        };

        let summary = orchestrator.run(&config).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                application_id: 17,
                windows: 3,
                snapshots: 3,
                errors: 1,
            }
        );
        let table = sink.0.lock().unwrap().clone().unwrap();
        assert_eq!(table.get("NullPointerException", "Checkout"), Some(2));
    }

    #[tokio::test]
    async fn test_run_with_corrected_counting() {
        let sink = MemorySink::default();
        let (orchestrator, _) = orchestrator(FakeController::healthy(), sink.clone());
        let config = RunConfig {
            lookback_minutes: 60,
            counting_policy: CountingPolicy::FirstOccurrenceOne,
            ..RunConfig::default()
        };

        orchestrator.run(&config).await.unwrap();

        let table = sink.0.lock().unwrap().clone().unwrap();
        assert_eq!(table.get("NullPointerException", "Checkout"), Some(3));
    }

    #[tokio::test]
    async fn test_unknown_application_stops_before_harvest() {
        let sink = MemorySink::default();
        let (orchestrator, controller) = orchestrator(
            FakeController {
                known_application: None,
                ..FakeController::healthy()
            },
            sink.clone(),
        );

        let result = orchestrator.run(&RunConfig::default()).await;

        assert!(matches!(
            result,
            Err(HarvestError::ApplicationResolution { .. })
        ));
        assert!(!controller.snapshots_called.load(Ordering::SeqCst));
        assert!(sink.0.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_failure_persists_nothing() {
        let sink = MemorySink::default();
        let (orchestrator, _) = orchestrator(
            FakeController {
                snapshots_fail: true,
                ..FakeController::healthy()
            },
            sink.clone(),
        );

        let result = orchestrator.run(&RunConfig::default()).await;

        assert!(matches!(result, Err(HarvestError::Query { .. })));
        assert!(sink.0.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let sink = MemorySink::default();
        let (orchestrator, controller) = orchestrator(FakeController::healthy(), sink);
        let config = RunConfig {
            window_minutes: 0,
            ..RunConfig::default()
        };

        assert!(matches!(
            orchestrator.run(&config).await,
            Err(HarvestError::Config(_))
        ));
        assert!(!controller.snapshots_called.load(Ordering::SeqCst));
    }
}
