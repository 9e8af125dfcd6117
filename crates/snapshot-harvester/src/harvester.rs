// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fans one snapshot query per window out to the controller and joins the results.
//!
//! A window is only dispatched once a permit is free, so at most
//! `max_concurrency` queries are ever in flight. Finished tasks hand their
//! records back through the `JoinSet`; the dispatcher is the only writer of the
//! merged collection. The first failure aborts everything still running and no
//! records are returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::SnapshotQuery;
use crate::error::HarvestError;
use crate::model::{SnapshotFilters, SnapshotRecord};
use crate::window::TimeWindow;

type QueryOutcome = Result<Vec<SnapshotRecord>, HarvestError>;

pub struct Harvester {
    query: Arc<dyn SnapshotQuery>,
    max_concurrency: usize,
    query_timeout: Duration,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        query: Arc<dyn SnapshotQuery>,
        max_concurrency: usize,
        query_timeout: Duration,
    ) -> Self {
        Harvester {
            query,
            max_concurrency: max_concurrency.max(1),
            query_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the harvest when `cancel` fires. In-flight queries are aborted and
    /// the harvest returns [`HarvestError::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn harvest(
        &self,
        application_id: i64,
        total_minutes: u32,
        windows: &[TimeWindow],
    ) -> Result<Vec<SnapshotRecord>, HarvestError> {
        info!("Getting all snapshots for the last {total_minutes} minutes, please wait...");

        let gate = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<QueryOutcome> = JoinSet::new();
        let mut in_flight: HashMap<Id, TimeWindow> = HashMap::new();
        let mut records = Vec::new();

        let result: Result<(), HarvestError> = async {
            for (i, window) in windows.iter().copied().enumerate() {
                let permit = self
                    .admit(&gate, &mut tasks, &mut in_flight, &mut records)
                    .await?;

                info!(
                    "{}%\tGetting snapshots from {} to {}...",
                    100 * (i + 1) / windows.len(),
                    window.start,
                    window.end
                );
                let handle = tasks.spawn(query_window(
                    Arc::clone(&self.query),
                    permit,
                    application_id,
                    total_minutes,
                    window,
                    self.query_timeout,
                ));
                in_flight.insert(handle.id(), window);
            }

            info!("Waiting for all the requests to finish....");
            loop {
                let joined = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(HarvestError::Cancelled),
                    joined = tasks.join_next_with_id() => joined,
                };
                match joined {
                    Some(joined) => absorb(joined, &mut in_flight, &mut records)?,
                    None => break,
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!("Aborting {} in-flight snapshot queries: {e}", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return Err(e);
        }

        info!(
            "Harvested {} snapshots from {} windows",
            records.len(),
            windows.len()
        );
        Ok(records)
    }

    /// Waits for a free permit. Tasks that finish meanwhile are absorbed so a
    /// failure stops dispatching before the next window goes out.
    async fn admit(
        &self,
        gate: &Arc<Semaphore>,
        tasks: &mut JoinSet<QueryOutcome>,
        in_flight: &mut HashMap<Id, TimeWindow>,
        records: &mut Vec<SnapshotRecord>,
    ) -> Result<OwnedSemaphorePermit, HarvestError> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(HarvestError::Cancelled),
                Some(joined) = tasks.join_next_with_id() => absorb(joined, in_flight, records)?,
                permit = Arc::clone(gate).acquire_owned() => {
                    // The gate is never closed while harvesting.
                    return permit.map_err(|_| HarvestError::Cancelled);
                }
            }
        }
    }
}

async fn query_window(
    query: Arc<dyn SnapshotQuery>,
    permit: OwnedSemaphorePermit,
    application_id: i64,
    total_minutes: u32,
    window: TimeWindow,
    query_timeout: Duration,
) -> QueryOutcome {
    let _permit = permit;
    let fetched = tokio::time::timeout(
        query_timeout,
        query.get_snapshots(
            application_id,
            total_minutes,
            window,
            SnapshotFilters::ERRORS_WITH_DETAIL,
        ),
    )
    .await;

    match fetched {
        Ok(Ok(snapshots)) => {
            debug!("Fetched {} snapshots for {window}", snapshots.len());
            Ok(snapshots)
        }
        Ok(Err(e)) => Err(query_error(&window, e.to_string())),
        Err(_) => Err(query_error(
            &window,
            format!("timed out after {} ms", query_timeout.as_millis()),
        )),
    }
}

fn absorb(
    joined: Result<(Id, QueryOutcome), JoinError>,
    in_flight: &mut HashMap<Id, TimeWindow>,
    records: &mut Vec<SnapshotRecord>,
) -> Result<(), HarvestError> {
    match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            records.extend(outcome?);
            Ok(())
        }
        Err(e) => {
            let reason = format!("query task failed: {e}");
            match in_flight.remove(&e.id()) {
                Some(window) => Err(query_error(&window, reason)),
                None => Err(HarvestError::Query {
                    start: "unknown".to_string(),
                    end: "unknown".to_string(),
                    reason,
                }),
            }
        }
    }
}

fn query_error(window: &TimeWindow, reason: String) -> HarvestError {
    HarvestError::Query {
        start: window.start.to_string(),
        end: window.end.to_string(),
        reason,
    }
}
