// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Access to the controller REST API.
//!
//! The harvest pipeline only sees the three capability traits below, so tests
//! (and alternative backends) can stand in for the HTTP client.

use async_trait::async_trait;
use core::time::Duration;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ControllerCredentials;
use crate::error::HarvestError;
use crate::http_utils::{build_client, ensure_success};
use crate::model::{Application, BusinessTransaction, SnapshotFilters, SnapshotRecord};
use crate::window::TimeWindow;

const REST_PREFIX: &str = "/controller/rest/applications";
const BETWEEN_TIMES: &str = "BETWEEN_TIMES";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("application {0} not found")]
    ApplicationNotFound(String),
}

/// Resolves the id a user knows an application by to the controller's internal id.
#[async_trait]
pub trait ApplicationLookup: Send + Sync {
    async fn get_application(&self, application: &str) -> Result<Application, ControllerError>;
}

#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn get_business_transactions(
        &self,
        application_id: i64,
    ) -> Result<Vec<BusinessTransaction>, ControllerError>;
}

#[async_trait]
pub trait SnapshotQuery: Send + Sync {
    /// Fetches the snapshots captured inside `window`. `total_minutes` is the
    /// length of the whole lookback, which the controller uses to size its reply.
    async fn get_snapshots(
        &self,
        application_id: i64,
        total_minutes: u32,
        window: TimeWindow,
        filters: SnapshotFilters,
    ) -> Result<Vec<SnapshotRecord>, ControllerError>;
}

#[derive(Clone)]
pub struct ControllerClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl ControllerClient {
    pub fn new(
        credentials: &ControllerCredentials,
        https_proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let client = build_client(https_proxy, timeout)
            .map_err(|e| HarvestError::Config(format!("unable to build HTTP client: {e}")))?;
        Ok(ControllerClient {
            client,
            base_url: credentials.base_url(),
            username: credentials.username(),
            password: credentials.password.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ControllerError> {
        let url = format!("{}{}", self.base_url, path);
        let time = std::time::Instant::now();
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("output", "JSON")])
            .query(query)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.json::<T>().await?;
        debug!("GET {url} completed in {} ms", time.elapsed().as_millis());
        Ok(body)
    }
}

#[async_trait]
impl ApplicationLookup for ControllerClient {
    async fn get_application(&self, application: &str) -> Result<Application, ControllerError> {
        let path = format!("{REST_PREFIX}/{application}");
        let applications: Vec<Application> = self.get_json(&path, &[]).await?;
        applications
            .into_iter()
            .next()
            .ok_or_else(|| ControllerError::ApplicationNotFound(application.to_string()))
    }
}

#[async_trait]
impl TransactionSource for ControllerClient {
    async fn get_business_transactions(
        &self,
        application_id: i64,
    ) -> Result<Vec<BusinessTransaction>, ControllerError> {
        let path = format!("{REST_PREFIX}/{application_id}/business-transactions");
        self.get_json(&path, &[]).await
    }
}

#[async_trait]
impl SnapshotQuery for ControllerClient {
    async fn get_snapshots(
        &self,
        application_id: i64,
        total_minutes: u32,
        window: TimeWindow,
        filters: SnapshotFilters,
    ) -> Result<Vec<SnapshotRecord>, ControllerError> {
        let path = format!("{REST_PREFIX}/{application_id}/request-snapshots");
        let query = [
            ("time-range-type", BETWEEN_TIMES.to_string()),
            ("start-time", window.start.timestamp_millis().to_string()),
            ("end-time", window.end.timestamp_millis().to_string()),
            ("duration-in-mins", total_minutes.to_string()),
            ("error-occurred", filters.error_occurred.to_string()),
            ("need-props", filters.need_detail.to_string()),
        ];
        self.get_json(&path, &query).await
    }
}
