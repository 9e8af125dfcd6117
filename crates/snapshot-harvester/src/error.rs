// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can end a harvest run
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to resolve application {application}: {reason}")]
    ApplicationResolution { application: String, reason: String },

    #[error("Failed to query snapshots between {start} and {end}: {reason}")]
    Query {
        start: String,
        end: String,
        reason: String,
    },

    #[error("Failed to fetch business transactions: {0}")]
    Directory(String),

    #[error("Failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write results: {0}")]
    Sink(String),

    #[error("Harvest cancelled")]
    Cancelled,
}
