// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Internal id the controller assigns to a business transaction.
pub type TransactionId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Application {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BusinessTransaction {
    pub id: TransactionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// One captured request execution that had an error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub business_transaction_id: TransactionId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub error_details: Vec<ErrorDetail>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ErrorDetail>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ErrorDetail>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Filters applied to every snapshot query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotFilters {
    pub error_occurred: bool,
    pub need_detail: bool,
}

impl SnapshotFilters {
    pub const ERRORS_WITH_DETAIL: SnapshotFilters = SnapshotFilters {
        error_occurred: true,
        need_detail: true,
    };
}
