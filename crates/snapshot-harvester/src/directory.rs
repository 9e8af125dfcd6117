// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use tracing::{debug, info};

use crate::controller::TransactionSource;
use crate::error::HarvestError;
use crate::model::{BusinessTransaction, TransactionId};

/// Business transaction names by id, fetched once per run and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDirectory {
    names: HashMap<TransactionId, String>,
}

impl TransactionDirectory {
    pub async fn resolve(
        source: &dyn TransactionSource,
        application_id: i64,
    ) -> Result<Self, HarvestError> {
        info!("Getting the list of all Business Transactions, please wait...");
        let transactions = source
            .get_business_transactions(application_id)
            .await
            .map_err(|e| HarvestError::Directory(e.to_string()))?;
        let directory = Self::from_transactions(transactions);
        debug!("Resolved {} business transactions", directory.len());
        Ok(directory)
    }

    pub fn from_transactions(transactions: impl IntoIterator<Item = BusinessTransaction>) -> Self {
        let names = transactions
            .into_iter()
            .map(|bt| (bt.id, bt.name))
            .collect();
        Self { names }
    }

    pub fn lookup(&self, id: TransactionId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
