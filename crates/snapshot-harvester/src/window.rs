// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits a lookback period into the bounded time ranges the controller accepts.
//!
//! Windows are produced newest first. Each one spans exactly the configured
//! window size and ends one second before the start of the window after it in
//! time, so an event sitting on a boundary is only ever fetched once.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::fmt;

use crate::error::HarvestError;

/// Gap left between the start of a window and the end of the next (older) one.
const BOUNDARY_GAP_SECS: i64 = 1;

/// Upper bound on the number of windows a single run may plan.
pub const MAX_WINDOWS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// What to do with the part of the lookback period that does not fill a whole window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// Leave the oldest `total % window` minutes uncovered.
    #[default]
    Drop,
    /// Add one shorter window at the oldest end to cover the remainder.
    Cover,
}

/// Plans the windows for a lookback of `total_minutes` ending at `now`.
///
/// The number of full windows is `total_minutes / window_minutes`, but never less
/// than one, and no more than [`MAX_WINDOWS`]. `now` is truncated to whole seconds.
pub fn plan(
    total_minutes: u32,
    window_minutes: u32,
    now: DateTime<Utc>,
    policy: RemainderPolicy,
) -> Result<Vec<TimeWindow>, HarvestError> {
    if total_minutes == 0 {
        return Err(HarvestError::Config(
            "lookback minutes must be greater than 0".to_string(),
        ));
    }
    if window_minutes == 0 {
        return Err(HarvestError::Config(
            "window minutes must be greater than 0".to_string(),
        ));
    }

    let full_windows = (total_minutes / window_minutes).max(1);
    if full_windows > MAX_WINDOWS {
        return Err(HarvestError::Config(format!(
            "{total_minutes} minutes in {window_minutes} minute windows needs {full_windows} \
             queries, more than the limit of {MAX_WINDOWS}"
        )));
    }
    let span = Duration::seconds(i64::from(window_minutes) * 60);
    let gap = Duration::seconds(BOUNDARY_GAP_SECS);

    let mut windows = Vec::with_capacity(full_windows as usize + 1);
    let mut end = now.trunc_subsecs(0);
    for _ in 0..full_windows {
        let start = end - span;
        windows.push(TimeWindow { start, end });
        end = start - gap;
    }

    // The floor-to-one guard already stretched a short lookback to a full window.
    let remainder = total_minutes % window_minutes;
    if policy == RemainderPolicy::Cover && total_minutes >= window_minutes && remainder > 0 {
        let start = end - Duration::seconds(i64::from(remainder) * 60);
        windows.push(TimeWindow { start, end });
    }

    Ok(windows)
}

/// Same as [`plan`], anchored at the current wall-clock time.
pub fn plan_from_now(
    total_minutes: u32,
    window_minutes: u32,
    policy: RemainderPolicy,
) -> Result<Vec<TimeWindow>, HarvestError> {
    plan(total_minutes, window_minutes, Utc::now(), policy)
}
