//! Shared row <-> domain codecs for the JSON and enum columns.
//!
//! Decoding never fails a load: malformed blobs and unknown enum text log a
//! warning and degrade to defaults, so one corrupt column cannot make an
//! entire task or listing unloadable.

use crate::error::Result;
use crate::types::{BranchStatus, BranchType, InitiativeStatus, PhaseStatus, TaskStatus, Weight};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn encode_json_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    match value {
        Some(v) => Ok(Some(serde_json::to_string(v)?)),
        None => Ok(None),
    }
}

/// Decode a JSON column, degrading to `T::default()` on NULL or bad data.
pub(crate) fn decode_json_or_default<T>(column: &str, raw: Option<String>) -> T
where
    T: DeserializeOwned + Default,
{
    match raw {
        Some(s) => match serde_json::from_str(&s) {
            Ok(v) => v,
            Err(err) => {
                warn!(column, error = %err, "malformed JSON column, using default");
                T::default()
            }
        },
        None => T::default(),
    }
}

/// Decode an optional JSON column, degrading to `None` on bad data.
pub(crate) fn decode_json_opt<T>(column: &str, raw: Option<String>) -> Option<T>
where
    T: DeserializeOwned,
{
    match raw {
        Some(s) => match serde_json::from_str(&s) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(column, error = %err, "malformed JSON column, dropping value");
                None
            }
        },
        None => None,
    }
}

/// Encode a list-with-explicit-empty field into its (json, set-flag) pair.
///
/// `None` persists as (NULL, 0) meaning "inherit default"; `Some(list)`
/// persists as (json, 1), so `Some(vec![])` survives a round-trip distinct
/// from `None`.
pub(crate) fn encode_flagged_list(value: &Option<Vec<String>>) -> Result<(Option<String>, bool)> {
    match value {
        Some(list) => Ok((Some(serde_json::to_string(list)?), true)),
        None => Ok((None, false)),
    }
}

pub(crate) fn decode_flagged_list(
    column: &str,
    raw: Option<String>,
    set: bool,
) -> Option<Vec<String>> {
    if !set {
        return None;
    }
    Some(decode_json_or_default(column, raw))
}

// Lenient enum decoding. Status-like columns are store-written, so unknown
// text means hand-edited data; keep the row loadable and say so.

pub(crate) fn decode_task_status(raw: &str) -> TaskStatus {
    TaskStatus::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown task status, treating as created");
        TaskStatus::Created
    })
}

pub(crate) fn decode_phase_status(raw: &str) -> PhaseStatus {
    PhaseStatus::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown phase status, treating as pending");
        PhaseStatus::Pending
    })
}

pub(crate) fn decode_weight(raw: &str) -> Weight {
    Weight::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown weight, treating as medium");
        Weight::Medium
    })
}

pub(crate) fn decode_initiative_status(raw: &str) -> InitiativeStatus {
    InitiativeStatus::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown initiative status, treating as draft");
        InitiativeStatus::Draft
    })
}

pub(crate) fn decode_branch_type(raw: &str) -> BranchType {
    BranchType::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown branch type, treating as task");
        BranchType::Task
    })
}

pub(crate) fn decode_branch_status(raw: &str) -> BranchStatus {
    BranchStatus::from_str(raw).unwrap_or_else(|| {
        warn!(value = raw, "unknown branch status, treating as active");
        BranchStatus::Active
    })
}
