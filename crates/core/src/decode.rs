//! Desired-state decoder: raw declaration bytes to typed workload specs.
//!
//! Two failure levels. The document as a whole must be a JSON array, otherwise the
//! caller gets a [`DecodeError`] and the pass is abandoned. Anything wrong with a single
//! entry only drops that entry, recorded as a [`SkippedItem`] for the caller to report.
//! A second `pod` with an already-seen name is dropped the same way.

use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::{DeclarationItem, PodFields, WorkloadSpec, MAX_REPLICAS, POD_KIND};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("desired state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("desired state must be a JSON array of declarations, got {0}")]
    NotAList(&'static str),
}

/// A declaration entry that was dropped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    /// Declared name, or `#<index>` when the entry has none.
    pub name: String,
    pub kind: Option<String>,
    pub reason: String,
}

/// Result of decoding one declaration document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DesiredState {
    /// Valid workloads, in declaration order.
    pub workloads: Vec<WorkloadSpec>,
    /// Malformed entries.
    pub skipped: Vec<SkippedItem>,
    /// Well-formed entries of a kind the reconciler does not handle.
    pub ignored: usize,
}

/// Split a document into declaration items. Entries that are not a `{kind, name, ...}`
/// object are returned as skipped instead of failing the whole document.
pub fn declaration_items(raw: &[u8]) -> Result<(Vec<DeclarationItem>, Vec<SkippedItem>), DecodeError> {
    let entries = entries(raw)?;
    let mut items = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();
    for (idx, entry) in entries.into_iter().enumerate() {
        match item_from(idx, entry) {
            Ok(item) => items.push(item),
            Err(s) => skipped.push(s),
        }
    }
    Ok((items, skipped))
}

/// Decode a declaration document into the workloads to reconcile.
pub fn decode_desired(raw: &[u8]) -> Result<DesiredState, DecodeError> {
    let mut out = DesiredState::default();
    for (idx, entry) in entries(raw)?.into_iter().enumerate() {
        // Other kinds are not ours to validate.
        if let Some(kind) = entry.get("kind").and_then(|v| v.as_str()).filter(|k| *k != POD_KIND) {
            debug!(kind, item = entry.get("name").and_then(|v| v.as_str()).unwrap_or(""), "ignoring declaration of unhandled kind");
            out.ignored += 1;
            continue;
        }
        let item = match item_from(idx, entry) {
            Ok(item) => item,
            Err(s) => {
                out.skipped.push(s);
                continue;
            }
        };
        let res = if out.workloads.iter().any(|w| w.name == item.name) {
            Err(format!("duplicate pod name {:?}", item.name))
        } else {
            workload_from(&item)
        };
        match res {
            Ok(spec) => out.workloads.push(spec),
            Err(reason) => out.skipped.push(SkippedItem { name: item.name, kind: Some(item.kind), reason }),
        }
    }
    Ok(out)
}

fn entries(raw: &[u8]) -> Result<Vec<Json>, DecodeError> {
    match serde_json::from_slice(raw)? {
        Json::Array(entries) => Ok(entries),
        other => Err(DecodeError::NotAList(json_type(&other))),
    }
}

fn item_from(idx: usize, entry: Json) -> Result<DeclarationItem, SkippedItem> {
    let name = entry
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("#{}", idx));
    let kind = entry.get("kind").and_then(|v| v.as_str()).map(|s| s.to_string());
    serde_json::from_value::<DeclarationItem>(entry).map_err(|e| SkippedItem { name, kind, reason: e.to_string() })
}

fn workload_from(item: &DeclarationItem) -> Result<WorkloadSpec, String> {
    if item.name.is_empty() {
        return Err("pod name must not be empty".to_string());
    }
    let fields = item.fields.as_ref().ok_or_else(|| "pod declaration has no fields".to_string())?;
    let fields: PodFields = serde_json::from_value(fields.clone()).map_err(|e| e.to_string())?;
    if fields.image.trim().is_empty() {
        return Err("pod image must not be empty".to_string());
    }
    if fields.replicas > MAX_REPLICAS {
        return Err(format!("replicas {} exceeds the limit of {}", fields.replicas, MAX_REPLICAS));
    }
    Ok(WorkloadSpec {
        name: item.name.clone(),
        image: fields.image,
        replicas: fields.replicas,
        ports: fields.ports,
        secure: fields.secure.unwrap_or(false),
    })
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
