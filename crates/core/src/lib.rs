//! Rezn core types: declarations, workload specs and reconcile actions.

#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};

pub mod decode;

pub use decode::{decode_desired, declaration_items, DecodeError, DesiredState, SkippedItem};

/// Store key holding the serialized declaration list.
pub const DESIRED_KEY: &str = "desired";

/// Store key holding metadata about the last `reznctl apply`.
pub const DESIRED_META_KEY: &str = "desired.meta";

/// The only declaration kind the reconciler interprets.
pub const POD_KIND: &str = "pod";

/// Upper bound on `replicas`; a pod asking for more is skipped at decode time.
pub const MAX_REPLICAS: u32 = 1024;

/// One entry of the declaration document. `fields` stays untyped until the kind is known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclarationItem {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
    /// Carried through but not interpreted.
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Kind-specific fields of a `pod` declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodFields {
    pub image: String,
    pub replicas: u32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub secure: Option<bool>,
}

/// A decoded `pod` declaration: how many instances of which image should run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Non-empty; doubles as the instance name prefix.
    pub name: String,
    pub image: String,
    /// Zero means no instance should run.
    pub replicas: u32,
    /// Each port is published host:container identically.
    pub ports: Vec<u16>,
    /// Reserved; reconciliation ignores it.
    pub secure: bool,
}

impl WorkloadSpec {
    /// Prefix every instance of this workload carries: `<name>-`.
    pub fn instance_prefix(&self) -> String {
        format!("{}-", self.name)
    }
}

/// A single corrective step issued against the container runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    Create { workload: String, name: String, image: String, ports: Vec<u16> },
    Destroy { workload: String, name: String },
}

impl Action {
    pub fn workload(&self) -> &str {
        match self {
            Action::Create { workload, .. } | Action::Destroy { workload, .. } => workload,
        }
    }

    /// Instance name the action creates or removes.
    pub fn instance(&self) -> &str {
        match self {
            Action::Create { name, .. } | Action::Destroy { name, .. } => name,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Destroy { .. } => "destroy",
        }
    }
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}
