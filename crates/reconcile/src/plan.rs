use std::collections::HashSet;

use rezn_core::{Action, WorkloadSpec};
use serde::Serialize;

use crate::matching::MatchRule;
use crate::naming::NameSource;

/// Desired vs observed for one workload at planning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub workload: String,
    pub replicas: u32,
    /// Matching instances in runtime listing order.
    pub matched: Vec<String>,
}

impl WorkloadStatus {
    pub fn in_sync(&self) -> bool {
        self.matched.len() == self.replicas as usize
    }
}

/// Actions for one pass, grouped by workload in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub workloads: Vec<WorkloadStatus>,
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn creates(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| matches!(a, Action::Create { .. }))
    }

    pub fn destroys(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| matches!(a, Action::Destroy { .. }))
    }
}

/// Diff desired workloads against running instances.
///
/// Each workload is handled on its own: under-provisioned workloads get one create per
/// missing replica, over-provisioned ones lose their first `extra` matches in listing
/// order. Instances no workload matches are left alone. Pure apart from `names`.
pub fn plan(desired: &[WorkloadSpec], observed: &[String], rule: MatchRule, names: &mut dyn NameSource) -> Plan {
    let mut taken: HashSet<String> = observed.iter().cloned().collect();
    let mut out = Plan::default();

    for spec in desired {
        let matched: Vec<String> = observed.iter().filter(|c| rule.matches(&spec.name, c)).cloned().collect();
        let want = spec.replicas as usize;

        if matched.len() < want {
            for _ in 0..(want - matched.len()) {
                let name = fresh_name(names, &spec.name, &mut taken);
                out.actions.push(Action::Create {
                    workload: spec.name.clone(),
                    name,
                    image: spec.image.clone(),
                    ports: spec.ports.clone(),
                });
            }
        } else if matched.len() > want {
            for victim in matched.iter().take(matched.len() - want) {
                out.actions.push(Action::Destroy { workload: spec.name.clone(), name: victim.clone() });
            }
        }

        out.workloads.push(WorkloadStatus { workload: spec.name.clone(), replicas: spec.replicas, matched });
    }
    out
}

fn fresh_name(names: &mut dyn NameSource, workload: &str, taken: &mut HashSet<String>) -> String {
    loop {
        let candidate = names.next_name(workload);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
    }
}
