use metrics::counter;
use rezn_core::Action;
use rezn_runtime::{ContainerRuntime, RuntimeError};

/// What happened to one planned action.
#[derive(Debug)]
pub struct ActionOutcome {
    pub action: Action,
    pub result: Result<(), RuntimeError>,
}

/// Issue actions one at a time, in order. A failure is recorded and the next action still runs.
pub async fn execute(runtime: &dyn ContainerRuntime, actions: &[Action]) -> Vec<ActionOutcome> {
    let mut out = Vec::with_capacity(actions.len());
    for action in actions {
        let result = match action {
            Action::Create { name, image, ports, .. } => runtime.create(name, image, ports).await,
            Action::Destroy { name, .. } => runtime.destroy(name).await,
        };
        counter!("reconcile_actions_total", 1u64);
        if result.is_err() {
            counter!("reconcile_action_err_total", 1u64);
        }
        out.push(ActionOutcome { action: action.clone(), result });
    }
    out
}
