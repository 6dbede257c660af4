#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rezn_runtime::{ContainerRuntime, RuntimeError};

#[derive(Default)]
struct State {
    running: Vec<String>,
    calls: Vec<String>,
    fail_images: HashSet<String>,
    fail_destroy: HashSet<String>,
    unavailable: bool,
}

/// In-memory runtime. With `apply` set, creates and destroys change the listing; without
/// it every action is a recorded no-op.
pub struct FakeRuntime {
    state: Mutex<State>,
    apply: bool,
}

impl FakeRuntime {
    pub fn new(running: &[&str]) -> Arc<Self> {
        Self::build(running, true)
    }

    pub fn no_op(running: &[&str]) -> Arc<Self> {
        Self::build(running, false)
    }

    fn build(running: &[&str], apply: bool) -> Arc<Self> {
        let state = State { running: running.iter().map(|s| s.to_string()).collect(), ..Default::default() };
        Arc::new(Self { state: Mutex::new(state), apply })
    }

    pub fn fail_image(&self, image: &str) {
        self.state.lock().unwrap().fail_images.insert(image.to_string());
    }

    pub fn fail_destroy(&self, name: &str) {
        self.state.lock().unwrap().fail_destroy.insert(name.to_string());
    }

    pub fn set_unavailable(&self, on: bool) {
        self.state.lock().unwrap().unavailable = on;
    }

    pub fn running(&self) -> Vec<String> {
        self.state.lock().unwrap().running.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Remove an instance without recording a call, as if someone ran `docker rm` by hand.
    pub fn destroy_out_of_band(&self, name: &str) {
        self.state.lock().unwrap().running.retain(|c| c != name);
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let st = self.state.lock().unwrap();
        if st.unavailable {
            return Err(RuntimeError::Unavailable("fake runtime down".to_string()));
        }
        Ok(st.running.clone())
    }

    async fn create(&self, name: &str, image: &str, _ports: &[u16]) -> Result<(), RuntimeError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("create {}", name));
        if st.fail_images.contains(image) {
            return Err(RuntimeError::CommandFailed { op: "create", target: name.to_string(), stderr: format!("pull access denied for {}", image) });
        }
        if self.apply {
            st.running.push(name.to_string());
        }
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("destroy {}", name));
        if st.fail_destroy.contains(name) {
            return Err(RuntimeError::CommandFailed { op: "destroy", target: name.to_string(), stderr: "device or resource busy".to_string() });
        }
        if self.apply {
            st.running.retain(|c| c != name);
        }
        Ok(())
    }
}

pub fn pod(name: &str, image: &str, replicas: i64, ports: &[u16]) -> serde_json::Value {
    serde_json::json!({ "kind": "pod", "name": name, "fields": { "image": image, "replicas": replicas, "ports": ports } })
}

pub fn doc(items: Vec<serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::Value::Array(items)).unwrap()
}
