use std::sync::atomic::{AtomicI64, Ordering};

/// Source of fresh instance names for a workload.
pub trait NameSource: Send {
    fn next_name(&mut self, workload: &str) -> String;
}

static LAST_SUFFIX: AtomicI64 = AtomicI64::new(0);

/// `<workload>-<unix nanos>`, strictly increasing across the whole process even when the
/// clock stalls or two passes run back to back.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampNamer;

impl NameSource for TimestampNamer {
    fn next_name(&mut self, workload: &str) -> String {
        format!("{}-{}", workload, next_suffix())
    }
}

fn next_suffix() -> i64 {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let prev = match LAST_SUFFIX.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1))) {
        Ok(p) | Err(p) => p,
    };
    now.max(prev + 1)
}

/// Deterministic `<workload>-1`, `<workload>-2`, ... for previews and tests.
#[derive(Debug, Clone)]
pub struct SequenceNamer {
    next: u64,
}

impl SequenceNamer {
    pub fn new() -> Self {
        Self { next: 1 }
    }
}

impl Default for SequenceNamer {
    fn default() -> Self {
        Self::new()
    }
}

impl NameSource for SequenceNamer {
    fn next_name(&mut self, workload: &str) -> String {
        let n = self.next;
        self.next += 1;
        format!("{}-{}", workload, n)
    }
}
