use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Named recurring registrations. Registering a name that already
/// exists aborts and replaces the previous loop, so re-running the
/// bootstrapper never duplicates a schedule.
#[derive(Default)]
pub struct Schedules {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Schedules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` now and then every `every`. Tick errors are logged,
    /// never fatal; the next tick always fires.
    pub fn register<F, Fut>(&mut self, name: &str, every: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        if let Some(previous) = self.tasks.remove(name) {
            previous.abort();
        }
        info!("scheduling {name} every {}s", every.as_secs());
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = tick().await {
                    warn!("{task_name} tick error: {e:#}");
                }
            }
        });
        self.tasks.insert(name.to_string(), handle);
    }

    pub fn registered(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn abort_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for Schedules {
    fn drop(&mut self) {
        self.abort_all();
    }
}
