use crate::error::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Periodic task runner backed by a tokio runtime, either its own or one supplied by the
/// caller. Only an owned runtime is shut down.
pub struct Scheduler {
    handle: Handle,
    owned: bool,
    runtime: Mutex<Option<Runtime>>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("kvdir-sched")
            .enable_time()
            .build()?;
        log::info!("scheduler started with {} workers", workers.max(1));
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: true,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// run tasks on a runtime owned elsewhere
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: false,
            runtime: Mutex::new(None),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_shutdown(&self) -> bool {
        self.owned && self.runtime.lock().unwrap().is_none()
    }

    /// Run `job` after `initial`, then again `delay` after each run completes.
    ///
    /// Jobs run on the blocking pool so they may do synchronous backend I/O.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        name: &str,
        initial: Duration,
        delay: Duration,
        job: F,
    ) -> Result<ScheduledTask>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
            log::warn!("task {} on a current thread runtime only runs while it is driven", name);
        }
        if self.is_shutdown() {
            return Err(Error::Closed(format!("scheduler for task {}", name)));
        }
        let job = Arc::new(job);
        let task = name.to_string();
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                let j = job.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || j()).await {
                    log::error!("task {} failed, error {}", task, e);
                }
                tokio::time::sleep(delay).await;
            }
        });
        log::info!("schedule {} every {:?}", name, delay);
        Ok(ScheduledTask {
            name: name.to_string(),
            handle,
        })
    }

    /// stop an owned runtime without waiting for running jobs, a no-op otherwise
    pub fn shutdown(&self) {
        if let Some(rt) = self.runtime.lock().unwrap().take() {
            rt.shutdown_background();
            log::info!("scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.handle.abort();
        log::info!("task {} cancelled", self.name);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
