//! Availability gate around a container runtime.
//!
//! When the engine drops out mid-flight, callers should fail fast with
//! a 503 instead of stacking up on a dead transport. The gate closes on
//! the first unavailable error and a background probe reopens it once
//! the engine answers again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{BuildSpec, ContainerRuntime, RunOutput, RunSpec, RuntimeError};

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

pub struct GatedRuntime {
    inner: Arc<dyn ContainerRuntime>,
    open: Arc<AtomicBool>,
    probing: Arc<AtomicBool>,
    probe_interval: Duration,
}

impl GatedRuntime {
    pub fn new(inner: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_probe_interval(inner, DEFAULT_PROBE_INTERVAL)
    }

    pub fn with_probe_interval(inner: Arc<dyn ContainerRuntime>, probe_interval: Duration) -> Self {
        Self {
            inner,
            open: Arc::new(AtomicBool::new(true)),
            probing: Arc::new(AtomicBool::new(false)),
            probe_interval,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(
                "container engine is down, recovery probe in progress".to_string(),
            ))
        }
    }

    /// Close the gate and start the recovery probe, once.
    fn trip(&self) {
        self.open.store(false, Ordering::SeqCst);
        if self.probing.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("container engine unavailable, starting recovery probe");

        let inner = self.inner.clone();
        let open = self.open.clone();
        let probing = self.probing.clone();
        let interval = self.probe_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if inner.available().await {
                    info!("container engine recovered, reopening gate");
                    open.store(true, Ordering::SeqCst);
                    probing.store(false, Ordering::SeqCst);
                    return;
                }
            }
        });
    }

    fn observe<T>(&self, result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        if matches!(result, Err(RuntimeError::Unavailable(_))) {
            self.trip();
        }
        result
    }
}

#[async_trait]
impl ContainerRuntime for GatedRuntime {
    async fn build(&self, spec: BuildSpec) -> Result<RunOutput, RuntimeError> {
        self.ensure_open()?;
        let result = self.inner.build(spec).await;
        self.observe(result)
    }

    async fn run(&self, spec: RunSpec) -> Result<RunOutput, RuntimeError> {
        self.ensure_open()?;
        let result = self.inner.run(spec).await;
        self.observe(result)
    }

    async fn remove_image(&self, image_tag: &str) -> Result<(), RuntimeError> {
        // Image removal is best-effort everywhere it is called; it does
        // not consult or trip the gate.
        self.inner.remove_image(image_tag).await
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let result = self.inner.ensure_volume(name).await;
        self.observe(result)
    }

    async fn available(&self) -> bool {
        self.is_open() && self.inner.available().await
    }
}
