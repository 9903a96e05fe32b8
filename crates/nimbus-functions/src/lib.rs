//! Function lifecycle: archive intake, deployment orchestration, and the
//! per-invocation container engine, plus the `/api/functions` surface.

pub mod archive;
pub mod deploy;
pub mod handler_types;
pub mod handlers;
pub mod invoke;
pub mod janitor;
pub mod plugin;

pub use deploy::{DeployOutcome, DeploymentService};
pub use invoke::{InvocationEngine, InvocationOutcome};
pub use janitor::SharedDirJanitor;
pub use plugin::FunctionsPlugin;
