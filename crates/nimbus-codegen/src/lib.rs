//! Deploy-time code generation: the entry-point synthesizer that turns an
//! annotated user class into the container's top-level program, and the
//! Containerfile generator that builds the recipe around it.
//!
//! Everything in this crate is a pure function of its inputs; no user
//! code is ever evaluated.

pub mod containerfile;
pub mod entrypoint;
pub mod pubspec;

pub use containerfile::{dev_containerfile, release_containerfile, ContainerfileParams};
pub use entrypoint::{
    synthesize_entrypoint, SynthesisError, ENTRY_FILE_NAME, FUNCTION_ANNOTATION,
    FUNCTION_BASE_CLASS,
};
pub use pubspec::{parse_pubspec, PubspecInfo, PLATFORM_PACKAGE};
