//! Container runtime gateway for stackyard.
//!
//! A thin, name-addressed capability interface over one host's container
//! runtime, plus two implementations:
//!
//! - **[`DockerRuntime`]**: talks to the Docker Engine API through `bollard`.
//! - **[`MemoryRuntime`]**: keeps containers, networks, volumes and images in
//!   process and journals every side effect. Used by the engine's tests.
//!
//! Every backend folds its failures into [`Error`]. [`Error::is_gone`] and
//! [`Error::is_present`] mark a remove or a create whose request was already
//! satisfied.

pub mod docker;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod types;

pub use docker::DockerRuntime;
pub use error::{Error, ResourceKind};
pub use gateway::{Result, RuntimeGateway, cancellable};
pub use memory::{MemoryRuntime, RuntimeCall};
pub use types::{
    ContainerSpec, ContainerSummary, ExecOutput, Mount, MountSource, NetworkAttachment,
    NetworkSpec, PortMapping,
};
