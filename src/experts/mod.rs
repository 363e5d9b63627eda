//! Specialist experts: catalog and executor

pub mod executor;
pub mod registry;

pub use executor::{ExpertExecutor, ExpertObserver};
pub use registry::{ExpertKind, ExpertSpec, PropertyKind, PropertySpec};
