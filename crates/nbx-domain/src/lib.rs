#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod layout;
pub mod packages;
pub mod platform;
pub mod tool;
pub mod version;

pub use layout::{InstallLayout, INTEGRITY_MARKER_FILE, MODULES_DIR};
pub use packages::AuxiliaryPackageSet;
pub use platform::{ArchiveKind, DistTarget, HostPlatform};
pub use tool::ToolReference;
pub use version::{normalize_version, NodeVersion};
