//! Library services shared by the subsystems: role permissions, feature
//! flags, the git wrapper and the test runner wrapper.

pub mod flags;
pub mod git;
pub mod permissions;
pub mod test_runner;

pub use flags::FeatureFlags;
pub use git::GitRepo;
pub use permissions::Permissions;
pub use test_runner::{TestReport, TestRunner};
