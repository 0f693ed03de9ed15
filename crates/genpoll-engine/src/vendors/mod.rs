//! Built-in vendor adapters. Each maps its own status vocabulary onto
//! [`crate::poll::VendorStatus`].

mod dryrun;
mod google;
mod kie;
mod replicate;
mod wavespeed;

pub use dryrun::DryrunApi;
pub use google::GoogleApi;
pub use kie::KieApi;
pub use replicate::ReplicateApi;
pub use wavespeed::WaveSpeedApi;
