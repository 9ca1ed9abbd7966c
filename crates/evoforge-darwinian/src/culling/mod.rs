//! Retirement of long-lived agents

pub mod policy;

pub use policy::AgingPolicy;
