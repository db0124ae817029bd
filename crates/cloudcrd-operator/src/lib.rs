//! cloudcrd operator: CLI configuration, CRD manifests and wiring of the
//! Project, Instance and Database controllers into one supervisor

#![deny(missing_docs)]

pub mod config;
pub mod crds;
pub mod runner;

pub use config::Cli;
