//! Chaos controller process: command line, CRD installation and controller wiring

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod crds;
