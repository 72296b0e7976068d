#![doc = "font-archiver-core: core pipeline library for font-archiver."]

//! Discovers font files, groups them into families, builds one verified archive
//! per family on a bounded worker pool and publishes the archives to a remote
//! repository.
//!
//! The crate never reads stdin, never exits the process and never installs a
//! tracing subscriber. Decisions that need a user (replace or append, advisory
//! gate overrides) are passed in already resolved.
//!
//! # Usage
//! `discovery::discover` -> `orchestrator::run_all` -> `staging::prepare` ->
//! `lifecycle::ensure_repo` -> `synchronise::publish`.

pub mod archive;
pub mod compression;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod lifecycle;
pub mod orchestrator;
pub mod progress;
pub mod staging;
pub mod synchronise;
pub mod vcs;
