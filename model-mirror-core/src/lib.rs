#![doc = "model-mirror-core: core logic library for model-mirror."]

//! This crate contains the data model, collaborator contracts and pipelines for
//! mirroring model repositories from one hub namespace into another.
//!
//! # Layout
//! - [`contract`]: repository identifiers, terminal statuses, errors and the
//!   mockable collaborator traits (metadata, transfer, resource probe).
//! - [`budget`]: the disk space admission rule.
//! - [`filter`]: which weight formats are fetched for a given repository listing.
//! - [`license`]: the permissive license allow-list.
//! - [`pipeline`]: the per-repository eligibility / download / upload / cleanup run.
//! - [`queue`]: the admission-controlled backlog that launches pipelines concurrently.
//! - [`report`]: the per-repository status table.
//! - [`ledger`]: completion bookkeeping across runs.
//! - [`hub`]: the HTTP + git implementation of the transfer and metadata contracts.
//! - [`probe`]: free space and host telemetry.
//! - [`workdir`]: per-repository working directories and their cleanup.

pub mod budget;
pub mod config;
pub mod contract;
pub mod filter;
pub mod hub;
pub mod ledger;
pub mod license;
pub mod pipeline;
pub mod probe;
pub mod queue;
pub mod report;
pub mod workdir;
