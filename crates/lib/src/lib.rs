//! arm-lib: package management for AI coding-assistant rules and prompts.
//!
//! This crate provides the building blocks of `arm`:
//! - `version`: semantic/opaque versions and constraint matching
//! - `store`: the content-addressed package cache under `~/.arm/storage`
//! - `registry`: Git, GitLab and Cloudsmith backends behind one adapter
//! - `compile`: rulesets and promptsets rendered for each target tool
//! - `sink`: atomic deployment of compiled files into project directories
//! - `install`: the engine reconciling manifest, lockfile, registries and sinks

pub mod compile;
pub mod consts;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod platform;
pub mod registry;
pub mod resource;
pub mod sink;
pub mod store;
pub mod store_lock;
pub mod types;
pub mod util;
pub mod version;
