//! stackmove-lib: resource refactoring for CloudFormation stacks
//!
//! This crate detects resources that were renamed or moved between stacks
//! and turns them into stack refactor operations instead of replacements:
//! - `digest`: rename-invariant content identity of resources
//! - `detect`: pairing deployed and local resources by digest
//! - `rewrite`: templates to submit for a refactor
//! - `refactor`: running refactors per environment against the control plane
//! - `exclude` / `overrides`: user control over what moves

pub mod assembly;
pub mod consts;
pub mod detect;
pub mod digest;
pub mod exclude;
pub mod model;
pub mod overrides;
pub mod refactor;
pub mod rewrite;
pub mod util;
