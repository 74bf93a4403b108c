//! Operators for the OCM hub and spoke control planes
//!
//! Two sibling reconcilers expand declarative specs into managed child
//! resources:
//!
//! - [`clustermanager`] - expands a `ClusterManager` into the hub components
//!   (registration, work, placement, addon-manager) and gates admission
//!   webhook configurations on deployment availability
//! - [`klusterlet`] - expands a `Klusterlet` into the spoke agents and runs
//!   the rebootstrap controller that recovers a spoke after identity loss
//! - [`certrotation`] - maintains the signing secret, the CA bundle and the
//!   webhook serving certificates under rolling renewal

#![deny(missing_docs)]

pub mod certrotation;
pub mod clustermanager;
pub mod klusterlet;

pub use ocm_common::{Error, Result};
