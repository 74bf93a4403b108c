//! Spoke registration agent
//!
//! Drives a spoke from "no identity" to "holds a valid hub mTLS identity":
//!
//! - [`clientcert`] - validity checks on the durable hub identity and the
//!   kubeconfig construction around it
//! - [`csr`] - the signing-request exchange with the hub's signing authority
//! - [`spoke`] - the registration state machine and agent options
//!
//! The spoke generates its key pair locally and only ever sends a CSR; the
//! private key never leaves the spoke. The durable identity lives in the
//! `hub-kubeconfig-secret` in the agent namespace; no other on-disk state is
//! authoritative.

#![deny(missing_docs)]

pub mod clientcert;
pub mod csr;
pub mod spoke;

pub use ocm_common::{Error, Result};
