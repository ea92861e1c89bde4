//! Credential provisioning and remote command orchestration for EKS hybrid nodes e2e tests.
//!
//! A test run picks a credential mechanism (SSM hybrid activations or IAM Roles Anywhere),
//! builds the `nodeadm` configuration and files of every node with it, drives the nodes through
//! SSM Run Command and finally checks that uninstalling `nodeadm` released the node identity.
pub mod artifact;
pub mod aws;
pub mod cli;
pub mod config;
pub mod context;
pub mod credentials;
pub mod logging;
pub mod nodeadm;
pub mod pki;
pub mod ssm;
