//! pull-secret-federator - registry pull credentials from workload identity
//!
//! A Kubernetes controller that turns a service account in the cluster into a
//! short-lived access token for a Google service account, without any stored
//! key, and keeps it in a `kubernetes.io/dockerconfigjson` Secret.
//!
//! # Architecture
//!
//! Each `ImagePullSecret` names a service account, a workload identity pool
//! provider, a Google service account and a Secret. A reconciliation pass:
//! - requests a bound token for the service account, scoped to the provider
//! - exchanges it at the security token service for a federated token
//! - impersonates the Google service account with the federated token
//! - writes the resulting access token for every Google registry host
//! - records the token expiry in status
//!
//! # Modules
//!
//! - [`crd`] - The `ImagePullSecret` Custom Resource Definition
//! - [`token`] - Token sources making up the federation chain
//! - [`credential`] - Registry credential rendering and Secret upsert
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`requeue`] - Requeue schedule
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Runtime configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod credential;
pub mod error;
pub mod events;
pub mod requeue;
pub mod telemetry;
pub mod token;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
