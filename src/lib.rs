//! # vault-secrets-operator
//!
//! Kubernetes controller that materializes secrets from an external secret
//! authority (a Vault-compatible HTTP API) into in-cluster `Secret` objects.
//! Four managed resource kinds — `StaticSecret`, `DynamicSecret`,
//! `PkiSecret`, `AppSecret` — each drive their own state machine, but share
//! authentication (`auth`, `client`), drift detection (`hmac`), and the
//! destination-writing contract (`sync`, `transform`, `rollout`).

pub mod auth;
pub mod authority;
pub mod client;
pub mod config;
pub mod constants;
pub mod crd;
pub mod hmac;
pub mod leader;
pub mod observability;
pub mod reconcile;
pub mod rollout;
pub mod server;
pub mod shutdown;
pub mod sync;
pub mod transform;
