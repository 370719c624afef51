//! # Custom Resource Definitions
//!
//! Every Kubernetes Custom Resource type the operator watches or manages.
//!
//! ## Module Structure
//!
//! - `status` - shared `Condition` and `CommonStatus` types
//! - `auth` - `AuthConfig` / `GlobalAuthDefault` and their per-method params
//! - `transformation` - `Transformation` objects and the common `Destination` block
//! - `msr` - the four managed secret resource kinds: Static, Dynamic, Pki, App

pub mod auth;
pub mod msr;
pub mod status;
pub mod transformation;

pub use auth::{AuthConfig, AuthConfigRef, AuthConfigSpec, AuthMethod, GlobalAuthDefault, GlobalAuthDefaultSpec};
pub use msr::{
    AppSecret, AppSecretSpec, AppSecretStatus, DynamicSecret, DynamicSecretSpec,
    DynamicSecretStatus, HasConditions, PkiSecret, PkiSecretSpec, PkiSecretStatus, StaticSecret,
    StaticSecretSpec, StaticSecretStatus,
};
pub use status::{CommonStatus, Condition};
pub use transformation::{Destination, InlineTransformation, Transformation, TransformationSpec};
