// src/core/model/mod.rs

//! The cluster topology model: immutable-by-convention value types plus the
//! setting catalog and the whole-cluster validator.

pub mod address;
pub mod applicability;
pub mod cluster;
pub mod context;
pub mod license;
pub mod node;
pub mod setting;
pub mod stripe;
pub mod uid;
pub mod validator;

pub use address::Address;
pub use applicability::{Applicability, NodeRef, Scope, StripeRef};
pub use cluster::{Cluster, FailoverPriority};
pub use context::NodeContext;
pub use license::{CapacityLicenseValidator, LicenseLimits, LicenseValidator};
pub use node::{AuthScheme, Node, NodeSecurity};
pub use setting::{Mutability, Setting};
pub use stripe::Stripe;
pub use uid::Uid;
pub use validator::validate_cluster;
