// src/core/service/mod.rs

//! The dynamic-config service: the node-side binding of storage and the
//! Nomad state machine, with runtime/upcoming context tracking, listener
//! fan-out, activation and delayed restart.

pub mod dynamic_config;
pub mod listeners;
pub mod restart;

pub use dynamic_config::{Collaborators, DynamicConfigService, HostInfo};
pub use listeners::{DynamicConfigListener, ListenerHandle, ListenerRegistry};
pub use restart::{DelayedRestarter, MIN_RESTART_DELAY, RestartHook};
