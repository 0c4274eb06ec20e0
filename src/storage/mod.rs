//! Storage management module
//!
//! This module provides named volumes that outlive the instances using them.

pub mod volume;

pub use volume::{Volume, VolumeManager};
