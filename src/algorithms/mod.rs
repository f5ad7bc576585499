//! Core algorithms: localization and surface mapping.

pub mod localization;
pub mod mapping;
