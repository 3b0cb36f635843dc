//! Pure conversions from upstream payloads to gateway entities.

pub mod article;
