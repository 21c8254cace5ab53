//! Transport adapters for a [`ZapiApp`](crate::server::host::ZapiApp)

pub mod rest;

pub use rest::{RestExposure, UserExtractor, header_user_extractor};
