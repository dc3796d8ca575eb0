//! Weekender — onboarding survey backend for the weekend event digest.

pub mod config;
pub mod error;
pub mod http;
pub mod notify;
pub mod store;
pub mod survey;
