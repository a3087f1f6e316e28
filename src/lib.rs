//! Record and view how much water you drank today, with a health store doing
//! all of the bookkeeping.

pub mod config;
pub mod form;
pub mod http;
pub mod intake;
pub mod oauth;
pub mod screen;
pub mod storage;
pub mod store;
pub mod structs;
pub mod telemetry;

pub use {
    form::{FormState, IntakeForm},
    intake::{IntakeError, IntakeManager},
    store::{HealthStore, StoreError},
};
