//! Billing ledger and payment reconciliation for residential associations.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
