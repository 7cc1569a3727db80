//! Normalization and aggregation pipeline for the school usage dashboard.
//!
//! Data flows one way: [`source`] reads the file, [`dataset`] normalizes it
//! (with [`columns`] deciding what each column means), [`filter`] narrows it,
//! [`aggregate`] groups and sums, and [`queries`] composes those into the
//! view-specific shapes the `dashboardd` sidecar serves over [`ipc`].

pub mod aggregate;
pub mod cache;
pub mod calendar;
pub mod columns;
pub mod config;
pub mod dataset;
pub mod filter;
pub mod ipc;
pub mod queries;
pub mod source;
