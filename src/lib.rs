pub mod app;
pub mod binning;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod deposit;
pub mod domain;
pub mod error;
pub mod layout;
pub mod marker;
pub mod metadata;
pub mod notify;
pub mod output;
pub mod queue_store;
pub mod queuer;
pub mod reconcile;
pub mod report;
pub mod scheduler;
pub mod study_index;
pub mod transfer;
