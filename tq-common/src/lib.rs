// tq-common - Shared configuration types for the task queue
//
// The broker and result backend both read their Redis settings from here.

pub mod config;

pub use config::*;
