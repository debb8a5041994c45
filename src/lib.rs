// src/lib.rs — Library root for ephemera

pub mod api;
pub mod cli;
pub mod compute;
pub mod infra;
pub mod parse;
pub mod service;
pub mod session;
pub mod sweep;
