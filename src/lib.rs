// ABOUTME: Library crate for tenantgate exposing the tenant connection pool, its configuration and CLI commands

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod gateway;
