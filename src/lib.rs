//! invoice-vault - backup, restore and reset for a single-tenant invoice store
//!
//! The store is one SQLite file under `data/`, next to an `uploads/` tree of
//! user files. This crate produces downloadable artifacts of either or both,
//! swaps them back in from an uploaded artifact without ever leaving the
//! store closed, and wipes business data on request.
//!
//! Entry points are [`service::VaultService`] (library), [`http_server`]
//! (administrative API) and [`cli`].

pub mod backup;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod fault_point;
pub mod http_server;
pub mod layout;
pub mod logging;
pub mod reset;
pub mod restore;
pub mod service;
pub mod store;
