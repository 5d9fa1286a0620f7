//! `sage-domain`: types shared by every SAGE3 kernel-proxy crate:
//! the error type, the configuration tree, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
