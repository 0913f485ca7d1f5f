//! Sandbox module containing all execution-related components.
//!
//! A script flows through [`validator`], [`preparer`], [`executor`] (which
//! drives a [`provider`] and reads the [`channel`]) and finally
//! [`classifier`], producing an [`outcome::ExecutionOutcome`].

pub mod artifact;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod io;
pub mod outcome;
pub mod preparer;
pub mod provider;
pub mod validator;
