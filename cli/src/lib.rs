//! didiff CLI - create and apply binary patches between container images.

pub mod commands;
pub mod output;
