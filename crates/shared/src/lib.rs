//! Types shared between the session controller and its remote collaborators.

pub mod domain;
pub mod error;
pub mod protocol;
