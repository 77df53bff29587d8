//! Database initialization shared by simak services

pub mod init;

pub use init::*;
