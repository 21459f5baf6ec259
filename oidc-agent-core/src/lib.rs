//! Core protocol and data types for the oidc-agent workspace
//!
//! This crate carries everything both sides of the agent's IPC socket need
//! to agree on: the account record and its JSON representation, the
//! encrypted file envelope, the device-authorization grant types, and the
//! request/response vocabulary itself. It performs no I/O; the agent and
//! its clients live in the `oidc-agent` crate.

pub mod account;
pub use account::{AccountRecord, Endpoints};

pub mod crypt;
pub use crypt::{CryptError, Sealed};

pub mod device;
pub use device::DeviceCode;

pub mod ipc;
pub use ipc::{Flow, Request, Response};
