//! Async client for the Ex Libris Alma REST API.
//!
//! # Overview
//! Remote resources are reached by chaining calls instead of building URL
//! strings: `client.users.for_id("U1")?.loans().await?` issues
//! `GET /users/U1/loans` and caches the result on the user instance.
//!
//! # Design
//! - `AlmaApi` builds `HttpRequest` values and parses `HttpResponse` values;
//!   an `HttpExecutor` (reqwest by default) does the I/O in between.
//! - The resource framework only depends on the `Transport` trait.
//! - Resource types are declared as data in a `Registry`; the client facade
//!   binds the transport into it once and then shares it read-only.
//! - Each `Resource` owns its sub-resource cache. There is no eviction.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod merge;
pub mod resource;
pub mod resources;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::AlmaClient;
pub use config::{ClientConfig, ExtraConfig};
pub use error::{AlmaError, Result};
pub use http::{HttpRequest, HttpResponse};
pub use merge::{merge, merged};
pub use resource::{ChildSpec, ConfigPatch, Registry, Resource, ResourceConfig, ResourceKind};
pub use resources::{User, Users, USER, USER_FEE, USER_LOAN, USER_REQUEST};
pub use transport::{AlmaApi, HttpExecutor, ReqwestExecutor, Transport};
