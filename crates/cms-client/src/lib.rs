//! Client side of the content lifecycle gateway: the HTTP client a CMS
//! integration uses, its save hooks, and signed editor actions.

pub mod client;
pub mod error;
pub mod hooks;
pub mod links;

pub use client::*;
pub use error::*;
pub use hooks::*;
pub use links::*;

