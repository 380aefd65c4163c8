//! # wts-sessions – Terminal Services session directory management
//!
//! Inspect and administer interactive sessions on Windows hosts through the
//! Terminal Services session directory (`wtsapi32.dll`). Provides:
//!
//! - **Enumeration** – list the interactive sessions on a host, with an
//!   optional detail pass adding idle and logon times
//! - **Session queries** – client attributes, protocol statistics, and
//!   arbitrary string attributes for a single session
//! - **Dispatch** – disconnect, log off, or deliver an interactive message
//!   to many sessions across many hosts in one batch, one handle per host,
//!   sessions fanned out concurrently, with a per-target outcome record
//! - **Resource discipline** – RAII host handles and buffer guards so every
//!   opened handle and every directory-allocated buffer is released exactly
//!   once on every exit path
//!
//! The native protocol surface is abstracted behind the
//! [`directory::SessionDirectory`] trait; the `wtsapi32` backend is compiled
//! on Windows only, and the portable core (buffer codecs, enumeration,
//! dispatch) is exercised against an in-memory backend in the tests.

pub mod codec;
pub mod directory;
pub mod dispatch;
pub mod messaging;
pub mod query;
pub mod sessions;
pub mod types;

#[cfg(windows)]
pub mod wts_ffi;

#[cfg(test)]
pub mod mock;
