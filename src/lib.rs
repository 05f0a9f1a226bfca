//! Umbrella crate for the offline media workspace.
//!
//! Hosts depend on this one package and pick a surface by feature:
//! `desktop-shims` (default) exposes the [`service`] façade with desktop
//! bridge defaults, `engine-only` exposes the bare [`offline`] engine for
//! hosts that wire every collaborator themselves.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "engine-only")]
pub use core_offline as offline;
