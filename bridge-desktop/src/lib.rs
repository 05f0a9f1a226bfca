//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides implementations of all bridge traits the offline
//! media engine consumes, using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest` (ranged streaming for resumable downloads)
//! - `FileSystemAccess` using `tokio::fs`
//! - `SettingsStore` using a SQLite-backed key-value store
//! - `NetworkMonitor` using a periodic TCP reachability probe
//! - `StorageInfo` using `fs2` volume statistics
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopStorageInfo, ReqwestHttpClient, TokioFileSystem};
//! use bridge_traits::{FileSystemAccess, HttpClient, StorageInfo};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!     let storage = DesktopStorageInfo::new();
//!
//!     // Hand these to CoreConfig::builder()
//! }
//! ```

mod filesystem;
mod http;
mod network;
mod settings;
mod storage_info;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
pub use settings::SqliteSettingsStore;
pub use storage_info::DesktopStorageInfo;
