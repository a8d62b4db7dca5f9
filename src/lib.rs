//! patrol-sync - offline-first client core for field patrol apps
//!
//! Pulls the plant/area/equipment/tag/parameter hierarchy into a local
//! SQLite store and keeps cannot-patrol reports locally until the server
//! has them.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod session;

pub use api::{ApiClient, RemoteApi};
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityState, FixedConnectivity, TcpProbe};
pub use db::Database;
pub use error::{Error, Result};
pub use queue::{FlushReport, ReportQueue, Submission, SubmitOutcome};
pub use session::{CredentialStore, MemoryCredentials, Session};
