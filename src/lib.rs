//! Client core for the listing marketplace: REST and push collaborators, realtime
//! reconciliation of threads, notifications and favorites, and on-device storage.

pub mod api;
pub mod config;
pub mod error;
pub mod payment;
pub mod realtime;
pub mod search;
pub mod session;
pub mod storage;
pub mod utils;

pub use api::ApiClient;
pub use config::AppConfig;
pub use error::{ClientError, Result};
pub use session::Session;
pub use storage::DeviceStore;
