//! Data Governance Module
//!
//! GDPR data export lifecycle: request creation, collection, generation,
//! download checks and the periodic maintenance jobs.

pub mod collector;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod jobs;
pub mod requests;
pub mod types;

pub use collector::{collect_user_data, ExportDocument};
pub use error::ExportError;
pub use generator::generate_export;
pub use jobs::{cleanup_expired_exports, process_pending_exports, spawn_maintenance_task};
pub use requests::{
    can_download_export, create_export_request, get_export_status, get_user_exports,
};
pub use types::{
    DownloadDenial, DownloadEligibility, ExportRequest, ExportRequestSummary, ExportStatus,
    ExportType,
};
