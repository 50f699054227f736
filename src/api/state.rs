//! Shared application state for the HTTP handlers. Every engine is an
//! injected collaborator; nothing reaches for globals.

use std::sync::Arc;

use crate::active_status::ActiveStatusService;
use crate::files::FileService;
use crate::fleet::FleetService;
use crate::intel::IntelService;
use crate::notify::NotifyService;

#[derive(Clone)]
pub struct AppState {
    pub notify: Arc<NotifyService>,
    pub fleet: Arc<FleetService>,
    pub intel: Arc<IntelService>,
    pub active_status: Arc<ActiveStatusService>,
    pub files: Arc<FileService>,
    /// Shown in the status dump
    pub kv_addr: String,
}
