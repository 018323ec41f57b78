//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::upload::UploadService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    uploads: UploadService,
}

impl AppState {
    /// Create a new application state with an upload engine built from
    /// `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_service(UploadService::new(config.upload_settings()))
    }

    /// Create state around an already constructed upload engine
    pub fn with_service(uploads: UploadService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { uploads }),
        }
    }

    /// Get the upload engine
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }
}
