use std::sync::Arc;

use crate::application::ports::{JobStore, MediaProcessor, Staging};
use crate::application::services::{IntakeService, ModelPool};
use crate::presentation::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub staging: Arc<dyn Staging>,
    pub media: Arc<dyn MediaProcessor>,
    pub intake: Arc<IntakeService>,
    pub pool: Arc<ModelPool>,
    pub settings: Arc<Settings>,
}
