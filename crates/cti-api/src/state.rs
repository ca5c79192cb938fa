//! Services shared by every handler

use cti_esl::EslClient;
use cti_services::{BroadcastHub, CallStateManager};
use std::sync::Arc;

/// Handles to the services owned by the process entry point
#[derive(Clone)]
pub struct AppState {
    pub esl: EslClient,
    pub calls: Arc<CallStateManager>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new(esl: EslClient, calls: Arc<CallStateManager>, hub: Arc<BroadcastHub>) -> Self {
        Self { esl, calls, hub }
    }
}
