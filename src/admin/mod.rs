//! AdminAdapter - Narrow contract exposed to the administrative layer
//!
//! The HTTP surface wraps exactly these operations; nothing else in the
//! core is reachable from outside. Lifecycle calls are idempotent and
//! answer `{success, message}`; input errors (no face, multiple faces,
//! duplicate id) surface verbatim.

use crate::attendance::AttendanceEvent;
use crate::config::FtsConfig;
use crate::controller::{FtsController, FtsStatus};
use crate::discovery::DiscoveredCamera;
use crate::error::{Error, Result};
use crate::pipeline::LiveFace;
use crate::publish::MjpegSubscriber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Uniform admin call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
}

impl AdminResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn err(error: &Error) -> Self {
        Self {
            success: false,
            message: error.to_string(),
        }
    }
}

/// AdminAdapter instance
pub struct AdminAdapter {
    controller: Arc<FtsController>,
}

impl AdminAdapter {
    pub fn new(controller: Arc<FtsController>) -> Self {
        Self { controller }
    }

    pub async fn start(&self) -> AdminResponse {
        match self.controller.start().await {
            Ok(outcome) => AdminResponse::ok(outcome.message()),
            Err(e) => {
                tracing::error!(error = %e, "Start failed");
                AdminResponse::err(&e)
            }
        }
    }

    pub async fn stop(&self) -> AdminResponse {
        match self.controller.stop().await {
            Ok(outcome) => AdminResponse::ok(outcome.message()),
            Err(e) => AdminResponse::err(&e),
        }
    }

    pub async fn restart(&self) -> AdminResponse {
        match self.controller.restart().await {
            Ok(outcome) => AdminResponse::ok(outcome.message()),
            Err(e) => AdminResponse::err(&e),
        }
    }

    pub async fn status(&self) -> FtsStatus {
        self.controller.status().await
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredCamera>> {
        self.controller.discover().await
    }

    /// Enroll from an image; fails with `NoFace`, `MultipleFaces`, or
    /// `Duplicate` exactly as the pipeline saw it
    pub async fn enroll(
        &self,
        employee_id: &str,
        image_bytes: &[u8],
        display_name: &str,
    ) -> AdminResponse {
        match self
            .controller
            .enroll(employee_id, image_bytes, display_name)
            .await
        {
            Ok(()) => AdminResponse::ok(format!("Enrolled {employee_id}")),
            Err(e) => AdminResponse::err(&e),
        }
    }

    pub async fn remove_identity(&self, employee_id: &str) -> AdminResponse {
        match self.controller.remove_identity(employee_id).await {
            Ok(()) => AdminResponse::ok(format!("Removed {employee_id}")),
            Err(e) => AdminResponse::err(&e),
        }
    }

    /// Currently tracked faces per camera
    pub async fn live_faces(&self) -> Result<HashMap<String, Vec<LiveFace>>> {
        self.controller.live_faces().await
    }

    /// Accepted attendance events for one employee in the trailing window
    pub async fn recent_attendance(
        &self,
        employee_id: &str,
        window: Duration,
    ) -> Result<Vec<AttendanceEvent>> {
        let recorder = self.controller.recorder().await?;
        recorder.recent_for(employee_id, window).await
    }

    pub async fn snapshot(&self) -> FtsConfig {
        self.controller.config_snapshot().await
    }

    pub async fn apply_config(&self, config: FtsConfig) -> AdminResponse {
        match self.controller.apply_config(config).await {
            Ok(()) => AdminResponse::ok("Configuration applied"),
            Err(e) => AdminResponse::err(&e),
        }
    }

    /// Byte-stream subscription for one camera's preview.
    /// Serve it with `MjpegSubscriber::content_type()`.
    pub async fn subscribe_mjpeg(&self, camera_id: &str) -> Result<MjpegSubscriber> {
        self.controller.subscribe_mjpeg(camera_id).await
    }
}
