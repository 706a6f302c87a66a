//! Booking submission to the DropTruck backend.

use crate::booking::BookingRecord;
use crate::config::AgentConfig;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

const INDENT_PATH: &str = "/agent-newindent";

/// What the backend said about a submitted booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted { status: u16 },
    Rejected { status: u16, body: String },
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted { .. })
    }
}

/// Hands a finished booking record to the backend. No retry happens on this side.
#[async_trait]
pub trait BookingSubmitter: Send + Sync {
    async fn submit(&self, booking: &BookingRecord) -> VoiceResult<SubmissionOutcome>;
}

/// POSTs the booking as JSON to `{base_url}/agent-newindent`.
#[derive(Debug, Clone)]
pub struct HttpBookingSubmitter {
    pub base_url: String,
    client: reqwest::Client,
}

impl HttpBookingSubmitter {
    pub fn from_config(config: &AgentConfig) -> VoiceResult<Self> {
        Self::new(config.backend_url.clone(), config.backend_timeout())
    }

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Submission(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), INDENT_PATH)
    }
}

#[async_trait]
impl BookingSubmitter for HttpBookingSubmitter {
    async fn submit(&self, booking: &BookingRecord) -> VoiceResult<SubmissionOutcome> {
        let url = self.endpoint();
        info!("Submitting booking to {}", url);
        let res = self
            .client
            .post(&url)
            .json(&payload(booking))
            .send()
            .await
            .map_err(|e| VoiceError::Submission(e.to_string()))?;
        let status = res.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("✅ Booking accepted ({})", status);
            return Ok(SubmissionOutcome::Accepted {
                status: status.as_u16(),
            });
        }
        let body = res.text().await.unwrap_or_default();
        error!("Booking rejected ({}): {}", status, body);
        Ok(SubmissionOutcome::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Backend field names for a booking. Unset fields are sent as `null`.
pub fn payload(booking: &BookingRecord) -> Value {
    json!({
        "name": booking.contact_name,
        "contact": booking.contact_number,
        "pickup_location": booking.pickup_location,
        "drop_location": booking.drop_location,
        "truck_type": booking.vehicle_type,
        "body_type": booking.body_type.map(|b| b.as_str()),
        "material": booking.material,
        "required_date": booking.trip_date.map(|d| d.format("%Y-%m-%d").to_string()),
    })
}
