//! Result handoff from the embedded payment page back to the host.
//!
//! The page posts a single JSON message `{status, reference?, message?}` where status is
//! `success`, `cancelled` or `error`. A success still has to be verified with the backend.

use crate::api::client::ApiClient;
use crate::api::models::{Id, Subscription};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentBridgeMessage {
    pub status: PaymentStatus,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success { reference: String },
    Cancelled,
    Failed { message: String },
}

impl PaymentBridgeMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn outcome(self) -> Result<PaymentOutcome> {
        match self.status {
            PaymentStatus::Success => match self.reference.filter(|r| !r.trim().is_empty()) {
                Some(reference) => Ok(PaymentOutcome::Success { reference }),
                None => Err(ClientError::Payment {
                    message: "Payment page reported success without a reference".into(),
                    reference: None,
                }),
            },
            PaymentStatus::Cancelled => Ok(PaymentOutcome::Cancelled),
            PaymentStatus::Error => Ok(PaymentOutcome::Failed {
                message: self.message.unwrap_or_else(|| "Payment failed".into()),
            }),
        }
    }
}

#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify_payment(&self, reference: &str, plan: &Id) -> Result<Subscription>;
}

#[async_trait]
impl PaymentVerifier for ApiClient {
    async fn verify_payment(&self, reference: &str, plan: &Id) -> Result<Subscription> {
        ApiClient::verify_payment(self, reference, plan).await
    }
}

/// Returns the activated subscription, or `None` when the user cancelled.
///
/// Once the page reports a charge, any verification failure becomes [`ClientError::Payment`]
/// carrying the reference so the user can quote it to support.
pub async fn complete_payment(
    verifier: &dyn PaymentVerifier,
    outcome: PaymentOutcome,
    plan: &Id,
) -> Result<Option<Subscription>> {
    match outcome {
        PaymentOutcome::Cancelled => {
            log::info!("Payment cancelled by user");
            Ok(None)
        }
        PaymentOutcome::Failed { message } => Err(ClientError::Payment { message, reference: None }),
        PaymentOutcome::Success { reference } => match verifier.verify_payment(&reference, plan).await {
            Ok(sub) => {
                log::info!("Payment {} verified", reference);
                Ok(Some(sub))
            }
            Err(e @ ClientError::Payment { .. }) => Err(e),
            Err(e) => {
                log::error!("Payment {} charged but not verified: {}", reference, e);
                Err(ClientError::Payment {
                    message: "Payment succeeded but verification failed".into(),
                    reference: Some(reference),
                })
            }
        },
    }
}
