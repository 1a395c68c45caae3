//! Simulated payment gateway.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::interfaces::{ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway};

/// Gateway stand-in with configurable latency and decline rate.
///
/// A latency above the processor's deadline produces timeouts.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedGateway {
    /// `failure_rate` is clamped to `[0, 1]`.
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_finite() {
            failure_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            latency,
            failure_rate,
        }
    }

    /// Always approves, immediately.
    pub fn approving() -> Self {
        Self::new(Duration::ZERO, 0.0)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let declined = rand::rng().random_bool(self.failure_rate);
        debug!(
            payment_id = %request.payment_id,
            amount_cents = request.amount_cents,
            declined,
            "Simulated charge"
        );

        if declined {
            return Err(GatewayError::Declined("card declined".to_string()));
        }
        Ok(ChargeReceipt {
            gateway_ref: format!("sim_{}", Uuid::new_v4().simple()),
        })
    }
}
