use crate::domain::order::Order;
use crate::domain::payment::{GatewayCharge, PayerDetails};
use crate::domain::payout::PayoutRequest;
use crate::domain::ports::{GatewayRouter, PaymentGateway};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use uuid::Uuid;

fn short_ref(prefix: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &token[..12].to_uppercase())
}

/// Internal rail: the buyer pays from wallet balance. The charge settles
/// synchronously; the actual debit is applied by the engine as part of the
/// settlement, atomically with the escrow hold.
pub struct WalletRail;

#[async_trait]
impl PaymentGateway for WalletRail {
    async fn initiate(&self, _order: &Order, _payer: &PayerDetails) -> Result<GatewayCharge> {
        Ok(GatewayCharge::Settled {
            gateway_ref: short_ref("WALLET"),
        })
    }

    async fn disburse(&self, _payout: &PayoutRequest) -> Result<String> {
        Err(EngineError::Gateway(
            "wallet rail does not disburse externally".to_string(),
        ))
    }
}

/// Sandbox stand-in for the mobile-money STK push integration. Returns a
/// pending charge; settlement arrives through the engine's callback.
pub struct MpesaGateway;

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn initiate(&self, _order: &Order, payer: &PayerDetails) -> Result<GatewayCharge> {
        if payer.account.trim().is_empty() {
            return Err(EngineError::Gateway("missing payer phone number".to_string()));
        }
        Ok(GatewayCharge::Pending {
            gateway_ref: short_ref("MPESA"),
        })
    }

    async fn disburse(&self, _payout: &PayoutRequest) -> Result<String> {
        Ok(short_ref("MPS"))
    }
}

/// Sandbox card processor.
pub struct CardGateway;

#[async_trait]
impl PaymentGateway for CardGateway {
    async fn initiate(&self, _order: &Order, _payer: &PayerDetails) -> Result<GatewayCharge> {
        Ok(GatewayCharge::Pending {
            gateway_ref: short_ref("CARD"),
        })
    }

    async fn disburse(&self, _payout: &PayoutRequest) -> Result<String> {
        Err(EngineError::Gateway(
            "card rail does not disburse".to_string(),
        ))
    }
}

/// Sandbox on-chain watcher. Confirmation latency is modeled by the pending
/// charge plus a later callback, like mobile money.
pub struct OnChainGateway;

#[async_trait]
impl PaymentGateway for OnChainGateway {
    async fn initiate(&self, _order: &Order, _payer: &PayerDetails) -> Result<GatewayCharge> {
        Ok(GatewayCharge::Pending {
            gateway_ref: short_ref("CHAIN"),
        })
    }

    async fn disburse(&self, _payout: &PayoutRequest) -> Result<String> {
        Err(EngineError::Gateway(
            "on-chain rail does not disburse".to_string(),
        ))
    }
}

/// Sandbox bank transfer rail, used for payout disbursement only.
pub struct BankGateway;

#[async_trait]
impl PaymentGateway for BankGateway {
    async fn initiate(&self, _order: &Order, _payer: &PayerDetails) -> Result<GatewayCharge> {
        Err(EngineError::Gateway(
            "bank transfers are not supported at checkout".to_string(),
        ))
    }

    async fn disburse(&self, _payout: &PayoutRequest) -> Result<String> {
        Ok(short_ref("BNK"))
    }
}

/// Router wired with the sandbox adapters, one per rail.
pub fn sandbox_router() -> GatewayRouter {
    GatewayRouter::new(
        Box::new(MpesaGateway),
        Box::new(WalletRail),
        Box::new(CardGateway),
        Box::new(OnChainGateway),
        Box::new(BankGateway),
    )
}
