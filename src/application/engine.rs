use crate::application::ledger::WalletLedger;
use crate::domain::actor::{Actor, UserId};
use crate::domain::escrow::{Escrow, EscrowStatus};
use crate::domain::events::EngineEvent;
use crate::domain::money::{Amount, CommissionRate, Money};
use crate::domain::order::{DeliveryMethod, Order, OrderId, OrderStatus, ProductId};
use crate::domain::payment::{
    AttemptStatus, GatewayCharge, PayerDetails, PaymentAttempt, PaymentMethod,
};
use crate::domain::payout::{PayoutId, PayoutMethod, PayoutRequest, PayoutStatus};
use crate::domain::ports::{
    AttemptStoreBox, EscrowStoreBox, GatewayRouter, NotificationSinkBox, OrderStoreBox,
    PayoutStoreBox, ProductCatalogBox, WalletStoreBox,
};
use crate::domain::wallet::{LedgerEntry, OwnerRef, TxKind, WalletAccount, WalletTransaction};
use crate::error::{EngineError, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retry budget for the engine's own optimistic-concurrency
/// conflicts. Caller-supplied version mismatches are never retried here; the
/// caller refetches and decides.
const MAX_CAS_RETRIES: u32 = 5;
const RETRY_BASE_DELAY_MS: u64 = 5;

/// Storage and collaborator wiring for a [`MarketEngine`].
pub struct EngineParts {
    pub orders: OrderStoreBox,
    pub escrows: EscrowStoreBox,
    pub wallets: WalletStoreBox,
    pub payouts: PayoutStoreBox,
    pub attempts: AttemptStoreBox,
    pub catalog: ProductCatalogBox,
    pub gateways: GatewayRouter,
    pub notifier: NotificationSinkBox,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub product: ProductId,
    pub quantity: u32,
    pub delivery_method: DeliveryMethod,
}

/// What the caller of `pay_order` gets back. External rails return a pending
/// ticket; the order transitions to `paid` only on the confirmed callback.
#[derive(Debug, Clone)]
pub struct PaymentTicket {
    pub order: Order,
    pub gateway_ref: String,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Funds captured and escrow held; the order is `paid`.
    Settled(Order),
    /// Funds captured but the order could no longer be paid; the full amount
    /// was returned to the buyer's wallet.
    Refunded(Order),
    /// The gateway reported failure; the order is unchanged.
    Failed(Order),
    /// Replay of a callback that was already applied. No-op.
    AlreadySettled,
}

/// The marketplace transaction engine: authoritative order lifecycle, escrow
/// and wallet ledgers, and payout processing, all behind one operation-level
/// contract. Mutations are serialized per entity through store-level
/// compare-and-swap; no global lock is taken.
pub struct MarketEngine {
    orders: OrderStoreBox,
    escrows: EscrowStoreBox,
    ledger: WalletLedger,
    payouts: PayoutStoreBox,
    attempts: AttemptStoreBox,
    catalog: ProductCatalogBox,
    gateways: GatewayRouter,
    notifier: NotificationSinkBox,
    commission_rate: CommissionRate,
}

fn check_version(expected: u64, found: u64) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(EngineError::StaleVersion { expected, found })
    }
}

impl MarketEngine {
    pub fn new(parts: EngineParts, commission_rate: CommissionRate) -> Self {
        Self {
            orders: parts.orders,
            escrows: parts.escrows,
            ledger: WalletLedger::new(parts.wallets),
            payouts: parts.payouts,
            attempts: parts.attempts,
            catalog: parts.catalog,
            gateways: parts.gateways,
            notifier: parts.notifier,
            commission_rate,
        }
    }

    async fn backoff(&self, retry: u32) {
        tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << retry.min(4))).await;
    }

    async fn load_order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {id}")))
    }

    async fn load_payout(&self, id: PayoutId) -> Result<PayoutRequest> {
        self.payouts
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("payout {id}")))
    }

    // ----- orders ---------------------------------------------------------

    /// Creates a pending order, reserving catalog stock atomically with it.
    /// Pricing and commission are frozen here and never recomputed.
    pub async fn create_order(&self, actor: &Actor, request: CreateOrder) -> Result<Order> {
        let Actor::Buyer(buyer) = actor else {
            return Err(EngineError::InvalidActor(
                "only buyers can place orders".to_string(),
            ));
        };
        if request.quantity == 0 {
            return Err(EngineError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        let snapshot = self.catalog.reserve(request.product, request.quantity).await?;
        let order = match Order::new(
            *buyer,
            snapshot.farmer,
            request.product,
            request.quantity,
            snapshot.unit_price,
            self.commission_rate,
            request.delivery_method,
        ) {
            Ok(order) => order,
            Err(err) => {
                self.catalog.release(request.product, request.quantity).await?;
                return Err(err);
            }
        };
        let order = match self.orders.insert(order).await {
            Ok(order) => order,
            Err(err) => {
                self.catalog.release(request.product, request.quantity).await?;
                return Err(err);
            }
        };
        info!(order = %order.id, buyer = %buyer, total = %order.total_amount, "order created");
        self.notifier
            .notify(EngineEvent::OrderCreated {
                order: order.id,
                farmer: order.farmer,
            })
            .await;
        Ok(order)
    }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.load_order(id).await
    }

    /// Farmer acknowledgment; idempotent when already confirmed.
    pub async fn confirm_order(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        check_version(expected_version, order.version)?;
        let mut next = order.clone();
        if !next.confirm(actor)? {
            return Ok(order);
        }
        let updated = self.orders.update(next).await?;
        self.notifier
            .notify(EngineEvent::OrderConfirmed { order: id })
            .await;
        Ok(updated)
    }

    /// Initiates payment through the rail for `method`. The order moves to
    /// `paid` only once the gateway confirms: synchronously for the wallet
    /// rail, via `gateway_callback` for external rails.
    pub async fn pay_order(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
        method: PaymentMethod,
        payer: &PayerDetails,
    ) -> Result<PaymentTicket> {
        let order = self.load_order(id).await?;
        order.ensure_buyer(actor)?;
        check_version(expected_version, order.version)?;
        if !order.can_pay() {
            return Err(EngineError::InvalidTransition {
                op: "pay",
                from: order.status.as_str().to_string(),
            });
        }

        let charge = self.gateways.checkout(method).initiate(&order, payer).await?;
        let attempt =
            PaymentAttempt::new(charge.gateway_ref(), order.id, method, order.total_amount);
        self.attempts.insert(attempt.clone()).await?;

        match charge {
            GatewayCharge::Settled { .. } => {
                let order = match self.settle_attempt(&attempt).await? {
                    CallbackOutcome::Settled(order)
                    | CallbackOutcome::Refunded(order)
                    | CallbackOutcome::Failed(order) => order,
                    CallbackOutcome::AlreadySettled => self.load_order(id).await?,
                };
                Ok(PaymentTicket {
                    order,
                    gateway_ref: attempt.gateway_ref,
                    status: AttemptStatus::Settled,
                })
            }
            GatewayCharge::Pending { .. } => {
                info!(order = %id, gateway_ref = %attempt.gateway_ref, ?method, "payment initiated, awaiting confirmation");
                self.notifier
                    .notify(EngineEvent::PaymentPending {
                        order: id,
                        gateway_ref: attempt.gateway_ref.clone(),
                    })
                    .await;
                Ok(PaymentTicket {
                    order,
                    gateway_ref: attempt.gateway_ref,
                    status: AttemptStatus::Pending,
                })
            }
        }
    }

    /// Inbound gateway confirmation. Tolerates callbacks arriving late, out
    /// of order, or duplicated: each attempt settles at most once, keyed by
    /// `(order, gateway_ref)`.
    pub async fn gateway_callback(
        &self,
        gateway_ref: &str,
        success: bool,
        amount: Money,
    ) -> Result<CallbackOutcome> {
        let Some(attempt) = self.attempts.get(gateway_ref).await? else {
            return Err(EngineError::NotFound(format!(
                "payment attempt {gateway_ref}"
            )));
        };
        if attempt.is_settled() {
            info!(gateway_ref, "duplicate gateway callback ignored");
            return Ok(CallbackOutcome::AlreadySettled);
        }
        if !success {
            self.attempts.mark(gateway_ref, AttemptStatus::Failed).await?;
            let order = self.load_order(attempt.order).await?;
            self.notifier
                .notify(EngineEvent::PaymentFailed {
                    order: order.id,
                    gateway_ref: gateway_ref.to_string(),
                })
                .await;
            return Ok(CallbackOutcome::Failed(order));
        }
        if amount != attempt.amount {
            // Captured amount differs from what was requested; leave the
            // attempt pending for reconciliation.
            warn!(gateway_ref, expected = %attempt.amount, got = %amount, "callback amount mismatch");
            return Err(EngineError::Validation(format!(
                "callback amount {amount} does not match attempt amount {}",
                attempt.amount
            )));
        }
        self.settle_attempt(&attempt).await
    }

    /// Applies a confirmed capture: holds escrow, funds it (debiting the
    /// buyer wallet for the internal rail), and transitions the order. The
    /// escrow-per-order uniqueness barrier serializes racing attempts.
    async fn settle_attempt(&self, attempt: &PaymentAttempt) -> Result<CallbackOutcome> {
        let wallet_funded = attempt.method == PaymentMethod::Wallet;
        let order = self.load_order(attempt.order).await?;

        if !order.can_pay() {
            if order.escrow.is_some() {
                // Another attempt already funded this order.
                self.attempts
                    .mark(&attempt.gateway_ref, AttemptStatus::Failed)
                    .await?;
                return Err(EngineError::DuplicateEscrow(order.id));
            }
            if wallet_funded {
                self.attempts
                    .mark(&attempt.gateway_ref, AttemptStatus::Failed)
                    .await?;
                return Err(EngineError::InvalidTransition {
                    op: "pay",
                    from: order.status.as_str().to_string(),
                });
            }
            // External money arrived for an order that can no longer be
            // paid. It was actually received, so park it in the buyer wallet
            // instead of dropping the callback.
            let amount = Amount::new(attempt.amount)?;
            self.ledger
                .credit(
                    OwnerRef::User(order.buyer),
                    TxKind::Refund,
                    amount,
                    attempt.gateway_ref.clone(),
                )
                .await?;
            self.attempts
                .mark(&attempt.gateway_ref, AttemptStatus::Settled)
                .await?;
            warn!(order = %order.id, gateway_ref = %attempt.gateway_ref, "late settlement parked as buyer refund");
            self.notifier
                .notify(EngineEvent::EscrowRefunded {
                    order: order.id,
                    amount: attempt.amount,
                })
                .await;
            return Ok(CallbackOutcome::Refunded(order));
        }

        let escrow = match self.escrows.insert(Escrow::new(order.id, attempt.amount)).await {
            Ok(escrow) => escrow,
            Err(err) => {
                self.attempts
                    .mark(&attempt.gateway_ref, AttemptStatus::Failed)
                    .await?;
                return Err(err);
            }
        };

        if wallet_funded {
            let amount = Amount::new(attempt.amount)?;
            if let Err(err) = self
                .ledger
                .debit(
                    OwnerRef::User(order.buyer),
                    TxKind::Payment,
                    amount,
                    attempt.gateway_ref.clone(),
                )
                .await
            {
                // Nothing was captured; abort the hold entirely.
                self.escrows.remove(escrow.id).await?;
                self.attempts
                    .mark(&attempt.gateway_ref, AttemptStatus::Failed)
                    .await?;
                return Err(err);
            }
        }

        let mut current = order;
        let mut retries = 0;
        loop {
            if !current.can_pay() {
                // Lost the race to a cancellation after funds were captured;
                // bounce the money back to the buyer.
                return self.refund_captured(&current, escrow, attempt).await;
            }
            let mut next = current.clone();
            next.mark_paid(escrow.id)?;
            match self.orders.update(next).await {
                Ok(updated) => {
                    self.attempts
                        .mark(&attempt.gateway_ref, AttemptStatus::Settled)
                        .await?;
                    info!(
                        order = %updated.id,
                        gateway_ref = %attempt.gateway_ref,
                        amount = %attempt.amount,
                        "payment settled, escrow held"
                    );
                    self.notifier
                        .notify(EngineEvent::PaymentSettled {
                            order: updated.id,
                            gateway_ref: attempt.gateway_ref.clone(),
                        })
                        .await;
                    return Ok(CallbackOutcome::Settled(updated));
                }
                Err(err) if err.is_conflict() && retries < MAX_CAS_RETRIES => {
                    retries += 1;
                    self.backoff(retries).await;
                    current = self.load_order(attempt.order).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Refunds a held escrow in full to the buyer wallet. Used when a
    /// settlement raced with a cancellation.
    async fn refund_captured(
        &self,
        order: &Order,
        escrow: Escrow,
        attempt: &PaymentAttempt,
    ) -> Result<CallbackOutcome> {
        let mut next = escrow;
        next.refund()?;
        let refunded = self.escrows.update(next).await?;
        let amount = Amount::new(refunded.amount)?;
        self.ledger
            .credit(
                OwnerRef::User(order.buyer),
                TxKind::Refund,
                amount,
                format!("escrow {}", refunded.id),
            )
            .await?;
        self.attempts
            .mark(&attempt.gateway_ref, AttemptStatus::Settled)
            .await?;
        warn!(order = %order.id, escrow = %refunded.id, "captured funds refunded after cancellation race");
        self.notifier
            .notify(EngineEvent::EscrowRefunded {
                order: order.id,
                amount: refunded.amount,
            })
            .await;
        Ok(CallbackOutcome::Refunded(order.clone()))
    }

    /// Cancels an order while no escrow funds are held, restoring the stock
    /// reservation.
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        check_version(expected_version, order.version)?;
        if self.escrows.get_by_order(id).await?.is_some() {
            return Err(EngineError::InvalidTransition {
                op: "cancel",
                from: order.status.as_str().to_string(),
            });
        }
        let mut next = order;
        next.cancel(actor)?;
        let updated = self.orders.update(next).await?;
        self.catalog.release(updated.product, updated.quantity).await?;
        self.notifier
            .notify(EngineEvent::OrderCancelled { order: id })
            .await;
        Ok(updated)
    }

    /// Farmer refusal of a fresh order. Disallowed once any funds are
    /// escrowed; cancellation (with refund) is the only path out then.
    pub async fn reject_order(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        check_version(expected_version, order.version)?;
        if self.escrows.get_by_order(id).await?.is_some() {
            return Err(EngineError::InvalidTransition {
                op: "reject",
                from: order.status.as_str().to_string(),
            });
        }
        let mut next = order;
        next.reject(actor)?;
        let updated = self.orders.update(next).await?;
        self.catalog.release(updated.product, updated.quantity).await?;
        self.notifier
            .notify(EngineEvent::OrderRejected { order: id })
            .await;
        Ok(updated)
    }

    pub async fn start_transit(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        check_version(expected_version, order.version)?;
        let mut next = order;
        next.start_transit(actor)?;
        self.orders.update(next).await
    }

    /// Logistics handoff or buyer pickup confirmation.
    pub async fn mark_delivered(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        check_version(expected_version, order.version)?;
        let permitted = actor.is_admin()
            || order.ensure_farmer(actor).is_ok()
            || (order.delivery_method == DeliveryMethod::Pickup
                && order.ensure_buyer(actor).is_ok());
        if !permitted {
            return Err(EngineError::InvalidActor(format!(
                "caller may not mark order {id} delivered"
            )));
        }
        let mut next = order;
        next.mark_delivered()?;
        let updated = self.orders.update(next).await?;
        self.notifier
            .notify(EngineEvent::OrderDelivered { order: id })
            .await;
        Ok(updated)
    }

    /// Buyer confirms receipt: releases escrow (idempotently) into the
    /// farmer and platform wallets and completes the order.
    pub async fn confirm_receipt(
        &self,
        actor: &Actor,
        id: OrderId,
        expected_version: u64,
    ) -> Result<Order> {
        let order = self.load_order(id).await?;
        order.ensure_buyer(actor)?;
        check_version(expected_version, order.version)?;
        if order.status == OrderStatus::Completed {
            return Ok(order);
        }
        if order.status != OrderStatus::Delivered {
            return Err(EngineError::InvalidTransition {
                op: "confirm_receipt",
                from: order.status.as_str().to_string(),
            });
        }
        let escrow_id = order
            .escrow
            .ok_or_else(|| EngineError::NotFound(format!("escrow for order {id}")))?;
        let escrow = self
            .escrows
            .get(escrow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("escrow {escrow_id}")))?;
        let (farmer_share, commission) = self.release_escrow(&order, escrow).await?;

        let mut current = order;
        let mut retries = 0;
        loop {
            if current.status == OrderStatus::Completed {
                break;
            }
            let mut next = current.clone();
            next.complete()?;
            match self.orders.update(next).await {
                Ok(updated) => {
                    current = updated;
                    break;
                }
                Err(err) if err.is_conflict() && retries < MAX_CAS_RETRIES => {
                    retries += 1;
                    self.backoff(retries).await;
                    current = self.load_order(id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        info!(order = %id, %farmer_share, %commission, "receipt confirmed, escrow released");
        self.notifier
            .notify(EngineEvent::OrderCompleted { order: id })
            .await;
        Ok(current)
    }

    /// Releases a held escrow exactly once: the commission is computed with
    /// banker's rounding, and the farmer share and platform commission land
    /// in one all-or-nothing ledger application. A replayed release returns
    /// the original split without touching the ledger.
    async fn release_escrow(&self, order: &Order, escrow: Escrow) -> Result<(Money, Money)> {
        let commission = order.commission_rate.commission_on(escrow.amount)?;
        let farmer_share = escrow.amount - commission;
        match escrow.status {
            EscrowStatus::Released => return Ok((farmer_share, commission)),
            EscrowStatus::Refunded => {
                return Err(EngineError::InvalidTransition {
                    op: "release",
                    from: "refunded".to_string(),
                });
            }
            EscrowStatus::Held => {}
        }
        // Closed-system check before anything is written: the split must
        // account for every minor unit held.
        if farmer_share + commission != escrow.amount {
            return Err(EngineError::LedgerImbalance(
                (farmer_share + commission - escrow.amount).minor(),
            ));
        }

        let mut next = escrow.clone();
        next.release()?;
        match self.escrows.update(next).await {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {
                // A concurrent release won; defer to its result.
                let current = self
                    .escrows
                    .get(escrow.id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("escrow {}", escrow.id)))?;
                if current.status == EscrowStatus::Released {
                    return Ok((farmer_share, commission));
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        let reference = format!("order {}", order.id);
        let mut entries = Vec::new();
        if farmer_share.is_positive() {
            entries.push(LedgerEntry::credit(
                OwnerRef::User(order.farmer),
                TxKind::EscrowRelease,
                Amount::new(farmer_share)?,
                reference.clone(),
            ));
        }
        if commission.is_positive() {
            entries.push(LedgerEntry::credit(
                OwnerRef::Platform,
                TxKind::Commission,
                Amount::new(commission)?,
                reference,
            ));
        }
        self.ledger.transfer(entries).await?;
        self.notifier
            .notify(EngineEvent::EscrowReleased {
                order: order.id,
                farmer_share,
                commission,
            })
            .await;
        Ok((farmer_share, commission))
    }

    pub async fn escrow_for(&self, order: OrderId) -> Result<Option<Escrow>> {
        self.escrows.get_by_order(order).await
    }

    // ----- wallets --------------------------------------------------------

    /// Wallet top-up (external deposit).
    pub async fn deposit(&self, user: UserId, amount: Amount) -> Result<WalletTransaction> {
        self.ledger
            .credit(OwnerRef::User(user), TxKind::Deposit, amount, "wallet top-up")
            .await
    }

    pub async fn balance(&self, owner: OwnerRef) -> Result<Money> {
        self.ledger.balance(owner).await
    }

    pub async fn transactions(&self, owner: OwnerRef) -> Result<Vec<WalletTransaction>> {
        self.ledger.transactions(owner).await
    }

    pub async fn accounts(&self) -> Result<Vec<WalletAccount>> {
        self.ledger.accounts().await
    }

    // ----- payouts --------------------------------------------------------

    /// Records a payout request. The wallet is not debited yet; the balance
    /// is only validated as a pre-check here and enforced at approval.
    pub async fn request_payout(
        &self,
        actor: &Actor,
        amount: Amount,
        method: PayoutMethod,
        account_details: impl Into<String> + Send,
    ) -> Result<PayoutRequest> {
        let Actor::Farmer(farmer) = actor else {
            return Err(EngineError::InvalidActor(
                "only farmers can request payouts".to_string(),
            ));
        };
        let balance = self.ledger.balance(OwnerRef::User(*farmer)).await?;
        if amount.value() > balance {
            return Err(EngineError::InsufficientFunds {
                needed: amount.value().minor(),
                available: balance.minor(),
            });
        }
        let payout = PayoutRequest::new(*farmer, amount, method, account_details);
        self.payouts.insert(payout).await
    }

    pub async fn payout(&self, id: PayoutId) -> Result<PayoutRequest> {
        self.load_payout(id).await
    }

    /// Approves a pending payout: debits the wallet, then disburses through
    /// the rail. A processed payout always has its corresponding debit; if
    /// the debit fails against the live balance the request is rejected and
    /// `InsufficientFunds` surfaced.
    pub async fn approve_payout(
        &self,
        actor: &Actor,
        id: PayoutId,
        expected_version: u64,
    ) -> Result<PayoutRequest> {
        if !actor.is_admin() {
            return Err(EngineError::InvalidActor(
                "only admins may approve payouts".to_string(),
            ));
        }
        let payout = self.load_payout(id).await?;
        check_version(expected_version, payout.version)?;
        if payout.status != PayoutStatus::Pending {
            return Err(EngineError::InvalidTransition {
                op: "process",
                from: format!("{:?}", payout.status).to_lowercase(),
            });
        }
        let amount = Amount::new(payout.amount)?;
        let owner = OwnerRef::User(payout.farmer);

        match self
            .ledger
            .debit(owner, TxKind::Withdrawal, amount, id.to_string())
            .await
        {
            Ok(_) => {}
            Err(err @ EngineError::InsufficientFunds { .. }) => {
                // Concurrent depletion since the request was made.
                let mut next = payout.clone();
                next.reject("insufficient funds at approval")?;
                self.payouts.update(next).await?;
                self.notifier
                    .notify(EngineEvent::PayoutRejected {
                        payout: id,
                        reason: "insufficient funds at approval".to_string(),
                    })
                    .await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        match self.gateways.payout(payout.method).disburse(&payout).await {
            Ok(reference) => {
                let mut next = payout.clone();
                next.process(reference.clone())?;
                let updated = self.payouts.update(next).await?;
                info!(payout = %id, %reference, amount = %updated.amount, "payout processed");
                self.notifier
                    .notify(EngineEvent::PayoutProcessed {
                        payout: id,
                        reference,
                    })
                    .await;
                Ok(updated)
            }
            Err(err) => {
                // The debit already landed; put the money back, then reject.
                self.ledger
                    .credit(owner, TxKind::Refund, amount, id.to_string())
                    .await?;
                let reason = format!("disbursement failed: {err}");
                let mut next = payout.clone();
                next.reject(reason.clone())?;
                self.payouts.update(next).await?;
                self.notifier
                    .notify(EngineEvent::PayoutRejected { payout: id, reason })
                    .await;
                Err(err)
            }
        }
    }

    pub async fn reject_payout(
        &self,
        actor: &Actor,
        id: PayoutId,
        expected_version: u64,
        reason: impl Into<String> + Send,
    ) -> Result<PayoutRequest> {
        if !actor.is_admin() {
            return Err(EngineError::InvalidActor(
                "only admins may reject payouts".to_string(),
            ));
        }
        let payout = self.load_payout(id).await?;
        check_version(expected_version, payout.version)?;
        let reason = reason.into();
        let mut next = payout;
        next.reject(reason.clone())?;
        let updated = self.payouts.update(next).await?;
        self.notifier
            .notify(EngineEvent::PayoutRejected { payout: id, reason })
            .await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::ProductSnapshot;
    use crate::infrastructure::gateway::sandbox_router;
    use crate::infrastructure::in_memory::{
        InMemoryAttemptStore, InMemoryEscrowStore, InMemoryOrderStore, InMemoryPayoutStore,
        InMemoryProductCatalog, InMemoryWalletStore,
    };
    use crate::infrastructure::notify::MemorySink;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn engine_with_product() -> (MarketEngine, Uuid, Uuid) {
        let catalog = InMemoryProductCatalog::new();
        let product = Uuid::new_v4();
        let farmer = Uuid::new_v4();
        catalog
            .add(ProductSnapshot {
                id: product,
                farmer,
                unit_price: Money::from_minor(50),
                available: 100,
            })
            .await;
        let parts = EngineParts {
            orders: Box::new(InMemoryOrderStore::new()),
            escrows: Box::new(InMemoryEscrowStore::new()),
            wallets: Box::new(InMemoryWalletStore::new()),
            payouts: Box::new(InMemoryPayoutStore::new()),
            attempts: Box::new(InMemoryAttemptStore::new()),
            catalog: Box::new(catalog),
            gateways: sandbox_router(),
            notifier: Box::new(MemorySink::new()),
        };
        let engine = MarketEngine::new(parts, CommissionRate::new(dec!(0.1)).unwrap());
        (engine, product, farmer)
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_noop() {
        let (engine, product, _farmer) = engine_with_product().await;
        let buyer = Actor::Buyer(Uuid::new_v4());
        let order = engine
            .create_order(
                &buyer,
                CreateOrder {
                    product,
                    quantity: 10,
                    delivery_method: DeliveryMethod::Delivery,
                },
            )
            .await
            .unwrap();
        let ticket = engine
            .pay_order(
                &buyer,
                order.id,
                order.version,
                PaymentMethod::Mpesa,
                &PayerDetails::new("+254700000000"),
            )
            .await
            .unwrap();
        assert_eq!(ticket.status, AttemptStatus::Pending);

        let first = engine
            .gateway_callback(&ticket.gateway_ref, true, order.total_amount)
            .await
            .unwrap();
        assert!(matches!(first, CallbackOutcome::Settled(_)));

        let replay = engine
            .gateway_callback(&ticket.gateway_ref, true, order.total_amount)
            .await
            .unwrap();
        assert!(matches!(replay, CallbackOutcome::AlreadySettled));

        let escrow = engine.escrow_for(order.id).await.unwrap().unwrap();
        assert_eq!(escrow.amount, Money::from_minor(500));
    }

    #[tokio::test]
    async fn test_wallet_pay_without_funds_leaves_no_escrow() {
        let (engine, product, _farmer) = engine_with_product().await;
        let buyer_id = Uuid::new_v4();
        let buyer = Actor::Buyer(buyer_id);
        let order = engine
            .create_order(
                &buyer,
                CreateOrder {
                    product,
                    quantity: 10,
                    delivery_method: DeliveryMethod::Pickup,
                },
            )
            .await
            .unwrap();
        let result = engine
            .pay_order(
                &buyer,
                order.id,
                order.version,
                PaymentMethod::Wallet,
                &PayerDetails::new("wallet"),
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { .. })
        ));
        assert!(engine.escrow_for(order.id).await.unwrap().is_none());
        let order = engine.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        // A fresh attempt with funds in place succeeds.
        engine
            .deposit(buyer_id, Amount::from_minor(500).unwrap())
            .await
            .unwrap();
        let ticket = engine
            .pay_order(
                &buyer,
                order.id,
                order.version,
                PaymentMethod::Wallet,
                &PayerDetails::new("wallet"),
            )
            .await
            .unwrap();
        assert_eq!(ticket.order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let (engine, product, farmer) = engine_with_product().await;
        let buyer = Actor::Buyer(Uuid::new_v4());
        let order = engine
            .create_order(
                &buyer,
                CreateOrder {
                    product,
                    quantity: 1,
                    delivery_method: DeliveryMethod::Delivery,
                },
            )
            .await
            .unwrap();
        let farmer = Actor::Farmer(farmer);
        engine
            .confirm_order(&farmer, order.id, order.version)
            .await
            .unwrap();
        // Retrying with the original version must fail.
        let result = engine.cancel_order(&buyer, order.id, order.version).await;
        assert!(matches!(result, Err(EngineError::StaleVersion { .. })));
    }
}
