//! Polling reads for customers and vendors.
//!
//! Clients never get pushed updates. They poll, and each poll compares the
//! order's `version` against what the client last saw, so a later poll can
//! never hand back an older state than an earlier one did.

use super::orders::OrderEngine;
use crate::domain::order::Order;
use crate::domain::{OrderId, UserId};
use crate::error::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// The last order version a single-order poller has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollCursor {
    last_version: Option<u64>,
}

impl PollCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Changed(Order),
    Unchanged,
}

/// Per-order versions seen by a vendor dashboard.
#[derive(Debug, Clone, Default)]
pub struct VendorFeed {
    seen: HashMap<OrderId, u64>,
}

impl VendorFeed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderEngine {
    /// Returns the order if it moved past `cursor`, advancing the cursor.
    pub async fn poll_order(
        &self,
        order_id: OrderId,
        viewer_id: UserId,
        cursor: &mut PollCursor,
    ) -> Result<PollOutcome> {
        let order = self.get_order(order_id, viewer_id).await?;
        if cursor.last_version.is_some_and(|seen| order.version <= seen) {
            return Ok(PollOutcome::Unchanged);
        }
        cursor.last_version = Some(order.version);
        Ok(PollOutcome::Changed(order))
    }

    /// Orders of the vendor that are new or changed since the previous poll
    /// with the same feed, newest first.
    pub async fn poll_vendor_orders(&self, vendor_id: UserId, feed: &mut VendorFeed) -> Result<Vec<Order>> {
        let orders = self.list_orders_for_vendor(vendor_id).await?;
        let mut changed = Vec::new();
        for order in orders {
            let seen = feed.seen.get(&order.id).copied();
            if seen.is_some_and(|version| order.version <= version) {
                continue;
            }
            feed.seen.insert(order.id, order.version);
            changed.push(order);
        }
        Ok(changed)
    }
}

/// Polls one order every `interval` and forwards each change.
///
/// The task ends once the order reaches a terminal status, when a read fails,
/// or when the receiver is dropped.
pub fn watch_order(
    engine: OrderEngine,
    order_id: OrderId,
    viewer_id: UserId,
    interval: Duration,
) -> (mpsc::Receiver<Order>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cursor = PollCursor::new();
        loop {
            ticker.tick().await;
            match engine.poll_order(order_id, viewer_id, &mut cursor).await {
                Ok(PollOutcome::Changed(order)) => {
                    let terminal = order.status.is_terminal();
                    if tx.send(order).await.is_err() || terminal {
                        break;
                    }
                }
                Ok(PollOutcome::Unchanged) => {}
                Err(err) => {
                    warn!(order_id, error = %err, "Order watch stopped");
                    break;
                }
            }
        }
        debug!(order_id, "Order watch finished");
    });
    (rx, handle)
}
