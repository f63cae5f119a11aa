use crate::domain::order::Order;
use crate::domain::{OrderId, UserId};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct OrderRow<'a> {
    order_id: OrderId,
    customer_id: UserId,
    vendor_id: UserId,
    status: &'a str,
    payment: &'a str,
    total: Decimal,
    version: u64,
}

/// Writes order snapshots as CSV. Delivery codes are never written.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_orders(&mut self, orders: &[Order]) -> Result<()> {
        for order in orders {
            self.writer.serialize(OrderRow {
                order_id: order.id,
                customer_id: order.customer_id,
                vendor_id: order.vendor_id,
                status: order.status.as_str(),
                payment: order.payment.label(),
                total: order.total.normalize(),
                version: order.version,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
