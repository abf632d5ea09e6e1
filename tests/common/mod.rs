//! Order domain shared by the integration tests.

#![allow(dead_code)]

use eventline::{
    Aggregate, Apply, DomainEvent, EventSet, Handle, Tombstone,
    event::{DuplicateEventKind, EventRegistry},
    envelope::EventMetadata,
    store::PersistableEvent,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub customer: String,
}

impl DomainEvent for OrderPlaced {
    const KIND: &'static str = "order-placed";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub sku: String,
    pub quantity: u32,
}

impl DomainEvent for LineAdded {
    const KIND: &'static str = "order-line-added";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped;

impl DomainEvent for OrderShipped {
    const KIND: &'static str = "order-shipped";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
}

impl DomainEvent for OrderCancelled {
    const KIND: &'static str = "order-cancelled";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    LineAdded(LineAdded),
    Shipped(OrderShipped),
    Cancelled(OrderCancelled),
}

impl From<OrderPlaced> for OrderEvent {
    fn from(event: OrderPlaced) -> Self {
        Self::Placed(event)
    }
}

impl From<LineAdded> for OrderEvent {
    fn from(event: LineAdded) -> Self {
        Self::LineAdded(event)
    }
}

impl From<OrderShipped> for OrderEvent {
    fn from(event: OrderShipped) -> Self {
        Self::Shipped(event)
    }
}

impl From<OrderCancelled> for OrderEvent {
    fn from(event: OrderCancelled) -> Self {
        Self::Cancelled(event)
    }
}

impl EventSet for OrderEvent {
    fn to_persistable(
        &self,
        metadata: EventMetadata,
    ) -> Result<PersistableEvent, serde_json::Error> {
        match self {
            Self::Placed(e) => PersistableEvent::new(e, metadata),
            Self::LineAdded(e) => PersistableEvent::new(e, metadata),
            Self::Shipped(e) => PersistableEvent::new(e, metadata),
            Self::Cancelled(e) => PersistableEvent::new(e, metadata),
        }
    }

    fn register(registry: &mut EventRegistry<Self>) -> Result<(), DuplicateEventKind> {
        registry
            .register::<OrderPlaced>()?
            .register::<LineAdded>()?
            .register::<OrderShipped>()?
            .register::<OrderCancelled>()?;
        Ok(())
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has not been placed")]
    NotPlaced,
    #[error("order was already placed")]
    AlreadyPlaced,
    #[error("order was already shipped")]
    AlreadyShipped,
    #[error("order was already cancelled")]
    AlreadyCancelled,
    #[error("quantity must be positive")]
    InvalidQuantity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    pub customer: Option<String>,
    pub lines: Vec<(String, u32)>,
    pub shipped: bool,
    pub cancelled: bool,
}

impl Order {
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|(_, quantity)| quantity).sum()
    }

    fn ensure_open(&self) -> Result<(), OrderError> {
        if self.customer.is_none() {
            return Err(OrderError::NotPlaced);
        }
        if self.cancelled {
            return Err(OrderError::AlreadyCancelled);
        }
        if self.shipped {
            return Err(OrderError::AlreadyShipped);
        }
        Ok(())
    }
}

impl Aggregate for Order {
    const KIND: &'static str = "order";

    type Error = OrderError;
    type Event = OrderEvent;
    type Id = String;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed(e) => Apply::apply(self, e),
            OrderEvent::LineAdded(e) => Apply::apply(self, e),
            OrderEvent::Shipped(e) => Apply::apply(self, e),
            OrderEvent::Cancelled(e) => Apply::apply(self, e),
        }
    }
}

impl Apply<OrderPlaced> for Order {
    fn apply(&mut self, event: &OrderPlaced) {
        self.customer = Some(event.customer.clone());
    }
}

impl Apply<LineAdded> for Order {
    fn apply(&mut self, event: &LineAdded) {
        self.lines.push((event.sku.clone(), event.quantity));
    }
}

impl Apply<OrderShipped> for Order {
    fn apply(&mut self, _: &OrderShipped) {
        self.shipped = true;
    }
}

impl Apply<OrderCancelled> for Order {
    fn apply(&mut self, _: &OrderCancelled) {
        self.cancelled = true;
    }
}

impl Tombstone for Order {
    fn tombstone(&self) -> Result<Self::Event, Self::Error> {
        self.ensure_open()?;
        Ok(OrderCancelled {
            reason: "deleted".to_string(),
        }
        .into())
    }
}

// ============================================================================
// Commands
// ============================================================================

pub struct PlaceOrder {
    pub customer: &'static str,
}

pub struct AddLine {
    pub sku: &'static str,
    pub quantity: u32,
}

pub struct ShipOrder;

/// Confirms the order is still open without changing it.
pub struct CheckOpen;

impl Handle<PlaceOrder> for Order {
    fn handle(&self, command: &PlaceOrder) -> Result<Vec<Self::Event>, Self::Error> {
        if self.customer.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        Ok(vec![
            OrderPlaced {
                customer: command.customer.to_string(),
            }
            .into(),
        ])
    }
}

impl Handle<AddLine> for Order {
    fn handle(&self, command: &AddLine) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_open()?;
        if command.quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        Ok(vec![
            LineAdded {
                sku: command.sku.to_string(),
                quantity: command.quantity,
            }
            .into(),
        ])
    }
}

impl Handle<ShipOrder> for Order {
    fn handle(&self, _: &ShipOrder) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_open()?;
        Ok(vec![OrderShipped.into()])
    }
}

impl Handle<CheckOpen> for Order {
    fn handle(&self, _: &CheckOpen) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_open()?;
        Ok(vec![])
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn placed(customer: &str) -> OrderEvent {
    OrderPlaced {
        customer: customer.to_string(),
    }
    .into()
}

pub fn line(sku: &str, quantity: u32) -> OrderEvent {
    LineAdded {
        sku: sku.to_string(),
        quantity,
    }
    .into()
}

/// A placed order followed by `lines - 1` single-item lines, so the stream
/// ends at version `lines`.
pub fn history(lines: u64) -> Vec<OrderEvent> {
    let mut events = vec![placed("ada")];
    for n in 1..lines {
        events.push(line(&format!("SKU-{n}"), 1));
    }
    events
}
