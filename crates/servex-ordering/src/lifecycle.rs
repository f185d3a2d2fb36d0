//! Order status state machine.
//!
//! ```text
//!   CREATED ──► PENDING_CASH ──► PAID ──► PREPARING ──► READY ──► SERVED
//!      │                          ▲  │                    ▲          ▲
//!      ├──────────────────────────┘  └────────────────────┴──────────┘
//!      └──► CANCELLED
//! ```
//!
//! Moves are forward only. `SERVED` and `CANCELLED` are terminal. A request
//! to move into the current state is reported as [`Transition::Unchanged`]
//! so retried requests stay harmless.

use servex_schemas::OrderStatus;

/// Outcome of a legal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed { from: OrderStatus, to: OrderStatus },
    Unchanged(OrderStatus),
}

/// Returned when `to` cannot be reached from `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal order transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Served | OrderStatus::Cancelled)
}

fn is_legal(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Created, Paid)
            | (Created, PendingCash)
            | (Created, Cancelled)
            | (PendingCash, Paid)
            | (Paid, Preparing)
            | (Paid, Ready)
            | (Paid, Served)
            | (Preparing, Ready)
            | (Preparing, Served)
            | (Ready, Served)
    )
}

pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<Transition, TransitionError> {
    if from == to {
        return Ok(Transition::Unchanged(from));
    }
    if is_legal(from, to) {
        Ok(Transition::Changed { from, to })
    } else {
        Err(TransitionError { from, to })
    }
}

/// Every status that may legally move to `to`. Used as the compare-and-set
/// precondition when persisting a transition.
pub fn legal_sources(to: OrderStatus) -> Vec<OrderStatus> {
    OrderStatus::ALL
        .iter()
        .copied()
        .filter(|from| is_legal(*from, to))
        .collect()
}

/// Counts against the one-unpaid-order-per-table rule.
pub fn is_unpaid(status: OrderStatus) -> bool {
    status == OrderStatus::Created
}

/// Shown on the kitchen board.
pub fn is_kitchen_visible(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Paid | OrderStatus::Preparing | OrderStatus::Ready
    )
}

pub fn counts_as_revenue(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Paid | OrderStatus::Preparing | OrderStatus::Ready | OrderStatus::Served
    )
}

/// Targets staff may request through the status endpoint.
pub fn staff_settable(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Paid | OrderStatus::Preparing | OrderStatus::Ready | OrderStatus::Served
    )
}
