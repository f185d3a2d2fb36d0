//! servex-ordering
//!
//! Pure rules of the order workflow. Nothing here touches the store, the
//! network or the clock: callers pass `now` in and persist what comes out.
//!
//! - [`pricing`]: server-side totals in integer minor units.
//! - [`cart`]: turns a client cart into catalog-priced order lines.
//! - [`lifecycle`]: the order status state machine.
//! - [`session`]: table session tokens and expiry.
//! - [`attempts`]: per-table order attempt window.

pub mod attempts;
pub mod cart;
pub mod lifecycle;
pub mod pricing;
pub mod session;

pub use attempts::TableAttemptLimiter;
pub use cart::{sanitize_contact, sanitize_lines, CartError, CartLine};
pub use lifecycle::{
    check_transition, counts_as_revenue, is_kitchen_visible, is_terminal, is_unpaid,
    legal_sources, staff_settable, Transition, TransitionError,
};
pub use pricing::{quote, PricingError, Quote};
