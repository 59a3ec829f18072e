//! Inbound webhook intake (C9, spec §4.9) and outbound tenant webhook
//! delivery (C10, spec §4.10).
//!
//! # Modules
//!
//! - [`inbound`] — `InboundWebhookPipeline`: verify, dedupe, dispatch, retry
//! - [`outbound`] — `OutboundWebhookDispatcher`: sign, deliver, retry

pub mod inbound;
pub mod outbound;

pub use inbound::InboundWebhookPipeline;
pub use outbound::{OutboundEvent, OutboundWebhookDispatcher};
