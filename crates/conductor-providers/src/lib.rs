//! Gateway integration layer: the adapter trait (C4), its four gateway
//! implementations, the resilience-wrapping executor (C5), and the router
//! that picks which executor serves a given request (C6).
//!
//! # Modules
//!
//! - [`adapter`] — the `ProviderAdapter` trait and its request/response types
//! - [`capabilities`] — the per-adapter capability descriptor
//! - [`error`] — the canonical `ProviderError` taxonomy
//! - [`stripe`], [`xendit`], [`razorpay`], [`airwallex`] — gateway adapters
//! - [`executor`] — wraps one adapter with a breaker and health checker
//! - [`router`] — currency/preference/mapping-based adapter selection

pub mod adapter;
pub mod airwallex;
pub mod capabilities;
pub mod error;
pub mod executor;
pub mod hmac_sig;
pub mod http;
pub mod razorpay;
pub mod router;
pub mod stripe;
pub mod xendit;

pub use adapter::{
    CaptureRequest, ChargeRequest, ChargeResult, ProviderAdapter, RefundRequest, RefundResult,
    SubscriptionResult, VerifiedWebhookEvent, WebhookHeaders,
};
pub use airwallex::{AirwallexAdapter, AirwallexConfig};
pub use capabilities::{Capabilities, Capability};
pub use error::ProviderError;
pub use executor::{ExecutorConfig, ProviderExecutor};
pub use razorpay::{RazorpayAdapter, RazorpayConfig};
pub use router::{MappingLookup, ProviderRouter};
pub use stripe::{StripeAdapter, StripeConfig};
pub use xendit::{XenditAdapter, XenditConfig};
