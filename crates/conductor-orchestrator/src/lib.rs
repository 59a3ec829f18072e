//! Payment lifecycle (C8, spec §4.8), audit wiring (C11, spec §4.11) and
//! tenant credential validation (C12, spec §4.12).
//!
//! # Modules
//!
//! - [`state_machine`] — `PaymentOrchestrator`: create/authorize/capture/void/confirm/refund
//! - [`tenant_registry`] — `TenantRegistry`: credential validation, secret rotation

pub mod ancillary_ops;
pub mod state_machine;
pub mod tenant_registry;

pub use ancillary_ops::{AncillaryOrchestrator, CreateCustomerRequest};
pub use state_machine::{CreateChargeRequest, PaymentOrchestrator, RequestContext};
pub use tenant_registry::TenantRegistry;
