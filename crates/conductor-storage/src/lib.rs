//! Durable repositories for every persisted entity in the data model (C14,
//! spec §3): SQLite-backed, one connection per `Database`, the same
//! `Mutex<Connection>` pattern the reference gateway's `db.rs` uses.
//!
//! # Modules
//!
//! - [`db`] — connection + schema bootstrap
//! - [`error`] — `rusqlite::Error` → `ConductorError` mapping
//! - [`payments`], [`refunds`], [`mappings`] — the payment lifecycle tables
//! - [`idempotency`] — the SQLite [`conductor_core::idempotency::IdempotencyStore`] impl
//! - [`webhooks`] — inbound `WebhookEvent` rows
//! - [`tenants`] — tenant registry rows
//! - [`audit`] — append-only audit log
//! - [`ancillary`] — customers, payment methods, disputes, invoices, payouts, plans, subscriptions

pub mod ancillary;
pub mod audit;
pub mod db;
pub mod error;
pub mod idempotency;
pub mod mappings;
pub mod payments;
pub mod refunds;
pub mod tenants;
pub mod webhooks;

pub use ancillary::{
    CustomerRepository, DisputeRepository, InvoiceRepository, PayoutRepository,
    PaymentMethodRepository, PlanRepository, SubscriptionRepository,
};
pub use audit::AuditLogRepository;
pub use db::Database;
pub use idempotency::SqliteIdempotencyStore;
pub use mappings::MappingRepository;
pub use payments::PaymentRepository;
pub use refunds::RefundRepository;
pub use tenants::TenantRepository;
pub use webhooks::WebhookEventRepository;
