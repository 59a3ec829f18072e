pub mod balance;
pub mod charges;
pub mod customers;
pub mod disputes;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod payouts;
pub mod refunds;
pub mod subscriptions;
pub mod webhooks;
