//! Capability descriptor consulted by the router before it ever dispatches
//! an operation to an adapter (spec §4.4).

use std::collections::HashSet;

use conductor_types::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Charge,
    Refund,
    Capture,
    Void,
    Confirm3DS,
    PaymentSession,
    Invoice,
    Payout,
    Subscription,
    Plan,
    Dispute,
    Customer,
    PaymentMethod,
    Balance,
    WebhookVerify,
    IsAvailable,
}

#[derive(Debug, Clone)]
pub struct Capabilities {
    operations: HashSet<Capability>,
    currencies: HashSet<String>,
    payment_method_families: HashSet<String>,
}

impl Capabilities {
    pub fn new(
        operations: impl IntoIterator<Item = Capability>,
        currencies: impl IntoIterator<Item = &'static str>,
        payment_method_families: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Capabilities {
            operations: operations.into_iter().collect(),
            currencies: currencies.into_iter().map(|c| c.to_uppercase()).collect(),
            payment_method_families: payment_method_families
                .into_iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }

    pub fn supports(&self, op: Capability) -> bool {
        self.operations.contains(&op)
    }

    pub fn supports_currency(&self, currency: &Currency) -> bool {
        self.currencies.contains(currency.as_str())
    }

    pub fn supports_payment_method_family(&self, family: &str) -> bool {
        self.payment_method_families.contains(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_checks_operation_set() {
        let caps = Capabilities::new(
            [Capability::Charge, Capability::Refund],
            ["USD", "EUR"],
            ["card"],
        );
        assert!(caps.supports(Capability::Charge));
        assert!(!caps.supports(Capability::Payout));
        assert!(caps.supports_currency(&Currency::new("usd")));
        assert!(!caps.supports_currency(&Currency::new("idr")));
        assert!(caps.supports_payment_method_family("card"));
    }
}
