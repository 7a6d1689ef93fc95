//! Venue routing

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BrokerError, BrokerResult};
use crate::ledger::TradeRecord;
use crate::types::Venue;
use crate::venues::Broker;

/// Maps venues to brokers
///
/// In paper mode every new trade goes to the paper venue, whatever venue the
/// instrument is configured for. Existing trades always go back to the venue
/// recorded in the ledger.
#[derive(Clone, Default)]
pub struct Router {
    brokers: HashMap<Venue, Arc<dyn Broker>>,
    paper_mode: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.brokers.insert(broker.venue(), broker);
        self
    }

    pub fn paper_mode(mut self, enabled: bool) -> Self {
        self.paper_mode = enabled;
        self
    }

    pub fn is_paper(&self) -> bool {
        self.paper_mode
    }

    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.brokers.keys().copied().collect();
        venues.sort();
        venues
    }

    pub fn get(&self, venue: Venue) -> BrokerResult<Arc<dyn Broker>> {
        self.brokers
            .get(&venue)
            .cloned()
            .ok_or_else(|| BrokerError::Unsupported(format!("no broker configured for {}", venue)))
    }

    /// Broker that new trades on an instrument configured for `venue` use
    pub fn for_instrument(&self, venue: Venue) -> BrokerResult<Arc<dyn Broker>> {
        if self.paper_mode {
            self.get(Venue::Paper)
        } else {
            self.get(venue)
        }
    }

    pub fn for_trade(&self, trade: &TradeRecord) -> BrokerResult<Arc<dyn Broker>> {
        self.get(trade.venue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::PaperBroker;

    #[test]
    fn test_paper_mode_routes_new_trades_to_paper() {
        let router = Router::new()
            .with_broker(Arc::new(PaperBroker::new(1000.0)))
            .paper_mode(true);

        assert_eq!(router.for_instrument(Venue::Oanda).unwrap().venue(), Venue::Paper);
        assert!(router.get(Venue::Oanda).is_err());
        assert_eq!(router.venues(), vec![Venue::Paper]);
    }

    #[test]
    fn test_missing_venue_is_unsupported() {
        let router = Router::new();
        assert!(matches!(
            router.for_instrument(Venue::Coinbase),
            Err(BrokerError::Unsupported(_))
        ));
    }
}
