use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::chain::Chain;
use crate::decoding::interface::{CounterpartyDetails, DecodeRoute, Decoder, PostDecodingRule};
use crate::error::Error;

/// A route plus the decoder that contributed it.
#[derive(Debug)]
pub struct RouteEntry<C: Chain> {
    pub decoder: &'static str,
    pub route: DecodeRoute<C>,
}

impl<C: Chain> Clone for RouteEntry<C> {
    fn clone(&self) -> Self {
        Self {
            decoder: self.decoder,
            route: self.route.clone(),
        }
    }
}

/// The aggregated routing table of one chain. Built once from every
/// registered decoder, then replaced wholesale on reload.
#[derive(Debug)]
pub struct DecodingRules<C: Chain> {
    address_mappings: HashMap<C::Address, RouteEntry<C>>,
    addresses_to_counterparties: HashMap<C::Address, (&'static str, String)>,
    /// Rules per counterparty, in registration order.
    post_decoding_rules: BTreeMap<String, Vec<PostDecodingRule<C>>>,
    counterparties: BTreeMap<String, CounterpartyDetails>,
}

impl<C: Chain> Clone for DecodingRules<C> {
    fn clone(&self) -> Self {
        Self {
            address_mappings: self.address_mappings.clone(),
            addresses_to_counterparties: self.addresses_to_counterparties.clone(),
            post_decoding_rules: self.post_decoding_rules.clone(),
            counterparties: self.counterparties.clone(),
        }
    }
}

impl<C: Chain> Default for DecodingRules<C> {
    fn default() -> Self {
        Self {
            address_mappings: HashMap::new(),
            addresses_to_counterparties: HashMap::new(),
            post_decoding_rules: BTreeMap::new(),
            counterparties: BTreeMap::new(),
        }
    }
}

impl<C: Chain> DecodingRules<C> {
    /// Merges everything `decoder` contributes. Fails if a routing address
    /// already belongs to another decoder; `self` is left untouched then.
    pub fn add_decoder(&mut self, decoder: &dyn Decoder<C>) -> Result<(), Error> {
        let name = decoder.name();
        let routes = decoder.addresses_to_decoders();
        let counterparty_addresses = decoder.addresses_to_counterparties();
        self.check_routes(name, routes.keys())?;
        self.check_counterparty_addresses(name, counterparty_addresses.keys())?;

        self.insert_routes(name, routes);
        for (address, counterparty) in counterparty_addresses {
            self.addresses_to_counterparties
                .insert(address, (name, counterparty));
        }
        for (counterparty, rules) in decoder.post_decoding_rules() {
            self.post_decoding_rules
                .entry(counterparty)
                .or_default()
                .extend(rules);
        }
        for details in decoder.counterparties() {
            self.counterparties
                .entry(details.identifier.clone())
                .or_insert(details);
        }
        Ok(())
    }

    /// A copy of the table with `routes` from a reload of `decoder` merged
    /// in, plus its refreshed counterparty addresses. Addresses owned by a
    /// different decoder reject the whole delta.
    pub fn with_reloaded_routes(
        &self,
        decoder: &'static str,
        routes: HashMap<C::Address, DecodeRoute<C>>,
        counterparty_addresses: HashMap<C::Address, String>,
    ) -> Result<Self, Error> {
        self.check_routes(decoder, routes.keys())?;
        self.check_counterparty_addresses(decoder, counterparty_addresses.keys())?;
        let mut next = self.clone();
        next.insert_routes(decoder, routes);
        for (address, counterparty) in counterparty_addresses {
            next.addresses_to_counterparties
                .insert(address, (decoder, counterparty));
        }
        Ok(next)
    }

    fn check_counterparty_addresses<'r>(
        &self,
        decoder: &str,
        addresses: impl Iterator<Item = &'r C::Address>,
    ) -> Result<(), Error> {
        for address in addresses {
            if let Some((owner, _)) = self.addresses_to_counterparties.get(address)
                && *owner != decoder
            {
                return Err(Error::Load {
                    reason: format!(
                        "{decoder} maps {address} to a counterparty already claimed by {owner}"
                    ),
                });
            }
        }
        Ok(())
    }

    fn check_routes<'r>(
        &self,
        decoder: &str,
        addresses: impl Iterator<Item = &'r C::Address>,
    ) -> Result<(), Error> {
        for address in addresses {
            if let Some(existing) = self.address_mappings.get(address)
                && existing.decoder != decoder
            {
                return Err(Error::Load {
                    reason: format!(
                        "{decoder} tried to route {address} which is already routed to {}",
                        existing.decoder
                    ),
                });
            }
        }
        Ok(())
    }

    fn insert_routes(&mut self, decoder: &'static str, routes: HashMap<C::Address, DecodeRoute<C>>) {
        for (address, route) in routes {
            self.address_mappings
                .insert(address, RouteEntry { decoder, route });
        }
    }

    pub fn route_for(&self, address: &C::Address) -> Option<&RouteEntry<C>> {
        self.address_mappings.get(address)
    }

    pub fn counterparty_for_address(&self, address: &C::Address) -> Option<&str> {
        self.addresses_to_counterparties
            .get(address)
            .map(|(_, counterparty)| counterparty.as_str())
    }

    /// Rules registered under any of `counterparties`, ordered by priority,
    /// then counterparty name, then registration order.
    pub fn rules_for<'s>(
        &'s self,
        counterparties: &BTreeSet<String>,
    ) -> Vec<(&'s str, &'s PostDecodingRule<C>)> {
        let mut selected: Vec<(&str, &PostDecodingRule<C>)> = counterparties
            .iter()
            .filter_map(|counterparty| {
                self.post_decoding_rules
                    .get_key_value(counterparty.as_str())
            })
            .flat_map(|(counterparty, rules)| {
                rules.iter().map(move |rule| (counterparty.as_str(), rule))
            })
            .collect();
        selected.sort_by_key(|(_, rule)| rule.priority);
        selected
    }

    pub fn all_counterparties(&self) -> impl Iterator<Item = &CounterpartyDetails> {
        self.counterparties.values()
    }

    pub fn route_count(&self) -> usize {
        self.address_mappings.len()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::*;
    use crate::chain::evm::Evm;
    use crate::decoding::output::DecodingOutput;
    use alloy_primitives::Address;

    struct Fixed {
        name: &'static str,
        routes: Vec<Address>,
        rules: Vec<(&'static str, i32)>,
    }

    impl Decoder<Evm> for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn counterparties(&self) -> Vec<CounterpartyDetails> {
            vec![CounterpartyDetails::new(self.name, self.name)]
        }

        fn addresses_to_decoders(&self) -> HashMap<Address, DecodeRoute<Evm>> {
            self.routes
                .iter()
                .map(|address| (*address, DecodeRoute::new(|_, _| Ok(DecodingOutput::default()))))
                .collect()
        }

        fn post_decoding_rules(&self) -> HashMap<String, Vec<PostDecodingRule<Evm>>> {
            let mut map: HashMap<String, Vec<PostDecodingRule<Evm>>> = HashMap::new();
            for (counterparty, priority) in &self.rules {
                map.entry((*counterparty).to_owned())
                    .or_default()
                    .push(PostDecodingRule::new(*priority, |_, events| Ok(events)));
            }
            map
        }
    }

    #[test]
    fn duplicate_route_across_decoders_fails() {
        let shared = Address::repeat_byte(7);
        let mut rules = DecodingRules::<Evm>::default();
        rules
            .add_decoder(&Fixed { name: "a", routes: vec![shared], rules: vec![] })
            .unwrap();
        let err = rules
            .add_decoder(&Fixed { name: "b", routes: vec![shared], rules: vec![] })
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
        assert_eq!(rules.route_for(&shared).unwrap().decoder, "a");
    }

    #[test]
    fn reload_delta_respects_ownership() {
        let owned = Address::repeat_byte(1);
        let foreign = Address::repeat_byte(2);
        let mut rules = DecodingRules::<Evm>::default();
        rules
            .add_decoder(&Fixed { name: "a", routes: vec![owned], rules: vec![] })
            .unwrap();
        rules
            .add_decoder(&Fixed { name: "b", routes: vec![foreign], rules: vec![] })
            .unwrap();

        let route = || DecodeRoute::<Evm>::new(|_, _| Ok(DecodingOutput::default()));
        let fresh = Address::repeat_byte(3);
        let next = rules
            .with_reloaded_routes(
                "a",
                HashMap::from([(owned, route()), (fresh, route())]),
                HashMap::new(),
            )
            .unwrap();
        assert_eq!(next.route_count(), 3);
        assert_eq!(rules.route_count(), 2);

        let err = rules
            .with_reloaded_routes("a", HashMap::from([(foreign, route())]), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn rules_sorted_by_priority_then_counterparty_then_registration() {
        let mut rules = DecodingRules::<Evm>::default();
        rules
            .add_decoder(&Fixed {
                name: "first",
                routes: vec![],
                rules: vec![("zeta", 5), ("alpha", 0), ("zeta", -1)],
            })
            .unwrap();
        rules
            .add_decoder(&Fixed { name: "second", routes: vec![], rules: vec![("alpha", 0)] })
            .unwrap();

        let observed: BTreeSet<String> = ["zeta", "alpha", "unused"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        let ordered: Vec<(&str, i32)> = rules
            .rules_for(&observed)
            .into_iter()
            .map(|(counterparty, rule)| (counterparty, rule.priority))
            .collect();
        assert_eq!(
            ordered,
            vec![("zeta", -1), ("alpha", 0), ("alpha", 0), ("zeta", 5)]
        );
        assert_eq!(rules.post_decoding_rules["alpha"].len(), 2);
    }

    #[test]
    fn unobserved_counterparties_contribute_nothing() {
        let mut rules = DecodingRules::<Evm>::default();
        rules
            .add_decoder(&Fixed { name: "a", routes: vec![], rules: vec![("alpha", 0)] })
            .unwrap();
        assert!(rules.rules_for(&BTreeSet::new()).is_empty());
    }
}
