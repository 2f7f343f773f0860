use std::sync::Arc;

use tally_primitives::Address;
use tracing::{debug, info};

use crate::{
    import::{CensusDescriptor, CensusImporter},
    store::CensusStore,
    Context, Error,
};

/// Resolver for dynamic on-chain censuses: asks the chain what the current
/// census root of a contract is.
pub trait OnchainCensusFetcher: Send + Sync {
    fn fetch_root(&self, address: &Address) -> Result<[u8; 32], Error>;
}

/// Entry point for census ingestion.
///
/// Owns the plugin list (precedence is list order) and the optional
/// on-chain root fetcher. Validates the census origin, resolves dynamic
/// roots, de-duplicates (by content address, or by the contract head for
/// on-chain censuses) and dispatches to the first plugin accepting the
/// URI. Processed-event counts are persisted per contract so paginated
/// importers resume where the previous run stopped.
pub struct Orchestrator {
    store: Arc<CensusStore>,
    plugins: Vec<Box<dyn CensusImporter>>,
    fetcher: Option<Arc<dyn OnchainCensusFetcher>>,
}

impl Orchestrator {
    pub fn new(store: Arc<CensusStore>, plugins: Vec<Box<dyn CensusImporter>>) -> Self {
        Self {
            store,
            plugins,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn OnchainCensusFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(&self) -> &Arc<CensusStore> {
        &self.store
    }

    pub fn import_census(&self, ctx: &Context, census: &CensusDescriptor) -> Result<(), Error> {
        if census.origin.is_csp() {
            // credentials live with the service provider, nothing to build
            debug!(uri = %census.uri, "csp census needs no import");
            return Ok(());
        }
        if !census.origin.is_merkle_tree() {
            return Err(Error::invalid_input(format!(
                "census origin {:?} cannot be imported",
                census.origin
            )));
        }

        let mut target = census.clone();

        if census.origin.is_onchain_dynamic() {
            let address = contract_address_from_root(&census.root)?;
            let fetcher = self
                .fetcher
                .as_ref()
                .ok_or_else(|| Error::invalid_input("no on-chain census fetcher configured"))?;

            target.root = fetcher.fetch_root(&address)?;
            target.contract_address = Some(address);
            debug!(%address, root = %hex::encode(target.root), "resolved on-chain census root");

            // on-chain censuses live under their contract address; the
            // head record tells whether the fetched root is already
            // materialized
            if let Ok(root) = target.expected_root() {
                if self.store.contract_root(&address)? == Some(root) {
                    debug!(%address, %root, "contract census is current, skipping");
                    return Ok(());
                }
            }
        } else if let Ok(root) = target.expected_root() {
            if self.store.exists_by_root(&root)? {
                debug!(%root, "census already materialized, skipping");
                return Ok(());
            }
        }

        // paginated importers resume from the persisted event count
        let processed = match &target.contract_address {
            Some(address) => self.store.processed_events(address)?,
            None => 0,
        };

        for plugin in &self.plugins {
            if plugin.accepts(&target.uri) {
                let processed = plugin.import(ctx, &self.store, &target, processed)?;

                if let Some(address) = &target.contract_address {
                    self.store.set_processed_events(address, processed)?;
                }

                info!(uri = %target.uri, processed, "census imported");
                return Ok(());
            }
        }

        Err(Error::NoImporter(target.uri.clone()))
    }
}

/// For dynamic on-chain origins the root slot carries the census contract
/// address, left-aligned and right-padded with zeros.
fn contract_address_from_root(root: &[u8; 32]) -> Result<Address, Error> {
    if root[Address::BYTES..].iter().any(|b| *b != 0) {
        return Err(Error::invalid_input(
            "root slot does not hold a padded contract address",
        ));
    }

    let address = Address::try_from(&root[..Address::BYTES])?;
    if address.is_zero() {
        return Err(Error::invalid_input("zero census contract address"));
    }

    Ok(address)
}
