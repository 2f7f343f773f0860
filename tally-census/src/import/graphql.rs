use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    import::{parse_biguint, CensusDescriptor, CensusImporter, WeightChange},
    store::CensusStore,
    Context, Error,
};

const SCHEME: &str = "graphql://";

const QUERY: &str = "query GetWeightChangeEvents($first: Int!, $skip: Int!) { \
    weightChangeEvents(first: $first, skip: $skip, orderBy: blockNumber, orderDirection: asc) { \
    account { id } previousWeight newWeight } }";

#[derive(Serialize)]
struct GqlRequest<'a> {
    query: &'a str,
    variables: GqlVariables,
}

#[derive(Serialize)]
struct GqlVariables {
    first: u64,
    skip: u64,
}

#[derive(Deserialize)]
struct GqlResponse {
    data: Option<GqlData>,
    errors: Option<Vec<GqlErrorMessage>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlData {
    weight_change_events: Vec<GqlEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlEvent {
    account: GqlAccount,
    previous_weight: String,
    new_weight: String,
}

#[derive(Deserialize)]
struct GqlAccount {
    id: String,
}

#[derive(Deserialize)]
struct GqlErrorMessage {
    message: String,
}

/// Importer for dynamic censuses indexed by a subgraph. Pages through
/// `weightChangeEvents` in block order and replays them into the
/// contract-bound census.
pub struct GraphqlImporter {
    client: Client,
    page_size: u64,
    timeout: Duration,
    insecure: bool,
}

impl GraphqlImporter {
    pub const DEFAULT_PAGE_SIZE: u64 = 1000;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self::with_options(Self::DEFAULT_PAGE_SIZE, Self::DEFAULT_TIMEOUT, false)
    }

    /// `insecure` rewrites the endpoint to plain http, for local indexers.
    pub fn with_options(page_size: u64, timeout: Duration, insecure: bool) -> Self {
        Self {
            client: Client::new(),
            page_size,
            timeout,
            insecure,
        }
    }

    fn endpoint(&self, uri: &str) -> String {
        let rest = uri.trim_start_matches(SCHEME);
        if self.insecure {
            format!("http://{rest}")
        } else {
            format!("https://{rest}")
        }
    }

    fn fetch_page(&self, ctx: &Context, url: &str, skip: u64) -> Result<Vec<GqlEvent>, Error> {
        let timeout = match ctx.remaining() {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        };

        let request = GqlRequest {
            query: QUERY,
            variables: GqlVariables {
                first: self.page_size,
                skip,
            },
        };

        let response = self.client.post(url).timeout(timeout).json(&request).send()?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let snippet: String = body.chars().take(1024).collect();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let parsed: GqlResponse = response.json()?;

        if let Some(errors) = parsed.errors {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Upstream(joined));
        }

        let data = parsed
            .data
            .ok_or_else(|| Error::Upstream("response carries no data".into()))?;

        Ok(data.weight_change_events)
    }
}

impl Default for GraphqlImporter {
    fn default() -> Self {
        Self::new()
    }
}

fn into_change(event: GqlEvent) -> Result<WeightChange, Error> {
    Ok(WeightChange {
        address: event
            .account
            .id
            .parse()
            .map_err(|_| Error::invalid_input(format!("bad account id: {}", event.account.id)))?,
        previous_weight: parse_biguint(&event.previous_weight)?,
        new_weight: parse_biguint(&event.new_weight)?,
    })
}

impl CensusImporter for GraphqlImporter {
    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(SCHEME)
    }

    fn import(
        &self,
        ctx: &Context,
        store: &CensusStore,
        census: &CensusDescriptor,
        processed: u64,
    ) -> Result<u64, Error> {
        let address = census
            .contract_address
            .ok_or_else(|| Error::invalid_input("census descriptor has no contract address"))?;

        let url = self.endpoint(&census.uri);
        let mut skip = processed;
        let mut events = Vec::new();

        loop {
            ctx.check()?;

            let page = self.fetch_page(ctx, &url, skip)?;
            let fetched = page.len() as u64;
            debug!(%address, skip, fetched, "weight change page fetched");

            for event in page {
                events.push(into_change(event)?);
            }
            skip += fetched;

            // a short page is the end of the history
            if fetched < self.page_size {
                break;
            }
        }

        if events.is_empty() {
            return Ok(skip);
        }

        if store.exists_by_address(&address)? {
            store.apply_events(&address, &events)?;
        } else {
            store.import_events_by_address(&address, &events)?;
        }

        Ok(skip)
    }
}
