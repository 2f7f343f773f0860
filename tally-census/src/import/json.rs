use std::io::BufReader;

use reqwest::{
    blocking::Client,
    header::{ACCEPT, CONTENT_TYPE},
};
use tracing::debug;

use crate::{
    import::{CensusDescriptor, CensusImporter},
    store::CensusStore,
    Context, Error,
};

const ACCEPT_HEADER: &str = "application/x-ndjson, application/json;q=0.9, */*;q=0.1";

/// How much of an error body is worth carrying in the error message.
const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotFormat {
    Lines,
    Array,
}

/// Importer for censuses served over plain HTTP, either as an NDJSON
/// participant stream or as a single JSON dump.
pub struct JsonImporter {
    client: Client,
}

impl JsonImporter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for JsonImporter {
    fn default() -> Self {
        Self::new()
    }
}

fn sniff_format(content_type: &str, body: &[u8]) -> SnapshotFormat {
    if content_type.contains("ndjson") || content_type.contains("jsonl") {
        return SnapshotFormat::Lines;
    }
    if content_type.contains("application/json") {
        return SnapshotFormat::Array;
    }

    // no usable content type: more than one top-level JSON value means a
    // line stream, a single value means a dump
    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<serde_json::Value>();
    let first = values.next();
    let second = values.next();

    if first.is_some() && second.is_some() {
        SnapshotFormat::Lines
    } else {
        SnapshotFormat::Array
    }
}

impl CensusImporter for JsonImporter {
    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with("http://") || uri.starts_with("https://")
    }

    fn import(
        &self,
        ctx: &Context,
        store: &CensusStore,
        census: &CensusDescriptor,
        _processed: u64,
    ) -> Result<u64, Error> {
        ctx.check()?;

        let mut request = self.client.get(&census.uri).header(ACCEPT, ACCEPT_HEADER);
        if let Some(remaining) = ctx.remaining() {
            request = request.timeout(remaining);
        }

        let response = request.send()?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes()?;

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_LIMIT)]);
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: snippet.into_owned(),
            });
        }

        let expected_root = census.expected_root()?;
        let format = sniff_format(&content_type, &body);
        debug!(uri = %census.uri, ?format, bytes = body.len(), "census snapshot fetched");

        let tree = match format {
            SnapshotFormat::Lines => store.import(&expected_root, BufReader::new(body.as_ref()))?,
            SnapshotFormat::Array => {
                let tree = store.import_all(&body)?;

                // the dump's declared root also has to be the root this
                // census was announced under
                let computed = tree
                    .root()?
                    .ok_or_else(|| Error::invalid_input("imported census is empty"))?;
                if computed != expected_root {
                    store.del_by_root(&computed)?;
                    return Err(Error::RootMismatch {
                        expected: expected_root,
                        computed,
                    });
                }

                tree
            }
        };

        Ok(tree.size()?)
    }
}
