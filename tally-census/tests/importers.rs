use std::{
    io::{Read, Write},
    net::TcpListener,
    sync::Arc,
    thread,
    time::Duration,
};

use tally_census::{
    CensusDescriptor, CensusImporter, CensusStore, Context, Error, GraphqlImporter, JsonImporter,
    OnchainCensusFetcher, Orchestrator,
};
use tally_crypto::Fe;
use tally_primitives::{Address, CensusOrigin};

fn with_tmp_store<F: FnOnce(Arc<CensusStore>)>(op: F) {
    let path = tempfile::tempdir().unwrap().into_path();
    let store = Arc::new(CensusStore::open(&path).unwrap());

    op(store);

    thread::sleep(Duration::from_millis(100));
    let _ = tally_storage::destroy(&path);
}

/// Serve exactly one canned HTTP response on a local port.
fn serve_once(status: &str, content_type: &str, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 8192];
            let _ = stream.read(&mut buf);

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{addr}/census")
}

fn small_addr(last: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = last;
    Address::new(bytes)
}

fn two_leaf_root(store: &CensusStore) -> Fe {
    // compute the root of {(0x02, 1), (0x03, 1)} via a throwaway census
    let uuid = uuid::Uuid::new_v4();
    let census = store.new_working(&uuid).unwrap();
    census.add(&small_addr(2), &1u8.into()).unwrap();
    census.add(&small_addr(3), &1u8.into()).unwrap();
    let root = census.root().unwrap().unwrap();
    store.del_working(&uuid).unwrap();
    thread::sleep(Duration::from_millis(50));
    root
}

fn descriptor(uri: String, root: Fe) -> CensusDescriptor {
    CensusDescriptor {
        origin: CensusOrigin::MerkleTreeOffchainStaticV1,
        root: root.to_bytes_be(),
        uri,
        contract_address: None,
    }
}

#[test]
fn json_array_snapshot_imports() {
    with_tmp_store(|store| {
        let root = two_leaf_root(&store);
        let body = format!(
            "{{\"root\":\"{root}\",\"participants\":[\
             {{\"address\":\"{}\",\"weight\":\"1\",\"index\":0}},\
             {{\"address\":\"{}\",\"weight\":\"1\",\"index\":1}}]}}",
            small_addr(2),
            small_addr(3)
        );
        let uri = serve_once("200 OK", "application/json", body);

        let importer = JsonImporter::new();
        let imported = importer
            .import(&Context::new(), &store, &descriptor(uri, root), 0)
            .unwrap();

        assert_eq!(imported, 2);
        assert!(store.exists_by_root(&root).unwrap());
    });
}

#[test]
fn ndjson_snapshot_imports() {
    with_tmp_store(|store| {
        let root = two_leaf_root(&store);
        let body = format!(
            "{{\"address\":\"{}\",\"weight\":\"1\",\"index\":0}}\n\
             {{\"address\":\"{}\",\"weight\":\"1\",\"index\":1}}\n",
            small_addr(2),
            small_addr(3)
        );
        let uri = serve_once("200 OK", "application/x-ndjson", body);

        let importer = JsonImporter::new();
        importer
            .import(&Context::new(), &store, &descriptor(uri, root), 0)
            .unwrap();

        assert_eq!(store.size_by_root(&root).unwrap(), 2);
    });
}

#[test]
fn http_failure_carries_the_body() {
    with_tmp_store(|store| {
        let uri = serve_once(
            "503 Service Unavailable",
            "text/plain",
            "indexer is down".into(),
        );

        let importer = JsonImporter::new();
        let err = importer
            .import(
                &Context::new(),
                &store,
                &descriptor(uri, Fe::from(1)),
                0,
            )
            .unwrap_err();

        match err {
            Error::HttpStatus { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("indexer is down"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    });
}

#[test]
fn cancelled_context_stops_before_the_request() {
    with_tmp_store(|store| {
        let ctx = Context::new();
        ctx.cancel();

        let importer = JsonImporter::new();
        let err = importer
            .import(
                &ctx,
                &store,
                &descriptor("http://127.0.0.1:9/unreachable".into(), Fe::from(1)),
                0,
            )
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    });
}

#[test]
fn graphql_events_build_a_contract_census() {
    with_tmp_store(|store| {
        let contract = small_addr(0xC1);
        let voter = small_addr(0x05);

        let body = format!(
            "{{\"data\":{{\"weightChangeEvents\":[\
             {{\"account\":{{\"id\":\"{voter}\"}},\"previousWeight\":\"0\",\"newWeight\":\"3\"}}]}}}}"
        );
        let uri = serve_once("200 OK", "application/json", body);
        let uri = uri.replace("http://", "graphql://");

        let importer = GraphqlImporter::with_options(1000, Duration::from_secs(5), true);
        let census = CensusDescriptor {
            origin: CensusOrigin::MerkleTreeOnchainDynamicV1,
            root: [0u8; 32],
            uri,
            contract_address: Some(contract),
        };

        let processed = importer
            .import(&Context::new(), &store, &census, 0)
            .unwrap();

        assert_eq!(processed, 1);
        assert!(store.exists_by_address(&contract).unwrap());

        let tree = store.load_by_address(&contract).unwrap();
        let proof = tree.gen_proof(&voter).unwrap();
        assert_eq!(
            proof.value,
            tally_census::pack_census_leaf(&voter, &3u8.into()).unwrap()
        );
    });
}

struct FixedFetcher([u8; 32]);

impl OnchainCensusFetcher for FixedFetcher {
    fn fetch_root(&self, _address: &Address) -> Result<[u8; 32], Error> {
        Ok(self.0)
    }
}

#[test]
fn orchestrator_skips_csp_and_known_roots() {
    with_tmp_store(|store| {
        let orchestrator = Orchestrator::new(store.clone(), vec![Box::new(JsonImporter::new())]);

        // CSP censuses are managed externally
        let csp = CensusDescriptor {
            origin: CensusOrigin::CspEddsaBabyJubJubV1,
            root: [0u8; 32],
            uri: "csp://provider.example.org".into(),
            contract_address: None,
        };
        orchestrator.import_census(&Context::new(), &csp).unwrap();

        // an already-materialized root is not fetched again (the uri does
        // not even resolve)
        let root = two_leaf_root(&store);
        let census = store.new_by_root(&root).unwrap();
        census.add(&small_addr(2), &1u8.into()).unwrap();

        let known = descriptor("https://unreachable.invalid/census".into(), root);
        orchestrator.import_census(&Context::new(), &known).unwrap();
    });
}

#[test]
fn orchestrator_rejects_unknown_origins_and_uris() {
    with_tmp_store(|store| {
        let orchestrator = Orchestrator::new(store.clone(), vec![Box::new(JsonImporter::new())]);

        let unknown = CensusDescriptor {
            origin: CensusOrigin::UnknownV0,
            root: [1u8; 32],
            uri: "https://example.org/census".into(),
            contract_address: None,
        };
        assert!(matches!(
            orchestrator.import_census(&Context::new(), &unknown),
            Err(Error::InvalidInput(_))
        ));

        let unmatched = descriptor("ipfs://bafy.../census".into(), Fe::from(99));
        assert!(matches!(
            orchestrator.import_census(&Context::new(), &unmatched),
            Err(Error::NoImporter(_))
        ));
    });
}

#[test]
fn orchestrator_resolves_onchain_roots() {
    with_tmp_store(|store| {
        let contract = small_addr(0xEE);
        let voter = small_addr(0x09);

        let body = format!(
            "{{\"data\":{{\"weightChangeEvents\":[\
             {{\"account\":{{\"id\":\"{voter}\"}},\"previousWeight\":\"0\",\"newWeight\":\"7\"}}]}}}}"
        );
        let uri = serve_once("200 OK", "application/json", body).replace("http://", "graphql://");

        // the descriptor's root slot carries the padded contract address
        let mut padded = [0u8; 32];
        padded[..20].copy_from_slice(contract.as_bytes());

        let fetched_root = Fe::from(777).to_bytes_be();
        let orchestrator = Orchestrator::new(
            store.clone(),
            vec![Box::new(GraphqlImporter::with_options(
                1000,
                Duration::from_secs(5),
                true,
            ))],
        )
        .with_fetcher(Arc::new(FixedFetcher(fetched_root)));

        let census = CensusDescriptor {
            origin: CensusOrigin::MerkleTreeOnchainDynamicV1,
            root: padded,
            uri,
            contract_address: None,
        };

        orchestrator.import_census(&Context::new(), &census).unwrap();
        assert!(store.exists_by_address(&contract).unwrap());

        // the consumed-event count is persisted against the contract
        assert_eq!(store.processed_events(&contract).unwrap(), 1);

        // a later run resumes pagination instead of replaying history: an
        // empty page leaves the count where the first run ended
        let uri = serve_once(
            "200 OK",
            "application/json",
            "{\"data\":{\"weightChangeEvents\":[]}}".into(),
        )
        .replace("http://", "graphql://");
        let census = CensusDescriptor { uri, ..census };

        orchestrator.import_census(&Context::new(), &census).unwrap();
        assert_eq!(store.processed_events(&contract).unwrap(), 1);
    });
}

#[test]
fn orchestrator_skips_current_contract_census() {
    use tally_census::WeightChange;

    with_tmp_store(|store| {
        let contract = small_addr(0xDD);
        let events = vec![WeightChange {
            address: small_addr(0x08),
            previous_weight: 0u8.into(),
            new_weight: 4u8.into(),
        }];
        let census = store.import_events_by_address(&contract, &events).unwrap();
        let current_root = census.root().unwrap().unwrap();

        // the fetcher reports the root the head already tracks; the
        // plugin list cannot even handle the uri, so reaching it would
        // fail the import
        let mut padded = [0u8; 32];
        padded[..20].copy_from_slice(contract.as_bytes());

        let orchestrator = Orchestrator::new(store.clone(), vec![Box::new(JsonImporter::new())])
            .with_fetcher(Arc::new(FixedFetcher(current_root.to_bytes_be())));

        let descriptor = CensusDescriptor {
            origin: CensusOrigin::MerkleTreeOnchainDynamicV1,
            root: padded,
            uri: "graphql://indexer.invalid/census".into(),
            contract_address: None,
        };

        orchestrator
            .import_census(&Context::new(), &descriptor)
            .unwrap();
    });
}
