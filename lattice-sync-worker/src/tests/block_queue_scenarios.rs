// Copyright (c) 2022 MASSA LABS <info@massa.net>

use super::tools::{
    create_atx_with_poet, create_block, peer, setup, test_config, wait_until, PeerBehavior,
};
use crate::block_queue::JobId;
use crate::messages::SyncRequest;
use crate::validation::{fast_validation, validate_unique_tx_atx};
use lattice_hash::Hash;
use lattice_models::activation::AtxId;
use lattice_models::block::BlockId;
use lattice_models::layer::LayerId;
use lattice_models::transaction::TxId;
use lattice_sync_exports::{Mesh, SyncError};
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_topological_order_and_cleanup() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    let b1 = create_block(b"b1", LayerId(1), atx_id, vec![]);
    let id1 = b1.compute_id().unwrap();
    let b2 = create_block(b"b2", LayerId(1), atx_id, vec![id1]);
    let id2 = b2.compute_id().unwrap();
    let b3 = create_block(b"b3", LayerId(1), atx_id, vec![id1, id2]);
    let id3 = b3.compute_id().unwrap();

    let mut behavior = PeerBehavior::default();
    behavior.serve_layer(LayerId(1), &[b1, b2, b3]);
    behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    let resolved = harness
        .block_queue
        .fetch_block_ids(JobId::Layer(LayerId(1)), &[id1, id2, id3])
        .await
        .expect("layer job failed");
    assert!(resolved, "all blocks should resolve");

    // parents admit strictly before children
    assert_eq!(harness.mesh.admitted_order(), vec![id1, id2, id3]);

    // queue state is fully cleaned once the layer resolved
    assert!(
        wait_until(Duration::from_secs(2), || harness.block_queue.depth()
            == (0, 0, 0, 0))
        .await,
        "queue state was not cleaned: {:?}",
        harness.block_queue.depth()
    );
}

#[tokio::test]
#[serial]
async fn test_failure_cascade() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    let b1 = create_block(b"b1", LayerId(1), atx_id, vec![]);
    let id1 = b1.compute_id().unwrap();
    let b2 = create_block(b"b2", LayerId(1), atx_id, vec![id1]);
    let id2 = b2.compute_id().unwrap();

    // b1 fails fast validation, so b2 and the whole layer must fail with it
    harness.validator.reject(id1);

    let mut behavior = PeerBehavior::default();
    behavior.serve_layer(LayerId(1), &[b1, b2]);
    behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    let resolved = harness
        .block_queue
        .fetch_block_ids(JobId::Layer(LayerId(1)), &[id1, id2])
        .await
        .expect("layer job failed");
    assert!(!resolved, "an invalid ancestor must fail the layer");

    assert!(harness.mesh.admitted_order().is_empty());
    assert!(harness.mesh.get_block(&id1).is_none());
    assert!(harness.mesh.get_block(&id2).is_none());

    assert!(
        wait_until(Duration::from_secs(2), || harness.block_queue.depth()
            == (0, 0, 0, 0))
        .await,
        "queue state was not cleaned after the cascade"
    );
}

#[tokio::test]
#[serial]
async fn test_self_reference_is_a_hard_error() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, _) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();
    let block = create_block(b"b1", LayerId(1), atx_id, vec![]);
    let block_id = block.compute_id().unwrap();

    let callback: crate::block_queue::DepsCallback = Box::new(|_| Box::pin(async { Ok(()) }));
    let res = harness
        .block_queue
        .add_dependencies(JobId::Block(block_id), &[block_id], callback)
        .await;
    assert!(res.is_err(), "self-reference must be rejected");
}

#[tokio::test]
#[serial]
async fn test_hash_integrity_falls_through_to_next_peer() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    let good = create_block(b"good", LayerId(1), atx_id, vec![]);
    let good_id = good.compute_id().unwrap();
    let imposter = create_block(b"imposter", LayerId(1), atx_id, vec![]);

    // peer1 serves a block that does not hash to the requested id
    let mut bad_behavior = PeerBehavior::default();
    bad_behavior.blocks.insert(good_id, imposter);
    bad_behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), bad_behavior).await;

    let mut good_behavior = PeerBehavior::default();
    good_behavior.blocks.insert(good_id, good.clone());
    good_behavior.serve_atx(&atx, &poet);
    harness
        .net
        .connect_peer(peer(b"peer2"), good_behavior)
        .await;

    harness
        .fetcher
        .get_blocks(vec![good_id])
        .await
        .expect("fetch should succeed through the honest peer");
    let admitted = harness.mesh.get_block(&good_id).expect("block not admitted");
    assert_eq!(admitted.compute_id().unwrap(), good_id);
}

#[tokio::test]
#[serial]
async fn test_hash_mismatch_from_every_peer_fails_the_fetch() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    let good = create_block(b"good", LayerId(1), atx_id, vec![]);
    let good_id = good.compute_id().unwrap();
    let imposter = create_block(b"imposter", LayerId(1), atx_id, vec![]);

    let mut bad_behavior = PeerBehavior::default();
    bad_behavior.blocks.insert(good_id, imposter);
    bad_behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), bad_behavior).await;

    assert!(harness.fetcher.get_blocks(vec![good_id]).await.is_err());
    assert!(harness.mesh.get_block(&good_id).is_none());
}

#[tokio::test]
#[serial]
async fn test_concurrent_tx_requests_coalesce() {
    let harness = setup(test_config(), LayerId(2));
    let tx = lattice_models::transaction::Transaction {
        fee: 5,
        nonce: 1,
        payload: vec![1, 2, 3],
    };
    let tx_id = tx.compute_id().unwrap();

    let mut behavior = PeerBehavior::default();
    behavior.txs.insert(tx_id, tx.clone());
    // keep the request in flight long enough for both callers to attach
    behavior.response_delay = Some(Duration::from_millis(150));
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    let tx_ids = [tx_id];
    let (res_a, res_b) = tokio::join!(
        harness.tx_queue.handle_txs(&tx_ids),
        harness.tx_queue.handle_txs(&tx_ids),
    );
    assert_eq!(res_a.unwrap(), vec![tx.clone()]);
    assert_eq!(res_b.unwrap(), vec![tx]);

    let tx_requests = harness.net.count_requests(|req| {
        matches!(req, SyncRequest::Txs(ids) if ids.contains(&tx_id))
    });
    assert_eq!(
        tx_requests, 1,
        "concurrent waiters must share a single network request"
    );
}

#[tokio::test]
#[serial]
async fn test_ref_block_active_set_closure() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    // the ref block carries the epoch active set inline, the block borrows it
    let ref_block = create_block(b"ref", LayerId(1), atx_id, vec![]);
    let ref_id = ref_block.compute_id().unwrap();
    let mut block = create_block(b"b", LayerId(1), atx_id, vec![]);
    block.ref_block = Some(ref_id);
    block.active_set = None;
    let block_id = block.compute_id().unwrap();

    let mut behavior = PeerBehavior::default();
    behavior.blocks.insert(ref_id, ref_block);
    behavior.blocks.insert(block_id, block);
    behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    harness
        .fetcher
        .get_blocks(vec![block_id])
        .await
        .expect("fetch through the ref block failed");

    // the ref block was admitted before the block borrowing its active set,
    // and the borrowed activations were fetched through the item queue
    assert_eq!(harness.mesh.admitted_order(), vec![ref_id, block_id]);
    assert!(harness.storage.retrieve_activation(&atx_id).is_some());
}

#[tokio::test]
#[serial]
async fn test_invalid_ref_block_fails_the_block() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, poet) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();

    let ref_block = create_block(b"ref", LayerId(1), atx_id, vec![]);
    let ref_id = ref_block.compute_id().unwrap();
    let mut block = create_block(b"b", LayerId(1), atx_id, vec![]);
    block.ref_block = Some(ref_id);
    block.active_set = None;
    let block_id = block.compute_id().unwrap();

    // the ref block fails fast validation, the borrowing block must fail too
    harness.validator.reject(ref_id);

    let mut behavior = PeerBehavior::default();
    behavior.blocks.insert(ref_id, ref_block);
    behavior.blocks.insert(block_id, block);
    behavior.serve_atx(&atx, &poet);
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    assert!(harness.fetcher.get_blocks(vec![block_id]).await.is_err());
    assert!(harness.mesh.get_block(&ref_id).is_none());
    assert!(harness.mesh.get_block(&block_id).is_none());
}

#[tokio::test]
#[serial]
async fn test_syntactic_validation_rejects_sentinel_atx_before_fetching() {
    let harness = setup(test_config(), LayerId(2));
    harness
        .net
        .connect_peer(peer(b"peer1"), PeerBehavior::default())
        .await;

    let golden = harness.core.cfg.golden_atx_id;
    for sentinel in [golden, AtxId::empty()] {
        let mut block = create_block(b"b", LayerId(1), sentinel, vec![]);
        block.active_set = None;
        block.ref_block = Some(BlockId(Hash::compute_from(b"bogus")));
        assert!(matches!(
            harness.fetcher.block_syntactic_validation(block).await,
            Err(SyncError::InvalidAtxId)
        ));
    }

    // rejected before any network request went out
    assert_eq!(harness.net.count_requests(|_| true), 0);
}

#[tokio::test]
#[serial]
async fn test_syntactic_validation_of_gossiped_block() {
    let harness = setup(test_config(), LayerId(2));
    let (miner_atx, miner_poet) = create_atx_with_poet(b"miner", LayerId(5));
    let miner_atx_id = miner_atx.compute_id().unwrap();
    let (set_atx, set_poet) = create_atx_with_poet(b"set-member", LayerId(5));
    let set_atx_id = set_atx.compute_id().unwrap();
    let tx = lattice_models::transaction::Transaction {
        fee: 2,
        nonce: 7,
        payload: vec![4, 5],
    };
    let tx_id = tx.compute_id().unwrap();

    let mut block = create_block(b"b", LayerId(1), miner_atx_id, vec![]);
    block.active_set = Some(vec![set_atx_id]);
    block.tx_ids = vec![tx_id];

    let mut behavior = PeerBehavior::default();
    behavior.serve_atx(&miner_atx, &miner_poet);
    behavior.serve_atx(&set_atx, &set_poet);
    behavior.txs.insert(tx_id, tx.clone());
    harness.net.connect_peer(peer(b"peer1"), behavior).await;

    let (txs, atxs) = harness
        .fetcher
        .block_syntactic_validation(block)
        .await
        .expect("syntactic validation failed");
    assert_eq!(txs, vec![tx]);
    assert_eq!(atxs.len(), 2);
    assert!(harness.storage.retrieve_activation(&miner_atx_id).is_some());
    assert!(harness.storage.retrieve_activation(&set_atx_id).is_some());
}

#[tokio::test]
#[serial]
async fn test_fast_validation_rejections() {
    let harness = setup(test_config(), LayerId(2));
    let (atx, _) = create_atx_with_poet(b"identity", LayerId(5));
    let atx_id = atx.compute_id().unwrap();
    let tx_id = TxId(Hash::compute_from(b"tx"));

    // duplicate transaction ids
    let mut block = create_block(b"b", LayerId(1), atx_id, vec![]);
    block.tx_ids = vec![tx_id, tx_id];
    assert!(matches!(
        validate_unique_tx_atx(&block),
        Err(SyncError::DuplicateTx)
    ));

    // duplicate activation ids in the active set
    let mut block = create_block(b"b", LayerId(1), atx_id, vec![]);
    block.active_set = Some(vec![atx_id, atx_id]);
    assert!(matches!(
        validate_unique_tx_atx(&block),
        Err(SyncError::DuplicateAtx)
    ));

    // declared-but-empty active set
    let mut block = create_block(b"b", LayerId(1), atx_id, vec![]);
    block.active_set = Some(vec![]);
    assert!(matches!(
        fast_validation(&harness.core, &block),
        Err(SyncError::ZeroActiveSet)
    ));

    // the golden and empty activation sentinels are not valid references
    let golden = harness.core.cfg.golden_atx_id;
    let block = create_block(b"b", LayerId(1), golden, vec![]);
    assert!(matches!(
        fast_validation(&harness.core, &block),
        Err(SyncError::InvalidAtxId)
    ));
    let block = create_block(b"b", LayerId(1), AtxId::empty(), vec![]);
    assert!(matches!(
        fast_validation(&harness.core, &block),
        Err(SyncError::InvalidAtxId)
    ));

    // a well-formed block passes
    let block = create_block(b"b", LayerId(1), atx_id, vec![]);
    assert!(fast_validation(&harness.core, &block).is_ok());
}
