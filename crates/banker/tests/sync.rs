#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use api_types::{Account, AccountKey, AccountType, Amount, Currency, CurrencyPool};
use banker::{
    ApplicationLayer, BusLayer, BusRequest, BusResponse, MemoryMaster, SlaveBanker,
    SlaveBankerConfig,
};

fn usd(micros: i64) -> CurrencyPool {
    CurrencyPool::from(Amount::new(Currency::Usd, micros))
}

fn key(path: &str) -> AccountKey {
    path.parse().unwrap()
}

fn config(suffix: &str) -> SlaveBankerConfig {
    SlaveBankerConfig::new(suffix, usd(100_000))
}

fn default_account_body() -> String {
    serde_json::to_string(&Account::default()).unwrap()
}

#[tokio::test]
async fn reauthorize_acknowledges_reported_spend() {
    let (layer, endpoint) = BusLayer::channel();
    let layer = Arc::new(layer);
    MemoryMaster::spawn(endpoint);
    let banker = SlaveBanker::new(config("r1"), layer.clone()).unwrap();

    let account = key("camp:stratA");
    banker.add_spend_account(&account).await.unwrap();
    assert!(banker.is_initialized(&account));

    // The operator funds the shadow account with 10 USD.
    layer
        .topup_transfer(&key("camp:stratA:r1"), AccountType::Budget, &usd(10_000_000))
        .await
        .unwrap();
    banker.sync_account(&account).await.unwrap();
    assert_eq!(
        banker.account(&account).unwrap().available(),
        usd(10_000_000)
    );

    // A worker commits 3 USD locally.
    banker.commit_spend(&account, &usd(3_000_000)).unwrap();
    assert_eq!(banker.account(&account).unwrap().available(), usd(7_000_000));

    // Report-spend pass: the master acknowledges the 3 USD.
    let before = banker.last_sync();
    banker.sync_all().await.unwrap();
    assert!(banker.last_sync() > before);
    let shadow = banker.account(&account).unwrap();
    assert_eq!(shadow.committed, CurrencyPool::new());
    assert_eq!(shadow.acknowledged_spend, usd(3_000_000));

    // Reauthorize pass: one 0.10 USD slice lands on top.
    banker.reauthorize_budget(1);
    banker.wait_reauthorized().await;
    let shadow = banker.account(&account).unwrap();
    assert_eq!(shadow.net_authorized(), usd(10_100_000));
    assert_eq!(shadow.committed, CurrencyPool::new());
    assert_eq!(shadow.acknowledged_spend, usd(3_000_000));
    assert_eq!(shadow.available(), usd(7_100_000));
    assert_eq!(banker.num_reauthorized(), 1);
}

#[tokio::test]
async fn concurrent_creation_issues_a_single_master_rpc() {
    let (layer, mut endpoint) = BusLayer::channel();
    let registrations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&registrations);
    tokio::spawn(async move {
        while let Some(request) = endpoint.recv().await {
            if request.path.ends_with("/shadow") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            let _ = request.reply.send(BusResponse::ok(default_account_body()));
        }
    });

    let banker = SlaveBanker::new(config("r1"), Arc::new(layer)).unwrap();
    let account = key("x");
    let (first, second) = tokio::join!(
        banker.add_spend_account(&account),
        banker.add_spend_account(&account)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(registrations.load(Ordering::SeqCst), 1);
    assert!(banker.is_initialized(&account));
}

#[tokio::test]
async fn empty_sync_all_still_advances_last_sync() {
    let (layer, endpoint) = BusLayer::channel();
    MemoryMaster::spawn(endpoint);
    let banker = SlaveBanker::new(config("r1"), Arc::new(layer)).unwrap();

    let before = banker.last_sync();
    tokio::time::sleep(Duration::from_millis(10)).await;
    banker.sync_all().await.unwrap();
    assert!(banker.last_sync() > before);
}

#[tokio::test]
async fn empty_reauthorize_keeps_the_flag_clear() {
    let (layer, endpoint) = BusLayer::channel();
    MemoryMaster::spawn(endpoint);
    let banker = SlaveBanker::new(config("r1"), Arc::new(layer)).unwrap();

    let before = banker.last_reauthorize();
    tokio::time::sleep(Duration::from_millis(10)).await;
    banker.reauthorize_budget(1);

    assert!(!banker.is_reauthorizing());
    assert!(banker.last_reauthorize() > before);
    assert_eq!(banker.num_reauthorized(), 0);
}

#[tokio::test]
async fn overlapping_reauthorize_tick_is_skipped() {
    let (layer, mut endpoint) = BusLayer::channel();
    let held: Arc<Mutex<Vec<oneshot::Sender<BusResponse>>>> = Arc::new(Mutex::new(Vec::new()));
    let held_by_endpoint = Arc::clone(&held);
    tokio::spawn(async move {
        while let Some(request) = endpoint.recv().await {
            if request.path.ends_with("/balance") {
                held_by_endpoint.lock().unwrap().push(request.reply);
                continue;
            }
            let _ = request.reply.send(BusResponse::ok(default_account_body()));
        }
    });

    let banker = SlaveBanker::new(config("r1"), Arc::new(layer)).unwrap();
    banker.add_spend_account(&key("a")).await.unwrap();

    banker.reauthorize_budget(1);
    assert!(banker.is_reauthorizing());

    // Wait until the pass's request is actually in flight.
    while held.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // A second tick while the last response is outstanding is skipped.
    banker.reauthorize_budget(1);
    assert_eq!(banker.num_reauthorized(), 0);

    // Release the held response: the pass completes exactly once.
    let reply = held.lock().unwrap().pop().unwrap();
    reply.send(BusResponse::ok(default_account_body())).unwrap();

    banker.wait_reauthorized().await;
    assert_eq!(banker.num_reauthorized(), 1);
    assert!(banker.last_reauthorize_delay().is_some());
}

#[tokio::test]
async fn liveness_flips_after_transport_failures_and_recovers() {
    let (layer, mut endpoint) = BusLayer::channel();
    let dropping = Arc::new(AtomicBool::new(false));
    let dropping_in_endpoint = Arc::clone(&dropping);
    tokio::spawn(async move {
        let mut master = MemoryMaster::default();
        while let Some(BusRequest {
            verb,
            path,
            query,
            body,
            reply,
        }) = endpoint.recv().await
        {
            if dropping_in_endpoint.load(Ordering::SeqCst) {
                drop(reply);
                continue;
            }
            let _ = reply.send(master.handle(&verb, &path, &query, &body));
        }
    });

    let mut config = config("r1");
    config.max_fail_sync = Duration::from_millis(300);
    let banker = SlaveBanker::new(config, Arc::new(layer)).unwrap();

    banker.add_spend_account(&key("a")).await.unwrap();
    banker.sync_all().await.unwrap();
    banker.reauthorize_budget(1);
    banker.wait_reauthorized().await;
    let indicator = banker.provider_indicators();
    assert!(indicator.status);
    assert_eq!(indicator.service_name, "r1");

    // The master goes dark: syncs fail and the timestamps stop advancing.
    dropping.store(true, Ordering::SeqCst);
    assert!(banker.sync_all().await.is_err());
    tokio::time::sleep(Duration::from_millis(400)).await;
    let indicator = banker.provider_indicators();
    assert!(!indicator.status);
    assert!(indicator.message.contains("ERROR"));

    // On recovery the next successful passes restore the signal.
    dropping.store(false, Ordering::SeqCst);
    banker.sync_all().await.unwrap();
    banker.reauthorize_budget(1);
    banker.wait_reauthorized().await;
    assert!(banker.provider_indicators().status);
}

#[tokio::test]
async fn overlapping_syncs_for_one_key_merge_commutatively() {
    let (layer, mut endpoint) = BusLayer::channel();
    let holding = Arc::new(AtomicBool::new(false));
    let held: Arc<Mutex<Vec<(oneshot::Sender<BusResponse>, BusResponse)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let holding_in_endpoint = Arc::clone(&holding);
    let held_by_endpoint = Arc::clone(&held);
    tokio::spawn(async move {
        let mut master = MemoryMaster::default();
        while let Some(BusRequest {
            verb,
            path,
            query,
            body,
            reply,
        }) = endpoint.recv().await
        {
            let is_sync = verb == "POST" && path.trim_matches('/').split('/').count() == 3;
            let response = master.handle(&verb, &path, &query, &body);
            if is_sync && holding_in_endpoint.load(Ordering::SeqCst) {
                held_by_endpoint.lock().unwrap().push((reply, response));
                continue;
            }
            let _ = reply.send(response);
        }
    });

    let layer = Arc::new(layer);
    let banker = SlaveBanker::new(config("r1"), layer.clone()).unwrap();
    let account = key("a");
    banker.add_spend_account(&account).await.unwrap();
    layer
        .topup_transfer(&key("a:r1"), AccountType::Budget, &usd(10_000_000))
        .await
        .unwrap();
    banker.sync_account(&account).await.unwrap();
    banker.commit_spend(&account, &usd(3_000_000)).unwrap();

    // Two round-trips for the same key race; both report the same view.
    holding.store(true, Ordering::SeqCst);
    let first = {
        let banker = banker.clone();
        let account = account.clone();
        tokio::spawn(async move { banker.sync_account(&account).await })
    };
    let second = {
        let banker = banker.clone();
        let account = account.clone();
        tokio::spawn(async move { banker.sync_account(&account).await })
    };
    while held.lock().unwrap().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for (reply, response) in held.lock().unwrap().drain(..) {
        let _ = reply.send(response);
    }
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // The duplicate merge was a no-op.
    let shadow = banker.account(&account).unwrap();
    assert_eq!(shadow.committed, CurrencyPool::new());
    assert_eq!(shadow.acknowledged_spend, usd(3_000_000));
    assert_eq!(shadow.available(), usd(7_000_000));
}
