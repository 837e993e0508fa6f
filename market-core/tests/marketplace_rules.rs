//! Integration tests for the marketplace rules
//!
//! Every test opens a fresh `Marketplace` on a temporary RocksDB directory.

use market_core::{
    AccountId, ArticleId, Config, Error, EventKind, InMemorySettlement, MarketEvent, Marketplace,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = temp.path().to_path_buf();
    config
}

fn price(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

fn alice() -> AccountId {
    AccountId::new("alice")
}

fn bob() -> AccountId {
    AccountId::new("bob")
}

fn carol() -> AccountId {
    AccountId::new("carol")
}

fn funded_book() -> Arc<InMemorySettlement> {
    Arc::new(InMemorySettlement::with_balances([
        (alice(), price(100)),
        (bob(), price(100)),
        (carol(), price(100)),
    ]))
}

fn open(temp: &TempDir) -> Marketplace {
    Marketplace::open(config(temp), funded_book()).unwrap()
}

#[tokio::test]
async fn ids_are_sequential_and_count_matches() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);

    for expected in 1..=3u64 {
        let receipt = market
            .sell_article(alice(), format!("item {}", expected), "", price(2))
            .await
            .unwrap();
        assert_eq!(receipt.article_id, ArticleId::new(expected));
    }

    // A rejected listing does not consume an id
    let err = market
        .sell_article(alice(), "   ", "", price(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = market
        .sell_article(alice(), "free", "", Decimal::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert_eq!(market.number_of_articles().await.unwrap(), 3);
    assert_eq!(market.events_from(0).unwrap().len(), 3);
}

#[tokio::test]
async fn buying_from_empty_ledger() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);

    let err = market
        .buy_article(bob(), ArticleId::new(1), price(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoArticlesExist));
    assert_eq!(err.to_string(), "No article to buy");
    assert!(err.is_rejection());
}

#[tokio::test]
async fn buying_unknown_article() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    market.sell_article(alice(), "a", "", price(1)).await.unwrap();

    let err = market
        .buy_article(bob(), ArticleId::new(7), price(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ArticleNotFound(id) if id == ArticleId::new(7)));
}

#[tokio::test]
async fn seller_cannot_buy_own_article() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let receipt = market.sell_article(alice(), "a", "", price(5)).await.unwrap();

    let err = market
        .buy_article(alice(), receipt.article_id, price(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SelfPurchase));

    let article = market.get_article(receipt.article_id).await.unwrap().unwrap();
    assert_eq!(article.buyer, None);
}

#[tokio::test]
async fn wrong_value_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let receipt = market.sell_article(alice(), "a", "", price(5)).await.unwrap();

    for tendered in [price(4), price(6), Decimal::new(501, 2)] {
        let err = market
            .buy_article(bob(), receipt.article_id, tendered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceMismatch { .. }));
    }

    let article = market.get_article(receipt.article_id).await.unwrap().unwrap();
    assert_eq!(article.buyer, None);
    assert_eq!(market.balance(bob()).await.unwrap(), price(100));
}

#[tokio::test]
async fn second_purchase_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let receipt = market.sell_article(alice(), "a", "", price(5)).await.unwrap();

    market
        .buy_article(bob(), receipt.article_id, price(5))
        .await
        .unwrap();
    let err = market
        .buy_article(carol(), receipt.article_id, price(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadySold(_)));

    let article = market.get_article(receipt.article_id).await.unwrap().unwrap();
    assert_eq!(article.buyer, Some(bob()));
    assert_eq!(market.balance(carol()).await.unwrap(), price(100));
}

#[tokio::test]
async fn purchase_moves_value_and_emits_sold() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let listed = market
        .sell_article(alice(), "lamp", "brass", price(30))
        .await
        .unwrap();

    let sold = market
        .buy_article(bob(), listed.article_id, price(30))
        .await
        .unwrap();

    assert_eq!(market.balance(alice()).await.unwrap(), price(130));
    assert_eq!(market.balance(bob()).await.unwrap(), price(70));

    assert_eq!(sold.event.position, 1);
    assert_eq!(sold.event.prev_hash, listed.event.hash);
    match &sold.event.event {
        MarketEvent::Sold {
            seller, buyer, name, ..
        } => {
            assert_eq!(seller, &alice());
            assert_eq!(buyer, &bob());
            assert_eq!(name, "lamp");
        }
        other => panic!("expected Sold, got {:?}", other),
    }
    assert_eq!(sold.event.event.describe(), "bob bought lamp");
}

#[tokio::test]
async fn for_sale_excludes_bought_articles() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let a = market.sell_article(alice(), "A", "", price(1)).await.unwrap();
    let b = market.sell_article(alice(), "B", "", price(2)).await.unwrap();

    market.buy_article(bob(), a.article_id, price(1)).await.unwrap();

    assert_eq!(market.articles_for_sale().await.unwrap(), vec![b.article_id]);
}

#[tokio::test]
async fn settlement_failure_leaves_ledger_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let book = Arc::new(InMemorySettlement::with_balances([(bob(), price(10))]));
    let market = Marketplace::open(config(&temp), book).unwrap();
    let receipt = market.sell_article(alice(), "car", "", price(50)).await.unwrap();

    let err = market
        .buy_article(bob(), receipt.article_id, price(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SettlementFailed(_)));
    assert_eq!(err.reason(), "settlement_failed");

    assert_eq!(
        market.articles_for_sale().await.unwrap(),
        vec![receipt.article_id]
    );
    assert_eq!(market.events_from(0).unwrap().len(), 1);
    assert_eq!(market.balance(bob()).await.unwrap(), price(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_have_one_winner() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let id = market
        .sell_article(alice(), "a", "", price(5))
        .await
        .unwrap()
        .article_id;

    let first = {
        let handle = market.handle();
        tokio::spawn(async move { handle.buy_article(bob(), id, price(5)).await })
    };
    let second = {
        let handle = market.handle();
        tokio::spawn(async move { handle.buy_article(carol(), id, price(5)).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let already_sold = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadySold(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(already_sold, 1);

    // Exactly one of them paid
    let paid = [
        market.balance(bob()).await.unwrap(),
        market.balance(carol()).await.unwrap(),
    ];
    assert_eq!(paid.iter().filter(|b| **b == price(95)).count(), 1);
    assert_eq!(market.balance(alice()).await.unwrap(), price(105));
}

#[tokio::test]
async fn subscriber_replays_history_before_live_events() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    for name in ["a", "b", "c"] {
        market.sell_article(alice(), name, "", price(1)).await.unwrap();
    }

    let mut subscription = market.subscribe(EventKind::Listed, 0);
    market.sell_article(alice(), "d", "", price(1)).await.unwrap();

    let mut names = Vec::new();
    for _ in 0..4 {
        let record = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        match record.event {
            MarketEvent::Listed { name, .. } => names.push(name),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(names, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn subscriber_only_sees_its_kind() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let mut sold = market.subscribe(EventKind::Sold, 0);

    let a = market.sell_article(alice(), "a", "", price(1)).await.unwrap();
    market.sell_article(alice(), "b", "", price(1)).await.unwrap();
    market.buy_article(bob(), a.article_id, price(1)).await.unwrap();

    let record = tokio::time::timeout(Duration::from_secs(5), sold.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.kind(), EventKind::Sold);
    assert_eq!(record.position, 2);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let mut subscription = market.subscribe(EventKind::Listed, 0);
    let id = subscription.id();

    assert!(market.unsubscribe(id));
    assert!(!market.unsubscribe(id));
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn ledger_and_log_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let book = funded_book();

    {
        let market = Marketplace::open(config(&temp), book.clone()).unwrap();
        let a = market.sell_article(alice(), "a", "", price(3)).await.unwrap();
        market.sell_article(carol(), "b", "", price(4)).await.unwrap();
        market.buy_article(bob(), a.article_id, price(3)).await.unwrap();
        market.shutdown().await.unwrap();
    }

    let market = Marketplace::open(config(&temp), book).unwrap();
    assert_eq!(market.number_of_articles().await.unwrap(), 2);
    assert_eq!(
        market.articles_for_sale().await.unwrap(),
        vec![ArticleId::new(2)]
    );

    let bought = market.get_article(ArticleId::new(1)).await.unwrap().unwrap();
    assert_eq!(bought.buyer, Some(bob()));

    let kinds: Vec<EventKind> = market
        .events_from(0)
        .unwrap()
        .iter()
        .map(|r| r.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![EventKind::Listed, EventKind::Listed, EventKind::Sold]
    );
    assert_eq!(market.verify_chain().unwrap(), 3);

    // Bought articles stay bought after reopen
    let err = market
        .buy_article(carol(), ArticleId::new(1), price(3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadySold(_)));
}

#[tokio::test]
async fn rejections_are_counted_by_reason() {
    let temp = tempfile::tempdir().unwrap();
    let market = open(&temp);
    let receipt = market.sell_article(alice(), "a", "", price(5)).await.unwrap();

    let _ = market.buy_article(alice(), receipt.article_id, price(5)).await;
    let _ = market.buy_article(bob(), receipt.article_id, price(1)).await;

    let metrics = market.metrics();
    assert_eq!(metrics.listings_total.get(), 1);
    assert_eq!(
        metrics
            .rejections_total
            .with_label_values(&["self_purchase"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .rejections_total
            .with_label_values(&["price_mismatch"])
            .get(),
        1
    );
}
