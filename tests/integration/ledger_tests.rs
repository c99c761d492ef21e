//! PostgreSQL ledger and catalog tests
//!
//! These need a database reachable through DATABASE_URL. Every test seeds its
//! own clan, members, item types and instances, so they can share a database.

use chrono::{Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use clan_armory::{
    models::{ArmoryOffer, ClanRole},
    repository::{ArmoryLedger, InventoryRepository, ItemTypeCatalog, PgArmoryLedger},
    AppError, ArmoryError,
};

async fn pool() -> PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Freshly inserted clan; member ids are derived from the clan id
struct Seed {
    clan_id: i64,
    lender: i64,
    borrower: i64,
    officer: i64,
}

async fn seed_clan(pool: &PgPool) -> Seed {
    let clan_id: i64 = sqlx::query_scalar("INSERT INTO clans (name) VALUES ('Test clan') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap();
    let base = clan_id * 100;
    let seed = Seed {
        clan_id,
        lender: base + 1,
        borrower: base + 2,
        officer: base + 3,
    };
    for (user_id, role) in [
        (seed.lender, ClanRole::Member),
        (seed.borrower, ClanRole::Member),
        (seed.officer, ClanRole::Officer),
    ] {
        sqlx::query("INSERT INTO clan_members (clan_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(clan_id)
            .bind(user_id)
            .bind(i16::from(role))
            .execute(pool)
            .await
            .unwrap();
    }
    seed
}

async fn item_type(pool: &PgPool) -> i64 {
    sqlx::query_scalar("INSERT INTO item_types (name) VALUES ('Test type') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn item(pool: &PgPool, item_type_id: i64, owner_user_id: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO item_instances (item_type_id, owner_user_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(item_type_id)
    .bind(owner_user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn equip(pool: &PgPool, user_id: i64, slot: &str, item_instance_id: i64) {
    sqlx::query("INSERT INTO equipped_items (user_id, slot, item_instance_id) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(slot)
        .bind(item_instance_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn is_equipped(pool: &PgPool, item_instance_id: i64) -> bool {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM equipped_items WHERE item_instance_id = $1)")
        .bind(item_instance_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn offer(item_instance_id: i64, item_type_id: i64, seed: &Seed, lender: i64) -> ArmoryOffer {
    ArmoryOffer {
        item_instance_id,
        item_type_id,
        lender_clan_id: seed.clan_id,
        lender_user_id: lender,
        updated_at: Utc::now(),
    }
}

fn rejection<T: std::fmt::Debug>(result: Result<T, AppError>) -> ArmoryError {
    match result {
        Err(AppError::Armory(e)) => e,
        other => panic!("expected armory rejection, got {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_disable_item_type_purges_only_that_type() {
    let pool = pool().await;
    let seed = seed_clan(&pool).await;
    let ledger = PgArmoryLedger::new(pool.clone());
    let catalog = InventoryRepository::new(pool.clone());

    let doomed = item_type(&pool).await;
    let kept = item_type(&pool).await;

    // One loan and two offers of the doomed type, one loan and one offer of the other
    let doomed_loaned = item(&pool, doomed, seed.lender).await;
    let doomed_offered = item(&pool, doomed, seed.lender).await;
    let doomed_by_borrower = item(&pool, doomed, seed.borrower).await;
    let kept_loaned = item(&pool, kept, seed.lender).await;
    let kept_offered = item(&pool, kept, seed.borrower).await;

    for (id, type_id, lender) in [
        (doomed_loaned, doomed, seed.lender),
        (doomed_offered, doomed, seed.lender),
        (doomed_by_borrower, doomed, seed.borrower),
        (kept_loaned, kept, seed.lender),
        (kept_offered, kept, seed.borrower),
    ] {
        ledger.put_offer(offer(id, type_id, &seed, lender), None).await.unwrap();
    }
    ledger
        .create_loan(doomed_loaned, seed.borrower, seed.clan_id, Utc::now())
        .await
        .unwrap();
    ledger
        .create_loan(kept_loaned, seed.borrower, seed.clan_id, Utc::now())
        .await
        .unwrap();
    equip(&pool, seed.borrower, "main_hand", doomed_loaned).await;
    equip(&pool, seed.borrower, "off_hand", kept_loaned).await;

    let outcome = catalog.disable_item_type(doomed).await.unwrap();

    let mut purged: Vec<i64> = outcome.purged.iter().map(|e| e.item_instance_id()).collect();
    purged.sort_unstable();
    let mut expected = vec![doomed_loaned, doomed_offered, doomed_by_borrower];
    expected.sort_unstable();
    assert_eq!(purged, expected);
    assert_eq!(outcome.purged.iter().filter(|e| e.is_loaned()).count(), 1);
    assert_eq!(outcome.equipped_cleared, 1);

    for id in expected {
        assert!(ledger.get_entry(id).await.unwrap().is_none());
    }
    assert!(ledger.get_entry(kept_loaned).await.unwrap().unwrap().is_loaned());
    assert!(ledger.get_entry(kept_offered).await.unwrap().is_some());
    assert!(!is_equipped(&pool, doomed_loaned).await);
    assert!(is_equipped(&pool, kept_loaned).await);

    let enabled: bool = sqlx::query_scalar("SELECT enabled FROM item_types WHERE id = $1")
        .bind(doomed)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!enabled);

    // New offers of the disabled type are refused
    let late = item(&pool, doomed, seed.lender).await;
    assert_eq!(
        rejection(ledger.put_offer(offer(late, doomed, &seed, seed.lender), None).await),
        ArmoryError::ItemTypeDisabled(late)
    );
}

#[tokio::test]
#[ignore]
async fn test_disable_unknown_item_type() {
    let pool = pool().await;
    let catalog = InventoryRepository::new(pool.clone());

    let result = catalog.disable_item_type(i64::MAX).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn test_purge_member_removes_offers_and_ends_loans() {
    let pool = pool().await;
    let seed = seed_clan(&pool).await;
    let ledger = PgArmoryLedger::new(pool.clone());
    let type_id = item_type(&pool).await;

    let lent_out = item(&pool, type_id, seed.lender).await;
    let on_shelf = item(&pool, type_id, seed.lender).await;
    let borrowed = item(&pool, type_id, seed.officer).await;
    let unrelated = item(&pool, type_id, seed.officer).await;

    for (id, lender) in [
        (lent_out, seed.lender),
        (on_shelf, seed.lender),
        (borrowed, seed.officer),
        (unrelated, seed.officer),
    ] {
        ledger.put_offer(offer(id, type_id, &seed, lender), None).await.unwrap();
    }
    ledger.create_loan(lent_out, seed.borrower, seed.clan_id, Utc::now()).await.unwrap();
    ledger.create_loan(borrowed, seed.lender, seed.clan_id, Utc::now()).await.unwrap();

    let affected = ledger.purge_member(seed.clan_id, seed.lender).await.unwrap();

    let mut ids: Vec<i64> = affected.iter().map(|e| e.item_instance_id()).collect();
    ids.sort_unstable();
    let mut expected = vec![lent_out, on_shelf, borrowed];
    expected.sort_unstable();
    assert_eq!(ids, expected);

    assert!(ledger.get_entry(lent_out).await.unwrap().is_none());
    assert!(ledger.get_entry(on_shelf).await.unwrap().is_none());
    let returned = ledger.get_entry(borrowed).await.unwrap().unwrap();
    assert!(!returned.is_loaned());
    assert_eq!(returned.offer.lender_user_id, seed.officer);
    assert!(ledger.get_entry(unrelated).await.unwrap().is_some());

    // Nothing left to purge
    assert!(ledger.purge_member(seed.clan_id, seed.lender).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_touch_and_reclaim() {
    let pool = pool().await;
    let seed = seed_clan(&pool).await;
    let ledger = PgArmoryLedger::new(pool.clone());
    let type_id = item_type(&pool).await;
    let id = item(&pool, type_id, seed.lender).await;

    let t0 = Utc::now() - Duration::hours(100);
    ledger.put_offer(offer(id, type_id, &seed, seed.lender), None).await.unwrap();
    ledger.create_loan(id, seed.borrower, seed.clan_id, t0).await.unwrap();

    assert_eq!(
        rejection(ledger.touch_loan(id, seed.lender, Utc::now()).await),
        ArmoryError::NotBorrower { user_id: seed.lender, item_instance_id: id }
    );

    // Not idle since before the cutoff: left alone
    let cutoff = t0 - Duration::hours(1);
    assert!(ledger.reclaim_if_expired(id, cutoff).await.unwrap().is_none());

    let touched_at = t0 + Duration::hours(10);
    let touched = ledger.touch_loan(id, seed.borrower, touched_at).await.unwrap();
    assert!(touched.is_loaned());

    // A sweep that read the old timestamp must not reclaim the refreshed loan
    assert!(ledger
        .reclaim_if_expired(id, t0 + Duration::hours(5))
        .await
        .unwrap()
        .is_none());

    let reclaimed = ledger
        .reclaim_if_expired(id, touched_at + Duration::hours(1))
        .await
        .unwrap()
        .expect("loan should be reclaimed");
    assert_eq!(reclaimed.loan().unwrap().borrower_user_id, seed.borrower);
    assert!(!ledger.get_entry(id).await.unwrap().unwrap().is_loaned());
}

#[tokio::test]
#[ignore]
async fn test_offer_limit_under_concurrency() {
    let pool = pool().await;
    let seed = seed_clan(&pool).await;
    let ledger = PgArmoryLedger::new(pool.clone());
    let type_id = item_type(&pool).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let id = item(&pool, type_id, seed.lender).await;
        let ledger = ledger.clone();
        let offer = offer(id, type_id, &seed, seed.lender);
        tasks.push(tokio::spawn(async move { ledger.put_offer(offer, Some(2)).await }));
    }

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(
                e,
                AppError::Armory(ArmoryError::OfferLimitReached { limit: 2, .. })
            )),
        }
    }
    assert_eq!(accepted, 2);
    assert_eq!(
        ledger.count_offers_by_lender(seed.clan_id, seed.lender).await.unwrap(),
        2
    );
}
