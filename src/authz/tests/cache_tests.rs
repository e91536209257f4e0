//! Cache coherence tests
//!
//! Every mutation must be visible to the very next check of every affected
//! principal, including checks racing the mutation on other threads.

mod common;

use common::{init_tracing, Post};
use gatehouse_authz::{
    AbilityKey, AuthzEngine, CacheConfig, EngineConfig, GrantStore, Holder, InMemoryGrantStore,
    Principal, RoleMatch, Target,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn cached_engine() -> AuthzEngine {
    init_tracing();
    AuthzEngine::new()
}

fn uncached_engine() -> AuthzEngine {
    init_tracing();
    AuthzEngine::with_config(EngineConfig {
        enable_cache: false,
        ..Default::default()
    })
}

#[test]
fn test_disallow_visible_after_cached_check() {
    let engine = cached_engine();
    let user = Principal::user(1);

    engine.allow(&user).to("x").unwrap();
    assert!(engine.can(&user, "x").unwrap());
    assert!(engine.can(&user, "x").unwrap());
    assert!(engine.cache_stats().unwrap().hits >= 1);

    engine.disallow(&user).to("x").unwrap();
    assert!(!engine.can(&user, "x").unwrap());
}

#[test]
fn test_role_grant_reaches_cached_members() {
    let engine = cached_engine();
    let alice = Principal::user("alice");
    let bob = Principal::user("bob");

    engine.assign("editor").to(&alice).unwrap();
    assert!(!engine.can(&alice, "publish").unwrap());
    assert!(!engine.can(&bob, "publish").unwrap());

    engine.allow("editor").to("publish").unwrap();

    assert!(engine.can(&alice, "publish").unwrap());
    assert!(!engine.can(&bob, "publish").unwrap());

    engine.disallow("editor").to("publish").unwrap();
    assert!(!engine.can(&alice, "publish").unwrap());
}

#[test]
fn test_role_mutation_keeps_non_members_cached() {
    let engine = cached_engine();
    let member = Principal::user("member");
    let outsider = Principal::user("outsider");

    engine.assign("staff").to(&member).unwrap();
    engine.allow(&outsider).to("read").unwrap();
    assert!(engine.can(&member, "read").is_ok());
    assert!(engine.can(&outsider, "read").unwrap());
    assert_eq!(engine.cache_stats().unwrap().entries, 2);

    engine.allow("staff").to("write").unwrap();

    assert_eq!(
        engine.cache_stats().unwrap().entries,
        1,
        "only the member's entry is dropped"
    );
    assert!(engine.can(&member, "write").unwrap());
}

#[test]
fn test_assignment_changes_are_visible() {
    let engine = cached_engine();
    let user = Principal::user(2);

    engine.allow("admin").to("ban-users").unwrap();
    assert!(!engine.is(&user, &["admin"], RoleMatch::Any).unwrap());

    engine.assign("admin").to(&user).unwrap();
    assert!(engine.is(&user, &["admin"], RoleMatch::Any).unwrap());
    assert!(engine.can(&user, "ban-users").unwrap());

    engine.retract("admin").from(&user).unwrap();
    assert!(!engine.can(&user, "ban-users").unwrap());
    assert!(engine.is(&user, &["admin"], RoleMatch::None).unwrap());
}

#[test]
fn test_define_role_refreshes_member_titles() {
    let engine = cached_engine();
    let user = Principal::user(3);

    engine.assign("ops").to(&user).unwrap();
    assert_eq!(engine.roles_of(&user).unwrap()[0].title, None);

    engine.define_role("ops", Some("Operations")).unwrap();
    assert_eq!(
        engine.roles_of(&user).unwrap()[0].title.as_deref(),
        Some("Operations")
    );
}

#[test]
fn test_cached_and_uncached_engines_agree() {
    let engines = [cached_engine(), uncached_engine()];
    let user = Principal::user(4);
    let post = Post { id: 9 };

    for engine in &engines {
        engine.allow("editor").to_on("edit", Target::of::<Post>()).unwrap();
        engine.assign("editor").to(&user).unwrap();
        engine.allow(&user).to_on("delete", &post).unwrap();
    }

    let answers: Vec<Vec<bool>> = engines
        .iter()
        .map(|engine| {
            let mut answers = Vec::new();
            for _ in 0..2 {
                answers.push(engine.can_on(&user, "edit", &Post { id: 1 }).unwrap());
                answers.push(engine.can_on(&user, "delete", &post).unwrap());
                answers.push(engine.can_on(&user, "delete", &Post { id: 10 }).unwrap());
                answers.push(engine.can(&user, "edit").unwrap());
            }
            answers
        })
        .collect();

    assert_eq!(answers[0], answers[1]);
    assert_eq!(answers[0], vec![true, true, false, false, true, true, false, false]);
    assert!(engines[1].cache_stats().is_none());
}

#[test]
fn test_refresh_drops_entries() {
    let engine = cached_engine();
    let alice = Principal::user("alice");
    let bob = Principal::user("bob");

    engine.can(&alice, "x").unwrap();
    engine.can(&bob, "x").unwrap();
    assert_eq!(engine.cache_stats().unwrap().entries, 2);

    engine.refresh_for(&alice);
    assert_eq!(engine.cache_stats().unwrap().entries, 1);

    engine.refresh();
    assert_eq!(engine.cache_stats().unwrap().entries, 0);
}

#[test]
fn test_ttl_bounds_staleness_of_external_writes() {
    init_tracing();
    let store = Arc::new(InMemoryGrantStore::new());
    let engine = AuthzEngine::with_store(
        EngineConfig {
            enable_cache: true,
            cache_config: CacheConfig {
                ttl: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        },
        store.clone(),
    );
    let user = Principal::user(5);

    assert!(!engine.can(&user, "x").unwrap());

    // Another writer sharing the store bypasses the engine entirely
    let ability = store
        .find_or_create_ability(&AbilityKey::unscoped("x").unwrap())
        .unwrap();
    store.grant(&Holder::principal(user.clone()), ability.id).unwrap();

    assert!(!engine.can(&user, "x").unwrap(), "served from cache");

    std::thread::sleep(Duration::from_millis(120));
    assert!(engine.can(&user, "x").unwrap());
    assert!(engine.cache_stats().unwrap().expirations >= 1);
}

#[test]
fn test_small_capacity_stays_correct() {
    init_tracing();
    let engine = AuthzEngine::with_config(EngineConfig {
        enable_cache: true,
        cache_config: CacheConfig {
            capacity: 4,
            ttl: None,
        },
    });

    let users: Vec<Principal> = (0..20).map(Principal::user).collect();
    for (i, user) in users.iter().enumerate() {
        if i % 2 == 0 {
            engine.allow(user).to("even").unwrap();
        }
    }

    for _ in 0..3 {
        for (i, user) in users.iter().enumerate() {
            assert_eq!(engine.can(user, "even").unwrap(), i % 2 == 0);
        }
    }
    assert!(engine.cache_stats().unwrap().entries <= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_see_completed_revocation() {
    init_tracing();
    let engine = Arc::new(AuthzEngine::new());
    let user = Principal::user(6);
    engine.allow(&user).to("x").unwrap();

    let revoked = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();

    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let revoked = Arc::clone(&revoked);
        let user = user.clone();

        readers.push(tokio::task::spawn_blocking(move || {
            for _ in 0..2_000 {
                // Observe completion before checking: after the writer has
                // returned, no reader may still be told "yes".
                let done = revoked.load(Ordering::SeqCst);
                let allowed = engine.can(&user, "x").unwrap();
                if done {
                    assert!(!allowed, "stale grant observed after revocation");
                }
            }
        }));
    }

    let writer = {
        let engine = Arc::clone(&engine);
        let revoked = Arc::clone(&revoked);
        let user = user.clone();
        tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(2));
            engine.disallow(&user).to("x").unwrap();
            revoked.store(true, Ordering::SeqCst);
        })
    };

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert!(!engine.can(&user, "x").unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_role_churn_converges() {
    init_tracing();
    let engine = Arc::new(AuthzEngine::new());
    engine.allow("member").to("enter").unwrap();

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::task::spawn_blocking(move || {
            let user = Principal::user(i);
            for round in 0..50 {
                engine.assign("member").to(&user).unwrap();
                assert!(engine.can(&user, "enter").unwrap());
                if round % 2 == 0 {
                    engine.retract("member").from(&user).unwrap();
                    assert!(!engine.can(&user, "enter").unwrap());
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // Round 49 is odd, so every user ends assigned
    assert_eq!(engine.principals_with_role("member").unwrap().len(), 8);
    for i in 0..8u64 {
        assert!(engine.can(&Principal::user(i), "enter").unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_never_see_a_mixed_state() {
    init_tracing();
    let engine = Arc::new(uncached_engine());
    let user = Principal::user(7);

    engine.allow("admin").to("x").unwrap();
    engine.allow(&user).to("x").unwrap();

    let done = Arc::new(AtomicBool::new(false));

    // Shuttle x between a direct grant and the admin role; every state
    // in between still allows it.
    let writer = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        let user = user.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..500 {
                engine.assign("admin").to(&user).unwrap();
                engine.disallow(&user).to("x").unwrap();
                engine.allow(&user).to("x").unwrap();
                engine.retract("admin").from(&user).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut readers = Vec::new();
    for _ in 0..3 {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        let user = user.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            while !done.load(Ordering::SeqCst) {
                assert!(engine.can(&user, "x").unwrap(), "mixed state observed");
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}
