#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use fanin::{
    OrchestrationError, Orchestrator,
    config::{OrchestratorConfig, RegistryConfig},
    executor::Executor,
    pool::{PoolRegistry, WorkerPool},
    task::{FetchKind, JoinKind, Stage, StageObserver},
    types::{BoxError, PoolId, UserContext},
};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

const PLACEMENTS: [(i64, bool); 6] = [
    (0, false),
    (0, true),
    (1, false),
    (1, true),
    (5, false),
    (5, true),
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry() -> Arc<PoolRegistry> {
    init_tracing();
    Arc::new(
        PoolRegistry::new(RegistryConfig {
            default_pool_threads: Some(4),
            max_io_pool_size: 16,
            ..RegistryConfig::default()
        })
        .unwrap(),
    )
}

fn ctx(id: u8) -> UserContext {
    UserContext::new(id).unwrap()
}

fn fetch_stub(kind: FetchKind) -> Result<String, BoxError> {
    Ok(format!("<{kind}>"))
}

fn combine_stub(
    kind: JoinKind,
    ctx: UserContext,
    left: String,
    right: String,
) -> Result<String, BoxError> {
    Ok(format!("[{kind} user={ctx} {left}{right}]"))
}

fn expected(ctx: UserContext) -> String {
    Executor::new(fetch_stub, combine_stub)
        .run_sequential(ctx)
        .unwrap()
}

#[test]
fn sequential_reference_concatenates_joins_in_order() {
    assert_eq!(
        expected(ctx(4)),
        "[posts+comments user=4 <posts><comments>][albums+photos user=4 <albums><photos>]"
    );
}

#[test]
fn every_placement_matches_sequential_reference() {
    let orchestrator =
        Orchestrator::new(registry(), fetch_stub, combine_stub).with_user_context(ctx(7));
    for (io_pool_size, fixed) in PLACEMENTS {
        assert_eq!(
            orchestrator.get_response(io_pool_size, fixed).unwrap(),
            expected(ctx(7)),
            "placement ({io_pool_size}, {fixed})"
        );
    }
}

#[test]
fn repeated_invocations_are_identical() {
    let orchestrator =
        Orchestrator::new(registry(), fetch_stub, combine_stub).with_user_context(ctx(2));
    let first = orchestrator.get_response(3, true).unwrap();
    for _ in 0..20 {
        assert_eq!(orchestrator.get_response(3, true).unwrap(), first);
    }
}

#[test]
fn random_user_context_is_shared_by_both_joins() {
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub);
    for _ in 0..20 {
        let response = orchestrator.respond(2, false).unwrap();
        assert!((1..=10).contains(&response.user_context.get()));
        assert_eq!(response.body, expected(response.user_context));
    }
}

#[test]
fn failed_fetch_is_reported_with_its_kind() {
    let registry = registry();
    for failing in FetchKind::ALL {
        let fetch = move |kind: FetchKind| -> Result<String, BoxError> {
            if kind == failing {
                Err(format!("{kind} unavailable").into())
            } else {
                thread::sleep(Duration::from_millis(5));
                Ok(kind.to_string())
            }
        };
        let orchestrator = Orchestrator::new(Arc::clone(&registry), fetch, combine_stub)
            .with_user_context(ctx(1));
        for (io_pool_size, fixed) in PLACEMENTS {
            let err = orchestrator.get_response(io_pool_size, fixed).unwrap_err();
            match &err {
                OrchestrationError::Fetch { kind, source } => {
                    assert_eq!(*kind, failing);
                    assert_eq!(source.to_string(), format!("{failing} unavailable"));
                }
                other => panic!("expected fetch failure, got {other}"),
            }
            assert_eq!(err.stage(), Some(Stage::Fetch(failing)));
        }
    }
}

#[test]
fn failed_fetch_stops_downstream_joins() {
    let combines = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&combines);
    let combine = move |kind: JoinKind, ctx: UserContext, left: String, right: String| {
        counted.fetch_add(1, Ordering::SeqCst);
        combine_stub(kind, ctx, left, right)
    };
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        match kind {
            FetchKind::Posts => Err("down".into()),
            // Comments finishes after posts failed.
            FetchKind::Comments => {
                thread::sleep(Duration::from_millis(30));
                Ok(kind.to_string())
            }
            _ => Ok(kind.to_string()),
        }
    };
    let orchestrator = Orchestrator::new(registry(), fetch, combine).with_user_context(ctx(1));
    assert!(matches!(
        orchestrator.get_response(4, false),
        Err(OrchestrationError::Fetch {
            kind: FetchKind::Posts,
            ..
        })
    ));
    thread::sleep(Duration::from_millis(60));
    // Only albums+photos may have run; posts+comments lost a predecessor.
    assert!(combines.load(Ordering::SeqCst) <= 1);
}

#[test]
fn failed_combine_is_reported_with_its_stage() {
    let combine = |kind: JoinKind,
                   ctx: UserContext,
                   left: String,
                   right: String|
     -> Result<String, BoxError> {
        if kind == JoinKind::AlbumsAndPhotos {
            Err("no albums for user".into())
        } else {
            combine_stub(kind, ctx, left, right)
        }
    };
    let orchestrator =
        Orchestrator::new(registry(), fetch_stub, combine).with_user_context(ctx(9));
    for (io_pool_size, fixed) in PLACEMENTS {
        let err = orchestrator.get_response(io_pool_size, fixed).unwrap_err();
        assert!(
            matches!(
                err,
                OrchestrationError::Combine {
                    stage: Stage::Join(JoinKind::AlbumsAndPhotos),
                    ..
                }
            ),
            "got {err}"
        );
    }
}

#[test]
fn panicking_collaborators_fail_instead_of_hanging() {
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        if kind == FetchKind::Photos {
            panic!("photos service exploded");
        }
        Ok(kind.to_string())
    };
    let orchestrator = Orchestrator::new(registry(), fetch, combine_stub).with_user_context(ctx(5));
    for (io_pool_size, fixed) in PLACEMENTS {
        match orchestrator.get_response(io_pool_size, fixed) {
            Err(OrchestrationError::Fetch {
                kind: FetchKind::Photos,
                source,
            }) => assert!(source.to_string().contains("photos service exploded")),
            other => panic!("expected photos failure, got {other:?}"),
        }
    }
}

/// Runs one invocation and returns the pool each stage executed on.
fn stage_pools(io_pool_size: i64, fixed: bool) -> HashMap<Stage, PoolId> {
    let seen = Arc::new(Mutex::new(HashMap::new()));
    let recorder = Arc::clone(&seen);
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub)
        .with_user_context(ctx(3))
        .with_observer(move |stage: Stage, pool: PoolId| {
            assert!(recorder.lock().unwrap().insert(stage, pool).is_none());
        });
    orchestrator.get_response(io_pool_size, fixed).unwrap();
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 7, "every stage runs exactly once: {seen:?}");
    seen
}

#[test]
fn zero_io_pool_size_runs_everything_on_default_pool() {
    for fixed in [false, true] {
        let pools = stage_pools(0, fixed);
        assert!(pools.values().all(|pool| *pool == PoolId::Default), "{pools:?}");
    }
}

#[test]
fn dedicated_workers_run_joins_off_the_io_pool() {
    let pools = stage_pools(5, true);
    let io = pools[&Stage::Fetch(FetchKind::Posts)];
    assert!(matches!(io, PoolId::Bounded(_)));
    for kind in FetchKind::ALL {
        assert_eq!(pools[&Stage::Fetch(kind)], io);
    }
    let first = pools[&Stage::Join(JoinKind::PostsAndComments)];
    let second = pools[&Stage::Join(JoinKind::AlbumsAndPhotos)];
    assert_eq!(first, PoolId::Worker(WorkerPool::Worker1));
    assert_eq!(second, PoolId::Worker(WorkerPool::Worker2));
    assert_ne!(first, second);
    assert_eq!(pools[&Stage::Final], first);
}

#[test]
fn shared_io_pool_runs_every_stage() {
    let pools = stage_pools(5, false);
    let io = pools[&Stage::Final];
    assert!(matches!(io, PoolId::Bounded(_)));
    assert!(pools.values().all(|pool| *pool == io), "{pools:?}");
}

#[test]
fn each_invocation_gets_a_fresh_bounded_pool() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub)
        .with_observer(move |stage: Stage, pool: PoolId| {
            if stage == Stage::Final {
                recorder.lock().unwrap().push(pool);
            }
        });
    orchestrator.get_response(2, false).unwrap();
    orchestrator.get_response(2, false).unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
}

#[test]
fn invalid_sizes_fail_before_any_fetch() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&fetches);
    let fetch = move |kind: FetchKind| {
        counted.fetch_add(1, Ordering::SeqCst);
        fetch_stub(kind)
    };
    let orchestrator = Orchestrator::new(registry(), fetch, combine_stub);
    for (io_pool_size, fixed) in [(-1, false), (-5, true), (17, false), (1_000, true)] {
        assert!(matches!(
            orchestrator.get_response(io_pool_size, fixed),
            Err(OrchestrationError::InvalidConfig(_))
        ));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn timeout_unblocks_the_caller() {
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        if kind == FetchKind::Albums {
            thread::sleep(Duration::from_millis(300));
        }
        Ok(kind.to_string())
    };
    let orchestrator = Orchestrator::new(registry(), fetch, combine_stub)
        .with_user_context(ctx(1))
        .with_timeout(Duration::from_millis(20));
    for (io_pool_size, fixed) in [(0, false), (2, true), (2, false)] {
        assert!(matches!(
            orchestrator.get_response(io_pool_size, fixed),
            Err(OrchestrationError::Timeout(_))
        ));
    }
}

#[test]
fn configured_response_uses_stored_placement() {
    let config = OrchestratorConfig {
        io_pool_size: 3,
        fixed_worker_thread_for_non_io_tasks: true,
        timeout: Some(Duration::from_secs(10)),
    };
    let orchestrator = Orchestrator::from_config(config, registry(), fetch_stub, combine_stub)
        .with_user_context(ctx(8));
    assert_eq!(orchestrator.get_configured_response().unwrap(), expected(ctx(8)));
}

#[test]
fn concurrent_invocations_do_not_mix_results() {
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        let millis = rand::thread_rng().gen_range(0..5);
        thread::sleep(Duration::from_millis(millis));
        fetch_stub(kind)
    };
    let orchestrator = Orchestrator::new(registry(), fetch, combine_stub);
    thread::scope(|scope| {
        let calls: Vec<_> = (0..100)
            .map(|i| {
                let orchestrator = &orchestrator;
                let (io_pool_size, fixed) = [(0, false), (2, true), (2, false)][i % 3];
                scope.spawn(move || orchestrator.respond(io_pool_size, fixed))
            })
            .collect();
        for call in calls {
            let response = call.join().unwrap().unwrap();
            assert_eq!(response.body, expected(response.user_context));
        }
    });
}

#[test]
fn pending_cap_leaves_shared_workers_open_to_concurrent_calls() {
    init_tracing();
    let registry = Arc::new(
        PoolRegistry::new(RegistryConfig {
            default_pool_threads: Some(4),
            max_io_pool_size: 16,
            max_pending_jobs: Some(4),
            ..RegistryConfig::default()
        })
        .unwrap(),
    );
    let combine = |kind: JoinKind, ctx: UserContext, left: String, right: String| {
        thread::sleep(Duration::from_millis(20));
        combine_stub(kind, ctx, left, right)
    };
    let orchestrator = Orchestrator::new(registry, fetch_stub, combine).with_user_context(ctx(6));
    thread::scope(|scope| {
        let calls: Vec<_> = (0..20)
            .map(|_| {
                let orchestrator = &orchestrator;
                scope.spawn(move || orchestrator.get_response(4, true))
            })
            .collect();
        for call in calls {
            assert_eq!(call.join().unwrap().unwrap(), expected(ctx(6)));
        }
    });
}

#[test]
fn unbounded_timeout_waits_for_the_graph() {
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub)
        .with_user_context(ctx(2))
        .with_timeout(Duration::MAX);
    for (io_pool_size, fixed) in PLACEMENTS {
        assert_eq!(
            orchestrator.get_response(io_pool_size, fixed).unwrap(),
            expected(ctx(2))
        );
    }
}

#[test]
fn panicking_observer_fails_the_observed_stage() {
    let observer = |stage: Stage, _pool: PoolId| {
        if stage == Stage::Join(JoinKind::PostsAndComments) {
            panic!("observer exploded");
        }
    };
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub)
        .with_user_context(ctx(4))
        .with_observer(observer);
    for (io_pool_size, fixed) in PLACEMENTS {
        match orchestrator.get_response(io_pool_size, fixed) {
            Err(OrchestrationError::Combine {
                stage: Stage::Join(JoinKind::PostsAndComments),
                source,
            }) => assert!(source.to_string().contains("observer exploded")),
            other => panic!("expected posts+comments failure, got {other:?}"),
        }
    }

    let observer = |stage: Stage, _pool: PoolId| {
        if stage == Stage::Fetch(FetchKind::Albums) {
            panic!("observer exploded");
        }
    };
    let orchestrator = Orchestrator::new(registry(), fetch_stub, combine_stub)
        .with_user_context(ctx(4))
        .with_observer(observer);
    assert!(matches!(
        orchestrator.get_response(2, true),
        Err(OrchestrationError::Fetch {
            kind: FetchKind::Albums,
            ..
        })
    ));
    // The workers survived and still serve invocations.
    assert_eq!(
        Orchestrator::new(Arc::clone(orchestrator.registry()), fetch_stub, combine_stub)
            .with_user_context(ctx(4))
            .get_response(2, true)
            .unwrap(),
        expected(ctx(4))
    );
}

/// Observer recording the most bounded pools open while a fetch ran on one.
fn open_pool_recorder(registry: &Arc<PoolRegistry>) -> (impl StageObserver, Arc<AtomicUsize>) {
    let open_while_running = Arc::new(AtomicUsize::new(0));
    let recorder = Arc::clone(&open_while_running);
    let gauge = Arc::clone(registry);
    let observer = move |stage: Stage, pool: PoolId| {
        if matches!((stage, pool), (Stage::Fetch(_), PoolId::Bounded(_))) {
            recorder.fetch_max(gauge.open_bounded_pools(), Ordering::SeqCst);
        }
    };
    (observer, open_while_running)
}

#[test]
fn per_invocation_pool_is_released_after_failure() {
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        match kind {
            FetchKind::Photos => Err("photos down".into()),
            _ => Ok(kind.to_string()),
        }
    };
    let registry = registry();
    let (observer, open_while_running) = open_pool_recorder(&registry);
    let orchestrator = Orchestrator::new(Arc::clone(&registry), fetch, combine_stub)
        .with_user_context(ctx(1))
        .with_observer(observer);
    for fixed in [false, true] {
        assert!(matches!(
            orchestrator.get_response(3, fixed),
            Err(OrchestrationError::Fetch {
                kind: FetchKind::Photos,
                ..
            })
        ));
        assert_eq!(registry.open_bounded_pools(), 0);
    }
    assert_eq!(open_while_running.load(Ordering::SeqCst), 1);
}

#[test]
fn per_invocation_pool_is_released_after_timeout() {
    let fetch = |kind: FetchKind| -> Result<String, BoxError> {
        thread::sleep(Duration::from_millis(200));
        Ok(kind.to_string())
    };
    let registry = registry();
    let (observer, open_while_running) = open_pool_recorder(&registry);
    let orchestrator = Orchestrator::new(Arc::clone(&registry), fetch, combine_stub)
        .with_user_context(ctx(1))
        .with_observer(observer)
        .with_timeout(Duration::from_millis(50));
    assert!(matches!(
        orchestrator.get_response(2, true),
        Err(OrchestrationError::Timeout(_))
    ));
    assert_eq!(registry.open_bounded_pools(), 0);
    assert_eq!(open_while_running.load(Ordering::SeqCst), 1);
}
