use anyhow::Result as AnyResult;
use linger_router::{
    Callback, EventOptions, Linger, ListenerOptions, NodeId, Participant, Router, RouterConfig,
    RouterError, Tree, chain_results,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn no_linger() -> EventOptions {
    EventOptions::builder().linger(Linger::Off).build()
}

fn ranged(range: &str) -> EventOptions {
    EventOptions::builder()
        .linger(Linger::Off)
        .range(range)
        .build()
}

fn tagging(log: Log, tag: &'static str) -> Callback {
    Callback::from_fn(move |payload, _ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(tag.to_string());
            anyhow::Ok(payload)
        }
    })
}

fn sorted(log: &Log) -> Vec<String> {
    let mut entries = log.lock().unwrap().clone();
    entries.sort();
    entries
}

/// root(1) ─ parent(2) ─┬─ me(3) ─ child(4)
///                      └─ sibling(5)
async fn family(router: &Router, log: &Log) -> AnyResult<()> {
    for (tag, node) in [("root", 1), ("parent", 2), ("me", 3), ("child", 4), ("sibling", 5)] {
        router
            .subscribe(
                "ping",
                tagging(log.clone(), tag),
                ListenerOptions::default(),
                &Participant::new(tag).at(NodeId(node)),
            )
            .await?;
    }
    Ok(())
}

fn tree_router() -> Router {
    let tree = Arc::new(Tree::new());
    tree.attach(NodeId(2), NodeId(1));
    tree.attach(NodeId(3), NodeId(2));
    tree.attach(NodeId(4), NodeId(3));
    tree.attach(NodeId(5), NodeId(2));
    Router::with_hierarchy(RouterConfig::default(), tree)
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_every_level() -> AnyResult<()> {
    let router = tree_router();
    let log = Log::default();
    family(&router, &log).await?;
    let me = Participant::new("me").at(NodeId(3));

    router
        .publish("ping", json!(1), ranged("broadcast"), &me)
        .await?
        .await?;
    assert_eq!(sorted(&log), vec!["child", "me", "parent", "root", "sibling"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parent_range_stops_at_the_nearest_parent() -> AnyResult<()> {
    let router = tree_router();
    let log = Log::default();
    family(&router, &log).await?;
    let me = Participant::new("me").at(NodeId(3));

    let handle = router.publish("ping", json!(1), ranged("parent"), &me).await?;
    handle.await?;
    assert_eq!(sorted(&log), vec!["parent"]);

    log.lock().unwrap().clear();
    router
        .publish("ping", json!(2), ranged("children"), &me)
        .await?
        .await?;
    assert_eq!(sorted(&log), vec!["child"]);

    log.lock().unwrap().clear();
    router
        .publish("ping", json!(3), ranged("self"), &me)
        .await?
        .await?;
    assert_eq!(sorted(&log), vec!["me"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn default_range_short_circuits_and_skips_lingering() -> AnyResult<()> {
    let router = tree_router();
    let log = Log::default();
    family(&router, &log).await?;
    let me = Participant::new("me").at(NodeId(3));

    let handle = router
        .publish("ping", json!("hi"), EventOptions::default(), &me)
        .await?;
    assert!(!router.has_lingering_event("ping"));
    assert_eq!(handle.await, Ok(json!("hi")));
    assert_eq!(sorted(&log), vec!["parent"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_range_tokens_abort_before_dispatch() -> AnyResult<()> {
    let router = tree_router();
    let log = Log::default();
    family(&router, &log).await?;

    let err = router
        .publish(
            "ping",
            json!(1),
            ranged("first-cousin"),
            &Participant::new("me").at(NodeId(3)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::UnknownRangeToken { .. }));
    assert!(log.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_here_halts_the_sweep() -> AnyResult<()> {
    let router = Router::default();
    let log = Log::default();
    router
        .subscribe(
            "x",
            tagging(log.clone(), "first"),
            ListenerOptions::builder().stop_here(true).build(),
            &Participant::new("a"),
        )
        .await?;
    router
        .subscribe(
            "x",
            tagging(log.clone(), "second"),
            ListenerOptions::default(),
            &Participant::new("b"),
        )
        .await?;

    let handle = router
        .publish("x", json!(1), EventOptions::default(), &Participant::anonymous())
        .await?;
    assert!(!router.has_lingering_event("x"));
    handle.await?;
    assert_eq!(sorted(&log), vec!["first"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn chained_dispatch_passes_outputs_along() -> AnyResult<()> {
    let router = Router::default();
    for step in ["one", "two"] {
        router
            .subscribe(
                "x",
                Callback::from_fn(move |payload: Value, ctx| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    assert_eq!(ctx.event_name, "x");
                    anyhow::Ok(chain_results(payload, json!(step)))
                }),
                ListenerOptions::default(),
                &Participant::anonymous(),
            )
            .await?;
    }

    let handle = router
        .publish(
            "x",
            json!("start"),
            EventOptions::builder().chain(true).linger(Linger::Off).build(),
            &Participant::anonymous(),
        )
        .await?;
    assert_eq!(
        handle.await,
        Ok(json!({ "$results$": ["start", "one", "two"] }))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn debounced_listener_collapses_bursts() -> AnyResult<()> {
    let router = Router::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let callback = {
        let calls = calls.clone();
        Callback::from_fn(move |payload, _ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(payload)
            }
        })
    };
    router
        .subscribe(
            "typing",
            callback,
            ListenerOptions::builder().debounce(ms(50)).build(),
            &Participant::anonymous(),
        )
        .await?;

    let mut handles = Vec::new();
    for key in ["a", "ab", "abc"] {
        handles.push(
            router
                .publish("typing", json!(key), no_linger(), &Participant::anonymous())
                .await?,
        );
        tokio::time::sleep(ms(10)).await;
    }
    for handle in handles {
        assert_eq!(handle.await, Ok(json!("abc")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn serial_listener_runs_one_invocation_at_a_time() -> AnyResult<()> {
    let router = Router::default();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let callback = {
        let running = running.clone();
        let peak = peak.clone();
        Callback::from_fn(move |payload, _ctx| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(payload)
            }
        })
    };
    router
        .subscribe(
            "job",
            callback,
            ListenerOptions::builder().serial(true).build(),
            &Participant::anonymous(),
        )
        .await?;

    let mut handles = Vec::new();
    for n in 0..3 {
        handles.push(
            router
                .publish("job", json!(n), no_linger(), &Participant::anonymous())
                .await?,
        );
    }
    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await, Ok(json!(n)));
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn callbacks_can_publish_through_their_context() -> AnyResult<()> {
    let router = Router::default();
    let log = Log::default();
    router
        .subscribe(
            "pong",
            tagging(log.clone(), "pong"),
            ListenerOptions::default(),
            &Participant::anonymous(),
        )
        .await?;
    router
        .subscribe(
            "ping",
            Callback::from_fn(|payload, ctx| async move {
                let reply = ctx
                    .router()
                    .publish("pong", payload, EventOptions::default(), &Participant::anonymous())
                    .await?;
                anyhow::Ok(reply.await?)
            }),
            ListenerOptions::default(),
            &Participant::anonymous(),
        )
        .await?;

    let handle = router
        .publish("ping", json!("ball"), no_linger(), &Participant::anonymous())
        .await?;
    assert_eq!(handle.await, Ok(json!("ball")));
    assert_eq!(sorted(&log), vec!["pong"]);
    Ok(())
}
