use anyhow::Result;
use linger_router::{
    Callback, EventOptions, Linger, ListenerOptions, NodeId, Participant, Router, RouterConfig,
    Tree,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// 组件树：
// app(1) ─┬─ toolbar(2) ─ button(3)
//         └─ panel(4)
const APP: NodeId = NodeId(1);
const TOOLBAR: NodeId = NodeId(2);
const BUTTON: NodeId = NodeId(3);
const PANEL: NodeId = NodeId(4);

fn announce(name: &'static str) -> Callback {
    Callback::from_fn(move |payload: Value, ctx| async move {
        println!(
            "{name:>8} <- {} {payload} (catchup={})",
            ctx.event_name, ctx.catchup
        );
        Ok(json!({ "handled_by": name, "payload": payload }))
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("linger_router=info".parse()?))
        .init();

    let tree = Arc::new(Tree::new());
    tree.attach(TOOLBAR, APP);
    tree.attach(BUTTON, TOOLBAR);
    tree.attach(PANEL, APP);
    let router = Router::with_hierarchy(RouterConfig::default(), tree);

    let app = Participant::new("app").at(APP);
    let toolbar = Participant::new("toolbar").at(TOOLBAR);
    let button = Participant::new("button").at(BUTTON);
    let panel = Participant::new("panel").at(PANEL);

    for (who, name) in [(&app, "app"), (&toolbar, "toolbar")] {
        router
            .subscribe("clicked", announce(name), ListenerOptions::default(), who)
            .await?;
    }

    // 默认范围：最近的父级，命中即停
    let outcome = router
        .publish("clicked", json!("save"), EventOptions::default(), &button)
        .await?
        .await?;
    println!("clicked (nearest parent) -> {outcome}");

    // 广播到所有层级
    let outcome = router
        .publish(
            "clicked",
            json!("save-all"),
            EventOptions::builder().range("ancestors").linger(Linger::Off).build(),
            &button,
        )
        .await?
        .await?;
    println!("clicked (ancestors) -> {outcome}");

    // 滞留：面板稍后挂载仍能收到配置
    let config = router
        .publish(
            "config.loaded",
            json!({ "theme": "dark" }),
            EventOptions::builder()
                .linger(Duration::from_millis(300))
                .build(),
            &app,
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let late = router
        .subscribe_once(
            "config.loaded",
            Some(announce("panel")),
            ListenerOptions::builder().catchup(true).build(),
            &panel,
        )
        .await?;
    println!("panel caught up -> {}", late.await?);
    println!("config.loaded settled -> {}", config.await?);

    // 诱饵：只交给第一个后来者
    let bait = router
        .publish(
            "dialog.result",
            json!("confirmed"),
            EventOptions::builder().bait(true).build(),
            &panel,
        )
        .await?;
    println!(
        "bait lingering: {}",
        router.has_lingering_event("dialog.result")
    );
    router
        .subscribe_once(
            "dialog.result",
            Some(announce("toolbar")),
            ListenerOptions::builder().catchup(true).build(),
            &toolbar,
        )
        .await?;
    println!(
        "bait lingering after consumption: {}",
        router.has_lingering_event("dialog.result")
    );
    println!("dialog.result settled -> {}", bait.await?);

    let removed = router.unsubscribe_all(&app.id);
    println!(
        "app unsubscribed {removed} listener(s); clicked still has listeners: {}",
        router.has_listener("clicked")
    );
    Ok(())
}
