use grid_actor::{
    spawn_context, Actor, ActorError, Dispatcher, Message, MessageKind, Payload, Port, Registry, Role, READY_CHECK,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn echo_registry() -> Registry {
    Registry::builder()
        .route(READY_CHECK, |_| async { Ok(Payload::empty()) })
        .route("echo", |p| async move { Ok(p) })
        .route("sleep", |p: Payload| async move {
            let ms: u64 = p.decode()?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ActorError>(Payload::new(json!(ms)))
        })
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ten_thousand_calls_unique_ids_single_callbacks() {
    const N: usize = 10_000;
    let dispatcher = Dispatcher::new("echo-ctx", echo_registry).unwrap();
    dispatcher.ready().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ids = HashSet::with_capacity(N);

    for i in 0..N {
        let fired = fired.clone();
        let tx = tx.clone();
        let handle = dispatcher.actor().call("echo", Payload::new(json!(i)), move |r| {
            fired.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send((i, r));
        });
        ids.insert(handle.id().clone());
    }
    assert_eq!(ids.len(), N);

    let mut seen = vec![false; N];
    for _ in 0..N {
        let (i, r) = rx.recv().await.unwrap();
        assert_eq!(r.unwrap().decode::<usize>().unwrap(), i);
        assert!(!seen[i], "callback {i} fired twice");
        seen[i] = true;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fired.load(Ordering::SeqCst), N);
    assert_eq!(dispatcher.actor().in_flight(), 0);
}

#[tokio::test]
async fn canceled_call_never_calls_back() {
    let dispatcher = Dispatcher::new("cancel-ctx", echo_registry).unwrap();
    dispatcher.ready().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    // Started on the worker before the cancel lands; its response still arrives.
    let handle = dispatcher.actor().call("sleep", Payload::new(json!(30)), move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(handle.cancel());

    // A later call on the same channel proves the earlier response came and went.
    let after = dispatcher.actor().request("sleep", Payload::new(json!(1))).await;
    assert_eq!(after.unwrap().decode::<u64>().unwrap(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn canceled_queued_task_never_runs() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_ctx = ran.clone();
    let dispatcher = Dispatcher::new("queue-ctx", move || {
        Registry::builder()
            .route("sleep", |p: Payload| async move {
                let ms: u64 = p.decode()?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, ActorError>(Payload::empty())
            })
            .route("count", move |_| {
                let ran = ran_in_ctx.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(Payload::empty())
                }
            })
            .build()
    })
    .unwrap();

    let actor = dispatcher.actor();
    let blocker = actor.request("sleep", Payload::new(json!(50)));
    let queued = actor.request("count", Payload::empty());
    assert!(queued.cancel());
    blocker.await.unwrap();
    assert_eq!(queued.await, Err(ActorError::Canceled));

    actor.request("count", Payload::empty()).await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn responses_resolve_by_id_not_arrival_order() {
    let (ours, mut peer) = Port::pair();
    let actor = Actor::spawn("coordinator", ours, Registry::empty(), Role::Coordinator);

    let order = Arc::new(Mutex::new(Vec::new()));
    let (o1, o2) = (order.clone(), order.clone());
    actor.call("op", Payload::new(json!("A")), move |r| o1.lock().push(r.unwrap().decode::<String>().unwrap()));
    actor.call("op", Payload::new(json!("B")), move |r| o2.lock().push(r.unwrap().decode::<String>().unwrap()));

    let a = peer.rx.recv().await.unwrap();
    let b = peer.rx.recv().await.unwrap();
    assert_eq!(a.kind, MessageKind::Request("op".into()));
    assert!(a.has_callback && b.has_callback);
    assert_ne!(a.id, b.id);

    peer.tx.send(Message::response(b.id.clone(), Ok(b.payload.clone()))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*order.lock(), vec!["B".to_string()]);

    peer.tx.send(Message::response(a.id.clone(), Ok(a.payload.clone()))).unwrap();
    // Duplicate response for an already-resolved id is dropped.
    peer.tx.send(Message::response(a.id, Ok(Payload::new(json!("A2"))))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*order.lock(), vec!["B".to_string(), "A".to_string()]);
    assert_eq!(actor.in_flight(), 0);
}

#[tokio::test]
async fn cancel_sends_cancel_envelope() {
    let (ours, mut peer) = Port::pair();
    let actor = Actor::spawn("coordinator", ours, Registry::empty(), Role::Coordinator);
    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    let handle = actor.call("op", Payload::empty(), move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    let req = peer.rx.recv().await.unwrap();
    assert!(handle.cancel());
    assert!(!handle.is_pending());
    let cancel = peer.rx.recv().await.unwrap();
    assert_eq!(cancel.kind, MessageKind::Cancel);
    assert_eq!(cancel.id, req.id);

    peer.tx.send(Message::response(req.id, Ok(Payload::empty()))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_operation_reports_handler_not_found() {
    let dispatcher = Dispatcher::new("empty-ctx", echo_registry).unwrap();
    let err = dispatcher
        .actor()
        .request("doesNotExist", Payload::empty())
        .await
        .unwrap_err();
    assert_eq!(err, ActorError::HandlerNotFound("doesNotExist".into()));
    assert_eq!(err.to_string(), "Could not find function doesNotExist");

    // The context survives and keeps serving.
    dispatcher.ready().await.unwrap();
}

#[tokio::test]
async fn coordinator_handlers_run_without_queue() {
    let (ours, mut peer) = Port::pair();
    let registry = Registry::builder().route("ping", |_| async { Ok(Payload::new(json!("pong"))) }).build();
    let _actor = Actor::spawn("coordinator", ours, registry, Role::Coordinator);

    let mut req = Message::request("req0000001".into(), "ping", Payload::empty());
    req.has_callback = true;
    peer.tx.send(req).unwrap();
    let reply = peer.rx.recv().await.unwrap();
    assert_eq!(reply.kind, MessageKind::Response);
    assert_eq!(reply.into_result().unwrap().decode::<String>().unwrap(), "pong");

    // Without a callback the handler runs but nothing comes back.
    peer.tx.send(Message::request("req0000002".into(), "ping", Payload::empty())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(peer.rx.try_recv().is_err());
}

#[test]
fn context_exits_when_coordinator_hangs_up() {
    let (port, thread) = spawn_context("short-lived", Registry::empty).unwrap();
    drop(port);
    thread.join().unwrap();
}

#[tokio::test]
async fn dropped_reply_futures_cancel_their_calls() {
    let (ours, mut peer) = Port::pair();
    let actor = Actor::spawn("coordinator", ours, Registry::empty(), Role::Coordinator);

    let pending: Vec<_> = (0..100).map(|_| actor.request("never", Payload::empty())).collect();
    assert_eq!(actor.in_flight(), 100);
    let ids: HashSet<_> = pending.iter().map(|f| f.id().clone()).collect();
    drop(pending);
    assert_eq!(actor.in_flight(), 0);

    let mut canceled = HashSet::new();
    while let Ok(msg) = peer.rx.try_recv() {
        if msg.kind == MessageKind::Cancel {
            canceled.insert(msg.id);
        }
    }
    assert_eq!(canceled, ids);

    // A timed-out request leaves nothing behind either.
    let late = tokio::time::timeout(Duration::from_millis(10), actor.request("never", Payload::empty())).await;
    assert!(late.is_err());
    assert_eq!(actor.in_flight(), 0);
}

#[tokio::test]
async fn answered_reply_future_sends_no_cancel() {
    let (ours, mut peer) = Port::pair();
    let actor = Actor::spawn("coordinator", ours, Registry::empty(), Role::Coordinator);

    let reply = actor.request("op", Payload::empty());
    let req = peer.rx.recv().await.unwrap();
    peer.tx.send(Message::response(req.id, Ok(Payload::new(json!(1))))).unwrap();
    let out = reply.await.unwrap();
    assert_eq!(out.decode::<u32>().unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(peer.rx.try_recv().is_err());
    assert_eq!(actor.in_flight(), 0);
}
