use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;

use canopy::transport::MemoryTransport;
use canopy::{
    CanopyResult, Change, ChangeKind, DispatchPolicy, Path, Properties, Selector, Value, Workspace,
};

fn demo_workspace(
    policy: DispatchPolicy,
) -> (Arc<MemoryTransport>, canopy::transport::TransportHandle, Arc<Workspace>) {
    let transport = Arc::new(MemoryTransport::new());
    let storage = transport.add_storage("/demo/**").unwrap();
    let ws = Workspace::new(
        Arc::clone(&transport) as Arc<dyn canopy::transport::Transport>,
        Path::parse("/demo").unwrap(),
        policy,
    )
    .unwrap();
    (transport, storage, Arc::new(ws))
}

#[test]
fn put_then_get_latest() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let path = Path::parse("sensor/temp").unwrap();
    ws.put(&path, Value::Float(20.0)).unwrap();
    ws.put(&path, Value::Float(21.5)).unwrap();

    let results = ws.get(&Selector::parse("sensor/temp").unwrap()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, Path::parse("/demo/sensor/temp").unwrap());
    assert_eq!(results[0].value, Value::Float(21.5));
}

#[test]
fn get_fans_out_across_paths() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    ws.put(&Path::parse("a/x").unwrap(), Value::Int(1)).unwrap();
    ws.put(&Path::parse("a/y").unwrap(), Value::Int(2)).unwrap();
    ws.put(&Path::parse("b/z").unwrap(), Value::Int(3)).unwrap();

    let all = ws.get(&Selector::parse("**").unwrap()).unwrap();
    assert_eq!(all.len(), 3);

    let under_a = ws.get(&Selector::parse("a/*").unwrap()).unwrap();
    assert_eq!(under_a.len(), 2);
}

#[test]
fn series_selector_returns_full_history() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let path = Path::parse("sensor/temp").unwrap();
    for i in 0..5 {
        ws.put(&path, Value::Int(i)).unwrap();
    }

    let series = ws
        .get(&Selector::parse("sensor/temp?(starttime=0)").unwrap())
        .unwrap();
    assert_eq!(series.len(), 5);
    assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(series[0].value, Value::Int(0));
    assert_eq!(series[4].value, Value::Int(4));

    // The same resource in latest mode collapses to the last write.
    let latest = ws.get(&Selector::parse("sensor/temp").unwrap()).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].value, Value::Int(4));
}

#[test]
fn remove_empties_the_resource() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let path = Path::parse("a/x").unwrap();
    ws.put(&path, Value::Int(1)).unwrap();
    ws.remove(&path).unwrap();

    assert!(ws.get(&Selector::parse("a/x").unwrap()).unwrap().is_empty());
}

#[test]
fn every_value_variant_survives_the_round_trip() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let mut props = Properties::new();
    props.insert("mode".to_string(), "auto".to_string());

    let values = [
        Value::Raw(vec![1, 2, 3]),
        Value::Str("hello".to_string()),
        Value::Properties(props),
        Value::Json("{\"a\":1}".to_string()),
        Value::Int(-5),
        Value::Float(2.5),
    ];

    for (i, value) in values.iter().enumerate() {
        let path = Path::parse(&format!("v/{i}")).unwrap();
        ws.put(&path, value.clone()).unwrap();
        let got = ws.get(&Selector::from(&path)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0].value, value);
    }
}

#[test]
fn subscriber_receives_put_update_remove() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let (tx, rx) = unbounded::<Change>();
    let listener = Arc::new(move |changes: &[Change]| {
        let _ = tx.send(changes[0].clone());
    });
    ws.subscribe(&Selector::parse("a/**").unwrap(), listener)
        .unwrap();

    let path = Path::parse("a/x").unwrap();
    ws.put(&path, Value::Int(1)).unwrap();
    ws.update(&path, Value::Int(2)).unwrap();
    ws.remove(&path).unwrap();

    let put = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(put.kind, ChangeKind::Put);
    assert_eq!(put.value, Some(Value::Int(1)));

    let update = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(update.kind, ChangeKind::Update);
    assert_eq!(update.value, Some(Value::Int(2)));

    let removal = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(removal.kind, ChangeKind::Remove);
    assert_eq!(removal.value, None);
    assert!(put.timestamp < update.timestamp && update.timestamp < removal.timestamp);
}

#[test]
fn unsubscribe_stops_future_notifications() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let (tx, rx) = unbounded::<Change>();
    let listener = Arc::new(move |changes: &[Change]| {
        let _ = tx.send(changes[0].clone());
    });
    let id = ws
        .subscribe(&Selector::parse("a/**").unwrap(), listener)
        .unwrap();

    ws.put(&Path::parse("a/x").unwrap(), Value::Int(1)).unwrap();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    assert!(ws.unsubscribe(id));
    ws.put(&Path::parse("a/x").unwrap(), Value::Int(2)).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn get_merges_storage_and_eval_replies() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    ws.put(&Path::parse("stored").unwrap(), Value::Int(1)).unwrap();
    ws.register_eval(
        &Path::parse("computed").unwrap(),
        Arc::new(|_: &Path, _: &Properties| -> CanopyResult<Value> { Ok(Value::Int(2)) }),
    )
    .unwrap();

    let mut results = ws.get(&Selector::parse("**").unwrap()).unwrap();
    results.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].path, Path::parse("/demo/computed").unwrap());
    assert_eq!(results[0].value, Value::Int(2));
    assert_eq!(results[1].path, Path::parse("/demo/stored").unwrap());
    assert_eq!(results[1].value, Value::Int(1));
}

#[test]
fn eval_sees_query_properties() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    ws.register_eval(
        &Path::parse("double").unwrap(),
        Arc::new(|_: &Path, props: &Properties| -> CanopyResult<Value> {
            let arg: i32 = props
                .get("arg")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default();
            Ok(Value::Int(arg * 2))
        }),
    )
    .unwrap();

    let results = ws.get(&Selector::parse("double?(arg=21)").unwrap()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, Value::Int(42));
}

#[test]
fn failing_eval_degrades_to_missing_data() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    ws.put(&Path::parse("stored").unwrap(), Value::Int(1)).unwrap();
    ws.register_eval(
        &Path::parse("broken").unwrap(),
        Arc::new(|_: &Path, _: &Properties| -> CanopyResult<Value> { panic!("evaluator bug") }),
    )
    .unwrap();

    // The broken evaluator answers with an empty set; the stored entry is
    // still returned.
    let results = ws.get(&Selector::parse("**").unwrap()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, Path::parse("/demo/stored").unwrap());
}

#[test]
fn unregistered_eval_no_longer_answers() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    let path = Path::parse("computed").unwrap();
    ws.register_eval(
        &path,
        Arc::new(|_: &Path, _: &Properties| -> CanopyResult<Value> { Ok(Value::Int(2)) }),
    )
    .unwrap();
    assert_eq!(ws.get(&Selector::parse("computed").unwrap()).unwrap().len(), 1);

    assert!(ws.unregister_eval(&path));
    assert!(ws.get(&Selector::parse("computed").unwrap()).unwrap().is_empty());
}

#[test]
fn pooled_listener_can_call_back_into_the_workspace() {
    // A listener that issues a get() would deadlock on the I/O thread; with
    // a pooled dispatch policy the callback runs off-thread and completes.
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::pooled(2));

    let (tx, rx) = unbounded::<usize>();
    let ws2 = Arc::clone(&ws);
    let listener = Arc::new(move |_: &[Change]| {
        let seen = ws2.get(&Selector::parse("**").unwrap()).unwrap();
        let _ = tx.send(seen.len());
    });
    ws.subscribe(&Selector::parse("a/**").unwrap(), listener)
        .unwrap();

    ws.put(&Path::parse("a/x").unwrap(), Value::Int(1)).unwrap();

    let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(seen, 1);
}

#[test]
fn panicking_listener_does_not_break_its_neighbor() {
    let (_transport, _storage, ws) = demo_workspace(DispatchPolicy::Inline);

    ws.subscribe(
        &Selector::parse("a/**").unwrap(),
        Arc::new(|_: &[Change]| panic!("listener failure")),
    )
    .unwrap();

    let (tx, rx) = unbounded::<Change>();
    ws.subscribe(
        &Selector::parse("a/**").unwrap(),
        Arc::new(move |changes: &[Change]| {
            let _ = tx.send(changes[0].clone());
        }),
    )
    .unwrap();

    ws.put(&Path::parse("a/x").unwrap(), Value::Int(1)).unwrap();
    ws.put(&Path::parse("a/x").unwrap(), Value::Int(2)).unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap().value,
        Some(Value::Int(1))
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap().value,
        Some(Value::Int(2))
    );
}
