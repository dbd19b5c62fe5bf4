use restbind::framework::events::*;
use restbind::transport::mock::{create_channel_transport, expect_request, MockTransport};
use restbind::{
    ActionPhase, Mixin, ModelError, ModelRegistry, ModelType, Params, RequestError, Target,
    Transport,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

const ACTION_EVENTS: &[&str] = &[
    BEFORE_FETCH,
    AFTER_FETCH,
    AFTER_FETCH_ERROR,
    BEFORE_SAVE,
    AFTER_SAVE,
    AFTER_SAVE_ERROR,
    BEFORE_CREATE,
    AFTER_CREATE,
    BEFORE_UPDATE,
    AFTER_UPDATE,
    BEFORE_DESTROY,
    AFTER_DESTROY,
    BEFORE_REQUEST,
    AFTER_REQUEST,
    AFTER_REQUEST_ERROR,
];

fn recorder(log: Log) -> Mixin {
    Mixin::new("recorder", move |b| {
        for name in ACTION_EVENTS {
            let log = log.clone();
            b.on(name, move |event| {
                log.lock().unwrap().push(event.name().to_string());
                Ok(())
            });
        }
        Ok(())
    })
}

fn bikes_with(transport: impl Transport + 'static, log: &Log) -> ModelType {
    ModelRegistry::new(transport)
        .model("/bikes", [recorder(log.clone())])
        .unwrap()
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

#[tokio::test]
async fn fetch_runs_before_hooks_synchronously_and_after_hooks_on_success() {
    let (transport, mut requests) = create_channel_transport(8);
    let log = Log::default();
    let bikes = bikes_with(transport, &log);

    let bike = bikes.new_record(1);
    let completion = bike.fetch().unwrap();
    assert_eq!(take(&log), vec![BEFORE_FETCH, BEFORE_REQUEST]);
    assert!(bike.is_pending());

    let pending = expect_request(&mut requests).await.unwrap();
    assert_eq!(pending.request.url, "/bikes/1");
    pending.respond_ok(json!({"id": 1, "brand": "Trek"}));

    assert_eq!(completion.await, Ok(()));
    assert_eq!(take(&log), vec![AFTER_REQUEST, AFTER_FETCH]);
    assert_eq!(bike.get("brand"), Some(json!("Trek")));
    assert_eq!(bike.phase(), ActionPhase::Succeeded);
    assert!(bike.is_resolved());
}

#[tokio::test]
async fn a_failed_fetch_fires_error_hooks_and_keeps_attributes() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes/1").return_status(404, json!({"error": "not found"}));
    let log = Log::default();
    let bikes = bikes_with(mock.clone(), &log);

    let bike = bikes.build_raw(&json!({"id": 1, "brand": "Trek"})).unwrap();
    let outcome = bike.fetch().unwrap().await;

    assert!(matches!(outcome, Err(RequestError::Status { status: 404, .. })));
    assert_eq!(
        take(&log),
        vec![BEFORE_FETCH, BEFORE_REQUEST, AFTER_REQUEST_ERROR, AFTER_FETCH_ERROR]
    );
    assert_eq!(bike.get("brand"), Some(json!("Trek")));
    assert_eq!(bike.phase(), ActionPhase::Failed);
    assert_eq!(bike.last_error().and_then(|e| e.status()), Some(404));
    mock.verify();
}

#[tokio::test]
async fn an_undecodable_response_fires_only_the_error_hooks() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes/1").return_ok(json!([1, 2]));
    let log = Log::default();
    let bikes = bikes_with(mock.clone(), &log);

    let bike = bikes.build_raw(&json!({"id": 1, "brand": "Trek"})).unwrap();
    take(&log);
    let outcome = bike.fetch().unwrap().await;

    assert!(matches!(outcome, Err(RequestError::Malformed(_))));
    assert_eq!(
        take(&log),
        vec![BEFORE_FETCH, BEFORE_REQUEST, AFTER_REQUEST_ERROR, AFTER_FETCH_ERROR]
    );
    assert_eq!(bike.get("brand"), Some(json!("Trek")));
    assert_eq!(bike.phase(), ActionPhase::Failed);
    mock.verify();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_fetch_started_while_a_response_decodes_wins() {
    let (transport, mut requests) = create_channel_transport(8);
    let refetched = Arc::new(AtomicBool::new(false));
    let newer: Arc<Mutex<Option<Completion>>> = Arc::default();
    let interleave = {
        let refetched = refetched.clone();
        let newer = newer.clone();
        Mixin::new("interleave", move |b| {
            let refetched = refetched.clone();
            let newer = newer.clone();
            b.on(BEFORE_FEED, move |event| {
                if let Target::Record(record) = &event.target {
                    if !refetched.swap(true, Ordering::SeqCst) {
                        *newer.lock().unwrap() = Some(record.fetch()?);
                    }
                }
                Ok(())
            });
            Ok(())
        })
    };
    let models = ModelRegistry::new(transport);
    let bikes = models.model("/bikes", [interleave]).unwrap();
    let bike = bikes.new_record(1);

    let older = bike.fetch().unwrap();
    expect_request(&mut requests)
        .await
        .unwrap()
        .respond_ok(json!({"id": 1, "brand": "Trek"}));
    let second = expect_request(&mut requests).await.unwrap();

    assert_eq!(older.await, Ok(()));
    assert_eq!(bike.get("brand"), None);
    assert!(!bike.is_resolved());
    assert!(bike.is_pending());

    second.respond_ok(json!({"id": 1, "brand": "Cube"}));
    let newer = newer.lock().unwrap().take().unwrap();
    assert_eq!(newer.await, Ok(()));
    assert_eq!(bike.get("brand"), Some(json!("Cube")));
    assert_eq!(bike.phase(), ActionPhase::Succeeded);
}

#[tokio::test]
async fn a_newer_fetch_makes_the_older_result_stale() {
    let (transport, mut requests) = create_channel_transport(8);
    let log = Log::default();
    let bikes = bikes_with(transport, &log);
    let bike = bikes.new_record(1);

    let mut first_params = Params::new();
    first_params.insert("v".into(), json!(1));
    let mut second_params = Params::new();
    second_params.insert("v".into(), json!(2));
    let first = bike.fetch_with(first_params).unwrap();
    let second = bike.fetch_with(second_params).unwrap();
    take(&log);

    let a = expect_request(&mut requests).await.unwrap();
    let b = expect_request(&mut requests).await.unwrap();
    let (older, newer) = if a.request.params.get("v") == Some(&json!(1)) { (a, b) } else { (b, a) };

    older.respond_ok(json!({"id": 1, "brand": "stale"}));
    assert_eq!(first.await, Ok(()));
    assert_eq!(bike.get("brand"), None);
    assert!(take(&log).is_empty());
    assert!(bike.is_pending());

    newer.respond_ok(json!({"id": 1, "brand": "fresh"}));
    assert_eq!(second.await, Ok(()));
    assert_eq!(bike.get("brand"), Some(json!("fresh")));
    assert_eq!(take(&log), vec![AFTER_REQUEST, AFTER_FETCH]);
}

#[tokio::test]
async fn continuations_attached_after_settlement_see_the_outcome() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes/3").return_ok(json!({"id": 3}));
    let bikes = bikes_with(mock, &Log::default());

    let bike = bikes.new_record(3);
    bike.fetch().unwrap().await.unwrap();

    let late = bike.completion();
    assert!(late.is_settled());
    assert_eq!(late.clone().await, Ok(()));
    assert_eq!(late.await, Ok(()));
}

#[tokio::test]
async fn save_creates_then_updates_and_destroy_removes() {
    let mock = MockTransport::new();
    mock.expect_post("/bikes").return_status(201, json!({"id": 5, "brand": "Trek"}));
    mock.expect_put("/bikes/5").return_ok(json!({"id": 5, "brand": "Trek", "gears": 24}));
    mock.expect_delete("/bikes/5").return_status(204, Value::Null);
    let log = Log::default();
    let bikes = bikes_with(mock.clone(), &log);

    let bike = bikes.build(json!({"brand": "Trek"}));
    bike.save().unwrap().await.unwrap();
    assert_eq!(bike.pk().into_value(), Some(json!(5)));
    assert_eq!(
        take(&log),
        vec![BEFORE_SAVE, BEFORE_CREATE, BEFORE_REQUEST, AFTER_REQUEST, AFTER_CREATE, AFTER_SAVE]
    );

    bike.set("gears", 24);
    assert!(bike.is_dirty());
    bike.save().unwrap().await.unwrap();
    assert!(!bike.is_dirty());
    assert_eq!(
        take(&log),
        vec![BEFORE_SAVE, BEFORE_UPDATE, BEFORE_REQUEST, AFTER_REQUEST, AFTER_UPDATE, AFTER_SAVE]
    );

    bike.destroy().unwrap().await.unwrap();
    assert!(bike.is_destroyed());
    assert_eq!(take(&log), vec![BEFORE_DESTROY, BEFORE_REQUEST, AFTER_REQUEST, AFTER_DESTROY]);

    let requests = mock.requests();
    assert_eq!(requests[0].body, Some(json!({"brand": "Trek"})));
    assert_eq!(requests[1].body, Some(json!({"id": 5, "brand": "Trek", "gears": 24})));
    mock.verify();
}

#[tokio::test]
async fn before_hook_errors_abort_without_a_request() {
    let mock = MockTransport::new();
    let models = ModelRegistry::new(mock.clone());
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("guard", |b| {
                b.on(BEFORE_SAVE, |event| match event.target.as_record().and_then(|r| r.get("brand")) {
                    Some(_) => Ok(()),
                    None => Err(ModelError::custom("brand is required")),
                });
                Ok(())
            })],
        )
        .unwrap();

    let bike = bikes.build(json!({}));
    let outcome = bike.save().unwrap().await;
    assert!(matches!(outcome, Err(RequestError::Aborted(ref reason)) if reason.contains("brand is required")));
    assert_eq!(bike.phase(), ActionPhase::Failed);
    assert!(mock.requests().is_empty());
    mock.verify();
}

#[tokio::test]
async fn before_request_hooks_may_rewrite_the_request() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes/1").return_ok(json!({"id": 1}));
    let models = ModelRegistry::new(mock.clone());
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("auth", |b| {
                b.on(BEFORE_REQUEST, |event| {
                    if let Some(request) = event.request.take() {
                        event.request = Some(request.with_header("Authorization", "Bearer token"));
                    }
                    Ok(())
                });
                Ok(())
            })],
        )
        .unwrap();

    bikes.new_record(1).fetch().unwrap().await.unwrap();
    let sent = mock.requests();
    assert_eq!(sent[0].headers.get("Authorization").map(String::as_str), Some("Bearer token"));
}

#[tokio::test]
async fn after_hook_errors_are_ignored() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes/1").return_ok(json!({"id": 1, "brand": "Trek"}));
    let models = ModelRegistry::new(mock);
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("noisy", |b| {
                b.on(AFTER_FETCH, |_| Err(ModelError::custom("listener broke")));
                Ok(())
            })],
        )
        .unwrap();

    let bike = bikes.new_record(1);
    assert_eq!(bike.fetch().unwrap().await, Ok(()));
    assert_eq!(bike.get("brand"), Some(json!("Trek")));
    assert_eq!(bike.phase(), ActionPhase::Succeeded);
}

#[tokio::test]
async fn instance_hooks_run_before_collection_and_type_hooks() {
    let mock = MockTransport::new();
    let log = Log::default();
    let type_log = log.clone();
    let models = ModelRegistry::new(mock);
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("type", move |b| {
                let log = type_log.clone();
                b.on("ping", move |_| {
                    log.lock().unwrap().push("type".into());
                    Ok(())
                });
                Ok(())
            })],
        )
        .unwrap();

    let collection = bikes.collection(Params::new());
    let collection_log = log.clone();
    collection.on("ping", move |_| {
        collection_log.lock().unwrap().push("collection".into());
        Ok(())
    });
    let bike = collection.build(json!({}));
    let instance_log = log.clone();
    bike.on("ping", move |_| {
        instance_log.lock().unwrap().push("instance".into());
        Ok(())
    });

    bike.dispatch("ping", Value::Null).unwrap();
    assert_eq!(take(&log), vec!["instance", "collection", "type"]);

    bikes.build(json!({})).dispatch("ping", Value::Null).unwrap();
    assert_eq!(take(&log), vec!["type"]);
}

#[test]
fn feed_and_render_hooks_rewrite_payloads() {
    let models = ModelRegistry::new(MockTransport::new());
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("envelope", |b| {
                b.on(BEFORE_FEED, |event| {
                    if let Some(inner) = event.data.get("bike").cloned() {
                        event.data = inner;
                    }
                    Ok(())
                })
                .on(BEFORE_RENDER, |event| {
                    event.data = json!({"bike": event.data.take()});
                    Ok(())
                });
                Ok(())
            })],
        )
        .unwrap();

    let bike = bikes.build_raw(&json!({"bike": {"id": 2, "brand": "Trek"}})).unwrap();
    assert_eq!(bike.get("brand"), Some(json!("Trek")));
    assert_eq!(
        bike.encode(restbind::Mask::UPDATE).unwrap(),
        json!({"bike": {"id": 2, "brand": "Trek"}})
    );
}
