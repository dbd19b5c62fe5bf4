use restbind::codec::{EnvelopePacker, Packer};
use restbind::framework::events::{AFTER_FETCH_MANY, BEFORE_FETCH_MANY};
use restbind::transport::mock::MockTransport;
use restbind::{ApiSlot, HttpMethod, Mixin, ModelRegistry, Params, RequestError};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn fetches_append_until_reset() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!([{"id": 1}, {"id": 2}]));
    mock.expect_get("/bikes").return_ok(json!([{"id": 3}]));
    mock.expect_get("/bikes").return_ok(json!([{"id": 4}]));
    let models = ModelRegistry::new(mock.clone());
    let bikes = models.model("/bikes", Vec::new()).unwrap();

    let collection = bikes.collection(Params::new());
    collection.fetch().unwrap().await.unwrap();
    collection.fetch().unwrap().await.unwrap();
    assert_eq!(collection.len(), 3);

    collection.reset();
    assert_eq!(collection.len(), 3);
    collection.fetch().unwrap().await.unwrap();
    let keys: Vec<_> = collection.records().iter().map(|r| r.get("id")).collect();
    assert_eq!(keys, vec![Some(json!(4))]);
    mock.verify();
}

#[tokio::test]
async fn refresh_replaces_items_and_params_travel_with_the_request() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!([{"id": 1}]));
    mock.expect_get("/bikes").return_ok(json!([{"id": 2}]));
    let models = ModelRegistry::new(mock.clone());
    let bikes = models.model("/bikes", Vec::new()).unwrap();

    let mut params = Params::new();
    params.insert("brand".into(), json!("Trek"));
    let collection = bikes.search(params).unwrap();
    collection.completion().await.unwrap();
    collection.set_page(2);
    collection.refresh().unwrap().await.unwrap();

    assert_eq!(collection.len(), 1);
    assert_eq!(collection.get(0).unwrap().get("id"), Some(json!(2)));
    let sent = mock.requests();
    assert_eq!(sent[0].params.get("brand"), Some(&json!("Trek")));
    assert_eq!(sent[1].params.get("page"), Some(&json!(2)));
    assert_eq!(sent[1].method, HttpMethod::Get);
}

#[tokio::test]
async fn a_malformed_page_keeps_the_items_and_the_pending_reset() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!([{"id": 1}, {"id": 2}]));
    mock.expect_get("/bikes").return_ok(json!([{"id": 3}, 5]));
    mock.expect_get("/bikes").return_ok(json!([{"id": 4}]));
    let models = ModelRegistry::new(mock.clone());
    let bikes = models.model("/bikes", Vec::new()).unwrap();

    let collection = bikes.collection(Params::new());
    collection.fetch().unwrap().await.unwrap();
    collection.reset();

    let outcome = collection.fetch().unwrap().await;
    assert!(matches!(outcome, Err(RequestError::Malformed(_))));
    let keys: Vec<_> = collection.records().iter().map(|r| r.get("id")).collect();
    assert_eq!(keys, vec![Some(json!(1)), Some(json!(2))]);

    collection.fetch().unwrap().await.unwrap();
    let keys: Vec<_> = collection.records().iter().map(|r| r.get("id")).collect();
    assert_eq!(keys, vec![Some(json!(4))]);
    mock.verify();
}

#[tokio::test]
async fn failed_fetches_keep_the_items() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!([{"id": 1}]));
    mock.expect_get("/bikes").return_status(500, json!({"error": "boom"}));
    let models = ModelRegistry::new(mock);
    let bikes = models.model("/bikes", Vec::new()).unwrap();

    let collection = bikes.collection(Params::new());
    collection.fetch().unwrap().await.unwrap();
    collection.reset();
    assert!(collection.fetch().unwrap().await.is_err());
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.last_error().and_then(|e| e.status()), Some(500));
}

#[tokio::test]
async fn created_records_join_their_collection() {
    let mock = MockTransport::new();
    mock.expect_post("/bikes").return_status(201, json!({"id": 8, "brand": "Giant"}));
    let models = ModelRegistry::new(mock);
    let bikes = models.model("/bikes", Vec::new()).unwrap();
    let collection = bikes.collection(Params::new());

    let added = Arc::new(Mutex::new(0));
    let counter = added.clone();
    collection.on("after-add", move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    let bike = collection.create(json!({"brand": "Giant"})).unwrap();
    assert!(collection.is_empty());
    bike.completion().await.unwrap();
    assert_eq!(collection.index_of(&bike), Some(0));
    assert_eq!(bike.url().as_deref(), Some("/bikes/8"));
    assert_eq!(*added.lock().unwrap(), 1);
}

#[tokio::test]
async fn envelope_packer_unwraps_items_and_metadata() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!({
        "bikes": [{"id": 1}, {"id": 2}],
        "meta": {"total": 40}
    }));
    let models = ModelRegistry::new(mock);
    let packer: Arc<dyn Packer> = Arc::new(EnvelopePacker::new(Some("meta".into())));
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("envelope", move |b| {
                b.set_packer(packer.clone());
                Ok(())
            })],
        )
        .unwrap();

    let collection = bikes.collection(Params::new());
    collection.fetch().unwrap().await.unwrap();
    assert_eq!(collection.len(), 2);
    assert_eq!(collection.metadata(), Some(json!({"total": 40})));
}

#[tokio::test]
async fn collection_hooks_and_scope_methods() {
    let mock = MockTransport::new();
    mock.expect_get("/bikes").return_ok(json!([{"id": 1, "gears": 21}, {"id": 2, "gears": 18}]));
    let models = ModelRegistry::new(mock);
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("stats", |b| {
                b.method(ApiSlot::Collection, "total_gears", |call, _| {
                    let total: i64 = call
                        .collection()?
                        .records()
                        .iter()
                        .filter_map(|r| r.get("gears").and_then(|g| g.as_i64()))
                        .sum();
                    Ok(json!(total))
                });
                Ok(())
            })],
        )
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let collection = bikes.collection(Params::new());
    for name in [BEFORE_FETCH_MANY, AFTER_FETCH_MANY] {
        let events = events.clone();
        collection.on(name, move |event| {
            events.lock().unwrap().push(event.name().to_string());
            Ok(())
        });
    }

    collection.fetch().unwrap().await.unwrap();
    assert_eq!(*events.lock().unwrap(), vec![BEFORE_FETCH_MANY, AFTER_FETCH_MANY]);
    assert_eq!(collection.call("total_gears", &[]).unwrap(), json!(39));
    assert_eq!(collection.encode(restbind::Mask::UPDATE).unwrap().as_array().map(Vec::len), Some(2));
}
