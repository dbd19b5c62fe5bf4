use restbind::transport::memory::MemoryServer;
use restbind::{Mixin, ModelRegistry, ModelType, Params};
use serde_json::json;

fn shop() -> (ModelType, ModelType) {
    let (mut server, transport) = MemoryServer::new(16);
    server.seed("/users", vec![json!({"name": "Alice"}), json!({"name": "Bob"})]);
    tokio::spawn(server.run());

    let models = ModelRegistry::new(transport);
    let users = models
        .define(
            "User",
            "/users",
            [Mixin::new("populate", |b| {
                b.enable_bulk_populate("id");
                Ok(())
            })],
        )
        .unwrap();
    models.define("Part", "/parts", Vec::new()).unwrap();
    let bikes = models
        .define(
            "Bike",
            "/bikes",
            [Mixin::new("bike", |b| {
                b.attr_default("gears", 21)
                    .belongs_to("owner", "User")
                    .has_many("parts", "Part");
                Ok(())
            })],
        )
        .unwrap();
    (users, bikes)
}

#[tokio::test]
async fn full_shop_round_trip_against_the_memory_server() {
    let (users, bikes) = shop();

    let alice = users.find(1, Params::new()).unwrap();
    alice.completion().await.unwrap();
    assert_eq!(alice.get("name"), Some(json!("Alice")));

    let bike = bikes.build(json!({"brand": "Trek"}));
    bike.set_one("owner", Some(alice.clone())).unwrap();
    bike.save().unwrap().await.unwrap();
    let id = bike.pk().into_value().unwrap();
    assert_eq!(bike.get("gears"), Some(json!(21)));

    let listed = bikes.search(Params::new()).unwrap();
    listed.completion().await.unwrap();
    assert_eq!(listed.len(), 1);
    let owner = listed.get(0).unwrap().one("owner").unwrap().unwrap();
    assert!(!owner.ptr_eq(&alice));
    owner.completion().await.unwrap();
    assert_eq!(owner.get("name"), Some(json!("Alice")));

    bike.set("gears", 24);
    bike.save().unwrap().await.unwrap();
    let reloaded = bikes.find(id.clone(), Params::new()).unwrap();
    reloaded.completion().await.unwrap();
    assert_eq!(reloaded.get("gears"), Some(json!(24)));
    assert_eq!(reloaded.get("brand"), Some(json!("Trek")));

    bike.destroy().unwrap().await.unwrap();
    let missing = bikes.find(id, Params::new()).unwrap();
    let error = missing.completion().await.unwrap_err();
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn nested_collections_live_under_their_parent() {
    let (_, bikes) = shop();

    let bike = bikes.create(json!({"brand": "Giant"})).unwrap();
    bike.completion().await.unwrap();

    let parts = bike.many("parts").unwrap();
    let wheel = parts.create(json!({"kind": "wheel"})).unwrap();
    wheel.completion().await.unwrap();
    assert_eq!(parts.len(), 1);
    let url = wheel.url().unwrap();
    assert!(url.starts_with(&format!("{}/parts/", bike.url().unwrap())));

    let fresh = bikes.new_record(bike.pk().into_value().unwrap());
    let fetched = fresh.many("parts").unwrap();
    fetched.fetch().unwrap().await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched.get(0).unwrap().get("kind"), Some(json!("wheel")));
}

#[tokio::test]
async fn search_params_filter_on_the_server() {
    let (users, _) = shop();

    let mut params = Params::new();
    params.insert("name".into(), json!("Bob"));
    let bobs = users.search(params).unwrap();
    bobs.completion().await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs.get(0).unwrap().get("name"), Some(json!("Bob")));
}
