//! # restbind demo
//!
//! Runs a small bike shop against the in-memory REST server:
//! 1. Defines `User` and `Bike` model types, with a bike belonging to a user.
//! 2. Creates records, lists them, updates one and destroys another.
//! 3. Shuts the server down once every model handle is dropped.

use restbind::transport::memory::MemoryServer;
use restbind::{setup_tracing, Mask, Mixin, ModelRegistry, Params};
use serde_json::json;
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let (mut server, transport) = MemoryServer::new(32);
    server.seed("/users", vec![json!({"name": "Alice"})]);
    let server = tokio::spawn(server.run());

    run_shop(ModelRegistry::new(transport))
        .instrument(tracing::info_span!("shop"))
        .await?;

    if let Err(e) = server.await {
        error!("Memory server failed: {:?}", e);
        return Err(format!("Memory server failed: {:?}", e));
    }
    info!("Demo complete");
    Ok(())
}

async fn run_shop(models: ModelRegistry) -> Result<(), String> {
    let users = models
        .define("User", "/users", Vec::new())
        .map_err(|e| e.to_string())?;
    let bikes = models
        .define(
            "Bike",
            "/bikes",
            [Mixin::new("bike", |b| {
                b.attr_default("gears", 21)
                    .attr_mask("serial", Mask::READ)
                    .belongs_to("owner", "User")
                    .record_method("describe", |call, _| {
                        let record = call.record()?;
                        let brand = record.get("brand").unwrap_or_default();
                        Ok(json!(format!("{} with {} gears", render(&brand), render(&record.get("gears").unwrap_or_default()))))
                    });
                Ok(())
            })],
        )
        .map_err(|e| e.to_string())?;

    let alice = users.find(1, Params::new()).map_err(|e| e.to_string())?;
    alice.completion().await.map_err(|e| e.to_string())?;
    info!(name = ?alice.get("name"), "User loaded");

    let trek = bikes.build(json!({"brand": "Trek", "serial": "ignored"}));
    trek.set_one("owner", Some(alice.clone())).map_err(|e| e.to_string())?;
    trek.save().map_err(|e| e.to_string())?.await.map_err(|e| e.to_string())?;
    let giant = bikes.create(json!({"brand": "Giant", "gears": 18})).map_err(|e| e.to_string())?;
    giant.completion().await.map_err(|e| e.to_string())?;
    info!(trek = ?trek.pk(), giant = ?giant.pk(), "Bikes created");

    let all = bikes.search(Params::new()).map_err(|e| e.to_string())?;
    all.completion().await.map_err(|e| e.to_string())?;
    for bike in all.records() {
        let description = bike.call("describe", &[]).map_err(|e| e.to_string())?;
        let owner = bike.one("owner").map_err(|e| e.to_string())?.map(|owner| owner.pk());
        info!(description = %render(&description), ?owner, "Listed bike");
    }

    trek.set("gears", 24);
    info!(changes = ?trek.changes(), "Updating");
    trek.save().map_err(|e| e.to_string())?.await.map_err(|e| e.to_string())?;

    giant.destroy().map_err(|e| e.to_string())?.await.map_err(|e| e.to_string())?;
    info!(destroyed = giant.is_destroyed(), "Bike destroyed");

    let missing = bikes.find(99, Params::new()).map_err(|e| e.to_string())?;
    if let Err(e) = missing.completion().await {
        info!(status = ?e.status(), "Missing bike reported");
    }
    Ok(())
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
