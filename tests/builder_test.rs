use restbind::transport::mock::MockTransport;
use restbind::{
    ApiSlot, BuildError, Mask, Mixin, ModelError, ModelRegistry, ProgrammerError,
};
use serde_json::{json, Value};

fn speaker(name: &'static str, word: &'static str) -> Mixin {
    Mixin::new(name, move |b| {
        b.record_method("speak", move |call, _| {
            if !call.has_super() {
                return Ok(json!(word));
            }
            let below = call.call_super(&[])?;
            Ok(json!(format!("{} {word}", below.as_str().unwrap_or_default())))
        });
        Ok(())
    })
}

#[test]
fn later_mixin_wins_and_reaches_the_earlier_one_through_super() {
    let models = ModelRegistry::new(MockTransport::new());
    let animals = models
        .model("/animals", [speaker("a", "woof"), speaker("b", "and then meow")])
        .unwrap();

    let pet = animals.build(json!({"name": "Rex"}));
    assert_eq!(pet.call("speak", &[]).unwrap(), json!("woof and then meow"));
}

#[test]
fn every_layer_of_a_deep_chain_runs_once_newest_first() {
    let layers: Vec<Mixin> = (0..6)
        .map(|tag: i64| {
            Mixin::new(format!("layer-{tag}"), move |b| {
                b.model_method("trail", move |call, args| {
                    let mut seen = args.first().cloned().unwrap_or(json!([]));
                    if let Value::Array(items) = &mut seen {
                        items.push(json!(tag));
                    }
                    if call.has_super() {
                        call.call_super(&[seen])
                    } else {
                        Ok(seen)
                    }
                });
                Ok(())
            })
        })
        .collect();

    let models = ModelRegistry::new(MockTransport::new());
    let layered = models.model("/layers", layers).unwrap();
    assert_eq!(layered.call("trail", &[]).unwrap(), json!([5, 4, 3, 2, 1, 0]));
}

#[test]
fn derived_types_extend_without_touching_the_base() {
    let models = ModelRegistry::new(MockTransport::new());
    let base = models.model("/animals", [speaker("a", "woof")]).unwrap();
    let loud = base.mix([speaker("loud", "WOOF")]).unwrap();

    let old = base.build(json!({}));
    assert_eq!(old.call("speak", &[]).unwrap(), json!("woof"));
    assert_eq!(loud.build(json!({})).call("speak", &[]).unwrap(), json!("woof WOOF"));
    assert_eq!(base.chain().len(), 1);
    assert_eq!(loud.chain().names(), vec!["a", "loud"]);
    assert!(!loud.same_type(&base));
}

#[test]
fn a_failing_mixin_fails_the_whole_build() {
    let models = ModelRegistry::new(MockTransport::new());
    let result = models.model(
        "/broken",
        [
            speaker("fine", "ok"),
            Mixin::new("needs-ext", |b| b.invoke("paginate", &[json!(20)])),
        ],
    );

    match result {
        Err(BuildError::Mixin { index, name, source }) => {
            assert_eq!(index, 1);
            assert_eq!(name, "needs-ext");
            assert!(matches!(
                *source,
                ModelError::Build(BuildError::UnknownExtension(ref ext)) if ext == "paginate"
            ));
        }
        other => panic!("expected a mixin error, got {other:?}"),
    }
}

#[test]
fn extensions_registered_by_earlier_mixins_are_usable_later() {
    let paging = Mixin::new("paging", |b| {
        b.extend("paginate", |b, args| {
            let size = args.first().cloned().unwrap_or(json!(10));
            b.set_property("pageSize", size)?;
            Ok(())
        });
        Ok(())
    });
    let models = ModelRegistry::new(MockTransport::new());
    let bikes = models
        .model(
            "/bikes",
            [paging, Mixin::new("bike", |b| b.invoke("paginate", &[json!(25)]))],
        )
        .unwrap();
    assert_eq!(bikes.property("pageSize"), Some(&json!(25)));
}

#[test]
fn declarative_mixins_configure_attributes() {
    let declared = Mixin::declare(
        "declared",
        json!({
            "createdAt": {"mask": "R", "map": "created"},
            "wheels": {"init": 2},
            "$config": {"name": "cycle", "plural": "cycles"}
        }),
    )
    .unwrap();
    let models = ModelRegistry::new(MockTransport::new());
    let cycles = models.model("/cycles", [declared]).unwrap();

    assert_eq!(cycles.singular_name().as_deref(), Some("cycle"));
    let cycle = cycles.build(json!({"createdAt": "yesterday"}));
    assert_eq!(cycle.get("wheels"), Some(json!(2)));
    assert_eq!(cycle.encode(Mask::UPDATE).unwrap(), json!({"wheels": 2}));
    cycle.decode(&json!({"created": "today"})).unwrap();
    assert_eq!(cycle.get("createdAt"), Some(json!("today")));
}

#[test]
fn methods_called_on_the_wrong_target_report_it() {
    let models = ModelRegistry::new(MockTransport::new());
    let bikes = models
        .model(
            "/bikes",
            [Mixin::new("scope", |b| {
                b.scope_method("first_key", |call, _| {
                    let collection = call.collection()?;
                    Ok(collection.get(0).and_then(|r| r.pk().into_value()).unwrap_or(Value::Null))
                });
                Ok(())
            })],
        )
        .unwrap();

    let error = bikes.call("first_key", &[]).unwrap_err();
    assert!(matches!(
        error,
        ModelError::Programmer(ProgrammerError::WrongTarget { expected: "collection", .. })
    ));

    let collection = bikes.collection(Default::default());
    collection.decode(&json!([{"id": 4}])).unwrap();
    assert_eq!(collection.call("first_key", &[]).unwrap(), json!(4));

    assert!(matches!(
        bikes.build(json!({})).call("first_key", &[]),
        Err(ModelError::Programmer(ProgrammerError::UndefinedMethod { slot: ApiSlot::Record, .. }))
    ));
}
