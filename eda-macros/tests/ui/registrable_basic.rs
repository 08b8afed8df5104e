use eda_macros::registrable;
use eda_messaging::registry::{Registrable, Registry};

#[registrable(key = "stores.StoreCreated")]
#[derive(Debug, Default, PartialEq)]
struct StoreCreated {
    name: String,
    location: String,
}

#[registrable(key = "stores.StoreStatus")]
#[derive(Debug, Default, PartialEq)]
enum StoreStatus {
    #[default]
    Open,
    Closed,
}

fn main() {
    assert_eq!(StoreCreated::KEY, "stores.StoreCreated");
    assert_eq!(StoreCreated::default().key(), "stores.StoreCreated");
    assert_eq!(StoreStatus::Closed.key(), StoreStatus::KEY);

    let mut registry = Registry::new();
    registry.register(StoreCreated::default(), []).unwrap();
    registry.register(StoreStatus::Open, []).unwrap();
    assert!(registry.contains(StoreCreated::KEY));

    let created = StoreCreated {
        name: "corner".into(),
        location: "main st".into(),
    };
    let bytes = registry.serialize(StoreCreated::KEY, &created).unwrap();
    let decoded: StoreCreated = registry
        .deserialize_as(StoreCreated::KEY, &bytes, &[])
        .unwrap();
    assert_eq!(decoded, created);
}
