use eda_domain::entity::Entity;
use eda_macros::entity;

#[entity]
#[derive(Clone)]
struct Customer {
    name: String,
    sms_number: String,
}

fn main() {
    let customer = Customer::new("c-1".to_string());
    assert_eq!(customer.id(), "c-1");
    assert!(customer.name.is_empty());
    assert!(customer.sms_number.is_empty());
    let _ = format!("{:?}", customer.clone());
}
