use eda_domain::entity::Entity;
use eda_macros::entity;

#[entity(id = u64, debug = false)]
struct Order {
    pub id: u64,
    total: i64,
}

impl std::fmt::Debug for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Order#{}", self.id)
    }
}

fn main() {
    let order = Order::new(42);
    assert_eq!(*order.id(), 42);
    assert_eq!(order.total, 0);
    assert_eq!(format!("{order:?}"), "Order#42");
}
