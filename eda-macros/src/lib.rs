//! 事件驱动基础库的过程宏
//!
//! - `#[entity]`：为结构体追加 `id` 字段并实现 `::eda_domain::entity::Entity`；
//! - `#[registrable(key = "...")]`：为载荷类型声明线上键并实现
//!   `::eda_messaging::registry::Registrable`。
//!
use proc_macro::TokenStream;

mod entity;
mod registrable;
mod utils;

/// 实体宏
/// - 若缺失则追加字段 `id: IdType`，并置于字段最前
/// - 自动实现 `::eda_domain::entity::Entity`（`new/id`）
/// - 参数：`#[entity(id = IdType, debug = true|false)]`，`id` 默认 `String`，
///   `debug = false` 时不派生 `Debug`
#[proc_macro_attribute]
pub fn entity(attr: TokenStream, item: TokenStream) -> TokenStream {
    entity::expand(attr, item)
}

/// 可注册类型宏
/// - 参数：`#[registrable(key = "stores.StoreCreated")]`，键不能为空
/// - 生成关联常量 `KEY` 与 `Registrable` 实现
/// - 合并派生 `Clone`、`serde::Serialize`、`serde::Deserialize`
#[proc_macro_attribute]
pub fn registrable(attr: TokenStream, item: TokenStream) -> TokenStream {
    registrable::expand(attr, item)
}
