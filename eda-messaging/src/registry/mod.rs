//! 类型注册表（Registry）
//!
//! 稳定字符串键与具体类型之间的映射，用于把领域事件/命令/应答的载荷编码为
//! 线上格式，并在接收端按键重建为具体类型：
//! - 注册：`register`（类型自带键）、`register_key`（显式键）、`register_factory`（工厂）；
//! - 构建：`build` / `build_as` 每次返回新实例，并依次应用构建选项；
//! - 编解码：`serialize` / `deserialize`（JSON）。
//!
//! 注册发生在启动阶段并需要 `&mut self`，之后注册表放入 `Arc` 只读共享；
//! 查找路径既不加锁也不分配。并发注册同一个键由调用方自行同步。
//!
mod build_option;
mod codec;

pub use build_option::BuildOption;

use crate::error::{MessagingError, MessagingResult};
use codec::{OverlayFn, ToValueFn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

/// 注册表构建出的实例
pub type Instance = Box<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// 自描述类型：自己声明线上键
pub trait Registrable {
    fn key(&self) -> &str;
}

struct Registered {
    type_id: TypeId,
    type_name: &'static str,
    factory: Factory,
    to_value: ToValueFn,
    overlay: OverlayFn,
    options: Vec<BuildOption>,
}

#[derive(Default)]
pub struct Registry {
    registered: HashMap<String, Registered>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以类型自身声明的键注册，注册值作为构建原型
    pub fn register<T>(
        &mut self,
        value: T,
        options: impl IntoIterator<Item = BuildOption>,
    ) -> MessagingResult<()>
    where
        T: Registrable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let key = value.key().to_string();
        self.register_key(key, value, options)
    }

    /// 以显式键注册，注册值作为构建原型
    pub fn register_key<T>(
        &mut self,
        key: impl Into<String>,
        value: T,
        options: impl IntoIterator<Item = BuildOption>,
    ) -> MessagingResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.register_factory(key, move || value.clone(), options)
    }

    /// 以零参数工厂注册
    ///
    /// 同一个键再次注册同一类型视为幂等，保留首次注册；注册不同类型返回 `DuplicateKey`。
    pub fn register_factory<T, F>(
        &mut self,
        key: impl Into<String>,
        factory: F,
        options: impl IntoIterator<Item = BuildOption>,
    ) -> MessagingResult<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(MessagingError::InvalidKey { key });
        }

        if let Some(existing) = self.registered.get(&key) {
            if existing.type_id == TypeId::of::<T>() {
                tracing::debug!(key = %key, "type already registered, skipping");
                return Ok(());
            }
            return Err(MessagingError::DuplicateKey {
                key,
                registered: existing.type_name,
                attempted: type_name::<T>(),
            });
        }

        let options: Vec<BuildOption> = options.into_iter().collect();
        if let Some(option) = options.iter().find(|o| o.target() != TypeId::of::<T>()) {
            return Err(MessagingError::TypeMismatch {
                key,
                expected: option.target_name(),
                found: type_name::<T>(),
            });
        }

        tracing::trace!(key = %key, type_name = type_name::<T>(), "type registered");
        self.registered.insert(
            key,
            Registered {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                factory: Arc::new(move || Box::new(factory()) as Instance),
                to_value: codec::to_value::<T>,
                overlay: codec::overlay::<T>,
                options,
            },
        );

        Ok(())
    }

    /// 构建新实例：工厂 → 注册选项 → 调用选项
    pub fn build(&self, key: &str, options: &[BuildOption]) -> MessagingResult<Instance> {
        let registered = self.lookup(key)?;
        Self::build_registered(key, registered, options)
    }

    /// 构建并取出具体类型
    pub fn build_as<T: Any>(&self, key: &str, options: &[BuildOption]) -> MessagingResult<T> {
        let registered = self.lookup(key)?;
        let instance = Self::build_registered(key, registered, options)?;
        downcast(key, registered, instance)
    }

    /// 按键序列化为 JSON 字节
    pub fn serialize(&self, key: &str, value: &dyn Any) -> MessagingResult<Vec<u8>> {
        let value = self.serialize_value(key, value)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// 按键序列化为 JSON 值
    pub fn serialize_value(&self, key: &str, value: &dyn Any) -> MessagingResult<Value> {
        let registered = self.lookup(key)?;
        match (registered.to_value)(value) {
            Some(result) => Ok(result?),
            None => Err(MessagingError::TypeMismatch {
                key: key.to_string(),
                expected: registered.type_name,
                found: "unknown",
            }),
        }
    }

    /// 按键从 JSON 字节重建实例
    pub fn deserialize(
        &self,
        key: &str,
        data: &[u8],
        options: &[BuildOption],
    ) -> MessagingResult<Instance> {
        let registered = self.lookup(key)?;
        let wire: Value = serde_json::from_slice(data)?;
        Self::decode_registered(key, registered, wire, options)
    }

    /// 按键从 JSON 值重建实例
    pub fn deserialize_value(
        &self,
        key: &str,
        wire: Value,
        options: &[BuildOption],
    ) -> MessagingResult<Instance> {
        let registered = self.lookup(key)?;
        Self::decode_registered(key, registered, wire, options)
    }

    pub fn deserialize_as<T: Any>(
        &self,
        key: &str,
        data: &[u8],
        options: &[BuildOption],
    ) -> MessagingResult<T> {
        let registered = self.lookup(key)?;
        let instance = self.deserialize(key, data, options)?;
        downcast(key, registered, instance)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registered.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.registered.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    fn lookup(&self, key: &str) -> MessagingResult<&Registered> {
        self.registered
            .get(key)
            .ok_or_else(|| MessagingError::UnknownType {
                key: key.to_string(),
            })
    }

    fn build_registered(
        key: &str,
        registered: &Registered,
        options: &[BuildOption],
    ) -> MessagingResult<Instance> {
        let mut instance = (registered.factory)();

        for option in registered.options.iter().chain(options) {
            if option.target() != registered.type_id {
                return Err(MessagingError::TypeMismatch {
                    key: key.to_string(),
                    expected: option.target_name(),
                    found: registered.type_name,
                });
            }
            option
                .apply(&mut *instance)
                .map_err(|reason| MessagingError::BuildFailed {
                    key: key.to_string(),
                    reason,
                })?;
        }

        Ok(instance)
    }

    fn decode_registered(
        key: &str,
        registered: &Registered,
        wire: Value,
        options: &[BuildOption],
    ) -> MessagingResult<Instance> {
        let mut instance = Self::build_registered(key, registered, options)?;
        match (registered.overlay)(&mut *instance, wire) {
            Some(result) => result?,
            None => {
                return Err(MessagingError::TypeMismatch {
                    key: key.to_string(),
                    expected: registered.type_name,
                    found: "unknown",
                });
            }
        }
        Ok(instance)
    }
}

fn downcast<T: Any>(key: &str, registered: &Registered, instance: Instance) -> MessagingResult<T> {
    instance
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| MessagingError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
            found: registered.type_name,
        })
}
