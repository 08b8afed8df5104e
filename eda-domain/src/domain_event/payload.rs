use std::any::{Any, type_name};
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};

/// 类型擦除的载荷，具体类型在消息层由类型注册表还原
pub type Payload = Arc<dyn Any + Send + Sync>;

/// 将载荷还原为具体类型的引用
pub fn downcast_payload<T: Any>(payload: &Payload) -> DomainResult<&T> {
    payload
        .downcast_ref::<T>()
        .ok_or_else(|| DomainError::TypeMismatch {
            expected: type_name::<T>().to_string(),
            found: "unknown".to_string(),
        })
}
