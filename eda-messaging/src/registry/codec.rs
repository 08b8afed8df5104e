//! JSON 编解码
//!
//! 解码优先直接反序列化线上值；线上对象缺少字段而无法反序列化时，
//! 才把它覆盖到新构建的值上，缺失的字段保留工厂给出的默认值。
//! 枚举、映射等非结构体载荷总是整体替换。
//!
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;

pub(crate) type ToValueFn = fn(&dyn Any) -> Option<serde_json::Result<Value>>;
pub(crate) type OverlayFn = fn(&mut dyn Any, Value) -> Option<serde_json::Result<()>>;

/// 序列化；类型不符时返回 `None`
pub(crate) fn to_value<T>(value: &dyn Any) -> Option<serde_json::Result<Value>>
where
    T: Serialize + 'static,
{
    value.downcast_ref::<T>().map(serde_json::to_value)
}

/// 把线上值覆盖到已构建的值上；类型不符时返回 `None`
pub(crate) fn overlay<T>(target: &mut dyn Any, wire: Value) -> Option<serde_json::Result<()>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    let current = target.downcast_mut::<T>()?;

    let result = match <T as serde::Deserialize>::deserialize(&wire) {
        Ok(decoded) => Ok(decoded),
        Err(err) if wire.is_object() => {
            serde_json::to_value(&*current).and_then(|mut base| {
                // 原型不是对象时（如外部标记的枚举）合并没有意义
                if !base.is_object() {
                    return Err(err);
                }
                merge(&mut base, wire);
                serde_json::from_value::<T>(base)
            })
        }
        Err(err) => Err(err),
    };

    Some(result.map(|decoded| *current = decoded))
}

/// 递归合并：对象逐键合并，其余类型整体替换
pub(crate) fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::{merge, overlay};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::any::Any;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum PaymentOutcome {
        Approved { amount: u32 },
        Declined { reason: String },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quotas {
        limits: BTreeMap<String, u32>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Store {
        name: String,
        region: String,
    }

    fn decode<T>(prototype: T, wire: serde_json::Value) -> serde_json::Result<T>
    where
        T: Serialize + serde::de::DeserializeOwned + 'static,
    {
        let mut target: Box<dyn Any> = Box::new(prototype);
        overlay::<T>(&mut *target, wire).expect("prototype has the registered type")?;
        Ok(*target.downcast::<T>().unwrap())
    }

    #[test]
    fn enum_variant_differing_from_prototype_decodes() {
        let decoded = decode(
            PaymentOutcome::Approved { amount: 10 },
            json!({ "Declined": { "reason": "insufficient_funds" } }),
        )
        .unwrap();

        assert_eq!(
            decoded,
            PaymentOutcome::Declined {
                reason: "insufficient_funds".into()
            }
        );
    }

    #[test]
    fn map_fields_keep_only_the_sent_keys() {
        let prototype = Quotas {
            limits: BTreeMap::from([("default".to_string(), 1)]),
        };
        let decoded = decode(prototype, json!({ "limits": { "only": 2 } })).unwrap();

        assert_eq!(decoded.limits, BTreeMap::from([("only".to_string(), 2)]));
    }

    #[test]
    fn missing_struct_fields_fall_back_to_prototype() {
        let prototype = Store {
            name: String::new(),
            region: "eu-west".into(),
        };
        let decoded = decode(prototype, json!({ "name": "corner" })).unwrap();

        assert_eq!(decoded.name, "corner");
        assert_eq!(decoded.region, "eu-west");
    }

    #[test]
    fn malformed_enum_payload_is_an_error() {
        let err = decode(
            PaymentOutcome::Approved { amount: 10 },
            json!({ "Refunded": {} }),
        );
        assert!(err.is_err());
    }

    #[test]
    fn nested_objects_merge_and_scalars_replace() {
        let mut base = json!({
            "name": "default",
            "limits": { "max": 10, "min": 1 },
            "tags": ["a", "b"]
        });
        merge(
            &mut base,
            json!({ "limits": { "max": 99 }, "tags": ["c"], "extra": true }),
        );

        assert_eq!(
            base,
            json!({
                "name": "default",
                "limits": { "max": 99, "min": 1 },
                "tags": ["c"],
                "extra": true
            })
        );
    }
}
