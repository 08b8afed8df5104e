use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

type ApplyFn = Arc<dyn Fn(&mut dyn Any) -> Result<(), String> + Send + Sync>;

/// 构建选项：作用于某个具体类型的构建钩子
///
/// 注册时附加的选项在每次构建时都会执行，随后执行调用方临时传入的选项。
/// 选项只是配置，本身不持有运行时状态。
#[derive(Clone)]
pub struct BuildOption {
    target: TypeId,
    target_name: &'static str,
    apply: ApplyFn,
}

impl BuildOption {
    /// 修改刚构建出的值
    pub fn new<T, F>(f: F) -> Self
    where
        T: Any,
        F: Fn(&mut T) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            target: TypeId::of::<T>(),
            target_name: type_name::<T>(),
            apply: Arc::new(move |value: &mut dyn Any| match value.downcast_mut::<T>() {
                Some(value) => f(value),
                None => Err(format!("expected {}", type_name::<T>())),
            }),
        }
    }

    /// 只读校验构建结果
    pub fn validate<T, F>(f: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(move |value: &mut T| f(value))
    }

    pub(crate) fn target(&self) -> TypeId {
        self.target
    }

    pub(crate) fn target_name(&self) -> &'static str {
        self.target_name
    }

    pub(crate) fn apply(&self, value: &mut dyn Any) -> Result<(), String> {
        (self.apply)(value)
    }
}

impl fmt::Debug for BuildOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOption")
            .field("target", &self.target_name)
            .finish()
    }
}
