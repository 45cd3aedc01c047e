//! 可配置能力
//!
//! 对象在创建或配置过程中可能失败，但仍然需要作为一个合法的 handle 返回给 client，
//! 之后再由调用方查询失败原因。这里记录第一个失败的 `vk::Result`。

use std::sync::atomic::{AtomicI32, Ordering};

use ash::vk;

use crate::object::ApiObject;

/// 记录配置结果，第一个错误会一直保留，直到被 [`ConfigurationResult::take`] 取走
#[derive(Debug)]
pub struct ConfigurationResult(AtomicI32);

impl Default for ConfigurationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationResult {
    pub fn new() -> Self {
        Self(AtomicI32::new(vk::Result::SUCCESS.as_raw()))
    }

    #[inline]
    pub fn get(&self) -> vk::Result {
        vk::Result::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.get() == vk::Result::SUCCESS
    }

    /// 记录结果并原样返回
    ///
    /// 已经有错误时保留之前的错误；`SUCCESS` 不会覆盖任何值。
    pub fn set(&self, result: vk::Result) -> vk::Result {
        if result != vk::Result::SUCCESS {
            let _ = self.0.compare_exchange(
                vk::Result::SUCCESS.as_raw(),
                result.as_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        result
    }

    /// 取出当前结果，并重置为 `SUCCESS`
    pub fn take(&self) -> vk::Result {
        vk::Result::from_raw(self.0.swap(vk::Result::SUCCESS.as_raw(), Ordering::AcqRel))
    }
}

/// 可配置对象的能力接口
///
/// 所有 [`ApiObject`] 自动获得该能力，状态存放在 [`crate::object::ApiObjectBase`] 中。
pub trait Configurable {
    fn configuration(&self) -> &ConfigurationResult;

    fn configuration_result(&self) -> vk::Result {
        self.configuration().get()
    }

    fn set_configuration_result(&self, result: vk::Result) -> vk::Result {
        self.configuration().set(result)
    }

    fn take_configuration_result(&self) -> vk::Result {
        self.configuration().take()
    }

    fn was_configuration_successful(&self) -> bool {
        self.configuration().is_success()
    }
}

impl<T: ApiObject + ?Sized> Configurable for T {
    #[inline]
    fn configuration(&self) -> &ConfigurationResult {
        self.base().configuration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_sticks() {
        let config = ConfigurationResult::new();
        assert!(config.is_success());

        assert_eq!(config.set(vk::Result::ERROR_OUT_OF_HOST_MEMORY), vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(config.set(vk::Result::ERROR_DEVICE_LOST), vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(config.set(vk::Result::SUCCESS), vk::Result::SUCCESS);

        assert_eq!(config.get(), vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    }

    #[test]
    fn test_take_resets() {
        let config = ConfigurationResult::new();
        let _ = config.set(vk::Result::ERROR_INITIALIZATION_FAILED);

        assert_eq!(config.take(), vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(config.is_success());
        assert_eq!(config.take(), vk::Result::SUCCESS);
    }

    #[test]
    fn test_configurable_through_api_object() {
        use crate::retained::Retained;
        use crate::test_objects::{Observer, TestBuffer};

        let observer = Observer::new();
        let buffer = Retained::new(TestBuffer::new(8, &observer));
        assert!(buffer.was_configuration_successful());

        let _ = buffer.set_configuration_result(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        assert!(!buffer.was_configuration_successful());
        assert_eq!(buffer.take_configuration_result(), vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        assert_eq!(buffer.configuration_result(), vk::Result::SUCCESS);
    }
}
