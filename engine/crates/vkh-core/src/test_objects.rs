//! 单元测试使用的具体对象类型

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::dispatchable::{DispatchableApiObject, DispatchableHeader};
use crate::instance::VkhInstance;
use crate::object::{ApiObject, ApiObjectBase};

/// 观察对象回收与 debug name 转发
#[derive(Clone, Default)]
pub struct Observer {
    pub reclaimed: Arc<AtomicBool>,
    pub names: Arc<Mutex<Vec<Option<String>>>>,
}

impl Observer {
    pub fn new() -> Self {
        vkh_crate_tools::init_log::init_test_log();
        Self::default()
    }

    pub fn propagated_names(&self) -> Vec<Option<String>> {
        self.names.lock().unwrap().clone()
    }
}

/// 非 dispatchable 对象
pub struct TestBuffer {
    base: ApiObjectBase,
    pub size: u64,
    observer: Observer,
}

impl TestBuffer {
    pub fn new(size: u64, observer: &Observer) -> Self {
        Self::with_instance(size, observer, None)
    }

    pub fn with_instance(size: u64, observer: &Observer, instance: Option<Arc<VkhInstance>>) -> Self {
        Self {
            base: ApiObjectBase::new(instance),
            size,
            observer: observer.clone(),
        }
    }
}

impl ApiObject for TestBuffer {
    fn base(&self) -> &ApiObjectBase {
        &self.base
    }
    fn vk_object_type(&self) -> vk::ObjectType {
        vk::ObjectType::BUFFER
    }
    fn vk_debug_report_object_type(&self) -> vk::DebugReportObjectTypeEXT {
        vk::DebugReportObjectTypeEXT::BUFFER
    }
    fn debug_type_name(&self) -> &'static str {
        "TestBuffer"
    }
    fn propagate_debug_name(&self, name: Option<&str>) {
        // 转发时对象内部的锁必须已经释放
        assert!(self.base.debug_name().is_some() == name.is_some());
        self.observer.names.lock().unwrap().push(name.map(str::to_string));
    }
}

impl Drop for TestBuffer {
    fn drop(&mut self) {
        assert_eq!(self.base.ref_count(), 0, "reclaimed while still referenced");
        self.observer.reclaimed.store(true, Ordering::SeqCst);
    }
}

/// dispatchable 对象
pub struct TestDevice {
    pub header: DispatchableHeader,
    base: ApiObjectBase,
    observer: Observer,
}

impl TestDevice {
    pub fn new(observer: &Observer) -> Self {
        Self {
            header: DispatchableHeader::new(),
            base: ApiObjectBase::new(None),
            observer: observer.clone(),
        }
    }
}

impl ApiObject for TestDevice {
    fn base(&self) -> &ApiObjectBase {
        &self.base
    }
    fn vk_object_type(&self) -> vk::ObjectType {
        vk::ObjectType::DEVICE
    }
    fn vk_debug_report_object_type(&self) -> vk::DebugReportObjectTypeEXT {
        vk::DebugReportObjectTypeEXT::DEVICE
    }
    fn debug_type_name(&self) -> &'static str {
        "TestDevice"
    }
    fn vk_handle(&self) -> u64 {
        self.dispatchable_vk_handle()
    }
    fn propagate_debug_name(&self, name: Option<&str>) {
        self.observer.names.lock().unwrap().push(name.map(str::to_string));
    }
}

impl DispatchableApiObject for TestDevice {
    fn dispatchable_header(&self) -> &DispatchableHeader {
        &self.header
    }
}

impl Drop for TestDevice {
    fn drop(&mut self) {
        assert_eq!(self.base.ref_count(), 0, "reclaimed while still referenced");
        self.observer.reclaimed.store(true, Ordering::SeqCst);
    }
}
