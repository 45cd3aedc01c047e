//! 按类型标签查找 API 对象
//!
//! 调试与验证层只拿得到 `(类型标签, 原始 handle)`，需要据此找回对象。
//! 查找是建议性的：未知的类型、空 handle、已被 client 销毁或根本不存在的 handle
//! 都返回 `None`，不会 panic。
//!
//! registry 只会解引用自己登记过的 handle，因此任意垃圾输入都是安全的。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use ash::vk;

use crate::dispatchable::DispatchableHeader;
use crate::object::{ApiObject, ObjectPtr};
use crate::retained::Retained;

/// handle 的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleShape {
    /// handle 就是对象地址
    NonDispatchable,
    /// handle 指向对象内嵌的 [`DispatchableHeader`]
    Dispatchable,
}

impl HandleShape {
    /// 把原始 handle 解码为对象地址
    ///
    /// # Safety
    /// `Dispatchable` 时，`raw` 必须是存活对象的 handle
    unsafe fn decode(self, raw: u64) -> usize {
        match self {
            HandleShape::NonDispatchable => raw as usize,
            HandleShape::Dispatchable => unsafe { DispatchableHeader::object_address(raw) },
        }
    }
}

/// Vulkan 核心对象类型目录：(类型, debug report 类型, 编码方式)
const CORE_OBJECT_TYPES: &[(vk::ObjectType, vk::DebugReportObjectTypeEXT, HandleShape)] = &[
    (vk::ObjectType::INSTANCE, vk::DebugReportObjectTypeEXT::INSTANCE, HandleShape::Dispatchable),
    (vk::ObjectType::PHYSICAL_DEVICE, vk::DebugReportObjectTypeEXT::PHYSICAL_DEVICE, HandleShape::Dispatchable),
    (vk::ObjectType::DEVICE, vk::DebugReportObjectTypeEXT::DEVICE, HandleShape::Dispatchable),
    (vk::ObjectType::QUEUE, vk::DebugReportObjectTypeEXT::QUEUE, HandleShape::Dispatchable),
    (vk::ObjectType::COMMAND_BUFFER, vk::DebugReportObjectTypeEXT::COMMAND_BUFFER, HandleShape::Dispatchable),
    (vk::ObjectType::SEMAPHORE, vk::DebugReportObjectTypeEXT::SEMAPHORE, HandleShape::NonDispatchable),
    (vk::ObjectType::FENCE, vk::DebugReportObjectTypeEXT::FENCE, HandleShape::NonDispatchable),
    (vk::ObjectType::DEVICE_MEMORY, vk::DebugReportObjectTypeEXT::DEVICE_MEMORY, HandleShape::NonDispatchable),
    (vk::ObjectType::BUFFER, vk::DebugReportObjectTypeEXT::BUFFER, HandleShape::NonDispatchable),
    (vk::ObjectType::IMAGE, vk::DebugReportObjectTypeEXT::IMAGE, HandleShape::NonDispatchable),
    (vk::ObjectType::EVENT, vk::DebugReportObjectTypeEXT::EVENT, HandleShape::NonDispatchable),
    (vk::ObjectType::QUERY_POOL, vk::DebugReportObjectTypeEXT::QUERY_POOL, HandleShape::NonDispatchable),
    (vk::ObjectType::BUFFER_VIEW, vk::DebugReportObjectTypeEXT::BUFFER_VIEW, HandleShape::NonDispatchable),
    (vk::ObjectType::IMAGE_VIEW, vk::DebugReportObjectTypeEXT::IMAGE_VIEW, HandleShape::NonDispatchable),
    (vk::ObjectType::SHADER_MODULE, vk::DebugReportObjectTypeEXT::SHADER_MODULE, HandleShape::NonDispatchable),
    (vk::ObjectType::PIPELINE_CACHE, vk::DebugReportObjectTypeEXT::PIPELINE_CACHE, HandleShape::NonDispatchable),
    (vk::ObjectType::PIPELINE_LAYOUT, vk::DebugReportObjectTypeEXT::PIPELINE_LAYOUT, HandleShape::NonDispatchable),
    (vk::ObjectType::RENDER_PASS, vk::DebugReportObjectTypeEXT::RENDER_PASS, HandleShape::NonDispatchable),
    (vk::ObjectType::PIPELINE, vk::DebugReportObjectTypeEXT::PIPELINE, HandleShape::NonDispatchable),
    (
        vk::ObjectType::DESCRIPTOR_SET_LAYOUT,
        vk::DebugReportObjectTypeEXT::DESCRIPTOR_SET_LAYOUT,
        HandleShape::NonDispatchable,
    ),
    (vk::ObjectType::SAMPLER, vk::DebugReportObjectTypeEXT::SAMPLER, HandleShape::NonDispatchable),
    (vk::ObjectType::DESCRIPTOR_POOL, vk::DebugReportObjectTypeEXT::DESCRIPTOR_POOL, HandleShape::NonDispatchable),
    (vk::ObjectType::DESCRIPTOR_SET, vk::DebugReportObjectTypeEXT::DESCRIPTOR_SET, HandleShape::NonDispatchable),
    (vk::ObjectType::FRAMEBUFFER, vk::DebugReportObjectTypeEXT::FRAMEBUFFER, HandleShape::NonDispatchable),
    (vk::ObjectType::COMMAND_POOL, vk::DebugReportObjectTypeEXT::COMMAND_POOL, HandleShape::NonDispatchable),
    (
        vk::ObjectType::SAMPLER_YCBCR_CONVERSION,
        vk::DebugReportObjectTypeEXT::SAMPLER_YCBCR_CONVERSION,
        HandleShape::NonDispatchable,
    ),
    (
        vk::ObjectType::DESCRIPTOR_UPDATE_TEMPLATE,
        vk::DebugReportObjectTypeEXT::DESCRIPTOR_UPDATE_TEMPLATE,
        HandleShape::NonDispatchable,
    ),
    (vk::ObjectType::SURFACE_KHR, vk::DebugReportObjectTypeEXT::SURFACE_KHR, HandleShape::NonDispatchable),
    (vk::ObjectType::SWAPCHAIN_KHR, vk::DebugReportObjectTypeEXT::SWAPCHAIN_KHR, HandleShape::NonDispatchable),
    (
        vk::ObjectType::DEBUG_REPORT_CALLBACK_EXT,
        vk::DebugReportObjectTypeEXT::DEBUG_REPORT_CALLBACK_EXT,
        HandleShape::NonDispatchable,
    ),
];

/// 类型标签到对象的查找表
///
/// - 类型目录：`vk::ObjectType -> HandleShape`，以及 `vk::DebugReportObjectTypeEXT -> vk::ObjectType`，
///   启动时填入 Vulkan 核心类型，扩展类型可以通过 [`ObjectRegistry::register_type`] 追加
/// - 存活表：`(vk::ObjectType, handle) -> 对象`，对象创建时登记，client 销毁或回收时移除
///
/// 对象会记住登记过自己的 registry（弱引用），因此登记只能在 `Arc<ObjectRegistry>` 上进行，
/// 回收时由对象自己从每个 registry 中移除。
pub struct ObjectRegistry {
    shapes: RwLock<HashMap<vk::ObjectType, HandleShape>>,
    report_types: RwLock<HashMap<vk::DebugReportObjectTypeEXT, vk::ObjectType>>,
    live: RwLock<HashMap<(vk::ObjectType, u64), ObjectPtr<dyn ApiObject>>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// 创建
impl ObjectRegistry {
    /// 空的 registry，不包含任何类型
    pub fn new() -> Self {
        Self {
            shapes: RwLock::new(HashMap::new()),
            report_types: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
        }
    }

    /// 预先填入 Vulkan 核心类型的 registry
    pub fn with_core_types() -> Self {
        let registry = Self::new();
        registry.register_core_types();
        registry
    }

    /// 进程内唯一的 registry，所有 [`crate::retained::Retained`] 创建的对象都登记在这里
    pub fn global() -> &'static Arc<ObjectRegistry> {
        static REGISTRY: OnceLock<Arc<ObjectRegistry>> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            log::info!("init global object registry with {} core object types", CORE_OBJECT_TYPES.len());
            Arc::new(Self::with_core_types())
        })
    }
}

// 类型目录
impl ObjectRegistry {
    pub fn register_core_types(&self) {
        for &(object_type, report_type, shape) in CORE_OBJECT_TYPES {
            self.register_type(object_type, Some(report_type), shape);
        }
    }

    /// 登记一个对象类型；没有 debug report 对应类型时传 `None`
    pub fn register_type(
        &self,
        object_type: vk::ObjectType,
        report_type: Option<vk::DebugReportObjectTypeEXT>,
        shape: HandleShape,
    ) {
        let previous = self.shapes.write().unwrap_or_else(PoisonError::into_inner).insert(object_type, shape);
        if previous.is_some_and(|previous| previous != shape) {
            log::warn!("object type {:?} re-registered as {:?}", object_type, shape);
        }

        if let Some(report_type) = report_type {
            self.report_types.write().unwrap_or_else(PoisonError::into_inner).insert(report_type, object_type);
        }
    }

    pub fn shape_of(&self, object_type: vk::ObjectType) -> Option<HandleShape> {
        self.shapes.read().unwrap_or_else(PoisonError::into_inner).get(&object_type).copied()
    }

    /// debug report 类型对应的对象类型
    pub fn object_type_of(&self, report_type: vk::DebugReportObjectTypeEXT) -> Option<vk::ObjectType> {
        self.report_types.read().unwrap_or_else(PoisonError::into_inner).get(&report_type).copied()
    }
}

// 存活表
impl ObjectRegistry {
    /// 登记一个对象，使其可以通过 handle 查到
    ///
    /// 对象回收或被 client 销毁时会自动从这里移除。
    pub fn track<T: ApiObject>(self: &Arc<Self>, object: &Retained<T>) -> bool {
        self.track_erased(object.as_ptr().erase())
    }

    /// 返回是否登记成功；client 已销毁的对象、handle 编码与类型不符的对象不会被登记
    pub(crate) fn track_erased(self: &Arc<Self>, object: ObjectPtr<dyn ApiObject>) -> bool {
        // SAFETY: 调用方刚创建或仍持有该对象
        let object_ref = unsafe { object.as_ref() };
        let object_type = object_ref.vk_object_type();
        let handle = object_ref.vk_handle();

        if object_ref.base().is_client_destroyed() {
            log::warn!("refuse to track {} {:?}: destroyed by the client", object_ref.debug_type_name(), object);
            return false;
        }

        // handle 等于对象地址说明是非 dispatchable 编码
        let encoded_shape = if handle == object.addr() as u64 {
            HandleShape::NonDispatchable
        } else {
            HandleShape::Dispatchable
        };
        match self.shape_of(object_type) {
            Some(shape) if shape != encoded_shape => {
                log::error!(
                    "refuse to track {} {:?}: {:?} expects a {:?} handle, got {:?} handle {:#x}",
                    object_ref.debug_type_name(),
                    object,
                    object_type,
                    shape,
                    encoded_shape,
                    handle
                );
                return false;
            }
            Some(_) => {}
            None => {
                log::warn!("tracking {} with unregistered object type {:?}", object_ref.debug_type_name(), object_type);
            }
        }

        let previous = self.live.write().unwrap_or_else(PoisonError::into_inner).insert((object_type, handle), object);
        if let Some(previous) = previous {
            if !previous.ptr_eq(object) {
                log::error!("handle {:#x} of {:?} was still tracked for {:?}", handle, object_type, previous);
            }
        }
        object_ref.base().record_registration(Arc::downgrade(self));
        true
    }

    /// 移除对象的登记，返回是否确实移除了该对象
    pub fn untrack<T: ApiObject + ?Sized>(&self, object: &T) -> bool {
        let key = (object.vk_object_type(), object.vk_handle());
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        match live.get(&key) {
            Some(tracked) if tracked.ptr_eq(ObjectPtr::from_ref(object)) => {
                live.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// 某个类型当前对 client 可见的所有对象
    pub fn live_objects(&self, object_type: vk::ObjectType) -> Vec<ObjectPtr<dyn ApiObject>> {
        self.live_objects_where(object_type, |_| true)
    }

    /// 按条件筛选某个类型的存活对象
    ///
    /// `filter` 在持有读锁时调用，此时对象不会被 untrack，可以安全访问。
    pub fn live_objects_where<F>(&self, object_type: vk::ObjectType, filter: F) -> Vec<ObjectPtr<dyn ApiObject>>
    where
        F: Fn(&dyn ApiObject) -> bool,
    {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((ty, _), _)| *ty == object_type)
            .map(|(_, object)| *object)
            // SAFETY: 登记中的对象在读锁期间保持存活
            .filter(|object| filter(unsafe { object.as_ref() }))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// 查找
impl ObjectRegistry {
    /// 按 `vk::ObjectType` 查找对象
    pub fn resolve_object_type(&self, object_type: vk::ObjectType, raw: u64) -> Option<ObjectPtr<dyn ApiObject>> {
        if raw == 0 {
            return None;
        }
        let shape = self.shape_of(object_type)?;

        // 持有读锁期间对象不会被 untrack，因此可以安全地解码 handle
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        let object = *live.get(&(object_type, raw))?;
        // 类型目录在登记之后被改写时，非 dispatchable 对象的 handle 不能当作头部读取
        if shape == HandleShape::Dispatchable && raw == object.addr() as u64 {
            return None;
        }

        let address = unsafe { shape.decode(raw) };
        if address != object.addr() {
            log::warn!("handle {:#x} of {:?} does not decode to its tracked object {:?}", raw, object_type, object);
            return None;
        }
        Some(object)
    }

    /// 按 `vk::DebugReportObjectTypeEXT` 查找对象
    pub fn resolve_debug_report_type(
        &self,
        report_type: vk::DebugReportObjectTypeEXT,
        raw: u64,
    ) -> Option<ObjectPtr<dyn ApiObject>> {
        let object_type = self.object_type_of(report_type)?;
        self.resolve_object_type(object_type, raw)
    }

    /// 按 ash 的强类型 handle 查找对象
    pub fn resolve_handle<H: vk::Handle>(&self, handle: H) -> Option<ObjectPtr<dyn ApiObject>> {
        self.resolve_object_type(H::TYPE, handle.as_raw())
    }
}

/// 在全局 registry 中按 `vk::ObjectType` 查找对象
pub fn resolve_object_type(object_type: vk::ObjectType, raw: u64) -> Option<ObjectPtr<dyn ApiObject>> {
    ObjectRegistry::global().resolve_object_type(object_type, raw)
}

/// 在全局 registry 中按 `vk::DebugReportObjectTypeEXT` 查找对象
pub fn resolve_debug_report_type(
    report_type: vk::DebugReportObjectTypeEXT,
    raw: u64,
) -> Option<ObjectPtr<dyn ApiObject>> {
    ObjectRegistry::global().resolve_debug_report_type(report_type, raw)
}
