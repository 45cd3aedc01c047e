//! Vulkan API 对象的基础抽象
//!
//! 每个暴露给 client 的对象都实现 [`ApiObject`]，并内嵌一个 [`ApiObjectBase`]，
//! 后者负责引用计数、client 销毁标记、debug name 以及配置结果。
//!
//! client 可能在 GPU 或其他内部对象还在使用某个对象时就请求销毁它。
//! 因此 client 的销毁请求只释放 client 自己持有的那一份引用，
//! 只有引用计数从 1 变为 0 时才会真正回收存储。

use std::collections::TryReserveError;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering, fence};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use ash::prelude::VkResult;
use ash::vk;

use crate::configurable::ConfigurationResult;
use crate::instance::VkhInstance;
use crate::registry::ObjectRegistry;

/// 引用计数的上限，超过时视为泄漏导致的溢出
const MAX_REF_COUNT: u32 = u32::MAX / 2;

/// 指向某个 API 对象的非拥有指针
///
/// 与 `vk::Handle` 一样可以随意复制，不影响引用计数。
/// 解引用需要调用方保证对象仍然存活。
pub struct ObjectPtr<T: ?Sized>(NonNull<T>);

impl<T: ?Sized> ObjectPtr<T> {
    #[inline]
    pub fn from_ref(object: &T) -> Self {
        Self(NonNull::from(object))
    }

    /// 接管 `Box` 的存储，之后由 [`release`] 负责回收
    #[inline]
    pub(crate) fn from_box(object: Box<T>) -> Self {
        // SAFETY: Box::into_raw 总是返回非空指针
        Self(unsafe { NonNull::new_unchecked(Box::into_raw(object)) })
    }

    #[inline]
    pub fn as_ptr(self) -> *mut T {
        self.0.as_ptr()
    }

    /// 对象的地址（去掉 trait object 的元数据）
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr().cast::<()>() as usize
    }

    /// # Safety
    /// 对象必须在返回引用的整个生命周期内保持存活
    #[inline]
    pub unsafe fn as_ref<'a>(self) -> &'a T {
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub fn ptr_eq<U: ?Sized>(self, other: ObjectPtr<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ApiObject> ObjectPtr<T> {
    /// 擦除具体类型
    #[inline]
    pub fn erase(self) -> ObjectPtr<dyn ApiObject> {
        let ptr: NonNull<dyn ApiObject> = self.0;
        ObjectPtr(ptr)
    }

    /// 空指针返回 `None`
    ///
    /// # Safety
    /// 非空的 `ptr` 必须指向一个 `T`
    #[inline]
    pub(crate) unsafe fn from_raw_thin(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }
}

impl<T: ?Sized> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> Copy for ObjectPtr<T> {}

impl<T: ?Sized> PartialEq for ObjectPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(*other)
    }
}
impl<T: ?Sized> Eq for ObjectPtr<T> {}

impl<T: ?Sized> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPtr({:#x})", self.addr())
    }
}

// ObjectPtr 只是地址，真正的共享语义由 ApiObject 的 Send + Sync 约束保证
unsafe impl<T: ?Sized + Send + Sync> Send for ObjectPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for ObjectPtr<T> {}

/// 所有 API 对象共享的状态
///
/// 复制（`Clone`）得到的是一个全新的对象状态：引用计数为 1、未被销毁、配置结果为成功，
/// 只保留 debug name 与所属 instance，并且不会触发 debug name 的转发。
pub struct ApiObjectBase {
    ref_count: AtomicU32,
    client_destroyed: AtomicBool,
    debug_name: RwLock<Option<Arc<str>>>,
    configuration: ConfigurationResult,
    instance: Option<Arc<VkhInstance>>,
    /// 登记了该对象的 registry，回收或 client 销毁时逐个移除
    registrations: Mutex<Vec<Weak<ObjectRegistry>>>,
}

// 创建与复制
impl ApiObjectBase {
    pub fn new(instance: Option<Arc<VkhInstance>>) -> Self {
        Self {
            ref_count: AtomicU32::new(1),
            client_destroyed: AtomicBool::new(false),
            debug_name: RwLock::new(None),
            configuration: ConfigurationResult::new(),
            instance,
            registrations: Mutex::new(Vec::new()),
        }
    }
}

impl Clone for ApiObjectBase {
    fn clone(&self) -> Self {
        let copy = Self::new(self.instance.clone());
        copy.store_debug_name(self.debug_name());
        copy
    }
}

// getters
impl ApiObjectBase {
    /// 当前的引用计数，仅作为快照使用
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_client_destroyed(&self) -> bool {
        self.client_destroyed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn instance(&self) -> Option<&Arc<VkhInstance>> {
        self.instance.as_ref()
    }

    #[inline]
    pub fn configuration(&self) -> &ConfigurationResult {
        &self.configuration
    }

    pub fn debug_name(&self) -> Option<Arc<str>> {
        self.debug_name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn store_debug_name(&self, name: Option<Arc<str>>) {
        *self.debug_name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    pub(crate) fn record_registration(&self, registry: Weak<ObjectRegistry>) {
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner).push(registry);
    }

    fn take_registrations(&self) -> Vec<Weak<ObjectRegistry>> {
        std::mem::take(&mut *self.registrations.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// 引用计数
impl ApiObjectBase {
    /// 增加一个引用
    ///
    /// 对一个已经被回收（计数为 0）的对象 retain 属于内部调用方的 bug，直接终止进程。
    #[inline]
    pub fn retain(&self) {
        let old = self.ref_count.fetch_add(1, Ordering::Relaxed);
        if old == 0 {
            fatal_ref_count_misuse("retain on an object whose ref count already reached zero");
        }
        if old >= MAX_REF_COUNT {
            fatal_ref_count_misuse("ref count overflow");
        }
    }

    /// 代表 client 增加一个引用；对象已被 client 销毁时拒绝
    pub fn retain_for_client(&self) -> bool {
        if self.is_client_destroyed() {
            return false;
        }
        self.retain();
        true
    }

    /// 减少一个引用，返回是否到达 0
    ///
    /// 返回 true 时调用方是唯一的最后持有者，负责回收存储。
    #[inline]
    fn decrement(&self) -> bool {
        let old = self.ref_count.fetch_sub(1, Ordering::Release);
        match old {
            0 => fatal_ref_count_misuse("release without a matching retain"),
            1 => {
                // 与其他线程的 Release 递减配对，保证回收前看到它们的所有写入
                fence(Ordering::Acquire);
                true
            }
            _ => false,
        }
    }

    fn mark_client_destroyed(&self) -> bool {
        !self.client_destroyed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for ApiObjectBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiObjectBase")
            .field("ref_count", &self.ref_count())
            .field("client_destroyed", &self.is_client_destroyed())
            .field("debug_name", &self.debug_name())
            .field("configuration", &self.configuration.get())
            .finish()
    }
}

#[cold]
fn fatal_ref_count_misuse(msg: &str) -> ! {
    log::error!("fatal ref count misuse: {}", msg);
    log::logger().flush();
    std::process::abort()
}

/// Vulkan API 对象
///
/// 具体的对象类型只需要提供 [`ApiObjectBase`]、类型标签，以及可选的 debug name 转发。
pub trait ApiObject: Send + Sync + 'static {
    fn base(&self) -> &ApiObjectBase;

    /// 对象的 Vulkan 类型，创建后不可变
    fn vk_object_type(&self) -> vk::ObjectType;

    /// 对象在 VK_EXT_debug_report 中的类型
    fn vk_debug_report_object_type(&self) -> vk::DebugReportObjectTypeEXT;

    /// 用于日志和 debug name 前缀的类型名
    fn debug_type_name(&self) -> &'static str;

    /// 对外暴露的 handle
    ///
    /// 非 dispatchable 对象直接使用自身地址；
    /// dispatchable 对象需要覆盖此方法，返回其 [`crate::dispatchable::DispatchableHeader`] 的地址。
    fn vk_handle(&self) -> u64 {
        (self as *const Self).cast::<()>() as usize as u64
    }

    /// debug name 设置成功后调用，把名字转发给底层的原生对象
    ///
    /// 调用时不持有对象内部的任何锁。`None` 表示名字被清除。
    fn propagate_debug_name(&self, name: Option<&str>);

    fn instance(&self) -> Option<&Arc<VkhInstance>> {
        self.base().instance()
    }

    fn debug_name(&self) -> Option<Arc<str>> {
        self.base().debug_name()
    }

    /// 设置 debug name，`None` 或空字符串表示清除
    ///
    /// 内存分配失败时返回 `ERROR_OUT_OF_HOST_MEMORY`，原来的名字保持不变。
    fn set_debug_name(&self, name: Option<&str>) -> VkResult<()> {
        set_debug_name_with(self, name, alloc_debug_name)
    }

    /// 记录一条错误日志并原样返回错误码
    fn report_error(&self, result: vk::Result, msg: fmt::Arguments<'_>) -> vk::Result {
        match self.debug_name() {
            Some(name) => log::error!("[{}::{}] {:?}: {}", self.debug_type_name(), name, result, msg),
            None => log::error!("[{}] {:?}: {}", self.debug_type_name(), result, msg),
        }
        result
    }

    /// 记录错误，并把它作为对象的配置结果
    fn report_configuration_error(&self, result: vk::Result, msg: fmt::Arguments<'_>) -> vk::Result {
        self.base().configuration().set(self.report_error(result, msg))
    }
}

fn alloc_debug_name(name: &str) -> Result<Arc<str>, TryReserveError> {
    let mut buf = String::new();
    buf.try_reserve_exact(name.len())?;
    buf.push_str(name);
    Ok(Arc::from(buf))
}

pub(crate) fn set_debug_name_with<O, A>(object: &O, name: Option<&str>, alloc: A) -> VkResult<()>
where
    O: ApiObject + ?Sized,
    A: FnOnce(&str) -> Result<Arc<str>, TryReserveError>,
{
    let new_name = match name.filter(|name| !name.is_empty()) {
        Some(name) => Some(alloc(name).map_err(|err| {
            object.report_error(
                vk::Result::ERROR_OUT_OF_HOST_MEMORY,
                format_args!("failed to allocate debug name: {}", err),
            )
        })?),
        None => None,
    };

    object.base().store_debug_name(new_name.clone());

    let with_prefix = object.instance().is_none_or(|instance| instance.settings().debug_name_type_prefix);
    match new_name {
        Some(name) if with_prefix => {
            let forwarded = format!("{}::{}", object.debug_type_name(), name);
            object.propagate_debug_name(Some(&forwarded));
        }
        Some(name) => object.propagate_debug_name(Some(&*name)),
        None => object.propagate_debug_name(None),
    }
    Ok(())
}

/// 从所有登记过该对象的 registry 中移除它
fn untrack_everywhere<T: ApiObject + ?Sized>(object: &T) {
    for registry in object.base().take_registrations() {
        if let Some(registry) = registry.upgrade() {
            registry.untrack(object);
        }
    }
}

/// 释放一个引用；计数归零时回收对象的存储
///
/// 回收前会把对象从所有仍然登记着它的 registry 中移除。
///
/// # Safety
/// - `ptr` 必须来自 [`crate::retained::Retained`] 分配的对象，且调用方持有其中一个引用
/// - 调用之后调用方不能再解引用 `ptr`
pub unsafe fn release<T: ApiObject + ?Sized>(ptr: ObjectPtr<T>) {
    let object = unsafe { ptr.as_ref() };
    if !object.base().decrement() {
        return;
    }

    // 即使 client 已经销毁过，之后仍可能被登记到其他 registry
    untrack_everywhere(object);
    log::trace!("reclaim {} {:?}", object.debug_type_name(), ptr);

    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
}

/// client 请求销毁对象
///
/// 对象会立即从 client 可见的查找与枚举中移除，并拒绝后续的 client retain，
/// 然后释放 client 持有的那一份引用。内部持有者还在时对象继续存活。
///
/// 对同一个对象销毁两次属于调用方的 bug，直接终止进程。
///
/// # Safety
/// 与 [`release`] 相同，其中被释放的引用是 client 的那一份
pub unsafe fn request_client_destruction<T: ApiObject + ?Sized>(ptr: ObjectPtr<T>) {
    let object = unsafe { ptr.as_ref() };
    if !object.base().mark_client_destroyed() {
        fatal_ref_count_misuse("object destroyed by the client twice");
    }

    untrack_everywhere(object);
    log::debug!(
        "client destroyed {} {:?}, ref count before release: {}",
        object.debug_type_name(),
        ptr,
        object.base().ref_count()
    );

    unsafe { release(ptr) };
}
