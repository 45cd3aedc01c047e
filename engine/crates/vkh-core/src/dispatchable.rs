//! Dispatchable handle 的 ABI 编码
//!
//! Vulkan loader 要求 dispatchable handle（VkInstance、VkDevice、VkQueue ...）
//! 指向的内存以 loader 数据开头。loader 在其中写入自己的分发表，ICD 则需要在创建时
//! 写入 `ICD_LOADER_MAGIC`，以便 loader 识别。
//!
//! ```text
//! handle ──► ┌──────────────────────┐
//!            │ loader_data (magic)  │  loader 可以读写
//!            ├──────────────────────┤
//!            │ object back-pointer  │  loader 不会改动
//!            └──────────────────────┘
//! ```

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::object::{ApiObject, ObjectPtr};

/// loader 用来识别 ICD 对象的标记，对应 vk_icd.h 中的 `ICD_LOADER_MAGIC`
pub const ICD_LOADER_MAGIC: usize = 0x01CD_C0DE;

/// dispatchable handle 指向的固定布局头部
///
/// 每次对外提供 handle 时都会重新写入 magic 与回指指针：loader 可能在两次调用之间
/// 改写头部，对象池中被 loader 视为已释放的对象尤其如此。
/// 写入的值总是相同的，因此多个线程同时取 handle 不需要额外加锁。
#[repr(C)]
pub struct DispatchableHeader {
    loader_data: AtomicUsize,
    object: AtomicPtr<()>,
}

impl Default for DispatchableHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchableHeader {
    pub const fn new() -> Self {
        Self {
            loader_data: AtomicUsize::new(0),
            object: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// 写入 loader magic 与 `owner` 的地址，返回头部地址作为 handle
    ///
    /// `owner` 必须是内嵌此头部的对象本身。
    #[inline]
    pub fn vk_handle<T: ?Sized>(&self, owner: &T) -> u64 {
        self.loader_data.store(ICD_LOADER_MAGIC, Ordering::Relaxed);
        self.object.store((owner as *const T).cast::<()>().cast_mut(), Ordering::Release);
        self as *const Self as usize as u64
    }

    /// 头部当前的 loader 数据
    #[inline]
    pub fn loader_data(&self) -> usize {
        self.loader_data.load(Ordering::Relaxed)
    }

    /// 读出 handle 中的回指地址，空 handle 返回 0
    ///
    /// # Safety
    /// 非空的 `handle` 必须是某个存活对象的 [`DispatchableHeader::vk_handle`] 返回值
    #[inline]
    pub unsafe fn object_address(handle: u64) -> usize {
        if handle == 0 {
            return 0;
        }
        let header = unsafe { &*(handle as usize as *const Self) };
        header.object.load(Ordering::Acquire) as usize
    }

    /// [`DispatchableHeader::vk_handle`] 的逆操作：由 handle 取回对象
    ///
    /// 空 handle 返回 `None`。
    ///
    /// # Safety
    /// 非空的 `handle` 必须来自一个存活的 `T` 的 `vk_handle`
    #[inline]
    pub unsafe fn resolve<T: ApiObject>(handle: u64) -> Option<ObjectPtr<T>> {
        let address = unsafe { Self::object_address(handle) };
        unsafe { ObjectPtr::from_raw_thin(address as *mut T) }
    }
}

impl Clone for DispatchableHeader {
    /// 复制出的对象拥有自己的头部，在第一次取 handle 时指向新对象
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchableHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchableHeader")
            .field("loader_data", &format_args!("{:#x}", self.loader_data()))
            .field("object", &self.object.load(Ordering::Relaxed))
            .finish()
    }
}

/// dispatchable 的 API 对象
///
/// 实现者需要覆盖 [`ApiObject::vk_handle`]，委托给 [`DispatchableApiObject::dispatchable_vk_handle`]。
pub trait DispatchableApiObject: ApiObject + Sized {
    fn dispatchable_header(&self) -> &DispatchableHeader;

    #[inline]
    fn dispatchable_vk_handle(&self) -> u64 {
        self.dispatchable_header().vk_handle(self)
    }

    /// 由 dispatchable handle 取回对象
    ///
    /// # Safety
    /// 同 [`DispatchableHeader::resolve`]
    #[inline]
    unsafe fn from_dispatchable_handle(handle: u64) -> Option<ObjectPtr<Self>> {
        unsafe { DispatchableHeader::resolve::<Self>(handle) }
    }
}
