use std::mem::ManuallyDrop;
use std::ops::Deref;

use crate::object::{self, ApiObject, ObjectPtr};
use crate::registry::ObjectRegistry;

/// 持有 API 对象一个引用的智能指针
///
/// - `clone` 等价于 retain，`drop` 等价于 release
/// - [`Retained::new`] 得到的引用代表 client 的所有权，通常随后通过 [`Retained::into_raw`]
///   交给 handle，再由 [`object::request_client_destruction`] 归还
/// - 内部子系统（例如正在执行的命令、依赖该对象的其他对象）通过 `clone` 持有自己的引用
pub struct Retained<T: ApiObject + ?Sized> {
    ptr: ObjectPtr<T>,
}

// 创建
impl<T: ApiObject> Retained<T> {
    /// 在堆上分配对象，引用计数为 1，并登记到全局 registry 以便按 handle 查找
    pub fn new(object: T) -> Self {
        let ptr = ObjectPtr::from_box(Box::new(object));
        ObjectRegistry::global().track_erased(ptr.erase());
        Self { ptr }
    }

    /// 擦除具体类型
    pub fn erase(self) -> Retained<dyn ApiObject> {
        let this = ManuallyDrop::new(self);
        Retained { ptr: this.ptr.erase() }
    }
}

impl<T: ApiObject + ?Sized> Retained<T> {
    #[inline]
    pub fn as_ptr(&self) -> ObjectPtr<T> {
        self.ptr
    }

    /// 交出这一份引用，不改变引用计数
    #[inline]
    pub fn into_raw(self) -> ObjectPtr<T> {
        ManuallyDrop::new(self).ptr
    }

    /// 接管一份已经存在的引用，不改变引用计数
    ///
    /// # Safety
    /// 调用方必须确实持有 `ptr` 的一份引用，并且之后不再单独 release 它
    #[inline]
    pub unsafe fn from_raw(ptr: ObjectPtr<T>) -> Self {
        Self { ptr }
    }

    /// retain 一个对象，并以 `Retained` 的形式持有新增的引用
    ///
    /// # Safety
    /// `ptr` 指向的对象在调用时必须存活（引用计数不为 0）
    pub unsafe fn retain(ptr: ObjectPtr<T>) -> Self {
        unsafe { ptr.as_ref() }.base().retain();
        Self { ptr }
    }

    /// 代表 client retain；对象已被 client 销毁时返回 `None`
    ///
    /// # Safety
    /// 同 [`Retained::retain`]
    pub unsafe fn retain_for_client(ptr: ObjectPtr<T>) -> Option<Self> {
        unsafe { ptr.as_ref() }.base().retain_for_client().then(|| Self { ptr })
    }

    /// 把这一份引用作为 client 的所有权交还：标记 client 销毁并释放
    pub fn request_client_destruction(self) {
        let ptr = self.into_raw();
        // SAFETY: 这份引用由 self 持有，交给 request_client_destruction 释放
        unsafe { object::request_client_destruction(ptr) };
    }
}

impl<T: ApiObject + ?Sized> Clone for Retained<T> {
    fn clone(&self) -> Self {
        self.base().retain();
        Self { ptr: self.ptr }
    }
}

impl<T: ApiObject + ?Sized> Drop for Retained<T> {
    fn drop(&mut self) {
        // SAFETY: self 持有一份引用，drop 之后不再使用 ptr
        unsafe { object::release(self.ptr) };
    }
}

impl<T: ApiObject + ?Sized> Deref for Retained<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: 只要 self 存在，引用计数至少为 1
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ApiObject + ?Sized> AsRef<T> for Retained<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ApiObject + ?Sized> std::fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retained")
            .field("type", &self.debug_type_name())
            .field("ptr", &self.ptr)
            .field("ref_count", &self.base().ref_count())
            .finish()
    }
}
