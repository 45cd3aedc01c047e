use std::ffi::CStr;

/// 外部对象运行时的最小抽象
///
/// 探测逻辑只需要这四个查询；地址统一用 `usize` 表示，0 即空。
pub trait ForeignRuntime {
    /// 运行时中表示“空值”的单例对象（如 `[NSNull null]`），没有则为 0
    fn null_sentinel(&self) -> usize {
        0
    }

    /// 对象的类
    ///
    /// # Safety
    /// `object` 的第一个字必须已经确认可读。
    unsafe fn class_of(&self, object: usize) -> usize;

    /// 按名称查找类，不存在时返回 0
    fn class_named(&self, name: &CStr) -> usize;

    /// 按名称查找协议对象，不存在时返回 0
    fn protocol_named(&self, name: &CStr) -> usize;
}

#[cfg(target_vendor = "apple")]
pub use objc::ObjcRuntime;

#[cfg(target_vendor = "apple")]
mod objc {
    use std::ffi::{CStr, c_char, c_void};
    use std::sync::OnceLock;

    use super::ForeignRuntime;

    #[link(name = "objc")]
    unsafe extern "C" {
        fn object_getClass(obj: *const c_void) -> *const c_void;
        fn objc_getClass(name: *const c_char) -> *const c_void;
        fn objc_getProtocol(name: *const c_char) -> *const c_void;
        fn sel_registerName(name: *const c_char) -> *const c_void;
        fn objc_msgSend(obj: *const c_void, sel: *const c_void, ...) -> *const c_void;
    }

    /// 基于 libobjc 的 Objective-C 运行时
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ObjcRuntime;

    impl ObjcRuntime {
        /// `[NSNull null]`，Foundation 未加载时为 0
        fn ns_null() -> usize {
            static NS_NULL: OnceLock<usize> = OnceLock::new();
            *NS_NULL.get_or_init(|| unsafe {
                let cls = objc_getClass(c"NSNull".as_ptr());
                if cls.is_null() {
                    log::debug!("NSNull is not registered, null sentinel disabled");
                    return 0;
                }
                objc_msgSend(cls, sel_registerName(c"null".as_ptr())) as usize
            })
        }
    }

    impl ForeignRuntime for ObjcRuntime {
        fn null_sentinel(&self) -> usize {
            Self::ns_null()
        }

        unsafe fn class_of(&self, object: usize) -> usize {
            unsafe { object_getClass(object as *const c_void) as usize }
        }

        fn class_named(&self, name: &CStr) -> usize {
            unsafe { objc_getClass(name.as_ptr()) as usize }
        }

        fn protocol_named(&self, name: &CStr) -> usize {
            unsafe { objc_getProtocol(name.as_ptr()) as usize }
        }
    }

}
