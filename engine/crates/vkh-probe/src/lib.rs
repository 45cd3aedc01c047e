//! 外部运行时对象引用的身份探测
//!
//! 给定一个声称是 Objective-C 对象的地址，判断它是否仍然存活、是否属于期望的类或协议。
//! 所有对不受信任地址的读取都经过 [`vm_read::try_read_word`]，因此悬空指针、已释放对象与
//! 任意垃圾值都只会得到 [`ForeignClass::Invalid`]，不会让进程崩溃。

pub mod probe;
pub mod runtime;
pub mod vm_read;

pub use probe::{ExpectedIdentity, ForeignClass, classify, is_instance_of, is_valid_foreign_id};
pub use runtime::ForeignRuntime;
#[cfg(target_vendor = "apple")]
pub use runtime::ObjcRuntime;
