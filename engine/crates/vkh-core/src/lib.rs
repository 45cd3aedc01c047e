//! vkh 核心：Vulkan API handle 对象
//!
//! - [`object`]：引用计数的 API 对象基础，client 销毁之后仍可被内部持有者继续使用
//! - [`retained`]：持有一份引用的智能指针
//! - [`configurable`]：记录对象配置失败的能力
//! - [`dispatchable`]：Vulkan loader 可识别的 dispatchable handle 头部
//! - [`registry`]：按 `(类型标签, handle)` 查找对象
//! - [`instance`]：对象所属的顶层上下文
//!
//! # 生命周期
//! ```ignore
//! let buffer = Retained::new(MyBuffer::new(...));   // 引用计数 1，属于 client
//! let in_flight = buffer.clone();                   // 内部持有，计数 2
//! buffer.request_client_destruction();              // 计数 1，handle 不再可查
//! drop(in_flight);                                  // 计数 0，回收存储
//! ```

pub mod configurable;
pub mod dispatchable;
pub mod instance;
pub mod object;
pub mod registry;
pub mod retained;

#[cfg(test)]
mod test_objects;
