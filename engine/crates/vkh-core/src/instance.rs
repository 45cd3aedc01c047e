use std::sync::Arc;

use ash::vk;
use vkh_crate_tools::settings::VkhSettings;

use crate::object::{ApiObject, ObjectPtr};
use crate::registry::ObjectRegistry;

/// 顶层上下文
///
/// 每个 API 对象通过 [`crate::object::ApiObjectBase`] 回指它所属的 instance，
/// 从而拿到应用名与全局配置。
pub struct VkhInstance {
    app_name: String,
    settings: VkhSettings,
}

// 创建与销毁
impl VkhInstance {
    pub fn new(app_name: impl Into<String>, settings: VkhSettings) -> Arc<Self> {
        let app_name = app_name.into();
        log::info!("create instance for app: {}, settings: {:?}", app_name, settings);
        Arc::new(Self { app_name, settings })
    }
}

impl Drop for VkhInstance {
    fn drop(&mut self) {
        log::info!("destroying instance for app: {}", self.app_name);
    }
}

// getters
impl VkhInstance {
    #[inline]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[inline]
    pub fn settings(&self) -> &VkhSettings {
        &self.settings
    }
}

// tools
impl VkhInstance {
    /// 属于该 instance、且仍对 client 可见的某类对象
    pub fn live_objects(self: &Arc<Self>, object_type: vk::ObjectType) -> Vec<ObjectPtr<dyn ApiObject>> {
        ObjectRegistry::global().live_objects_where(object_type, |object| {
            object.instance().is_some_and(|owner| Arc::ptr_eq(owner, self))
        })
    }
}

impl std::fmt::Debug for VkhInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkhInstance").field("app_name", &self.app_name).field("settings", &self.settings).finish()
    }
}
