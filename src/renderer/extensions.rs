//! Required Vulkan extensions, and cached extension loaders.

use crate::util::VkExtensionName;
use ash::extensions::khr as vk_khr;
use lazy_static::lazy_static;

lazy_static! {
    /// Device extensions the renderer can't work without.
    pub(crate) static ref REQUIRED_DEVICE_EXTENSIONS: Vec<VkExtensionName> =
        [vk_khr::Swapchain::name()]
            .into_iter()
            .map(VkExtensionName::from_cstr)
            .collect();
}

/// [`ash`] loads extension function pointers on construction, which we don't
/// want to repeat every frame. Built once after the device exists.
#[derive(Clone)]
pub(crate) struct Extensions {
    pub(crate) surface: vk_khr::Surface,
    pub(crate) swapchain: vk_khr::Swapchain,
}
