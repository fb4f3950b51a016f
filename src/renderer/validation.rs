//! Hooks connecting Vulkan's validation layers to [`tracing`].

use crate::util::VkExtensionName;
use ash::vk;
use std::{borrow::Cow, ffi::CStr, os::raw::c_void};
use tracing::{debug, error, trace, warn};

/// Returns true if Vulkan validation layers should be enabled.
///
/// Always true in builds with `debug_assertions`. Otherwise, only true if the
/// environment variable `ENABLE_VULKAN_VALIDATION_LAYERS` is set.
#[inline]
pub(crate) fn should_enable_validation_layers() -> bool {
    cfg!(debug_assertions) || std::env::var_os("ENABLE_VULKAN_VALIDATION_LAYERS").is_some()
}

/// The validation layer bundle enabled when [`should_enable_validation_layers()`]
/// returns true.
pub(crate) const VALIDATION_LAYER: VkExtensionName =
    VkExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation\0");

/// Read a possibly-null C string from a validation message.
unsafe fn message_str<'a>(ptr: *const std::os::raw::c_char, fallback: &'static str) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Called by the validation layers whenever they have something to say.
pub(crate) extern "system" fn vk_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    typ: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: the layer hands us a valid callback data struct for the
    // duration of this call.
    let (message_id, message) = unsafe {
        let data = &*data;
        (
            message_str(data.p_message_id_name, "<undefined id>"),
            message_str(data.p_message, "<undefined message>"),
        )
    };

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!({"type" = ?typ, id = %message_id}, "{}", message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!({"type" = ?typ, id = %message_id}, "{}", message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!({"type" = ?typ, id = %message_id}, "{}", message);
    } else {
        trace!({"type" = ?typ, id = %message_id}, "{}", message);
    }

    vk::FALSE
}
