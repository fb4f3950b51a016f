//! Fixed-size, nul-terminated names as Vulkan hands them to us.

use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_char;

use ash::vk;

macro_rules! fixed_vk_name {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash)]
        pub struct $name([c_char; $len]);

        impl $name {
            /// Build a name from a nul-terminated byte string. Usable in
            /// constant contexts.
            ///
            /// # Panics
            ///
            /// Panics (at compile time, when used in a `const`) if `bytes` is
            /// too long or isn't nul-terminated.
            pub const fn from_bytes(bytes: &[u8]) -> Self {
                assert!(bytes.len() <= $len, "name is too long");
                assert!(
                    !bytes.is_empty() && bytes[bytes.len() - 1] == 0,
                    "name must be nul-terminated"
                );

                let mut name = [0 as c_char; $len];
                let mut i = 0;
                while i < bytes.len() {
                    name[i] = bytes[i] as c_char;
                    i += 1;
                }
                Self(name)
            }

            /// Copy a name out of a C string, truncating it if it doesn't fit.
            pub fn from_cstr(s: &CStr) -> Self {
                let mut name = [0 as c_char; $len];
                for (dst, src) in name.iter_mut().zip(s.to_bytes().iter().take($len - 1)) {
                    *dst = *src as c_char;
                }
                Self(name)
            }

            #[inline]
            pub fn as_ptr(&self) -> *const c_char {
                self.0.as_ptr()
            }

            pub fn as_cstr(&self) -> &CStr {
                // SAFETY: every constructor leaves at least the last byte as
                // a nul terminator, and Vulkan guarantees the same for the
                // arrays it fills in.
                unsafe { CStr::from_ptr(self.0.as_ptr()) }
            }

            pub fn to_string_lossy(&self) -> Cow<'_, str> {
                self.as_cstr().to_string_lossy()
            }
        }

        impl From<[c_char; $len]> for $name {
            fn from(name: [c_char; $len]) -> Self {
                Self(name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_string_lossy())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self.to_string_lossy())
            }
        }
    };
}

fixed_vk_name!(
    /// The name of a Vulkan extension or layer.
    VkExtensionName,
    vk::MAX_EXTENSION_NAME_SIZE
);

fixed_vk_name!(
    /// The human-readable name of a GPU.
    PhysicalDeviceName,
    vk::MAX_PHYSICAL_DEVICE_NAME_SIZE
);

#[cfg(test)]
mod tests {
    use super::*;

    const LAYER: VkExtensionName = VkExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation\0");

    #[test]
    fn const_and_runtime_names_compare_equal() {
        let cstr = CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS_validation\0").unwrap();
        assert_eq!(LAYER, VkExtensionName::from_cstr(cstr));
        assert_eq!(LAYER.as_cstr(), cstr);
    }

    #[test]
    fn names_display_without_padding() {
        assert_eq!(LAYER.to_string(), "VK_LAYER_KHRONOS_validation");
        assert_eq!(format!("{LAYER:?}"), "\"VK_LAYER_KHRONOS_validation\"");
    }

    #[test]
    fn over_long_names_are_truncated_and_terminated() {
        let long = std::ffi::CString::new(vec![b'x'; 400]).unwrap();
        let name = PhysicalDeviceName::from_cstr(&long);
        assert_eq!(name.to_string_lossy().len(), vk::MAX_PHYSICAL_DEVICE_NAME_SIZE - 1);
    }
}
