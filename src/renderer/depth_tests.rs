//! For performing depth tests on the rendered image, so that nearer faces of
//! the cube hide farther ones.

use ash::{vk, Device, Instance};
use color_eyre::{eyre::eyre, Result};

use crate::app::AppData;

use super::images::{create_image, create_image_view};

/// Create the depth buffer, sized to the swapchain. The render pass moves it
/// into the attachment layout, so no explicit transition is needed.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_depth_objects(
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let (depth_image, depth_image_memory) = create_image(
        instance,
        device,
        data,
        data.swapchain_extent.width,
        data.swapchain_extent.height,
        data.depth_format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    data.depth_image = depth_image;
    data.depth_image_memory = depth_image_memory;
    data.depth_image_view = create_image_view(
        device,
        data.depth_image,
        data.depth_format,
        vk::ImageAspectFlags::DEPTH,
    )?;

    Ok(())
}

/// Destroy the objects created by [`create_depth_objects()`].
pub(crate) unsafe fn destroy_depth_objects(device: &Device, data: &AppData) {
    device.destroy_image_view(data.depth_image_view, None);
    device.destroy_image(data.depth_image, None);
    device.free_memory(data.depth_image_memory, None);
}

/// Depth formats we can render with, most preferred first. A pure 32-bit
/// float depth buffer is all the cube needs.
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Select a format with a depth component that supports use as a depth
/// attachment.
pub(crate) unsafe fn get_depth_format(instance: &Instance, data: &AppData) -> Result<vk::Format> {
    pick_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| instance.get_physical_device_format_properties(data.physical_device, format),
    )
    .ok_or_else(|| eyre!("Failed to find a supported depth buffer format"))
}

/// From a list of formats, most desirable first, select the first whose
/// properties include `features` for the given tiling.
fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|f| {
        let properties = properties_of(*f);

        match tiling {
            vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimal_depth_support(supported: vk::Format) -> impl Fn(vk::Format) -> vk::FormatProperties {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if format == supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_earlier_candidates() {
        let all = |_: vk::Format| vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };

        assert_eq!(
            pick_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                all,
            ),
            Some(vk::Format::D32_SFLOAT)
        );
    }

    #[test]
    fn falls_back_to_supported_format() {
        assert_eq!(
            pick_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                optimal_depth_support(vk::Format::D24_UNORM_S8_UINT),
            ),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
    }

    #[test]
    fn tiling_mode_is_respected() {
        assert_eq!(
            pick_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::LINEAR,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                optimal_depth_support(vk::Format::D32_SFLOAT),
            ),
            None
        );
    }
}
