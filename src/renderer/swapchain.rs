//! Tools for creating, re-creating, and checking the capabilities of swapchains.

use super::devices::{PhysicalDeviceSuitabilityError, QueueFamilyIndices};
use super::images::create_image_view;
use crate::{app::AppData, MAX_FRAMES_IN_FLIGHT};
use ash::{extensions::khr as vk_khr, vk, Device, Entry, Instance};
use color_eyre::Result;
use tracing::debug;
use winit::{dpi::PhysicalSize, window::Window};

/// Create the swapchain and fetch its images.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_swapchain(
    window: &Window,
    entry: &Entry,
    instance: &Instance,
    swapchain_ext: &vk_khr::Swapchain,
    data: &mut AppData,
) -> Result<()> {
    let indices = QueueFamilyIndices::get(entry, instance, data, data.physical_device)?;
    let swapchain_support = SwapchainSupport::get(entry, instance, data, data.physical_device)?;

    let surface_format = swapchain_support.get_preferred_surface_format();
    let present_mode = swapchain_support.get_preferred_present_mode();
    let extent = swapchain_support.get_swapchain_extent(window.inner_size());
    let image_count = swapchain_support.get_image_count();

    // Images are shared between the graphics and present queues without
    // explicit ownership transfers when those are different families.
    let mut queue_family_indices = Vec::new();
    let image_sharing_mode = if indices.graphics != indices.present {
        queue_family_indices.push(indices.graphics);
        queue_family_indices.push(indices.present);
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    };

    debug!(
        image_count,
        image_format = ?surface_format.format,
        image_color_space = ?surface_format.color_space,
        image_extent = ?extent,
        ?present_mode,
        ?image_sharing_mode,
        "Selected swapchain creation properties"
    );

    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(data.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(image_sharing_mode)
        .queue_family_indices(&queue_family_indices)
        .pre_transform(swapchain_support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(vk::SwapchainKHR::null());

    data.swapchain = swapchain_ext.create_swapchain(&info, None)?;
    data.swapchain_images = swapchain_ext.get_swapchain_images(data.swapchain)?;
    data.swapchain_format = surface_format.format;
    data.swapchain_extent = extent;

    Ok(())
}

/// Create basic views to access the swapchain images.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_swapchain_image_views(
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    debug!(
        count = data.swapchain_images.len(),
        "Creating swapchain image views"
    );

    data.swapchain_image_views = data
        .swapchain_images
        .iter()
        .map(|i| create_image_view(device, *i, data.swapchain_format, vk::ImageAspectFlags::COLOR))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

/// Stores the capabilities of a swapchain tied to a physical device. This allows
/// for checking if a swapchain is suitable for this application.
#[derive(Clone, Debug)]
pub(crate) struct SwapchainSupport {
    /// Basic surface capabilities, such as min/max number of images or min/max
    /// width and height of images.
    pub(crate) capabilities: vk::SurfaceCapabilitiesKHR,

    /// Surface formats, such as supported pixel formats or color spaces.
    pub(crate) formats: Vec<vk::SurfaceFormatKHR>,

    /// Available presentation modes
    pub(crate) present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Get supported capabilites, formats, and present modes associated with
    /// swapchains created by a physical device.
    pub(crate) unsafe fn get(
        entry: &Entry,
        instance: &Instance,
        data: &AppData,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, PhysicalDeviceSuitabilityError> {
        let surface_ext = vk_khr::Surface::new(entry, instance);

        Ok(Self {
            capabilities: surface_ext
                .get_physical_device_surface_capabilities(physical_device, data.surface)?,
            formats: surface_ext
                .get_physical_device_surface_formats(physical_device, data.surface)?,
            present_modes: surface_ext
                .get_physical_device_surface_present_modes(physical_device, data.surface)?,
        })
    }

    /// Get the preferred color format to use.
    ///
    /// We prefer 8-bit BGRA in the sRGB color space. If that isn't available,
    /// the first reported format is used. Only call this on support with at
    /// least one format; device selection rejects anything else.
    fn get_preferred_surface_format(&self) -> vk::SurfaceFormatKHR {
        self.formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| self.formats.first())
            .copied()
            .unwrap_or_default()
    }

    /// Get the preferred presentation mode.
    ///
    /// MAILBOX if supported, so the frame pacer rather than the presentation
    /// engine decides how far ahead the CPU runs. Otherwise FIFO, which is
    /// always available.
    fn get_preferred_present_mode(&self) -> vk::PresentModeKHR {
        self.present_modes
            .iter()
            .find(|m| **m == vk::PresentModeKHR::MAILBOX)
            .copied()
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }

    /// Enough images that every in-flight frame can have one while another is
    /// on screen, within the surface's limits. A max of 0 means no limit.
    fn get_image_count(&self) -> u32 {
        let wanted = (self.capabilities.min_image_count + 1).max(MAX_FRAMES_IN_FLIGHT as u32);

        if self.capabilities.max_image_count != 0 {
            wanted.min(self.capabilities.max_image_count)
        } else {
            wanted
        }
    }

    /// Gets the resolution of the swapchain images for a window of the given
    /// size in physical pixels.
    fn get_swapchain_extent(&self, window_size: PhysicalSize<u32>) -> vk::Extent2D {
        // A current extent of u32::MAX means the window manager lets us pick,
        // within the min/max bounds.
        if self.capabilities.current_extent.width != u32::MAX {
            self.capabilities.current_extent
        } else {
            vk::Extent2D {
                width: window_size.width.clamp(
                    self.capabilities.min_image_extent.width,
                    self.capabilities.max_image_extent.width,
                ),
                height: window_size.height.clamp(
                    self.capabilities.min_image_extent.height,
                    self.capabilities.max_image_extent.height,
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support(capabilities: vk::SurfaceCapabilitiesKHR) -> SwapchainSupport {
        SwapchainSupport {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn prefers_srgb_bgra_then_first_format() {
        let mut s = support(Default::default());
        assert_eq!(s.get_preferred_surface_format().format, vk::Format::B8G8R8A8_SRGB);

        s.formats.pop();
        assert_eq!(s.get_preferred_surface_format().format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn falls_back_to_fifo() {
        let mut s = support(Default::default());
        assert_eq!(s.get_preferred_present_mode(), vk::PresentModeKHR::FIFO);

        s.present_modes.push(vk::PresentModeKHR::MAILBOX);
        assert_eq!(s.get_preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn image_count_covers_frames_in_flight_within_limits() {
        let s = support(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        });
        assert_eq!(s.get_image_count(), 3);

        let s = support(vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            ..Default::default()
        });
        assert_eq!(s.get_image_count(), 2);
    }

    #[test]
    fn extent_is_clamped_when_surface_lets_us_choose() {
        let s = support(vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        });

        let extent = s.get_swapchain_extent(PhysicalSize::new(4000, 600));
        assert_eq!((extent.width, extent.height), (1920, 600));
    }

    #[test]
    fn current_extent_wins_otherwise() {
        let s = support(vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        });

        let extent = s.get_swapchain_extent(PhysicalSize::new(1024, 768));
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
