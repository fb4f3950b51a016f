//! Vulkan synchronization objects, and fence-based frame completion.

use crate::{app::AppData, completion::CompletionSource, MAX_FRAMES_IN_FLIGHT};
use ash::{vk, Device};
use color_eyre::Result;

/// Create one set of semaphores and one fence per frame slot.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_sync_objects(device: &Device, data: &mut AppData) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let fence_info = vk::FenceCreateInfo::builder();

    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        data.image_available_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
        data.render_finished_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);

        data.in_flight_fences
            .push(device.create_fence(&fence_info, None)?);
    }

    Ok(())
}

/// Destroy the objects created by [`create_sync_objects()`].
pub(crate) unsafe fn destroy_sync_objects(device: &Device, data: &AppData) {
    data.render_finished_semaphores
        .iter()
        .for_each(|s| device.destroy_semaphore(*s, None));
    data.image_available_semaphores
        .iter()
        .for_each(|s| device.destroy_semaphore(*s, None));

    data.in_flight_fences
        .iter()
        .for_each(|f| device.destroy_fence(*f, None));
}

/// Waits for the fence a frame's queue submission signals.
///
/// Each fence is only waited on here while its frame is in flight, and only
/// reset by the render thread after that frame's ticket has come back, so the
/// two threads never touch the same fence at once.
pub(crate) struct FenceWaiter {
    device: Device,
}

impl FenceWaiter {
    pub(crate) fn new(device: Device) -> Self {
        Self { device }
    }
}

impl CompletionSource for FenceWaiter {
    type Token = vk::Fence;
    type Error = vk::Result;

    fn wait(&self, fence: &vk::Fence) -> Result<(), vk::Result> {
        unsafe { self.device.wait_for_fences(std::slice::from_ref(fence), true, u64::MAX) }
    }
}
