use crate::{
    completion::CompletionWatcher,
    pacing::{FramePacer, FrameTicket},
    renderer::{
        buffers::{create_mesh_buffers, destroy_mesh_buffers},
        commands::{create_command_buffers, create_command_pool, record_frame},
        depth_tests::{create_depth_objects, destroy_depth_objects, get_depth_format},
        devices::{create_logical_device, pick_physical_device},
        extensions::Extensions,
        instance::create_instance,
        pipeline::{create_framebuffers, create_pipeline, create_render_pass},
        swapchain::{create_swapchain, create_swapchain_image_views},
        synchronization::{create_sync_objects, destroy_sync_objects, FenceWaiter},
        uniforms::{
            create_descriptor_set, create_descriptor_set_layout, create_uniform_ring,
            destroy_descriptor_pool, destroy_uniform_ring, UniformRing,
        },
        validation::should_enable_validation_layers,
    },
    stage::Stage,
    transforms::{Camera, Uniforms},
    vertex::Mesh,
    MAX_FRAMES_IN_FLIGHT,
};

use std::time::Instant;

use ash::{
    extensions::{ext as vk_ext, khr as vk_khr},
    vk, Device, Entry, Instance,
};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use tracing::{debug, info};
use winit::window::Window;

/// Renders one tutorial [`Stage`] into a window with Vulkan, keeping at most
/// [`MAX_FRAMES_IN_FLIGHT`] frames queued on the GPU.
pub struct App {
    entry: Entry,
    instance: Instance,
    data: AppData,
    device: Device,
    extensions: Extensions,
    stage: Stage,

    /// Hands out a ticket, and with it a uniform slot, to each frame.
    pacer: FramePacer,

    /// Completes each frame's ticket once the GPU has finished it.
    completions: CompletionWatcher<FenceWaiter>,

    /// Set when the window has been resized and the swapchain needs to be
    /// rebuilt before the next frame is presented.
    resized: bool,

    camera: Camera,

    /// When the previous frame started, for keeping the rotation speed
    /// independent of the frame rate.
    last_frame_time: Instant,
}

/// Vulkan handles and associated properties used by our Vulkan [`App`].
#[derive(Clone, Debug, Default)]
pub struct AppData {
    pub surface: vk::SurfaceKHR,

    pub physical_device: vk::PhysicalDevice,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,

    pub render_pass: vk::RenderPass,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,

    /// One per swapchain image.
    pub framebuffers: Vec<vk::Framebuffer>,

    pub depth_format: vk::Format,
    pub depth_image: vk::Image,
    pub depth_image_memory: vk::DeviceMemory,
    pub depth_image_view: vk::ImageView,

    /// The geometry being drawn. `None` for stages that only clear.
    pub mesh: Option<Mesh>,
    pub vertex_buffer: vk::Buffer,
    pub vertex_buffer_memory: vk::DeviceMemory,
    pub index_buffer: vk::Buffer,
    pub index_buffer_memory: vk::DeviceMemory,

    pub(crate) uniform_ring: UniformRing,
    pub descriptor_pool: vk::DescriptorPool,
    /// Bound with a dynamic offset selecting the frame's uniform slot.
    pub descriptor_set: vk::DescriptorSet,

    pub command_pool: vk::CommandPool,
    /// One per frame slot, re-recorded every frame. Destroyed along with
    /// the pool they're allocated from.
    pub command_buffers: Vec<vk::CommandBuffer>,

    /// Per frame slot: signalled once an image has been acquired from the
    /// swapchain and is ready for rendering.
    pub image_available_semaphores: Vec<vk::Semaphore>,
    /// Per frame slot: signalled when rendering has finished and presentation
    /// may begin.
    pub render_finished_semaphores: Vec<vk::Semaphore>,
    /// Per frame slot: signalled by the GPU when the slot's submission is done.
    /// Waited on by the completion watcher, never by the render thread.
    pub in_flight_fences: Vec<vk::Fence>,

    /// For handling debug messages sent from Vulkan's validation layers.
    pub messenger: vk::DebugUtilsMessengerEXT,
}

impl App {
    /// Creates the Vulkan app, binding it to a surface on `window`, ready to
    /// render `stage`.
    ///
    /// # Safety
    ///
    /// Makes a great many calls to the Vulkan API. `window` must outlive the
    /// app, and [`App::destroy()`] must be called before it's dropped.
    #[tracing::instrument(level = "DEBUG", name = "App::create", skip(window))]
    pub unsafe fn create(window: &Window, stage: Stage) -> Result<Self> {
        let mut data = AppData::default();

        debug!("Loading Vulkan library");
        let entry = Entry::load()
            .map_err(|e| eyre!("{e}"))
            .wrap_err("Error loading Vulkan library")?;
        let instance = create_instance(window, &entry, &mut data)?;

        debug!("Creating render surface on main window");
        data.surface = ash_window::create_surface(&entry, &instance, window, None)?;

        debug!("Selecting render device");
        pick_physical_device(&entry, &instance, &mut data)?;
        let device = create_logical_device(&entry, &instance, &mut data)?;

        // Cache extension loaders
        let extensions = Extensions {
            surface: vk_khr::Surface::new(&entry, &instance),
            swapchain: vk_khr::Swapchain::new(&instance, &device),
        };

        debug!("Creating swapchain");
        create_swapchain(window, &entry, &instance, &extensions.swapchain, &mut data)?;
        create_swapchain_image_views(&device, &mut data)?;

        debug!("Creating depth buffer");
        data.depth_format = get_depth_format(&instance, &data)?;
        create_depth_objects(&instance, &device, &mut data)?;

        debug!("Creating render pipeline");
        create_render_pass(&device, &mut data)?;
        create_descriptor_set_layout(&device, &mut data)?;
        create_pipeline(&device, &mut data)?;
        create_framebuffers(&device, &mut data)?;

        debug!("Uploading geometry and creating the uniform ring");
        if let Some(mesh) = stage.mesh() {
            create_mesh_buffers(&instance, &device, &mut data, &mesh)?;
        }
        create_uniform_ring(&instance, &device, &mut data)?;
        create_descriptor_set(&device, &mut data)?;

        debug!("Creating command buffers and synchronization objects");
        create_command_pool(&entry, &instance, &device, &mut data)?;
        create_command_buffers(&device, &mut data)?;
        create_sync_objects(&device, &mut data)?;

        let completions = CompletionWatcher::spawn(FenceWaiter::new(device.clone()))?;

        info!(%stage, frames_in_flight = MAX_FRAMES_IN_FLIGHT, "Renderer ready");

        Ok(Self {
            entry,
            instance,
            data,
            device,
            extensions,
            stage,
            pacer: FramePacer::new(MAX_FRAMES_IN_FLIGHT),
            completions,
            resized: false,
            camera: Camera::default(),
            last_frame_time: Instant::now(),
        })
    }

    /// Trigger an app resize. Call this if the window manager has indicated that
    /// the window has resized. The swapchain and everything sized to it will be
    /// rebuilt during the next [`App::render()`].
    #[inline]
    pub fn trigger_resize(&mut self) {
        self.resized = true;
    }

    /// Rebuild the swapchain and everything that depends on its images or
    /// extent: image views, depth buffer, render pass, pipeline, framebuffers.
    ///
    /// # Safety
    ///
    /// No frame ticket may be held by the caller, or this waits forever.
    #[tracing::instrument(level = "DEBUG", name = "App::recreate_swapchain", skip_all)]
    unsafe fn recreate_swapchain(&mut self, window: &Window) -> Result<()> {
        self.pacer.wait_idle();
        self.device.device_wait_idle()?;
        self.destroy_swapchain();

        create_swapchain(
            window,
            &self.entry,
            &self.instance,
            &self.extensions.swapchain,
            &mut self.data,
        )?;
        create_swapchain_image_views(&self.device, &mut self.data)?;
        create_depth_objects(&self.instance, &self.device, &mut self.data)?;
        create_render_pass(&self.device, &mut self.data)?;
        create_pipeline(&self.device, &mut self.data)?;
        create_framebuffers(&self.device, &mut self.data)?;

        self.resized = false;

        Ok(())
    }

    /// Render one frame. Blocks while [`MAX_FRAMES_IN_FLIGHT`] frames are
    /// already queued on the GPU.
    ///
    /// # Safety
    ///
    /// Must not be called after [`App::destroy()`].
    pub unsafe fn render(&mut self, window: &Window) -> Result<()> {
        // Returning early anywhere below drops the ticket, which frees the
        // slot again.
        let ticket = self.pacer.begin_frame();
        let slot = ticket.slot();

        let result = self.extensions.swapchain.acquire_next_image(
            self.data.swapchain,
            u64::MAX,
            self.data.image_available_semaphores[slot],
            vk::Fence::null(),
        );

        let image_index = match result {
            Ok((image_index, _suboptimal)) => image_index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                drop(ticket);
                return self.recreate_swapchain(window);
            }
            Err(e) => {
                return Err(eyre!(
                    "Acquiring swapchain image failed due to Vulkan error: [{0:?}] {0}",
                    e
                ))
            }
        };

        self.update_uniforms(slot)?;

        let command_buffer =
            record_frame(&self.device, &self.data, self.stage, image_index as usize, slot)?;

        self.submit(command_buffer, ticket)?;

        let swapchains = &[self.data.swapchain];
        let image_indices = &[image_index];
        let signal_semaphores = &[self.data.render_finished_semaphores[slot]];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = self
            .extensions
            .swapchain
            .queue_present(self.data.present_queue, &present_info);

        match present_outcome(result, self.resized) {
            Ok(PresentOutcome::Presented) => {}
            Ok(PresentOutcome::Recreate) => self.recreate_swapchain(window)?,
            Err(e) => {
                return Err(eyre!(
                    "Failed to queue image in swapchain for presentation due to Vulkan error: [{0:?}] {0}",
                    e
                ))
            }
        }

        Ok(())
    }

    /// Submit a recorded frame and register its completion callback, which
    /// hands the ticket's permit back once the GPU is done.
    unsafe fn submit(&self, command_buffer: vk::CommandBuffer, ticket: FrameTicket) -> Result<()> {
        let slot = ticket.slot();
        let fence = self.data.in_flight_fences[slot];

        let wait_semaphores = &[self.data.image_available_semaphores[slot]];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[command_buffer];
        let signal_semaphores = &[self.data.render_finished_semaphores[slot]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        // Holding the ticket means the last submission using this fence has
        // completed and the watcher is done with it.
        self.device.reset_fences(&[fence])?;
        self.device
            .queue_submit(self.data.graphics_queue, &[*submit_info], fence)
            .wrap_err("Failed to submit frame")?;

        self.completions.watch(fence, ticket)
    }

    /// Compute this frame's transform and write it into `slot` of the
    /// uniform ring.
    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        let now = Instant::now();
        let delta_t = (now - self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        let uniforms = if self.stage.animates() {
            self.camera.advance(delta_t);

            let extent = self.data.swapchain_extent;
            self.camera
                .uniforms(extent.width as f32 / extent.height.max(1) as f32)
        } else {
            Uniforms::default()
        };

        // SAFETY: the caller holds the ticket for `slot`.
        unsafe { self.data.uniform_ring.write(slot, &uniforms) }
    }

    /// Wait for every submitted frame to finish. Use this before destroying
    /// the app.
    ///
    /// # Safety
    ///
    /// Makes a raw call to Vulkan, which executes arbitrary driver code.
    pub unsafe fn wait_for_device_idle(&self) -> Result<()> {
        self.pacer.wait_idle();
        self.device.device_wait_idle()?;
        Ok(())
    }

    /// Destroys the Vulkan app. If this isn't called, then resources may be leaked.
    ///
    /// # Safety
    ///
    /// The app must not be used afterwards.
    #[tracing::instrument(level = "DEBUG", name = "App::destroy", skip_all)]
    pub unsafe fn destroy(&mut self) {
        // Every frame must have completed before the fences disappear.
        self.pacer.wait_idle();
        self.completions.shutdown();
        if let Err(err) = self.device.device_wait_idle() {
            debug!(%err, "Device did not go idle before destruction");
        }

        self.destroy_swapchain();

        destroy_descriptor_pool(&self.device, &self.data);
        self.device
            .destroy_descriptor_set_layout(self.data.descriptor_set_layout, None);
        destroy_uniform_ring(&self.device, &mut self.data);
        destroy_mesh_buffers(&self.device, &self.data);
        destroy_sync_objects(&self.device, &self.data);

        self.device
            .destroy_command_pool(self.data.command_pool, None);

        self.device.destroy_device(None);

        self.extensions
            .surface
            .destroy_surface(self.data.surface, None);

        if should_enable_validation_layers() {
            vk_ext::DebugUtils::new(&self.entry, &self.instance)
                .destroy_debug_utils_messenger(self.data.messenger, None);
        }

        self.instance.destroy_instance(None);
    }

    /// Destroy objects associated with the swapchain.
    #[tracing::instrument(level = "DEBUG", name = "App::destroy_swapchain", skip_all)]
    unsafe fn destroy_swapchain(&mut self) {
        self.data
            .framebuffers
            .iter()
            .for_each(|f| self.device.destroy_framebuffer(*f, None));

        destroy_depth_objects(&self.device, &self.data);

        self.device.destroy_pipeline(self.data.pipeline, None);
        self.device
            .destroy_pipeline_layout(self.data.pipeline_layout, None);
        self.device.destroy_render_pass(self.data.render_pass, None);

        self.data
            .swapchain_image_views
            .iter()
            .for_each(|v| self.device.destroy_image_view(*v, None));
        self.extensions
            .swapchain
            .destroy_swapchain(self.data.swapchain, None);
    }
}

/// What [`App::render()`] does after queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PresentOutcome {
    Presented,
    Recreate,
}

/// Sort a `queue_present` result. Real errors win over a pending resize, so a
/// lost device isn't papered over by rebuilding the swapchain.
fn present_outcome(
    result: Result<bool, vk::Result>,
    resized: bool,
) -> Result<PresentOutcome, vk::Result> {
    match result {
        Ok(false) if !resized => Ok(PresentOutcome::Presented),
        Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Recreate),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suboptimal_out_of_date_or_resized_recreates() {
        assert_eq!(present_outcome(Ok(false), false), Ok(PresentOutcome::Presented));
        assert_eq!(present_outcome(Ok(false), true), Ok(PresentOutcome::Recreate));
        assert_eq!(present_outcome(Ok(true), false), Ok(PresentOutcome::Recreate));
        assert_eq!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), false),
            Ok(PresentOutcome::Recreate)
        );
    }

    #[test]
    fn present_errors_are_reported_even_when_resized() {
        for resized in [false, true] {
            assert_eq!(
                present_outcome(Err(vk::Result::ERROR_DEVICE_LOST), resized),
                Err(vk::Result::ERROR_DEVICE_LOST)
            );
        }
    }
}
