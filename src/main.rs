// =============================================================================
// TRIANGULAR - Vulkan bootstrap and per-frame present loop
// =============================================================================
//
// Startup is a strict pipeline, each stage consuming the previous stage's
// output:
//
//   instance -> surface -> physical device -> logical device
//            -> swapchain -> render pass -> pipeline -> framebuffers
//            -> command pool/buffers -> sync objects
//
// After setup the frame loop runs one iteration per presented frame:
//
//   wait fence -> acquire image -> record & submit -> present
//
// Teardown happens in exact reverse order of construction, driven by Drop.
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::swapchain::AcquiredImage;
use backend::sync::FrameSync;
use backend::{pipeline, shader, Swapchain, VulkanDevice};
use config::Config;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // A frame-loop or init failure exits the event loop; surface it as a
    // non-zero process exit with the error on the diagnostic stream.
    match app.fatal_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct holding all Vulkan resources.
///
/// IMPORTANT: resources must be destroyed in reverse order of creation to
/// avoid use-after-free; Drop below encodes that order once.
pub struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    render_pass: Option<vk::RenderPass>,
    pipeline_layout: Option<vk::PipelineLayout>,
    pipeline: Option<vk::Pipeline>,
    framebuffers: Vec<vk::Framebuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: Option<vk::CommandPool>,
    /// One primary command buffer per in-flight slot, re-recorded each frame
    command_buffers: Vec<vk::CommandBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    /// Sync objects for each frame in flight
    frame_sync: Vec<FrameSync>,
    /// Which sync slot we're currently using (0 to frames_in_flight-1)
    current_frame: usize,

    // Pre-allocated to avoid a per-frame heap allocation
    wait_stages: [vk::PipelineStageFlags; 1],

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Swapchain no longer matches the surface - rebuild before next frame
    swapchain_stale: bool,
    /// Window has zero area (minimized) - suspend rendering
    is_minimized: bool,
    /// First fatal error, reported as the process exit status
    fatal_error: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: None,
            device: None,
            swapchain: None,
            render_pass: None,
            pipeline_layout: None,
            pipeline: None,
            framebuffers: Vec::new(),
            command_pool: None,
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            swapchain_stale: false,
            is_minimized: false,
            fatal_error: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Initialize all Vulkan resources, in dependency order.
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, surface, device selection, logical device
        // ─────────────────────────────────────────────────────────────────────
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(window, &self.config.window.title, enable_validation)?;
        self.device = Some(device.clone());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        let swapchain = Swapchain::new(device.clone(), size.width, size.height)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Render pass and pipeline, bound to the swapchain format.
        // Shader modules are only needed while the pipeline is built.
        // ─────────────────────────────────────────────────────────────────────
        let render_pass = pipeline::create_render_pass(&device, swapchain.format)?;

        let vert_code = shader::load_spirv(&self.config.shaders.vertex)?;
        let frag_code = shader::load_spirv(&self.config.shaders.fragment)?;
        let vert_module = shader::create_shader_module(&device, &vert_code)?;
        let frag_module = shader::create_shader_module(&device, &frag_code)?;

        let pipeline_result =
            pipeline::create_graphics_pipeline(&device, render_pass, vert_module, frag_module);

        unsafe {
            device.device.destroy_shader_module(vert_module, None);
            device.device.destroy_shader_module(frag_module, None);
        }
        let (graphics_pipeline, pipeline_layout) = pipeline_result?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Framebuffers (one per swapchain image)
        // ─────────────────────────────────────────────────────────────────────
        let framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Command pool and per-slot command buffers
        // ─────────────────────────────────────────────────────────────────────
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let frames_in_flight = self.config.frames_in_flight();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Synchronization primitives (one set per in-flight slot)
        // ─────────────────────────────────────────────────────────────────────
        let frame_sync = (0..frames_in_flight)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        self.swapchain = Some(swapchain);
        self.render_pass = Some(render_pass);
        self.pipeline = Some(graphics_pipeline);
        self.pipeline_layout = Some(pipeline_layout);
        self.framebuffers = framebuffers;
        self.command_pool = Some(command_pool);
        self.command_buffers = command_buffers;
        self.frame_sync = frame_sync;

        log::info!(
            "Vulkan initialized ({} frames in flight)",
            frames_in_flight
        );
        Ok(())
    }

    /// Rebuild the swapchain and framebuffers against current surface
    /// capabilities. The render pass and pipeline survive: viewport and
    /// scissor are dynamic state.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let device = self.device.as_ref().context("Device not initialized")?.clone();
        let window = self.window.as_ref().context("Window not initialized")?.clone();

        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // Wait for GPU to finish all work before destroying resources
        device.wait_idle()?;

        unsafe {
            for &framebuffer in &self.framebuffers {
                device.device.destroy_framebuffer(framebuffer, None);
            }
        }
        self.framebuffers.clear();

        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let swapchain = Swapchain::new(device.clone(), size.width, size.height)?;
        let render_pass = self.render_pass.context("Render pass not initialized")?;
        self.framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )?;
        self.swapchain = Some(swapchain);
        self.swapchain_stale = false;

        Ok(())
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    /// Record this frame's commands: one render pass, one hardcoded triangle.
    fn record_commands(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let render_pass = self.render_pass.context("Render pass not initialized")?;
        let graphics_pipeline = self.pipeline.context("Pipeline not initialized")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.graphics.clear_color,
            },
        }];

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, graphics_pipeline);

            // Dynamic state: cover the full swapchain extent
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            // Three vertices, one instance; positions live in the shader
            device.cmd_draw(cmd, 3, 1, 0, 0);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. This is the hot path - one iteration of the
    /// wait -> acquire -> record & submit -> present cycle.
    pub fn render_frame(&mut self) -> Result<bool> {
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(false);
        }

        // Handle a stale swapchain before issuing new GPU work
        if self.swapchain_stale {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let device = self.device.as_ref().context("Device not initialized")?;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let sync = &self.frame_sync[self.current_frame];
        let cmd = self.command_buffers[self.current_frame];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait for this slot's previous submission to finish.
        // Guarantees the command buffer is no longer consumed by the GPU.
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            device
                .device
                .wait_for_fences(&[sync.in_flight], true, u64::MAX)
                .context("Fence wait failed")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire the next presentable image. The semaphore, not the
        // return value, signals when the image is actually writable.
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            AcquiredImage::Ready { index, suboptimal } => {
                if suboptimal {
                    self.swapchain_stale = true;
                }
                index
            }
            AcquiredImage::OutOfDate => {
                // Bail without resetting the fence so the next iteration's
                // wait returns immediately
                self.swapchain_stale = true;
                return Ok(false);
            }
        };

        // Reset only after a successful acquire: from here on a submission
        // will re-signal the fence.
        unsafe {
            device
                .device
                .reset_fences(&[sync.in_flight])
                .context("Fence reset failed")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Re-record this slot's command buffer and submit it.
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Command buffer reset failed")?;
        }
        let framebuffer = self.framebuffers[image_index as usize];
        self.record_commands(&device.device, cmd, framebuffer, swapchain.extent)?;

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)      // Wait for image release...
            .wait_dst_stage_mask(&self.wait_stages) // ...at color attachment output
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], sync.in_flight)
                .context("Queue submit failed")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present, waiting on render completion.
        // ─────────────────────────────────────────────────────────────────────
        let needs_rebuild = swapchain.present(
            device.present_queue,
            image_index,
            &[sync.render_finished],
        )?;
        if needs_rebuild {
            self.swapchain_stale = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Advance to the next in-flight slot
        // ─────────────────────────────────────────────────────────────────────
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal_error.is_none() {
            self.fatal_error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST - the loop's only clean termination path
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    // In-flight work is awaited, never cancelled
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.swapchain_stale = true;
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    self.fail(event_loop, e.context("Frame rendering failed"));
                }
            },

            _ => {}
        }
    }

    /// Request continuous redraws while idle.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Wait for GPU to finish before destroying anything
            let _ = device.wait_idle();

            unsafe {
                // Destroy in reverse order of creation

                // 1. Sync objects
                for sync in &self.frame_sync {
                    sync.destroy(&device.device);
                }

                // 2. Command pool (also frees command buffers)
                if let Some(pool) = self.command_pool {
                    device.device.destroy_command_pool(pool, None);
                }

                // 3. Framebuffers
                for &framebuffer in &self.framebuffers {
                    device.device.destroy_framebuffer(framebuffer, None);
                }

                // 4. Pipeline, layout, render pass
                if let Some(graphics_pipeline) = self.pipeline {
                    device.device.destroy_pipeline(graphics_pipeline, None);
                }
                if let Some(layout) = self.pipeline_layout {
                    device.device.destroy_pipeline_layout(layout, None);
                }
                if let Some(render_pass) = self.render_pass {
                    device.device.destroy_render_pass(render_pass, None);
                }
            }

            // 5. Swapchain drops its views and chain
            self.swapchain = None;

            // 6. Device, surface, instance drop last (Arc)
        }

        log::info!("Cleanup complete");
    }
}
