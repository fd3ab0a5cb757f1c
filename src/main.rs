//! Negotiation demo.
//!
//! Opens a window, picks the best GPU for the configured capabilities,
//! builds a logical device and a swapchain for the window, and keeps the
//! swapchain matched to the window size until the window closes.

use anyhow::{Context, Result};
use gpu_negotiator::backend::{
    self, instance, Capability, LogicalDevice, RuntimeSettings, Surface, Swapchain,
};
use gpu_negotiator::config::Config;
use gpu_negotiator::GpuError;
use raw_window_handle::HasDisplayHandle;
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

fn main() -> Result<()> {
    let config = Config::load();
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .init();

    log::info!(
        "gpu-negotiator: capabilities {:?}, extensions {:?}",
        config.device.capabilities,
        config.device.requested_extensions
    );

    let event_loop = EventLoop::new()?;
    event_loop.run_app(&mut Demo::new(config))?;
    Ok(())
}

/// Everything negotiated for one window.
///
/// Fields drop top to bottom: swapchain, device, surface.
struct Session {
    swapchain: Option<Swapchain>,
    device: Arc<LogicalDevice>,
    surface: Arc<Surface>,
}

impl Session {
    fn negotiate(config: &Config, window: &Arc<Window>) -> Result<Self> {
        let display = window
            .display_handle()
            .context("window has no display handle")?
            .as_raw();
        let runtime = instance::initialize(&RuntimeSettings {
            app_name: config.window.title.clone(),
            enable_validation: cfg!(debug_assertions) && config.debug.validation_layers,
            display: Some(display),
        })
        .context("Vulkan runtime unavailable")?;

        let capabilities = &config.device.capabilities;
        let devices = backend::enumerate_devices()?;
        let chosen = backend::select_best_device_supporting(&devices, capabilities)
            .context("no GPU offers the requested capabilities")?;
        log::info!("using {}", chosen);

        let surface = Surface::new(&runtime, Arc::clone(window))?;
        let device = LogicalDevice::new(
            &runtime,
            chosen,
            &config.device.requested_extensions,
            capabilities,
            Some(&surface),
        )?;
        report_queues(&device);

        let mut session = Self {
            swapchain: None,
            device,
            surface,
        };
        session.rebuild_swapchain(config)?;
        Ok(session)
    }

    /// Build the swapchain, or rebuild it for the current window size.
    /// A zero-sized (minimized) window leaves the current one untouched.
    fn rebuild_swapchain(&mut self, config: &Config) -> Result<()> {
        let (width, height) = self.surface.framebuffer_size();
        if width == 0 || height == 0 {
            log::debug!("window minimized, swapchain left as is");
            return Ok(());
        }

        self.device.wait_idle()?;
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.recreate().context("swapchain recreation failed")?;
        } else {
            match Swapchain::new(
                Arc::clone(&self.device),
                Arc::clone(&self.surface),
                Some(config.present_mode()),
            ) {
                Ok(swapchain) => self.swapchain = Some(swapchain),
                Err(GpuError::PresentationUnsupported) => {
                    log::warn!("device cannot present to this window, continuing without a swapchain");
                    return Ok(());
                }
                Err(e) => return Err(e).context("swapchain creation failed"),
            }
        }

        if let Some(swapchain) = &self.swapchain {
            let config = swapchain.config();
            log::info!(
                "swapchain {}x{}: {} image(s), {:?}/{:?}, {:?}, {:?}",
                config.extent.width,
                config.extent.height,
                swapchain.images().len(),
                config.format.format,
                config.format.color_space,
                config.present_mode,
                config.sharing
            );
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("device did not go idle before teardown: {}", e);
        }
    }
}

fn report_queues(device: &LogicalDevice) {
    for capability in Capability::ALL {
        match device.queue(capability) {
            Some(queue) => log::info!(
                "{:>12} -> family {} queue {}",
                capability,
                queue.family_index(),
                queue.queue_index()
            ),
            None => log::info!("{:>12} -> none", capability),
        }
    }
}

struct Demo {
    config: Config,
    session: Option<Session>,
    window: Option<Arc<Window>>,
    resize_pending: bool,
}

impl Demo {
    fn new(config: Config) -> Self {
        Self {
            config,
            session: None,
            window: None,
            resize_pending: false,
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(self.config.window.title.as_str())
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);
        self.window = Some(Arc::clone(&window));
        self.session = Some(Session::negotiate(&self.config, &window)?);
        Ok(())
    }
}

impl ApplicationHandler for Demo {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.open(event_loop) {
            log::error!("negotiation failed: {:?}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                event_loop.exit()
            }
            WindowEvent::Resized(size) => {
                log::debug!("resized to {}x{}", size.width, size.height);
                self.resize_pending = size.width > 0 && size.height > 0;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !std::mem::take(&mut self.resize_pending) {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.rebuild_swapchain(&self.config) {
                log::error!("{:?}", e);
            }
        }
    }
}

impl Drop for Demo {
    fn drop(&mut self) {
        // session objects hold the runtime; release them before terminating it
        self.session = None;
        instance::terminate();
        log::info!("shut down");
    }
}
