//! Vulkan Simulation Engine - Main Entry Point
//!
//! Opens a window, brings up the engine and draws background compute
//! effects every frame until the window is closed.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use sim_core::{EngineConfig, Timer};
use sim_platform::Window;
use sim_renderer::{Engine, RendererError};

const FRAME_REPORT_INTERVAL: Duration = Duration::from_secs(5);

struct App {
    config: EngineConfig,
    // Declared before the window: the surface must go first.
    engine: Option<Engine>,
    window: Option<Window>,
    timer: Timer,
    /// Startup failure reported once the event loop returns.
    init_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            window: None,
            timer: Timer::new(),
            init_error: None,
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.as_mut() {
            engine.cleanup();
        }
        event_loop.exit();
    }
}

/// Logs the result code of a failed GPU call and aborts.
fn fatal(err: &RendererError) -> ! {
    match err.vk_result() {
        Some(code) => error!("Detected Vulkan error: {:?}", code),
        None => error!("Fatal engine error: {}", err),
    }
    std::process::abort();
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.config.window_extent();
        let window = match Window::new(event_loop, width, height, &self.config.window_title) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                self.init_error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match Engine::init(&window, &self.config) {
            Ok(engine) => {
                info!("Initialization complete, entering main loop");
                self.engine = Some(engine);
                self.window = Some(window);
            }
            Err(e) if e.is_fatal_gpu() => fatal(&e),
            Err(e) => {
                error!("Failed to initialize engine: {}", e);
                self.init_error = Some(e.into());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let (Some(engine), Some(window)) = (self.engine.as_mut(), self.window.as_ref())
            && engine.handle_window_event(window, &event)
        {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(engine) = self.engine.as_mut() {
                    engine.resize(size.width, size.height);
                }
            }
            WindowEvent::Occluded(occluded) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_minimized(occluded);
                }
            }
            WindowEvent::RedrawRequested => {
                self.timer.tick();
                if let Some(report) = self.timer.take_report(FRAME_REPORT_INTERVAL) {
                    debug!(
                        "{:.2} ms/frame ({:.0} fps)",
                        report.average_frame_ms(),
                        report.fps()
                    );
                }

                if let (Some(engine), Some(window)) = (self.engine.as_mut(), self.window.as_ref())
                    && let Err(e) = engine.draw(window)
                {
                    fatal(&e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.as_mut() {
            engine.cleanup();
        }
    }
}

fn main() -> Result<()> {
    sim_core::init_logging();
    info!("Starting Vulkan Simulation Engine");

    let config = EngineConfig::from_env();
    config.validate()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.init_error.take() {
        return Err(anyhow!("startup failed: {:#}", e));
    }

    info!(
        "Shut down after {} frames in {:.1}s",
        app.engine.as_ref().map_or(0, Engine::frame_number),
        app.timer.elapsed_secs()
    );
    Ok(())
}
