use std::sync::Arc;
use std::time::Instant;

use glam::{UVec3, Vec3};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use seepflow::field::GridMapping;
use seepflow::{
    ComputeDevice, DeviceOptions, FieldSampleSet, Layer, Problem, SeepFlow, VisualizationConfig,
};

struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    seepflow: SeepFlow,
}

impl Gpu {
    async fn new(
        window: Arc<Window>,
        config: &VisualizationConfig,
        field: &FieldSampleSet,
    ) -> Result<Self, Problem> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?;

        let compute = ComputeDevice::for_surface(&instance, &surface, &DeviceOptions::default()).await?;

        let capabilities = surface.get_capabilities(compute.adapter());
        let swapchain_format = capabilities.formats.first().copied().ok_or_else(|| {
            Problem::DeviceUnavailable("the surface supports no texture formats".to_string())
        })?;

        let physical_size = window.inner_size();
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: swapchain_format,
            width: physical_size.width.max(1),
            height: physical_size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&compute.device, &surface_config);

        let mut seepflow = SeepFlow::new(
            compute,
            swapchain_format,
            surface_config.width,
            surface_config.height,
            config.clone(),
        )?;

        let report = seepflow.load_field(field)?;
        log::info!(
            "Field statistics: mean speed {:.3}, median {:.3}, max gradient {:.3}, {} contour segments",
            report.statistics.mean_speed,
            report.statistics.median_speed,
            report.statistics.max_gradient,
            report.contour_segments
        );

        Ok(Self {
            window,
            surface,
            surface_config,
            seepflow,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.surface
            .configure(&self.seepflow.device().device, &self.surface_config);
        self.seepflow
            .resize(self.surface_config.width, self.surface_config.height);
    }

    fn redraw(&mut self, timestamp: f64) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder =
            self.seepflow
                .device()
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("seepflow-desktop::frame"),
                });

        self.seepflow.animate(&mut encoder, &view, timestamp);

        self.seepflow.device().queue.submit(Some(encoder.finish()));
        frame.present();

        Ok(())
    }
}

struct Application {
    config: VisualizationConfig,
    field: FieldSampleSet,
    gpu: Option<Gpu>,
    start: Instant,
    dragging: bool,
    last_cursor: Option<(f64, f64)>,
}

impl ApplicationHandler for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Seepflow")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 800));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Cannot open a window: {}", err);
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Gpu::new(Arc::clone(&window), &self.config, &self.field)) {
            Ok(gpu) => {
                window.request_redraw();
                self.gpu = Some(gpu);
            }
            Err(err) => {
                log::error!("{}", err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(gpu) = &mut self.gpu else {
            return;
        };

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Released,
                        ..
                    },
                ..
            } => {
                gpu.seepflow.dispose();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Released,
                        ..
                    },
                ..
            } => {
                let layer = match code {
                    KeyCode::Digit1 => Layer::Particles,
                    KeyCode::Digit2 => Layer::Streamlines,
                    KeyCode::Digit3 => Layer::Contours,
                    KeyCode::Digit4 => Layer::Arrows,
                    _ => return,
                };
                let visible = !gpu.seepflow.is_layer_visible(layer);
                gpu.seepflow.set_layer_visible(layer, visible);
                log::info!("{:?} {}", layer, if visible { "shown" } else { "hidden" });
            }
            WindowEvent::Resized(physical_size) => {
                gpu.resize(physical_size.width, physical_size.height);
                gpu.window.request_redraw();
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.dragging = state == ElementState::Pressed;
                    if !self.dragging {
                        self.last_cursor = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.dragging {
                    if let Some((last_x, last_y)) = self.last_cursor {
                        let dx = (position.x - last_x) as f32;
                        let dy = (position.y - last_y) as f32;
                        gpu.seepflow.camera_mut().orbit(-dx * 0.005, dy * 0.005);
                    }
                    self.last_cursor = Some((position.x, position.y));
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 * 0.1,
                };
                gpu.seepflow
                    .camera_mut()
                    .zoom((1.0 - 0.1 * scroll).clamp(0.5, 1.5));
            }
            WindowEvent::RedrawRequested => {
                let timestamp = self.start.elapsed().as_secs_f64() * 1000.0;
                match gpu.redraw(timestamp) {
                    Ok(()) => (),
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let (width, height) = (gpu.surface_config.width, gpu.surface_config.height);
                        gpu.resize(width, height);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of memory, exiting");
                        event_loop.exit();
                        return;
                    }
                    Err(err) => log::warn!("Dropped frame: {}", err),
                }
                gpu.window.request_redraw();
            }
            _ => (),
        }
    }
}

// Flow under a cutoff wall at x = 0: water dives beneath the wall and speeds
// up around its tip.
fn demo_field(mapping: &GridMapping) -> FieldSampleSet {
    let wall_tip = Vec3::new(0.0, 0.0, -2.0);

    FieldSampleSet::from_grid(mapping, |position| {
        let offset = position - wall_tip;
        let focus = (-offset.length_squared() / 120.0).exp();
        // Down on the upstream side, up on the downstream side.
        let rise = if position.z > wall_tip.z {
            offset.x.signum() * 1.5 * focus
        } else {
            0.0
        };
        let velocity = Vec3::new(1.0 + 2.0 * focus, 0.1 * (position.x * 0.1).sin(), rise);
        let pressure = 100.0 - position.x;
        let gradient = 0.15 + 0.9 * focus;
        (velocity, pressure, gradient)
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let field_path = args.next();
    let mut config = match args.next() {
        Some(path) => VisualizationConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => VisualizationConfig::default(),
    };

    let field = match field_path {
        Some(path) => {
            log::info!("Reading field from {}", path);
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => {
            log::info!("No field given, using the cutoff wall demo");
            let mapping = GridMapping::new(
                Vec3::new(-50.0, -25.0, -10.0),
                Vec3::new(50.0, 25.0, 10.0),
                UVec3::new(48, 24, 12),
            );
            config.grid.dims = mapping.dims.to_array();
            config.grid.domain_min = Some(mapping.domain_min.to_array());
            config.grid.domain_max = Some(mapping.domain_max.to_array());
            demo_field(&mapping)
        }
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = Application {
        config,
        field,
        gpu: None,
        start: Instant::now(),
        dragging: false,
        last_cursor: None,
    };
    event_loop.run_app(&mut app)?;

    Ok(())
}
