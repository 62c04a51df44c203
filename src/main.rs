//! `penumbra`: build a pipeline from a preset or a saved graphics config and
//! report what it allocated.
//!
//! Without `--window` the pipeline is built on the in-memory host. With it, a
//! window is opened and the pipeline runs on the wgpu host, following window
//! resizes and reloading edited shaders.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use penumbra::{
    ConfigError, DEFAULT_VERSION_LINE, DeferredRenderer, GpuContext, GraphicsConfig, HeadlessHost,
    Preset, RenderHost, RendererConfig, UVec2, WgpuHost,
};

/// The wgpu GLSL frontend only accepts 440 and later.
const WGPU_VERSION_LINE: &str = "#version 450";

#[derive(Parser, Debug)]
#[command(name = "penumbra", version, about = "Build a deferred pipeline and report its stages")]
#[command(group(ArgGroup::new("source").args(["preset", "config"])))]
struct Args {
    /// Built-in quality preset (custom, full, medium, minimal)
    #[arg(long, value_name = "NAME")]
    preset: Option<Preset>,
    /// Saved graphics config to load instead of a preset
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Root directory of shaders and textures
    #[arg(long, value_name = "DIR", default_value = ".")]
    assets: PathBuf,
    /// Initial window size
    #[arg(long, value_name = "WxH", default_value = "1280x720", value_parser = parse_size)]
    size: UVec2,
    /// Resize the window after building
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    resize: Option<UVec2>,
    /// Write the resulting graphics config to this file
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,
    /// Open a window and run on the GPU
    #[arg(long)]
    window: bool,
    /// Version line that shader sources start with
    #[arg(long, value_name = "LINE")]
    shader_version: Option<String>,
}

impl Args {
    fn graphics(&self) -> Result<GraphicsConfig, ConfigError> {
        match (&self.config, self.preset) {
            (Some(path), _) => GraphicsConfig::load(path),
            (None, Some(preset)) => Ok(GraphicsConfig::from_preset(preset)),
            (None, None) => Ok(GraphicsConfig::default()),
        }
    }

    fn renderer_config(&self, graphics: &GraphicsConfig) -> RendererConfig {
        let default_version = if self.window {
            WGPU_VERSION_LINE
        } else {
            DEFAULT_VERSION_LINE
        };
        let version = self.shader_version.as_deref().unwrap_or(default_version);
        RendererConfig::new(&self.assets)
            .with_graphics(graphics)
            .with_version_line(version)
    }
}

fn parse_size(value: &str) -> Result<UVec2, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("bad width in '{value}'"))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("bad height in '{value}'"))?;
    if w == 0 || h == 0 {
        return Err(format!("size must be non-zero, got '{value}'"));
    }
    Ok(UVec2::new(w, h))
}

fn report<H: RenderHost>(renderer: &DeferredRenderer<H>) {
    let size = renderer.window_size();
    println!("window {}x{}", size.x, size.y);
    for stage in renderer.filters().stages() {
        let target = match stage.target().and_then(|t| renderer.host().target_size(t)) {
            Some(size) => format!("{}x{}", size.x, size.y),
            None => "screen".to_string(),
        };
        let desc = stage.descriptor();
        println!("  [{}] {} -> {}", desc.shader, stage.name(), target);
        for (key, value) in &desc.inputs {
            println!("      {key} = {value:?}");
        }
        for (key, value) in &desc.defines {
            println!("      #define {key} {value}");
        }
        for (source, input) in &desc.translate {
            println!("      {source} as {input}");
        }
    }
}

fn dry_run(args: &Args, graphics: &GraphicsConfig) -> penumbra::Result<()> {
    let host = HeadlessHost::new(args.size).with_asset_root(&args.assets);
    let config = args.renderer_config(graphics);
    let mut renderer = DeferredRenderer::from_graphics(host, config, graphics)?;
    report(&renderer);

    if let Some(size) = args.resize {
        renderer.host_mut().set_window_size(size);
        if renderer.resize(size)? {
            println!("after resize:");
            report(&renderer);
        }
    }

    if let Some(path) = &args.save {
        renderer.graphics_config().save(path)?;
    }
    Ok(())
}

struct App {
    args: Args,
    graphics: GraphicsConfig,
    window: Option<Arc<Window>>,
    renderer: Option<DeferredRenderer<WgpuHost>>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<(), String> {
        let attributes = Window::default_attributes()
            .with_title("penumbra")
            .with_inner_size(PhysicalSize::new(self.args.size.x, self.args.size.y));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| e.to_string())?,
        );
        let gpu = GpuContext::new(window.clone()).map_err(|e| e.to_string())?;
        let host = WgpuHost::new(gpu, &self.args.assets);
        let config = self.args.renderer_config(&self.graphics);
        let renderer = DeferredRenderer::from_graphics(host, config, &self.graphics)
            .map_err(|e| e.to_string())?;
        report(&renderer);

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            log::error!("Failed to start: {err}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                if let Some(path) = &self.args.save {
                    if let Err(err) = renderer.graphics_config().save(path) {
                        log::error!("{err}");
                    }
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                renderer
                    .host_mut()
                    .resize_window(UVec2::new(size.width, size.height));
                if let Err(err) = renderer.handle_window_event(&event) {
                    log::error!("Resize failed: {err}");
                }
            }
            WindowEvent::RedrawRequested => {
                renderer.update();
                for stage in renderer.check_hot_reload() {
                    log::info!("Reloaded stage '{stage}'");
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .filter_module("naga", log::LevelFilter::Error)
        .init();

    let args = Args::parse();
    let graphics = match args.graphics() {
        Ok(graphics) => graphics,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if !args.window {
        return match dry_run(&args, &graphics) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                log::error!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            log::error!("No event loop: {err}");
            return ExitCode::FAILURE;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        args,
        graphics,
        window: None,
        renderer: None,
    };
    match event_loop.run_app(&mut app) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
