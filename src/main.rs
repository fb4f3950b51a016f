use clap::Parser;
use color_eyre::Result;
use spinning_cube::{app::App, stage::Stage};
use tracing::{debug, error, info};
use winit::{
    dpi::LogicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

/// Clear the screen, draw a triangle, or spin a cube, with Vulkan.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Which step of the tutorial to render
    #[arg(long, short = 's', value_enum, default_value_t = Stage::Cube)]
    stage: Stage,

    /// Initial window width, in logical pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Initial window height, in logical pixels
    #[arg(long, default_value_t = 768)]
    height: u32,
}

fn main() -> Result<()> {
    setup_logging()?;

    let args = Args::parse();
    let (event_loop, window) = build_window(&args)?;

    info!(stage = %args.stage, "Initializing app");
    let mut app = unsafe { App::create(&window, args.stage)? };
    let mut destroying = false;

    info!("Running event loop");
    event_loop.run(move |event, _, control_flow| {
        // Keep polling so a new frame is issued as soon as the pacer allows.
        *control_flow = ControlFlow::Poll;

        match event {
            // Render a frame if the app is alive and the window isn't minimized
            Event::MainEventsCleared if !destroying && !is_minimized(&window) => {
                if let Err(err) = unsafe { app.render(&window) } {
                    error!(?err, "Failed to render frame");
                    destroying = true;
                    *control_flow = ControlFlow::Exit;

                    unsafe { shut_down(&mut app) };
                }
            }

            Event::WindowEvent {
                event: WindowEvent::Resized(size),
                ..
            } => {
                debug!(width = size.width, height = size.height, "Window resized");
                app.trigger_resize();
            }

            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } if !destroying => {
                info!("Destroying app");

                destroying = true;
                *control_flow = ControlFlow::Exit;

                unsafe { shut_down(&mut app) };

                info!("Goodbye.");
            }

            _ => {}
        }
    });
}

/// Wait for the GPU to finish every frame in flight, then tear the app down.
unsafe fn shut_down(app: &mut App) {
    if let Err(err) = app.wait_for_device_idle() {
        error!(?err, "Failed waiting for the device to go idle");
    }
    app.destroy();
}

/// A zero-sized window has no drawable surface to render to.
fn is_minimized(window: &Window) -> bool {
    let size = window.inner_size();
    size.width == 0 || size.height == 0
}

/// Create the window and event loop.
#[tracing::instrument(level = "DEBUG")]
fn build_window(args: &Args) -> Result<(EventLoop<()>, Window)> {
    debug!("Creating window and event loop");

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(format!("Spinning Cube: {}", args.stage))
        .with_inner_size(LogicalSize::new(args.width, args.height))
        .build(&event_loop)?;

    debug!(window_id = ?window.id(), "Window creation successful");

    Ok((event_loop, window))
}

fn setup_logging() -> Result<()> {
    use tracing_subscriber::{prelude::*, EnvFilter};
    use tracing_tree::HierarchicalLayer;

    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(HierarchicalLayer::new(4).with_bracketed_fields(true))
        .with(EnvFilter::from_default_env())
        .try_init()?;

    Ok(())
}
