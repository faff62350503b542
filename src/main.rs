// main.rs — windowed house viewer: drag to look around, wheel to zoom, click to move

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, WindowBuilder},
};

use house_viewer::camera::ViewCamera;
use house_viewer::fetch::FileFetcher;
use house_viewer::renderer::Renderer;
use house_viewer::{House, HouseViewer, ViewerConfig, ViewerEvent};

/// Mouse travel (px) below which a press/release counts as a click.
const CLICK_SLOP: f64 = 4.0;

struct Args {
    house: PathBuf,
    target: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut house = None;
    let mut target = None;
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--target" => target = it.next(),
            "--config" => {
                // consumed by ViewerConfig::resolve
                it.next();
            }
            _ if house.is_none() => house = Some(PathBuf::from(a)),
            _ => bail!("unexpected argument: {a}"),
        }
    }
    let Some(house) = house else {
        bail!("usage: house_viewer <house.json> [--target <room|shot>] [--config <path>]");
    };
    Ok(Args { house, target })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let config = ViewerConfig::resolve().context("loading viewer config")?;
    let house = House::load(&args.house).with_context(|| format!("loading {}", args.house.display()))?;
    let start_target = match args.target.clone() {
        Some(t) => t,
        None => house
            .first_target()
            .map(str::to_string)
            .context("house has nothing to show")?,
    };

    // tile and preview URLs are relative to the house file
    let root = args
        .house
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let fetcher = Arc::new(FileFetcher::new(root));

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title(format!("House Viewer - {}", house.id()))
        .with_inner_size(LogicalSize::new(1280, 720))
        .build(&event_loop)
        .context("creating window")?;

    let renderer = pollster::block_on(Renderer::new(&window))?;
    let aspect = renderer.aspect();

    let mut viewer = HouseViewer::new(house.mode(), config, renderer, fetcher);
    viewer.camera_mut().aspect = aspect;
    viewer.set_house(house)?;

    let clock = Instant::now();
    let now_ms = move || clock.elapsed().as_secs_f64() * 1000.0;
    viewer.load_target(&start_target, now_ms())?;

    // Interaction state
    let mut mouse_pressed = false;
    let mut press_pos: Option<PhysicalPosition<f64>> = None;
    let mut last_mouse_pos: Option<PhysicalPosition<f64>> = None;
    let mut dragged = false;
    let mut fullscreen = false;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    *control_flow = ControlFlow::Exit;
                }

                WindowEvent::Resized(new_size) => {
                    let backend = viewer.backend_mut();
                    backend.resize(new_size);
                    let aspect = backend.aspect();
                    viewer.camera_mut().aspect = aspect;
                }

                WindowEvent::KeyboardInput { input, .. } => {
                    if input.state == ElementState::Pressed {
                        match input.virtual_keycode {
                            Some(VirtualKeyCode::F11) => {
                                fullscreen = !fullscreen;
                                window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
                            }
                            Some(VirtualKeyCode::Return) | Some(VirtualKeyCode::Space) => {
                                if let Err(e) = viewer.activate(now_ms()) {
                                    log::error!("navigation failed: {e}");
                                }
                            }
                            Some(VirtualKeyCode::Escape) => *control_flow = ControlFlow::Exit,
                            _ => {}
                        }
                    }
                }

                WindowEvent::MouseInput { state, button, .. } => {
                    if button == MouseButton::Left {
                        mouse_pressed = state == ElementState::Pressed;
                        if mouse_pressed {
                            press_pos = last_mouse_pos;
                            dragged = false;
                        } else if !dragged {
                            if let Some(pos) = last_mouse_pos {
                                let size = viewer.backend().size;
                                let ndc = ViewCamera::pixel_to_ndc(
                                    pos.x as f32,
                                    pos.y as f32,
                                    size.width as f32,
                                    size.height as f32,
                                );
                                if let Err(e) = viewer.activate_at(ndc, now_ms()) {
                                    log::error!("navigation failed: {e}");
                                }
                            }
                        }
                    }
                }

                WindowEvent::CursorMoved { position, .. } => {
                    if mouse_pressed {
                        if let Some(last_pos) = last_mouse_pos {
                            let dx = (position.x - last_pos.x) as f32;
                            let dy = (position.y - last_pos.y) as f32;
                            let size = viewer.backend().size;
                            viewer
                                .camera_mut()
                                .drag(dx, dy, size.width as f32, size.height as f32);
                        }
                        if let Some(p) = press_pos {
                            if (position.x - p.x).hypot(position.y - p.y) > CLICK_SLOP {
                                dragged = true;
                            }
                        }
                    }
                    last_mouse_pos = Some(position);
                }

                WindowEvent::MouseWheel { delta, .. } => {
                    let scroll = match delta {
                        MouseScrollDelta::LineDelta(_, y) => y,
                        MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                    };
                    viewer.camera_mut().zoom(scroll);
                }

                _ => {}
            },

            Event::RedrawRequested(_) => {
                for event in viewer.tick(now_ms()) {
                    match event {
                        ViewerEvent::NavigationCompleted { target } => {
                            window.set_title(&format!("House Viewer - {target}"));
                        }
                        ViewerEvent::TilesComplete { target } => log::info!("{target}: all tiles in"),
                        _ => {}
                    }
                }

                match viewer.backend_mut().render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => {
                        let backend = viewer.backend_mut();
                        backend.resize(backend.size);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => log::error!("render error: {e:?}"),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}
