//! # Particle Sim
//!
//! Runs a particle scene headless on the software device and prints a
//! per-frame report.
//!
//! ```bash
//! particle_sim crates/ember/scenes/fountain.toml
//! particle_sim crates/ember/scenes/sparks.toml --frames 300 --every 30
//! ```

use std::process::ExitCode;
use std::time::Instant;

use ember::{SceneConfig, SceneResult, Simulation};

/// Command line options.
struct Options {
    scene: String,
    frames: Option<u32>,
    every: u64,
}

fn parse_args() -> Result<Options, String> {
    let mut args = std::env::args().skip(1);
    let mut options = Options {
        scene: String::new(),
        frames: None,
        every: 10,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().ok_or("--frames needs a value")?;
                options.frames = Some(value.parse().map_err(|_| format!("bad frame count '{value}'"))?);
            }
            "--every" => {
                let value = args.next().ok_or("--every needs a value")?;
                options.every = value
                    .parse::<u64>()
                    .map_err(|_| format!("bad report interval '{value}'"))?
                    .max(1);
            }
            _ if options.scene.is_empty() => options.scene = arg,
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }
    if options.scene.is_empty() {
        return Err("usage: particle_sim <scene.toml> [--frames N] [--every N]".to_owned());
    }
    Ok(options)
}

fn run(options: &Options) -> SceneResult<()> {
    let scene = SceneConfig::load(&options.scene)?;
    let frames = options.frames.unwrap_or(scene.frames);

    println!("═══════════════════════════════════════════════════════════════════");
    println!("                         PARTICLE SIM");
    println!("═══════════════════════════════════════════════════════════════════");
    println!("  Scene:     {}", options.scene);
    println!("  Emitters:  {}", scene.emitter.len());
    println!("  Capacity:  {} per emitter", scene.renderer.capacity);
    println!("  Frames:    {frames} at dt {:.4}s", scene.dt);
    println!(
        "  Ground:    {}",
        scene
            .ground_height
            .map_or_else(|| "none (collisions off)".to_owned(), |h| format!("y = {h}"))
    );
    println!();

    let start = Instant::now();
    let mut simulation = Simulation::new(&scene)?;
    let mut last = None;
    for _ in 0..frames {
        let report = simulation.step()?;
        if report.frame % options.every == 0 || report.frame == u64::from(frames) {
            println!("frame {:>5}  alive {:>8}", report.frame, report.total_alive());
            for emitter in &report.emitters {
                println!(
                    "    {:<16} alive {:>8}  spawned {:>6}  drawn {:>8}  sort {:>3} steps{}",
                    emitter.name,
                    emitter.alive.map_or_else(|| "-".to_owned(), |n| n.to_string()),
                    emitter.requested,
                    emitter.drawn,
                    emitter.sort_steps,
                    if emitter.sorted { "  [sorted]" } else { "" },
                );
            }
        }
        last = Some(report);
    }
    let elapsed = start.elapsed();

    println!();
    println!("═══════════════════════════════════════════════════════════════════");
    println!(
        "  {} frames in {:.2?} ({:.2?} per frame)",
        simulation.frame(),
        elapsed,
        elapsed / frames.max(1)
    );
    if let Some(report) = last {
        println!("  Final alive: {}", report.total_alive());
    }
    println!("═══════════════════════════════════════════════════════════════════");
    Ok(())
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };
    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("particle_sim: {e}");
            ExitCode::FAILURE
        }
    }
}
