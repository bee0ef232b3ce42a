//! `stylus`
//!
//! Plans images for a G-code pen plotter and draws them.

use std::{
    error::Error,
    io::{self, BufRead},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::mpsc,
    thread,
};

use automatist::{
    device::available_ports, settings::DeviceSettings, DeviceSession, JobError, LogSink,
    MotionProgram, Plan, PlanningSession, SerialConnector, Settings,
};
use clap::{Parser, Subcommand};

/// Command line arguments.
#[derive(Parser)]
#[command(name = "stylus", about = "Draw raster images with a G-code pen plotter")]
struct Cli {
    /// Settings file (JSON). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Serial port, overriding the settings file.
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// What to do.
#[derive(Subcommand)]
enum Command {
    /// Trace an image and write the motion program
    Plan {
        /// Image to draw (PNG, JPEG, BMP, ...)
        image: PathBuf,
        /// Where to write the motion program
        #[arg(short, long, default_value = "drawing.gcode")]
        output: PathBuf,
        /// Where to write a preview of the drawing
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Stream a motion program to the plotter
    Send {
        /// The motion program
        program: PathBuf,
    },
    /// Plan an image and stream it straight to the plotter
    Draw {
        /// Image to draw
        image: PathBuf,
    },
    /// Connect to the plotter and check the firmware answers
    Check,
    /// List serial ports
    Ports,
    /// Write the default settings to a file
    Settings {
        /// Where to write the settings
        #[arg(default_value = "stylus.json")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs a command.
fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(port) = cli.port {
        settings.device.port = port;
    }

    match cli.command {
        Command::Plan {
            image,
            output,
            preview,
        } => {
            let plan = create_plan(&image, &settings)?;
            plan.program.save(&output)?;
            log::info!(
                "wrote {} instructions to {}",
                plan.program.len(),
                output.display()
            );
            if let Some(path) = preview {
                save_preview(&plan, &path)?;
            }
        }
        Command::Send { program } => {
            let program = MotionProgram::load(&program)?;
            stream(&program, &settings.device)?;
        }
        Command::Draw { image } => {
            let plan = create_plan(&image, &settings)?;
            stream(&plan.program, &settings.device)?;
        }
        Command::Check => {
            let mut session = DeviceSession::new(Box::new(SerialConnector), settings.device);
            session.connect(&mut LogSink)?;
            session.disconnect(&mut LogSink);
        }
        Command::Ports => {
            for port in available_ports()? {
                println!("{port}");
            }
        }
        Command::Settings { output } => {
            Settings::default().save(&output)?;
            log::info!("wrote default settings to {}", output.display());
        }
    }

    Ok(())
}

/// Loads an image and makes a plan for it.
fn create_plan(image_path: &Path, settings: &Settings) -> Result<Plan, Box<dyn Error>> {
    let mut planning = PlanningSession::new(settings.plan.clone());
    planning.set_image(image::open(image_path)?);

    let optimizer = settings.tracer.optimizer.optimizer();
    let plan = planning.create_plan(
        settings.tracer.backend.vectorizer(),
        optimizer.as_ref(),
        &mut LogSink,
    )?;
    Ok(plan.clone())
}

/// Saves the plan preview as an image.
fn save_preview(plan: &Plan, path: &Path) -> Result<(), Box<dyn Error>> {
    match &plan.preview {
        Some(preview) => {
            preview.save(path)?;
            log::info!("wrote preview to {}", path.display());
        }
        None => log::warn!("no preview could be rendered"),
    }
    Ok(())
}

/// Streams a program, and stops the machine if the operator types `stop`.
fn stream(program: &MotionProgram, settings: &DeviceSettings) -> Result<(), Box<dyn Error>> {
    let mut session = DeviceSession::new(Box::new(SerialConnector), settings.clone());
    session.connect(&mut LogSink)?;
    session.begin_streaming(program, &mut LogSink)?;

    let stop = watch_for_stop();
    log::info!("type \"stop\" and press enter for an emergency stop");

    loop {
        if let Some(outcome) = session.poll(&mut LogSink) {
            let summary = outcome?;
            log::info!(
                "drew {} instructions in {:.0?}",
                summary.instructions,
                summary.elapsed
            );
            return Ok(());
        }

        if stop.try_recv().is_ok() {
            session.emergency_stop(&mut LogSink)?;
            return Err(JobError::UserAbort.into());
        }

        thread::sleep(settings.poll_interval());
    }
}

/// Reads stdin on its own thread, and sends a message when the operator types `stop`.
fn watch_for_stop() -> mpsc::Receiver<()> {
    let (sender, receiver) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("stop-watch".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    return;
                };
                if line.trim().eq_ignore_ascii_case("stop") {
                    let _ = sender.send(());
                    return;
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("emergency stop from the terminal is unavailable: {err}");
    }

    receiver
}
