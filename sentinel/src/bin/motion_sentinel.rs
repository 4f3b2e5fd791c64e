//! Motion sentinel daemon.
//!
//! Watches the PIR sensor, drives the indicator LEDs and emails a photo when
//! sustained motion is seen. Runs until SIGINT or SIGTERM; all LEDs are off on
//! exit.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use hardware::mock::{MockStillCamera, PeriodicMotion, RecordingOutput};
use hardware::{DigitalInput, DigitalOutput, StillCamera};
use sentinel::config::{PinConfig, SentinelConfig};
use sentinel::indicator::{IndicatorDriver, PatternTiming};
use sentinel::{
    ledger_api, CaptureService, EmailDispatcher, MonotonicClock, MotionMonitor, PhotoLedger,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PIR motion sentinel with photo capture and email alerts"
)]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the photo directory
    #[arg(long)]
    photos_dir: Option<PathBuf>,

    /// Serve the read-only ledger API on this address, e.g. 0.0.0.0:8080
    #[arg(long)]
    serve: Option<SocketAddr>,

    /// Use a simulated sensor, camera and LEDs instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Sender address, also the SMTP login
    #[arg(long, env = "MY_EMAIL")]
    sender: Option<String>,

    /// SMTP app password for the sender
    #[arg(long, env = "MY_EMAIL_APP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Alert recipient (defaults to the sender)
    #[arg(long, env = "MY_EMAIL_RECEIVER")]
    receiver: Option<String>,
}

impl Args {
    fn load_config(&self) -> Result<SentinelConfig> {
        let mut config = match &self.config {
            Some(path) => SentinelConfig::load(path)?,
            None => SentinelConfig::default(),
        };

        if let Some(dir) = &self.photos_dir {
            config.capture.photos_dir = dir.clone();
        }
        if self.sender.is_some() {
            config.alert.sender = self.sender.clone();
        }
        if self.password.is_some() {
            config.alert.password = self.password.clone();
        }
        if self.receiver.is_some() {
            config.alert.receiver = self.receiver.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

type Input = Box<dyn DigitalInput + Send>;
type Output = Box<dyn DigitalOutput + Send>;
type Camera = Box<dyn StillCamera + Send>;

struct Devices {
    sensor: Input,
    armed: Output,
    active: Output,
    alert: Output,
    camera: Camera,
}

fn simulated_devices(config: &SentinelConfig) -> Devices {
    // Long enough to qualify, with a quiet stretch past the cooldown
    let active = config.timing.reportable_threshold() + Duration::from_secs(2);
    let period = config.timing.cooldown() + active + Duration::from_secs(10);
    info!(
        "Simulating {:.0}s of motion every {:.0}s",
        active.as_secs_f64(),
        period.as_secs_f64()
    );

    Devices {
        sensor: Box::new(PeriodicMotion::new(period, active)),
        armed: Box::new(RecordingOutput::new()),
        active: Box::new(RecordingOutput::new()),
        alert: Box::new(RecordingOutput::new()),
        camera: Box::new(MockStillCamera::new(
            config.capture.width,
            config.capture.height,
        )),
    }
}

#[cfg(all(target_os = "linux", feature = "gpio"))]
fn gpio_lines(pins: &PinConfig) -> Result<(Input, Output, Output, Output)> {
    use hardware::gpio::{GpioInput, GpioOutput};

    const CONSUMER: &str = "motion_sentinel";
    let output = |line: u32| -> Result<Output> {
        Ok(Box::new(GpioOutput::request(&pins.chip, line, CONSUMER)?))
    };
    let sensor: Input = Box::new(GpioInput::request(&pins.chip, pins.sensor, CONSUMER)?);
    Ok((
        sensor,
        output(pins.armed)?,
        output(pins.active)?,
        output(pins.alert)?,
    ))
}

#[cfg(not(all(target_os = "linux", feature = "gpio")))]
fn gpio_lines(_pins: &PinConfig) -> Result<(Input, Output, Output, Output)> {
    anyhow::bail!("built without GPIO support; rebuild with --features gpio or run with --simulate")
}

#[cfg(all(target_os = "linux", feature = "v4l2"))]
fn camera(config: &SentinelConfig) -> Result<Camera> {
    use hardware::v4l2_still::{StillConfig, V4l2StillCamera};

    Ok(Box::new(V4l2StillCamera::new(StillConfig {
        device_path: config.capture.device.clone(),
        width: config.capture.width,
        height: config.capture.height,
        warmup_frames: config.capture.warmup_frames,
    })))
}

#[cfg(not(all(target_os = "linux", feature = "v4l2")))]
fn camera(_config: &SentinelConfig) -> Result<Camera> {
    anyhow::bail!("built without camera support; rebuild with --features v4l2 or run with --simulate")
}

fn hardware_devices(config: &SentinelConfig) -> Result<Devices> {
    let (sensor, armed, active, alert) =
        gpio_lines(&config.pins).context("failed to claim GPIO lines")?;
    Ok(Devices {
        sensor,
        armed,
        active,
        alert,
        camera: camera(config)?,
    })
}

/// Termination requests that end the daemon: Ctrl-C, and SIGTERM on Unix.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Register the handlers now, so a SIGTERM arriving before [`wait`] is
    /// not fatal.
    ///
    /// [`wait`]: ShutdownSignal::wait
    fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let terminate =
                signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
            Ok(Self { terminate })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Resolve with the name of the first signal received.
    async fn wait(self) -> Result<&'static str> {
        #[cfg(unix)]
        {
            let mut terminate = self.terminate;
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for Ctrl-C")?;
                    Ok("SIGINT")
                }
                _ = terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            Ok("Ctrl-C")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    info!("Configuration: {config:?}");

    if config.alert.sender.is_none() || config.alert.password.is_none() {
        warn!("Email credentials not set (MY_EMAIL / MY_EMAIL_APP_PASSWORD); alerts will fail");
    }

    let ledger = Arc::new(
        PhotoLedger::open(&config.capture.photos_dir, &config.capture.ledger_file)
            .context("failed to open photo ledger")?,
    );

    let devices = if args.simulate {
        simulated_devices(&config)
    } else {
        hardware_devices(&config)?
    };

    let indicators = IndicatorDriver::new(
        devices.armed,
        devices.active,
        devices.alert,
        PatternTiming::from(&config.timing),
        Instant::now(),
    );
    let capture = CaptureService::new(
        devices.camera,
        &config.capture.photos_dir,
        config.capture.filename_prefix.clone(),
    );
    let mut monitor = MotionMonitor::new(
        devices.sensor,
        indicators,
        capture,
        EmailDispatcher::new(config.alert.clone()),
        Arc::clone(&ledger),
        &config.timing,
        MonotonicClock,
    );

    let server = args.serve.map(|addr| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            if let Err(e) = ledger_api::serve(ledger, addr).await {
                error!("Ledger API on {addr} stopped: {e}");
            }
        })
    });

    let stop = Arc::new(AtomicBool::new(false));
    let detection = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || {
            monitor.run(&stop);
            monitor.shutdown()
        })
    };

    info!("Sentinel running, press Ctrl-C to stop");
    let signal = match ShutdownSignal::install() {
        Ok(signal) => signal.wait().await,
        Err(e) => Err(e),
    };
    stop.store(true, Ordering::Relaxed);
    match &signal {
        Ok(name) => info!("{name} received, stopping"),
        Err(e) => error!("Signal handling failed, stopping: {e:#}"),
    }

    // Joined even on signal errors so the LEDs are always flushed off
    let stats = detection.await.context("detection loop panicked")?;
    if let Some(server) = server {
        server.abort();
    }
    signal?;

    info!(
        "Exiting after {} alerts; ledger holds {} photos",
        stats.alerts_sent,
        ledger.count()
    );
    Ok(())
}
