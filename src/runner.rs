//! Process wiring: acquisition thread, health tick, event relay and the
//! line-based command surface on stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, instrument, warn};

use crate::capture::{CaptureEvent, CaptureScheduler, SyntheticDevice};
use crate::driver::{run_acquisition, DistanceProbe, Driver, HealthWatch};
use crate::health::StalenessMonitor;
use crate::host::{Host, SystemHost};
use crate::storage::Writer;
use crate::Config;

/// Commands accepted on stdin
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Distance,
    Record(bool),
    Directory(PathBuf),
    Health,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        match (word.to_ascii_lowercase().as_str(), rest) {
            ("distance", "") => Ok(Command::Distance),
            ("health", "") => Ok(Command::Health),
            ("quit" | "exit", "") => Ok(Command::Quit),
            ("record", "on") => Ok(Command::Record(true)),
            ("record", "off") => Ok(Command::Record(false)),
            ("record", _) => Err("usage: record on|off".into()),
            ("dir", "") => Err("usage: dir <path>".into()),
            ("dir", path) => Ok(Command::Directory(PathBuf::from(path))),
            _ => Err(format!("unknown command: {}", line)),
        }
    }
}

/// Run the driver until ctrl-c or `quit`
#[instrument(skip(config))]
pub async fn run(config: Config) -> Result<()> {
    let directory = config.output_directory();
    let (host, diagnostics) = SystemHost::new(directory.clone(), config.output.recording);
    let host = Arc::new(host);

    // Saves create missing directories themselves; this only surfaces problems early
    if let Err(e) = std::fs::create_dir_all(&directory) {
        host.report(&format!("Output directory {:?} unavailable: {}", directory, e));
    }

    let writer = Writer::from_config(&config.runtime, host.clone())?;
    let (event_tx, event_rx) = flume::bounded::<CaptureEvent>(config.runtime.event_queue_depth);
    let scheduler = CaptureScheduler::from_config(&config);
    for kind in crate::StreamKind::ALL {
        let policy = scheduler.policy(kind);
        if policy.enabled() {
            info!("{} every {:.3}s", kind, policy.period());
        } else {
            info!("{} disabled", kind);
        }
    }

    let mut driver = Driver::new(scheduler, host.clone(), writer, Box::new(event_tx));
    let mut watch = driver.health_watch(StalenessMonitor::from_config(&config.health));
    let probe = driver.distance_probe();

    let (stop_tx, stop) = flume::bounded::<()>(0);
    let acquisition = {
        let mut device = SyntheticDevice::new(config.device.clone());
        let reconnect = config.runtime.reconnect_interval();
        thread::Builder::new()
            .name("orion-acquire".into())
            .spawn(move || {
                run_acquisition(&mut device, &mut driver, &stop, reconnect);
                driver
            })?
    };

    let relay = tokio::spawn(relay_events(event_rx));
    let diagnostics_relay = tokio::spawn(async move {
        while let Ok(message) = diagnostics.recv_async().await {
            let line = serde_json::json!({ "message": message });
            println!("{}", line);
        }
    });

    command_loop(&config, &host, &mut watch, &probe).await;

    info!("Shutting down");
    drop(stop_tx);
    let close_timeout = config.runtime.close_timeout();
    let deadline = Deadline::after(close_timeout);

    let joined = tokio::time::timeout(
        deadline.remaining(),
        tokio::task::spawn_blocking(move || acquisition.join()),
    )
    .await;
    let driver = match joined {
        Ok(Ok(Ok(driver))) => driver,
        Ok(Ok(Err(_))) => return Err(eyre!("acquisition thread panicked")),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            warn!("Acquisition did not stop within {:?}", close_timeout);
            return Ok(());
        }
    };

    let writer = driver.into_persistence();
    let remaining = deadline.remaining();
    let drained = tokio::task::spawn_blocking(move || writer.shutdown(remaining)).await?;
    if !drained {
        warn!("Some captures were not written before shutdown");
    }

    relay.abort();
    diagnostics_relay.abort();
    info!("Driver stopped");
    Ok(())
}

/// One close budget shared by every shutdown step
struct Deadline(Instant);

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

async fn relay_events(events: flume::Receiver<CaptureEvent>) {
    while let Ok(event) = events.recv_async().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode event: {}", e),
        }
    }
}

async fn command_loop(
    config: &Config,
    host: &SystemHost,
    watch: &mut HealthWatch,
    probe: &DistanceProbe,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(config.health.tick_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                watch.tick();
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(command, host, watch, probe),
                    Err(message) => warn!("{}", message),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = &mut interrupt => {
                info!("Interrupt received");
                break;
            }
        }
    }
}

fn execute(command: Command, host: &SystemHost, watch: &HealthWatch, probe: &DistanceProbe) {
    match command {
        Command::Distance => match probe.report() {
            Ok(report) => info!("Last distance: {}", report),
            Err(e) => host.report(&format!("Cannot report distance: {}", e)),
        },
        Command::Record(on) => {
            host.set_recording(on);
            info!("Recording {}", if on { "enabled" } else { "disabled" });
        }
        Command::Directory(path) => {
            info!("Output directory now {:?}", path);
            host.set_output_directory(path);
        }
        Command::Health => info!("Health: {}", watch.current()),
        Command::Quit => {}
    }
}
