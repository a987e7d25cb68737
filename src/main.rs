use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use miette::{IntoDiagnostic, Result};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use radarpim::{Persistence, PimManager, Rib, SharedNavData, TestPatternSource, VERSION};
use radarpim_core::header::ChangeFlags;
use radarpim_core::packing::read_sample;
use radarpim_core::{
    AziRefMode, DataFlags, Notification, Pim, PimArena, PimError, RunProcess, Runtime,
};

#[derive(Parser, Clone, Debug)]
#[command(name = "radarpim", version, about = "Polar interpolated memory for radar video")]
pub struct Cli {
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    /// Feed a synthetic radar through an input buffer into the configured PIMs
    Simulate {
        /// Configuration file, default is settings.json in the user config dir
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of antenna rotations to generate
        #[arg(short, long, default_value_t = 3)]
        scans: u32,

        /// Platform heading in degrees; stores are then north referenced
        #[arg(long)]
        heading: Option<f64>,

        /// Save the PIM named by --pim (default the first) to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// PIM to save
        #[arg(long)]
        pim: Option<String>,

        /// Write the configuration in use back to the config file
        #[arg(long, default_value_t = false)]
        write_config: bool,
    },
    /// Print a saved PIM as CSV: azimuth_degrees,end_range,sample,...
    Dump {
        file: PathBuf,
    },
}

/// Logs what each PIM hands to its consumers
#[derive(Default)]
struct ScanLogger {
    azimuths: AtomicU64,
}

impl RunProcess for ScanLogger {
    fn notify(&self, pim: &Pim, notification: &Notification) {
        self.azimuths
            .fetch_add(notification.num_azimuths as u64, Ordering::Relaxed);
        debug!(
            "{}: {} azimuths from bucket {} (return {})",
            pim.name(),
            notification.num_azimuths,
            notification.first_azimuth,
            notification.first_new_return
        );
    }

    fn notify_changes(&self, pim: &Pim, changes: ChangeFlags) {
        info!("{}: source changed: {:?}", pim.name(), changes);
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("RadarPIM {} loglevel {}", VERSION, log_level);

    match args.command {
        Command::Simulate {
            config,
            scans,
            heading,
            save,
            pim,
            write_config,
        } => simulate(config, scans, heading, save, pim, write_config),
        Command::Dump { file } => dump(&file),
    }
}

fn simulate(
    config: Option<PathBuf>,
    scans: u32,
    heading: Option<f64>,
    save: Option<PathBuf>,
    save_name: Option<String>,
    write_config: bool,
) -> Result<()> {
    let persistence = match config {
        Some(path) => Persistence::with_path(path),
        None => Persistence::new().into_diagnostic()?,
    };
    let config = &persistence.config;
    if config.pims.is_empty() {
        warn!("no PIMs configured in '{}'", persistence.path().display());
    }

    let runtime = Arc::new(Runtime::new());
    let rib = Arc::new(Rib::new(config.rib_size).into_diagnostic()?);
    let manager = PimManager::new(rib.clone(), PimArena::new()).into_diagnostic()?;
    let nav = heading.map(|h| {
        let nav = Arc::new(SharedNavData::new());
        nav.set_heading(Some(h));
        nav
    });

    let logger = Arc::new(ScanLogger::default());
    let mut pims = Vec::new();
    for pim_config in &config.pims {
        let pim = Pim::new(runtime.clone(), pim_config.clone()).into_diagnostic()?;
        pim.add_process(logger.clone());
        if let Some(nav) = &nav {
            pim.north_reference(Some(nav.clone()), AziRefMode::NorthFromHeading);
        }
        let handle = manager.add_new_pim(pim).into_diagnostic()?;
        pims.push(manager.arena().get(handle).into_diagnostic()?);
    }

    let mut source = TestPatternSource::new(config.source.clone(), rib.clone()).into_diagnostic()?;
    for scan in 0..scans {
        let written = source.write_scan().into_diagnostic()?;
        if !manager.wait_until_drained(Duration::from_secs(10)) {
            warn!("scan {}: PIM manager did not keep up", scan);
        }
        debug!("scan {}: {} returns written", scan, written);
    }
    manager.shutdown();

    info!(
        "{} returns written, {} dropped, {} processed, {} azimuths notified",
        source.written(),
        source.dropped(),
        manager.num_returns_processed(),
        logger.azimuths.load(Ordering::Relaxed)
    );
    for pim in &pims {
        info!(
            "{}: {}/{} buckets, PRF {:.1} Hz (average {:.1}), period {:.3} s",
            pim.name(),
            pim.num_populated(),
            pim.azimuth_dim(),
            pim.prf(),
            pim.average_prf(),
            pim.average_period()
        );
    }

    if let Some(path) = save {
        let pim = match &save_name {
            Some(name) => pims.iter().find(|p| p.name() == name.as_str()),
            None => pims.first(),
        };
        match pim {
            Some(pim) => {
                pim.save_to_file(&path).into_diagnostic()?;
                info!("{}: saved to '{}'", pim.name(), path.display());
            }
            None => warn!("no PIM to save to '{}'", path.display()),
        }
    }

    if write_config {
        persistence.save().into_diagnostic()?;
    }
    Ok(())
}

fn dump(path: &Path) -> Result<()> {
    let pim = Pim::open(Arc::new(Runtime::new()), path).into_diagnostic()?;
    info!(
        "{}: {} x {}, {} buckets populated",
        pim.name(),
        pim.range_dim(),
        pim.azimuth_dim(),
        pim.num_populated()
    );

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let dim = pim.azimuth_dim() as u32;
    for bucket in 0..dim {
        let line = pim.with_return(bucket, |header, data| {
            let bps = header.packing().map_or(1, |p| p.bytes_per_sample().max(1));
            let big_endian = header.data_flags.contains(DataFlags::BIG_ENDIAN);
            let mut line = format!("{:.3},{}", header.azimuth_degrees(), header.end_range);
            let samples = (header.this_length as usize).min(data.len() / bps);
            for r in 0..samples {
                line.push(',');
                line.push_str(&read_sample(data, r, bps, big_endian).to_string());
            }
            line
        });
        match line {
            Ok(line) => writeln!(out, "{}", line).into_diagnostic()?,
            Err(PimError::NoData { .. }) => {}
            Err(e) => return Err(e).into_diagnostic(),
        }
    }
    out.flush().into_diagnostic()
}
