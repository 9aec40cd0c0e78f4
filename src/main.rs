use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use openafe::device::{self, OpenAfe};
use openafe::plot::{TerminalPlotter, LIVE_REFRESH_EVERY};
use openafe::{Acquisition, AppConfig, ReaderState};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Run a voltammetry sweep on an OpenAFE board and chart the result.
#[derive(Parser)]
#[command(name = "voltammetry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML file overriding the default sweep and plot settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port of the board, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// List the available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print a summary instead of opening the chart
    #[arg(long)]
    no_plot: bool,

    /// Verbosity level (-v for info, -vv for debug, -vvv for frames)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // While the chart owns the terminal, log lines are held back and
    // printed once it is restored.
    let held_logs = LogBuffer::default();
    let charting = !cli.no_plot && !cli.list_ports;
    init_logging(cli.verbose, charting.then(|| held_logs.clone()));

    let result = run(cli);

    let held = held_logs.take();
    if !held.is_empty() {
        let _ = io::stderr().write_all(&held);
    }
    result
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_logging(verbose: u8, hold: Option<LogBuffer>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(verbose)));
    if let Some(buffer) = hold {
        builder
            .target(env_logger::Target::Pipe(Box::new(buffer)))
            .write_style(env_logger::WriteStyle::Never);
    }
    builder.init();
}

/// Log sink shared with the logger, drained after the chart closes.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut held) => std::mem::take(&mut *held),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut held) => held.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Defaults, overlaid with the config file, overlaid with the flags.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_ports {
        return list_ports();
    }

    let config = load_config(&cli)?;
    let port = config
        .port
        .clone()
        .context("No serial port configured. Pass --port or set `port` in the config file (see --list-ports)")?;

    let mut plotter = if cli.no_plot {
        None
    } else {
        Some(
            TerminalPlotter::start(&config.plot, &config.sweep)
                .context("Failed to initialise the terminal chart")?,
        )
    };

    let acquisition = {
        let mut device = OpenAfe::open(&port, &config.link)
            .with_context(|| format!("Could not start communication with the OpenAFE on {}", port))?;

        device
            .set_current_range(config.current_range_microamps)
            .context("Could not change the current range")?;

        device
            .run_sweep(&config.sweep, &config.pulse, |samples| {
                let Some(plotter) = plotter.as_mut() else {
                    return ControlFlow::Continue(());
                };
                match plotter.quit_requested() {
                    Ok(true) => return ControlFlow::Break(()),
                    Ok(false) => {}
                    Err(e) => warn!("could not read the keyboard: {}", e),
                }
                if samples.len() % LIVE_REFRESH_EVERY == 0 {
                    if let Err(e) = plotter.draw_live(samples) {
                        warn!("live redraw failed: {}", e);
                    }
                }
                ControlFlow::Continue(())
            })
            .context("Voltammetry failed")?
        // The port closes here, before the chart waits on the user.
    };

    match plotter {
        Some(plotter) => plotter
            .show(&acquisition.samples, status(&acquisition))
            .context("Failed to display the chart")?,
        None => print_summary(&acquisition),
    }

    info!("voltammetry finished");
    Ok(())
}

fn status(acquisition: &Acquisition) -> &'static str {
    match acquisition.state {
        ReaderState::Done => "complete",
        ReaderState::TimedOut => "timed out",
        ReaderState::Stopped => "stopped",
        _ => "incomplete",
    }
}

fn list_ports() -> Result<()> {
    let ports = device::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn print_summary(acquisition: &Acquisition) {
    println!(
        "Voltammetry {}: {} samples, {} malformed lines skipped",
        status(acquisition),
        acquisition.samples.len(),
        acquisition.skipped
    );
    if let (Some((v_min, v_max)), Some((i_min, i_max))) = (
        acquisition.samples.potential_range(),
        acquisition.samples.current_range(),
    ) {
        println!("  potential: {:.1} mV to {:.1} mV", v_min, v_max);
        println!("  current:   {:.3} uA to {:.3} uA", i_min, i_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openafe::SampleSeries;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("voltammetry").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn port_flag_overrides_config_file() {
        let mut config = AppConfig::from_toml("port = \"/dev/ttyACM0\"\n").unwrap();
        apply_overrides(&mut config, &cli(&["--port", "COM14"]));
        assert_eq!(config.port.as_deref(), Some("COM14"));
    }

    #[test]
    fn config_file_port_kept_without_flag() {
        let mut config = AppConfig::from_toml("port = \"/dev/ttyACM0\"\n").unwrap();
        apply_overrides(&mut config, &cli(&["--no-plot"]));
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(&cli(&["-p", "/dev/ttyUSB0"])).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.sweep, AppConfig::default().sweep);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result = load_config(&cli(&["--config", "/nonexistent/voltammetry.toml"]));
        assert!(result.is_err());
    }

    #[test]
    fn verbosity_maps_to_log_level() {
        assert_eq!(log_level(cli(&[]).verbose), "warn");
        assert_eq!(log_level(cli(&["-v"]).verbose), "info");
        assert_eq!(log_level(cli(&["-vv"]).verbose), "debug");
        assert_eq!(log_level(cli(&["-vvv"]).verbose), "trace");
        assert_eq!(log_level(cli(&["-vvvvv"]).verbose), "trace");
    }

    #[test]
    fn flags_parse() {
        let parsed = cli(&["--list-ports", "--no-plot", "-c", "bench.toml"]);
        assert!(parsed.list_ports);
        assert!(parsed.no_plot);
        assert_eq!(parsed.config, Some(PathBuf::from("bench.toml")));
        assert!(Cli::try_parse_from(["voltammetry", "--baud", "9600"]).is_err());
    }

    #[test]
    fn held_logs_are_drained_once() {
        let buffer = LogBuffer::default();
        let mut writer = buffer.clone();
        writer.write_all(b"[WARN] skipping line\n").unwrap();

        assert_eq!(buffer.take(), b"[WARN] skipping line\n");
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn status_names_each_ending() {
        let acquisition = |state| Acquisition {
            samples: SampleSeries::new(),
            state,
            skipped: 0,
        };
        assert_eq!(status(&acquisition(ReaderState::Done)), "complete");
        assert_eq!(status(&acquisition(ReaderState::TimedOut)), "timed out");
        assert_eq!(status(&acquisition(ReaderState::Stopped)), "stopped");
        assert_eq!(status(&acquisition(ReaderState::Failed)), "incomplete");
    }
}
