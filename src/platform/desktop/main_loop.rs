use std::{
    thread,
    time::{Duration, Instant},
};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, error, info, LevelFilter};

use crate::{
    driver::SimulationDriver,
    error::{ConfigError, SimulationError},
    floating_type_mod::FT,
    scene::{load_simulation_params, SceneConfig},
    simulation_parameters::SimulationParams,
    snapshot::deliver,
    write_statistics, FluidSimulation,
};

use super::console_observer::ConsoleObserver;

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

const DEFAULT_FRAME_INTERVAL: &str = "0.016666";

pub fn start() {
    let matches = App::new("2D SPH Fluid Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("SCENE_CONFIG")
                        .help("Scene setup (boundaries, domain, initial fluid)")
                        .required(false)
                        .index(2),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given amount of simulated seconds"),
                )
                .arg(
                    Arg::with_name("MAX_STEPS")
                        .long("max-steps")
                        .short("n")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given number of steps"),
                )
                .arg(
                    Arg::with_name("FRAME_INTERVAL")
                        .long("frame-interval")
                        .short("f")
                        .takes_value(true)
                        .default_value(DEFAULT_FRAME_INTERVAL)
                        .help("Seconds between two presented snapshots"),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite config"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("print-default-config")
                .about("Print the default simulation parameters as YAML"),
        )
        .get_matches();

    init_logging(matches.occurrences_of("v"));

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run(run_matches)
    } else if matches.subcommand_matches("print-default-config").is_some() {
        print_default_config()
    } else {
        Ok(())
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, ConfigError> {
    match matches.value_of(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid value `{}` for {}", value, name))),
        None => Ok(None),
    }
}

fn print_default_config() -> Result<(), SimulationError> {
    let yaml = serde_yaml::to_string(&SimulationParams::default())
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    print!("{}", yaml);
    Ok(())
}

fn run(run_matches: &ArgMatches) -> Result<(), SimulationError> {
    let parameter_file = run_matches
        .value_of("SIMULATION_CONFIG")
        .ok_or_else(|| ConfigError::Parse("missing simulation config".to_string()))?;
    let params_yaml = read_file(parameter_file)?;
    let overwrite_yaml = match run_matches.value_of("OVERWRITE_CONFIG_FILE") {
        Some(path) => Some(read_file(path)?),
        None => None,
    };
    let mut simulation_params = load_simulation_params(&params_yaml, overwrite_yaml.as_deref())?;

    let scene_config = match run_matches.value_of("SCENE_CONFIG") {
        Some(path) => SceneConfig::from_yaml(&read_file(path)?)?,
        None => SceneConfig::default(),
    };
    scene_config.apply_to(&mut simulation_params);
    debug!("{:?}", simulation_params);
    debug!("{:?}", scene_config);

    let max_seconds: Option<FT> = parse_arg(run_matches, "MAX_SECONDS")?;
    let max_steps: Option<u64> = parse_arg(run_matches, "MAX_STEPS")?;
    let frame_interval: f64 = parse_arg(run_matches, "FRAME_INTERVAL")?.unwrap_or(1. / 60.);
    let counters_enabled = run_matches.is_present("STATISTICS_ENABLED");
    let statistics_path_opt = run_matches.value_of("STATISTICS_PATH");

    let mut fluid_simulation = FluidSimulation::new(simulation_params, counters_enabled)?;
    for boundary in scene_config.boundaries() {
        fluid_simulation.attach(boundary)?;
    }

    let mut driver = SimulationDriver::new(fluid_simulation);
    let snapshots = driver.snapshot_buffer();
    let mut observer = ConsoleObserver::new((1. / frame_interval.max(1e-3)).round() as u64);
    let mut generation = 0;

    let frame_interval = Duration::from_secs_f64(frame_interval.max(0.));
    driver.start()?;

    loop {
        let frame_start = Instant::now();
        let snapshot = snapshots.snapshot();
        deliver(&mut observer, &snapshot, &mut generation);

        if !driver.is_running() {
            break;
        }
        if max_steps.map_or(false, |n| snapshot.step_number >= n) {
            break;
        }
        if max_seconds.map_or(false, |s| snapshot.time >= s) {
            break;
        }

        thread::sleep(frame_interval.saturating_sub(frame_start.elapsed()));
    }

    let result = driver.stop();
    if let Some(fluid_simulation) = driver.simulation() {
        info!(
            "finished after {} steps ({}s simulated) in {} frames",
            fluid_simulation.step_number(),
            fluid_simulation.time(),
            observer.frame_number()
        );
        if counters_enabled {
            let s = write_statistics(fluid_simulation);
            print!("{}", s);
            if let Some(statistics_path) = statistics_path_opt {
                std::fs::write(statistics_path, s).map_err(|e| ConfigError::Io {
                    path: statistics_path.to_string(),
                    message: e.to_string(),
                })?;
            }
        }
    }
    result
}
