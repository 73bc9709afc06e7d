use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use core_sim::{
    config::{ConsistencyModel, SimConfig},
    sim::Simulator,
    trace,
};
use terminal_size::terminal_size;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Consistency model to simulate
    #[arg(value_enum, ignore_case = true)]
    model: ModelArg,
    /// File path to the input trace
    trace: PathBuf,
    /// The number of processors (and thus caches)
    #[arg(short = 'p', long, default_value_t = 4)]
    number_processors: usize,
    /// The number of cache lines per cache
    #[arg(short = 'l', long, default_value_t = 128)]
    number_cache_lines: usize,
    /// The size of each cache line
    #[arg(short = 's', long, default_value_t = 4)]
    cache_line_size: usize,
    /// The N for the retire-at-N write buffer policy (TSO only)
    #[arg(short = 'r', long)]
    retire_at: Option<usize>,
    /// Emit statistics as JSON instead of the table view
    #[arg(long)]
    json: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModelArg {
    Sc,
    Tso,
}

impl From<ModelArg> for ConsistencyModel {
    fn from(v: ModelArg) -> Self {
        match v {
            ModelArg::Sc => ConsistencyModel::Sc,
            ModelArg::Tso => ConsistencyModel::Tso,
        }
    }
}

const DEFAULT_RETIRE_AT: usize = 32;

fn main() -> Result<()> {
    let args = Cli::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    let model = ConsistencyModel::from(args.model);
    if model == ConsistencyModel::Sc && args.retire_at.is_some() {
        log::warn!("provided write buffer settings are ignored under the SC consistency model");
    }
    let config = SimConfig {
        num_processors: args.number_processors,
        num_cache_lines: args.number_cache_lines,
        line_size: args.cache_line_size,
        retire_at: args.retire_at.unwrap_or(DEFAULT_RETIRE_AT),
        model,
    };

    let input = fs::read_to_string(&args.trace)
        .with_context(|| format!("failed to read trace {}", args.trace.display()))?;
    let events = trace::parse_trace(&input, config.num_processors)?;
    log::info!("finished parsing trace. # of events: {}", events.len());

    let mut sim = Simulator::new(config)?;
    sim.run(events);
    log::info!("finished simulation.");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sim.tracker().summary())?);
    } else {
        let max_width = get_terminal_width().unwrap_or(120) as usize;
        println!("{}", sim.collect_stat().view(max_width));
    }
    Ok(())
}

fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0 - 20)
}
