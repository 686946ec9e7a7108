//! Ground state search for an open XXZ spin-1/2 chain.
//!
//! ```text
//! dmrg [--config dmrg.yaml] [--sites N] [--workers W] [--serial] ...
//! ```

use std::{ path::PathBuf, process::ExitCode };
use clap::Parser;
use num_complex::Complex64 as C64;
use rand::{ SeedableRng, rngs::StdRng };
use tracing::{ error, info };
use tracing_subscriber::{ EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt };
use tensor_dmrg::{
    ComplexScalar,
    config::Config,
    dmrg::{ self, DmrgOutput, DmrgResult },
    mpo::spin_chain_mpo,
    mps::FiniteMps,
    store::{ DiskStore, MemStore },
};

#[derive(Parser, Debug)]
#[command(name = "dmrg")]
#[command(about = "Distributed two-site DMRG for open spin chains")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long, env = "DMRG_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DMRG_LOG_LEVEL")]
    log_level: String,

    /// Number of sites.
    #[arg(short = 'n', long)]
    sites: Option<usize>,

    /// Number of full sweeps.
    #[arg(short, long)]
    sweeps: Option<usize>,

    /// Maximum bond dimension.
    #[arg(short = 'D', long)]
    dmax: Option<usize>,

    /// Number of worker ranks.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seed for the random initial state.
    #[arg(long)]
    seed: Option<u64>,

    /// Run every step on a single thread instead of distributing.
    #[arg(long)]
    serial: bool,

    /// Print the effective configuration as YAML and exit.
    #[arg(long)]
    print_config: bool,
}

fn init_logging(level: &str) {
    let filter
        = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> DmrgResult<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(sites) = cli.sites { config.model.sites = sites; }
    if let Some(sweeps) = cli.sweeps { config.sweep.sweeps = sweeps; }
    if let Some(dmax) = cli.dmax { config.sweep.dmax = dmax; }
    if let Some(workers) = cli.workers { config.run.workers = workers; }
    if let Some(seed) = cli.seed { config.run.seed = seed; }
    config.validate()?;
    Ok(config)
}

fn solve<A>(config: &Config, serial: bool) -> DmrgResult<DmrgOutput<A>>
where A: ComplexScalar
{
    let model = &config.model;
    let mpo = spin_chain_mpo::<A>(model.sites, model.jz, model.jxy, model.field)?;
    let mut rng = StdRng::seed_from_u64(config.run.seed);
    let mps = FiniteMps::<A>::random(&mpo.phys_dims(), config.run.init_bond_dim, &mut rng)?;
    let params = &config.sweep;
    let workers = config.run.workers;
    match (config.run.in_memory, serial) {
        (true, true) => dmrg::run_serial(&mpo, mps, params, MemStore::new()),
        (true, false) => dmrg::run_distributed(&mpo, mps, params, MemStore::new(), workers),
        (false, serial) => {
            let store = DiskStore::new(&params.mps_path, &params.temp_path)?;
            if serial {
                dmrg::run_serial(&mpo, mps, params, store)
            } else {
                dmrg::run_distributed(&mpo, mps, params, store, workers)
            }
        },
    }
}

fn report<A>(out: DmrgOutput<A>) {
    for (k, e) in out.sweep_energies.iter().enumerate() {
        println!("sweep {:>3}: {:+.12}", k, e);
    }
    println!("E0 = {:+.12}", out.energy);
}

fn run(cli: &Cli) -> DmrgResult<()> {
    let config = load_config(cli)?;
    if cli.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }
    info!(
        sites = config.model.sites,
        jz = config.model.jz,
        jxy = config.model.jxy,
        field = config.model.field,
        complex = config.run.complex,
        "spin chain"
    );
    if config.run.complex {
        report(solve::<C64>(&config, cli.serial)?);
    } else {
        report(solve::<f64>(&config, cli.serial)?);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        },
    }
}
