use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relaxation::config::{DEFAULT_DIMENSION, DEFAULT_PRECISION, DEFAULT_WORKERS};
use relaxation::implementations::Engine;
use relaxation::{EngineError, ExitPolicy, ReadMode, RelaxConfig, RelaxReport, RelaxResult};

/// Relaxation solver for the discrete Laplace equation on a square grid
#[derive(Parser)]
#[command(name = "relax")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct GridArgs {
    /// Grid dimension (at least 3)
    #[arg(short = 'a', long = "dimension", default_value_t = DEFAULT_DIMENSION)]
    dimension: usize,

    /// Convergence precision in [0.0, 1.0]
    #[arg(short, long, default_value_t = DEFAULT_PRECISION)]
    precision: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-threaded Jacobi reference
    Sequential {
        #[command(flatten)]
        grid: GridArgs,
    },

    /// One thread per worker on one shared grid with per-row locks
    Shared {
        #[command(flatten)]
        grid: GridArgs,

        /// Number of worker threads
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Also lock the rows above and below while updating a row
        #[arg(long)]
        protected_reads: bool,

        /// Keep sweeping until every worker's latest pass is balanced
        #[arg(long)]
        await_all: bool,
    },

    /// Isolated ranks exchanging ghost rows over in-process channels
    Distributed {
        #[command(flatten)]
        grid: GridArgs,

        /// Number of ranks
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },

    /// Distributed engine over MPI; run under `mpirun -n <ranks>`
    Mpi {
        #[command(flatten)]
        grid: GridArgs,
    },

    /// Time every engine and report min / median / mean / max
    Bench {
        #[command(flatten)]
        grid: GridArgs,

        /// Workers for the parallel engines
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        /// Measured runs per engine
        #[arg(long, default_value_t = 15)]
        iterations: usize,

        /// Unmeasured warm-up runs per engine
        #[arg(long, default_value_t = 3)]
        warmup: usize,

        /// Engines to time (comma separated)
        #[arg(long, value_delimiter = ',', default_values_t = Engine::ALL)]
        engines: Vec<Engine>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Sequential { grid } => {
            build_config(grid, 1, ReadMode::Relaxed).and_then(|c| run_and_print(Engine::Sequential, &c))
        }
        Commands::Shared {
            grid,
            workers,
            protected_reads,
            await_all,
        } => {
            let mode = if protected_reads {
                ReadMode::Protected
            } else {
                ReadMode::Relaxed
            };
            let policy = if await_all {
                ExitPolicy::AwaitAll
            } else {
                ExitPolicy::Independent
            };
            build_config(grid, workers, mode)
                .map(|c| c.with_exit_policy(policy))
                .and_then(|c| run_and_print(Engine::SharedMemory, &c))
        }
        Commands::Distributed { grid, workers } => {
            build_config(grid, workers, ReadMode::Relaxed).and_then(|c| run_and_print(Engine::Distributed, &c))
        }
        Commands::Mpi { grid } => run_mpi(grid),
        Commands::Bench {
            grid,
            workers,
            iterations,
            warmup,
            engines,
        } => build_config(grid, workers, ReadMode::Relaxed).and_then(|c| run_benchmarks(&c, &engines, iterations, warmup)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(grid: GridArgs, workers: usize, mode: ReadMode) -> RelaxResult<RelaxConfig> {
    let config = RelaxConfig::new(grid.dimension, grid.precision, workers)?.with_read_mode(mode);
    info!("Set array dimension to: {}", config.dimension());
    info!("Set precision to: {:.6}", config.precision());
    info!("Set number of workers to: {}", config.workers());
    Ok(config)
}

fn run_and_print(engine: Engine, config: &RelaxConfig) -> RelaxResult<()> {
    let report = engine.run(config)?;
    print_result(&report, config);
    Ok(())
}

fn print_result(report: &RelaxReport, config: &RelaxConfig) {
    println!("\nResult:");
    report.grid.print();
    info!(passes = report.passes, "done");
    if config.read_mode() == ReadMode::Protected {
        info!("Protected reads were enabled.");
    }
    if config.exit_policy() == ExitPolicy::AwaitAll {
        info!("Workers waited for each other before exiting.");
    }
}

#[cfg(feature = "mpi")]
fn run_mpi(grid: GridArgs) -> RelaxResult<()> {
    use relaxation::implementations::distributed::{self, mpi::MpiComm, Communicator};

    let mut comm = MpiComm::init()?;
    let config = build_config(grid, comm.size(), ReadMode::Relaxed)?;
    match distributed::relax(&mut comm, config.dimension(), config.precision()) {
        Ok(Some(report)) => {
            print_result(&report, &config);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            error!(rank = comm.rank(), "{}", e);
            comm.abort(1);
            Err(e)
        }
    }
}

#[cfg(not(feature = "mpi"))]
fn run_mpi(_grid: GridArgs) -> RelaxResult<()> {
    use relaxation::CommError;

    Err(CommError::Init("built without MPI support; rebuild with --features mpi".to_string()).into())
}

fn run_benchmarks(config: &RelaxConfig, engines: &[Engine], iterations: usize, warmup: usize) -> RelaxResult<()> {
    println!("=== Relaxation benchmark ===");
    println!(
        "dimension: {}, precision: {}, runs: {}, workers: {}\n",
        config.dimension(),
        config.precision(),
        iterations,
        config.workers()
    );

    for &engine in engines {
        run_benchmark(&engine.to_string(), iterations, warmup, || {
            let start = Instant::now();
            let report = engine.run(config)?;
            Ok((start.elapsed(), report.passes))
        })?;
    }

    println!("=== Benchmark complete ===");
    Ok(())
}

fn run_benchmark<F>(name: &str, iterations: usize, warmup: usize, mut bench_fn: F) -> RelaxResult<()>
where
    F: FnMut() -> Result<(Duration, usize), EngineError>,
{
    println!("{}:", name);

    // ウォームアップ
    for _ in 0..warmup {
        bench_fn()?;
        std::thread::sleep(Duration::from_millis(100));
    }

    // 本番計測
    let mut times = Vec::with_capacity(iterations);
    let mut passes = 0;
    for i in 0..iterations {
        let (duration, p) = bench_fn()?;
        passes = p;
        times.push(duration);
        println!("  run {:2}: {:?} ({} passes)", i + 1, duration, p);

        std::thread::sleep(Duration::from_millis(50));
    }

    if times.is_empty() {
        println!();
        return Ok(());
    }

    // 統計計算
    times.sort();
    let median = times[times.len() / 2];
    let avg = times.iter().sum::<Duration>() / times.len() as u32;
    let min = times[0];
    let max = times[times.len() - 1];

    println!("  ---");
    println!("  min:    {:?}", min);
    println!("  median: {:?}", median);
    println!("  mean:   {:?}", avg);
    println!("  max:    {:?}", max);
    println!("  passes: {}", passes);
    println!();
    Ok(())
}
