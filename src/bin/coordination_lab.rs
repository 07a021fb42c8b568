use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use coordination_lab::scenario::{self, Report};
use coordination_lab::{CancellationToken, LabConfig, Settings};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "coordination-lab", version, about = "Run the synchronization scenarios")]
struct Cli {
    /// TOML file overriding the built-in defaults
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Print one JSON report per line instead of a summary
    #[arg(long = "json", action = clap::ArgAction::SetTrue)]
    json: bool,

    #[arg(value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    RingNaive,
    RingOrdered,
    Handoff,
    Barber,
    All,
}

impl Scenario {
    fn expand(self) -> Vec<Scenario> {
        match self {
            Scenario::All => vec![
                Scenario::RingNaive,
                Scenario::RingOrdered,
                Scenario::Handoff,
                Scenario::Barber,
            ],
            one => vec![one],
        }
    }
}

async fn run(which: Scenario, settings: &Settings, cancel: &CancellationToken) -> coordination_lab::Result<Report> {
    Ok(match which {
        Scenario::RingNaive => Report::RingNaive(scenario::ring_naive(settings, cancel).await?),
        Scenario::RingOrdered => Report::RingOrdered(scenario::ring_ordered(settings, cancel).await?),
        Scenario::Handoff => Report::Handoff(scenario::handoff(settings, cancel).await?),
        Scenario::Barber | Scenario::All => Report::Barber(scenario::barber(settings, cancel).await?),
    })
}

fn print_summary(report: &Report) {
    match report {
        Report::RingNaive(r) => {
            let verdict = if r.completed {
                "finished (no deadlock this time)".yellow()
            } else {
                "deadlocked, timed out".green()
            };
            println!(
                "{} {} seats, {} ms timeout: {}, forks still held: {}",
                "[ring-naive]".bold(),
                r.seats,
                r.timeout_ms,
                verdict,
                r.forks_left_held
            );
        }
        Report::RingOrdered(r) => {
            let all_fed = r.meals_eaten.iter().all(|&m| m == r.meals_per_seat);
            let verdict = if all_fed { "everyone ate".green() } else { "missing meals".red() };
            println!(
                "{} meals {:?} in {} ms: {}",
                "[ring-ordered]".bold(),
                r.meals_eaten,
                r.elapsed_ms,
                verdict
            );
        }
        Report::Handoff(r) => {
            let verdict = if r.produced == r.consumed && r.drained_cleanly {
                "all items transferred".green()
            } else {
                "items lost".red()
            };
            println!(
                "{} capacity {}, produced {}, consumed {}: {}",
                "[handoff]".bold(),
                r.capacity,
                r.produced,
                r.consumed,
                verdict
            );
        }
        Report::Barber(r) => {
            let verdict = if r.served + r.turned_away == r.arrivals {
                "counts reconcile".green()
            } else {
                "counts do not reconcile".red()
            };
            println!(
                "{} {} chairs, {} arrivals: served {}, turned away {}: {}",
                "[barber]".bold(),
                r.chairs,
                r.arrivals,
                r.served,
                r.turned_away,
                verdict
            );
        }
    }
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = FmtSubscriber::builder().with_env_filter(env_filter).try_init();

    let cli = Cli::parse();

    let settings = match LabConfig::load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_threads)
        .thread_name("lab-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{} failed to start runtime: {err}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });

        for which in cli.scenario.expand() {
            match run(which, &settings, &cancel).await {
                Ok(report) if cli.json => match serde_json::to_string(&report) {
                    Ok(line) => println!("{line}"),
                    Err(err) => eprintln!("{} {err}", "error:".red().bold()),
                },
                Ok(report) => print_summary(&report),
                Err(err) => {
                    eprintln!("{} {which:?}: {err}", "error:".red().bold());
                    return ExitCode::FAILURE;
                }
            }
        }
        ExitCode::SUCCESS
    })
}
