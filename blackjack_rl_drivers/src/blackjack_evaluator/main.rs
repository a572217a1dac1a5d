use blackjack_rl::strategy::{Agent, BasicStrategy};
use blackjack_rl::training::{evaluate, TableSetup};
use blackjack_rl::{BlackjackError, ValueTable};
use blackjack_rl_drivers::{
    format_results, init_logger, parse_config_from_file, resolve_config_path, Config,
    DEFAULT_CONFIG_PATH,
};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, about, long_about = None)]
struct CommandLineArgs {
    /// The path of the config file
    #[arg(short, long, default_value_t = String::from(DEFAULT_CONFIG_PATH))]
    config: String,

    /// The saved value table, overriding `evaluation.table_path`
    #[arg(short, long)]
    table: Option<String>,

    /// Stack the shoe to this true count before every hand
    #[arg(long, allow_negative_numbers = true)]
    true_count: Option<i32>,

    /// Evaluate the basic-strategy chart instead of a saved table
    #[arg(long)]
    baseline: bool,

    /// Print the greedy policy grid of every true-count bucket
    #[arg(long)]
    show_policy: bool,
}

fn main() -> Result<(), BlackjackError> {
    let args = CommandLineArgs::parse();
    let config = parse_config_from_file(&resolve_config_path(&args.config)?)?;
    init_logger(config.log_file.as_deref())?;

    run(&config, &args).map_err(|e| {
        log::error!("evaluation aborted: {}", e);
        e
    })
}

fn run(config: &Config, args: &CommandLineArgs) -> Result<(), BlackjackError> {
    let evaluation = &config.evaluation;
    let setup = config.table_setup(args.true_count.or(evaluation.fixed_true_count))?;

    if args.baseline {
        log::info!("evaluating the basic-strategy baseline");
        return report(&mut BasicStrategy::default(), config, &setup);
    }

    let path = args.table.as_deref().unwrap_or(&evaluation.table_path);
    let table = ValueTable::load(path)?;
    let mut policy = table.policy();
    if args.show_policy {
        for bucket in policy.space().buckets() {
            for usable_ace in [false, true] {
                println!(
                    "true count {:+}, {} totals",
                    bucket,
                    if usable_ace { "soft" } else { "hard" }
                );
                println!("{}", policy.render(bucket, usable_ace));
            }
        }
    }

    let setup = TableSetup {
        space: table.space(),
        ..setup
    };
    report(&mut policy, config, &setup)
}

fn report<A: Agent>(agent: &mut A, config: &Config, setup: &TableSetup) -> Result<(), BlackjackError> {
    let evaluation = &config.evaluation;
    log::info!(
        "running {} simulations of {} hands{}",
        evaluation.num_simulations,
        evaluation.episodes_per_simulation,
        setup
            .fixed_true_count
            .map(|tc| format!(" at true count {:+}", tc))
            .unwrap_or_default()
    );
    let results = evaluate(
        agent,
        setup,
        evaluation.num_simulations,
        evaluation.episodes_per_simulation,
        evaluation.seed,
    )?;
    print!("{}", format_results(&results));
    Ok(())
}
