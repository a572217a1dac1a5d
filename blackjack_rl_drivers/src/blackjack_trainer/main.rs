use blackjack_rl::strategy::{
    GradientParams, LearningParams, PolicyGradientAgent, TabularAgent,
};
use blackjack_rl::training::{evaluate, train_parallel};
use blackjack_rl::{BlackjackError, ValueTable};
use blackjack_rl_drivers::{
    format_results, init_logger, parse_config_from_file, resolve_config_path, AgentKind, Config,
    DEFAULT_CONFIG_PATH,
};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Parser)]
#[command(author, about, long_about = None)]
struct CommandLineArgs {
    /// The path of the config file
    #[arg(short, long, default_value_t = String::from(DEFAULT_CONFIG_PATH))]
    config: String,

    /// Where to save the learned value table, overriding `training.table_path`
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<(), BlackjackError> {
    let args = CommandLineArgs::parse();
    let config = parse_config_from_file(&resolve_config_path(&args.config)?)?;
    init_logger(config.log_file.as_deref())?;

    train(&config, args.output).map_err(|e| {
        log::error!("training failed: {}", e);
        e
    })
}

fn train(config: &Config, output: Option<String>) -> Result<(), BlackjackError> {
    let training = &config.training;
    let setup = config.table_setup(training.fixed_true_count)?;
    // Agents draw from a stream apart from the shoe seeds.
    let agent_rng = StdRng::seed_from_u64(training.seed.wrapping_add(1 << 32));
    log::info!(
        "training a {:?} agent for {} episodes ({} decks, penetration {})",
        training.agent,
        training.num_episodes,
        setup.rule.number_of_decks,
        setup.rule.penetration
    );

    match training.agent {
        AgentKind::Tabular => {
            let params: LearningParams = training.try_into()?;
            let table = ValueTable::new(setup.space);
            let table = if training.workers > 1 {
                train_parallel(
                    table,
                    params,
                    &setup,
                    training.num_episodes,
                    training.parallel(),
                    training.seed,
                )?
            } else {
                let mut agent = TabularAgent::new(table, params, agent_rng)?;
                let report = setup
                    .simulator(training.seed)?
                    .with_convergence(training.convergence()?)
                    .with_progress_interval(training.progress_interval)
                    .run(&mut agent, training.num_episodes, false)?;
                log::info!(
                    "finished after {} episodes{}",
                    report.episodes,
                    if report.converged { ", converged" } else { "" }
                );
                agent.into_table()
            };

            let output = output.unwrap_or_else(|| training.table_path.clone());
            table.save(&output)?;
        }
        AgentKind::PolicyGradient => {
            let params: GradientParams = training.try_into()?;
            let mut agent = PolicyGradientAgent::new(params, agent_rng)?;
            let report = setup
                .simulator(training.seed)?
                .with_convergence(training.convergence()?)
                .with_progress_interval(training.progress_interval)
                .run(&mut agent, training.num_episodes, false)?;
            log::info!("finished after {} episodes", report.episodes);

            // The softmax weights have no table form, so report the greedy play instead.
            let evaluation = &config.evaluation;
            let results = evaluate(
                &mut agent,
                &config.table_setup(evaluation.fixed_true_count)?,
                evaluation.num_simulations,
                evaluation.episodes_per_simulation,
                evaluation.seed,
            )?;
            print!("{}", format_results(&results));
        }
    }
    Ok(())
}
