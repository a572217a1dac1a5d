use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::simulation::{Environment, Outcome};
use crate::strategy::{Agent, LearningParams, TabularAgent, Transition};
use crate::{BetSizing, BlackjackError, Result, Rule, StateSpace, ThresholdBet, ValueTable};

/// Win/loss/push tallies of the episodes that started in one true-count bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketStats {
    pub episodes: u64,
    pub wins: u64,
    pub blackjacks: u64,
    pub losses: u64,
    pub pushes: u64,
    pub total_reward: f64,
    pub total_bet: u64,
}

impl BucketStats {
    pub fn record(&mut self, outcome: Outcome, reward: f64, bet: u32) {
        self.episodes += 1;
        match outcome {
            Outcome::Blackjack => {
                self.wins += 1;
                self.blackjacks += 1;
            }
            Outcome::Win => self.wins += 1,
            Outcome::Push => self.pushes += 1,
            Outcome::Loss => self.losses += 1,
        }
        self.total_reward += reward;
        self.total_bet += bet as u64;
    }

    pub fn merge(&mut self, other: &BucketStats) {
        self.episodes += other.episodes;
        self.wins += other.wins;
        self.blackjacks += other.blackjacks;
        self.losses += other.losses;
        self.pushes += other.pushes;
        self.total_reward += other.total_reward;
        self.total_bet += other.total_bet;
    }

    fn percent(&self, count: u64) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            100.0 * count as f64 / self.episodes as f64
        }
    }

    /// Percentage of episodes won, naturals included.
    pub fn win_rate(&self) -> f64 {
        self.percent(self.wins)
    }

    pub fn loss_rate(&self) -> f64 {
        self.percent(self.losses)
    }

    pub fn tie_rate(&self) -> f64 {
        self.percent(self.pushes)
    }

    pub fn blackjack_rate(&self) -> f64 {
        self.percent(self.blackjacks)
    }

    pub fn average_reward(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total_reward / self.episodes as f64
        }
    }

    /// Reward per unit staked, comparable across buckets with different bets.
    pub fn return_per_unit(&self) -> f64 {
        if self.total_bet == 0 {
            0.0
        } else {
            self.total_reward / self.total_bet as f64
        }
    }
}

/// Evaluation artifact: statistics keyed by the true-count bucket observed when
/// each episode's bet was placed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsTable {
    buckets: BTreeMap<i8, BucketStats>,
}

impl ResultsTable {
    pub fn record(&mut self, bucket: i8, outcome: Outcome, reward: f64, bet: u32) {
        self.buckets
            .entry(bucket)
            .or_default()
            .record(outcome, reward, bet);
    }

    pub fn merge(&mut self, other: &ResultsTable) {
        for (bucket, stats) in &other.buckets {
            self.buckets.entry(*bucket).or_default().merge(stats);
        }
    }

    pub fn bucket(&self, bucket: i8) -> Option<&BucketStats> {
        self.buckets.get(&bucket)
    }

    pub fn rows(&self) -> impl Iterator<Item = (i8, &BucketStats)> {
        self.buckets.iter().map(|(bucket, stats)| (*bucket, stats))
    }

    pub fn overall(&self) -> BucketStats {
        let mut overall = BucketStats::default();
        for stats in self.buckets.values() {
            overall.merge(stats);
        }
        overall
    }
}

/// Stop training once the mean reward of the last `window` episodes differs
/// from the mean of the window before it by at most `tolerance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    pub window: usize,
    pub tolerance: f64,
}

impl Convergence {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 || !(self.tolerance >= 0.0) {
            return Err(BlackjackError::InvalidConfig(String::from(
                "convergence needs a positive window and a non-negative tolerance",
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct MovingAverage {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    fn new(window: usize) -> Self {
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.values.len() == self.window
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub results: ResultsTable,
    pub episodes: u64,
    /// Training stopped early because the moving average settled.
    pub converged: bool,
}

/// Drives episodes of one environment with an agent, either learning or
/// frozen, and aggregates the outcomes.
pub struct Simulator<B: BetSizing = ThresholdBet> {
    environment: Environment,
    bet_rule: B,
    fixed_true_count: Option<i32>,
    convergence: Option<Convergence>,
    progress_interval: u64,
}

impl<B: BetSizing> Simulator<B> {
    pub fn new(environment: Environment, bet_rule: B) -> Self {
        Self {
            environment,
            bet_rule,
            fixed_true_count: None,
            convergence: None,
            progress_interval: 0,
        }
    }

    /// Re-stacks the shoe to this true count before every episode.
    pub fn with_fixed_true_count(mut self, true_count: Option<i32>) -> Self {
        self.fixed_true_count = true_count;
        self
    }

    pub fn with_convergence(mut self, convergence: Option<Convergence>) -> Self {
        self.convergence = convergence;
        self
    }

    /// Logs training progress every `interval` episodes; 0 disables it.
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Runs `num_episodes` episodes. With `greedy` false the agent explores and
    /// learns from every transition; with `greedy` true it is frozen.
    pub fn run<A: Agent + ?Sized>(
        &mut self,
        agent: &mut A,
        num_episodes: u64,
        greedy: bool,
    ) -> Result<RunReport> {
        self.run_window(agent, 0..num_episodes, num_episodes, greedy)
    }

    /// Runs the episodes numbered `episodes` out of a run of `total_episodes`,
    /// so schedules keep their position across calls.
    pub fn run_window<A: Agent + ?Sized>(
        &mut self,
        agent: &mut A,
        episodes: Range<u64>,
        total_episodes: u64,
        greedy: bool,
    ) -> Result<RunReport> {
        if let Some(convergence) = &self.convergence {
            convergence.validate()?;
        }
        let window = self.convergence.map(|c| c.window).unwrap_or(1000).max(1);
        let mut current = MovingAverage::new(window);
        let mut previous_mean: Option<f64> = None;
        let mut report = RunReport::default();

        for episode in episodes {
            if !greedy {
                agent.begin_episode(episode, total_episodes);
            }
            let reward = self.play_episode(agent, greedy)?;
            let outcome = self.environment.outcome().ok_or_else(|| {
                BlackjackError::InvalidConfig(String::from("episode ended without an outcome"))
            })?;
            report.results.record(
                self.environment.starting_bucket(),
                outcome,
                reward,
                self.environment.bet(),
            );
            report.episodes += 1;

            current.push(reward);
            if self.progress_interval > 0 && (episode + 1) % self.progress_interval == 0 {
                log::info!(
                    "episode {:>10} / {}   epsilon {:.4}   moving average reward {:+.4}",
                    episode + 1,
                    total_episodes,
                    agent.exploration(),
                    current.mean()
                );
            }

            if greedy || report.episodes % window as u64 != 0 || !current.is_full() {
                continue;
            }
            if let (Some(convergence), Some(previous)) = (self.convergence, previous_mean) {
                if (current.mean() - previous).abs() <= convergence.tolerance {
                    log::info!(
                        "moving average settled at {:+.4} after {} episodes",
                        current.mean(),
                        episode + 1
                    );
                    report.converged = true;
                    break;
                }
            }
            previous_mean = Some(current.mean());
        }

        Ok(report)
    }

    /// Plays one episode to the end and returns its total reward. While learning,
    /// hands settled by the deal itself are re-dealt, so every training episode
    /// yields at least one transition.
    fn play_episode<A: Agent + ?Sized>(&mut self, agent: &mut A, greedy: bool) -> Result<f64> {
        let observation = loop {
            if let Some(true_count) = self.fixed_true_count {
                self.environment.shoe_mut().stack_true_count(true_count)?;
            }
            let observation = self.environment.reset(&self.bet_rule)?;
            if !observation.done {
                break observation;
            }
            if greedy {
                return Ok(observation.reward);
            }
        };
        let mut total_reward = observation.reward;

        let mut state = observation.state;
        let mut action = agent.select_action(&state, !greedy);
        loop {
            let next = self.environment.step(action)?;
            total_reward += next.reward;
            let next_action = if next.done {
                None
            } else {
                Some(agent.select_action(&next.state, !greedy))
            };
            if !greedy {
                agent.observe(&Transition {
                    state,
                    action,
                    reward: next.reward,
                    next_state: next.state,
                    next_action,
                    done: next.done,
                });
            }
            match next_action {
                Some(chosen) => {
                    state = next.state;
                    action = chosen;
                }
                None => return Ok(total_reward),
            }
        }
    }
}

/// Everything needed to build the environment of one simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSetup {
    pub rule: Rule,
    pub space: StateSpace,
    pub bet_rule: ThresholdBet,
    pub fixed_true_count: Option<i32>,
}

impl TableSetup {
    pub fn simulator(&self, seed: u64) -> Result<Simulator<ThresholdBet>> {
        self.bet_rule.validate()?;
        let environment = Environment::new(&self.rule, self.space, StdRng::seed_from_u64(seed))?;
        Ok(Simulator::new(environment, self.bet_rule).with_fixed_true_count(self.fixed_true_count))
    }
}

/// Runs `num_simulations` independent shoes of `episodes_per_simulation`
/// greedy episodes each and merges their results.
pub fn evaluate<A: Agent + ?Sized>(
    agent: &mut A,
    setup: &TableSetup,
    num_simulations: u64,
    episodes_per_simulation: u64,
    seed: u64,
) -> Result<ResultsTable> {
    let mut results = ResultsTable::default();
    for simulation in 0..num_simulations {
        let mut simulator = setup.simulator(seed.wrapping_add(simulation))?;
        let report = simulator.run(agent, episodes_per_simulation, true)?;
        results.merge(&report.results);
        log::debug!("simulation {} of {} done", simulation + 1, num_simulations);
    }
    Ok(results)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelTraining {
    pub workers: usize,
    /// Episodes each worker plays between merges.
    pub sync_interval: u64,
}

/// Trains one value table with several workers. Each worker owns its shoe, its
/// random source and a private copy of the table; after every `sync_interval`
/// episodes the copies are averaged and handed back to all workers.
pub fn train_parallel(
    table: ValueTable,
    params: LearningParams,
    setup: &TableSetup,
    num_episodes: u64,
    parallel: ParallelTraining,
    seed: u64,
) -> Result<ValueTable> {
    if parallel.workers == 0 || parallel.sync_interval == 0 {
        return Err(BlackjackError::InvalidConfig(String::from(
            "parallel training needs at least one worker and a positive sync_interval",
        )));
    }

    let mut workers = (0..parallel.workers)
        .map(|worker| {
            let worker_seed = seed.wrapping_add(worker as u64);
            let simulator = setup.simulator(worker_seed)?;
            let agent = TabularAgent::new(
                table.clone(),
                params,
                StdRng::seed_from_u64(worker_seed.wrapping_add(1 << 32)),
            )?;
            Ok((simulator, agent))
        })
        .collect::<Result<Vec<_>>>()?;

    let per_worker = num_episodes.div_ceil(parallel.workers as u64);
    let mut merged = table;
    let mut start = 0;
    log::info!(
        "training {} episodes on {} workers, merging every {}",
        num_episodes,
        parallel.workers,
        parallel.sync_interval
    );
    while start < per_worker {
        let end = (start + parallel.sync_interval).min(per_worker);
        workers
            .par_iter_mut()
            .map(|(simulator, agent)| {
                simulator
                    .run_window(agent, start..end, per_worker, false)
                    .map(|_| ())
            })
            .collect::<Result<Vec<_>>>()?;

        let shards: Vec<ValueTable> = workers.iter().map(|(_, agent)| agent.table().clone()).collect();
        merged = ValueTable::average(&shards)?;
        for (_, agent) in workers.iter_mut() {
            agent.replace_table(merged.clone());
        }
        log::info!("merged {} shards after {} episodes per worker", shards.len(), end);
        start = end;
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{BasicStrategy, EpsilonSchedule};
    use crate::Action;

    fn setup(fixed_true_count: Option<i32>) -> TableSetup {
        TableSetup {
            rule: Rule::default(),
            space: StateSpace::default(),
            bet_rule: ThresholdBet::default(),
            fixed_true_count,
        }
    }

    fn learning_params() -> LearningParams {
        LearningParams {
            alpha: 0.05,
            gamma: 1.0,
            lambda: 0.0,
            epsilon: EpsilonSchedule {
                start: 0.3,
                end: 0.05,
                decay: 0.9999,
            },
            alpha_decay: false,
        }
    }

    #[test]
    fn bucket_rates_add_up() {
        let mut stats = BucketStats::default();
        stats.record(Outcome::Blackjack, 1.5, 1);
        stats.record(Outcome::Win, 20.0, 20);
        stats.record(Outcome::Loss, -1.0, 1);
        stats.record(Outcome::Push, 0.0, 1);
        assert_eq!(stats.win_rate(), 50.0);
        assert_eq!(stats.loss_rate(), 25.0);
        assert_eq!(stats.tie_rate(), 25.0);
        assert_eq!(stats.blackjack_rate(), 25.0);
        assert_eq!(stats.average_reward(), 20.5 / 4.0);
        assert_eq!(stats.return_per_unit(), 20.5 / 23.0);
        assert_eq!(BucketStats::default().average_reward(), 0.0);
    }

    #[test]
    fn results_merge_by_bucket() {
        let mut a = ResultsTable::default();
        a.record(-1, Outcome::Loss, -1.0, 1);
        a.record(2, Outcome::Win, 20.0, 20);
        let mut b = ResultsTable::default();
        b.record(2, Outcome::Push, 0.0, 20);
        a.merge(&b);
        assert_eq!(a.bucket(2).unwrap().episodes, 2);
        assert_eq!(a.bucket(-1).unwrap().losses, 1);
        assert_eq!(a.overall().episodes, 3);
        let buckets: Vec<i8> = a.rows().map(|(bucket, _)| bucket).collect();
        assert_eq!(buckets, vec![-1, 2]);
    }

    #[test]
    fn moving_average_keeps_the_window() {
        let mut average = MovingAverage::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            average.push(value);
        }
        assert!(average.is_full());
        assert_eq!(average.mean(), 3.0);
    }

    #[test]
    fn greedy_runs_do_not_learn() {
        let table = ValueTable::new(StateSpace::default());
        let mut agent =
            TabularAgent::new(table.clone(), learning_params(), StdRng::seed_from_u64(1)).unwrap();
        let mut simulator = setup(None).simulator(5).unwrap();
        let report = simulator.run(&mut agent, 500, true).unwrap();
        assert_eq!(report.episodes, 500);
        assert_eq!(report.results.overall().episodes, 500);
        assert_eq!(agent.table(), &table);
    }

    #[test]
    fn training_changes_the_table() {
        let table = ValueTable::new(StateSpace::default());
        let mut agent =
            TabularAgent::new(table.clone(), learning_params(), StdRng::seed_from_u64(2)).unwrap();
        let mut simulator = setup(None).simulator(6).unwrap();
        let report = simulator.run(&mut agent, 2000, false).unwrap();
        assert_eq!(report.episodes, 2000);
        assert!(!report.converged);
        assert_ne!(agent.table(), &table);
    }

    #[test]
    fn training_learns_to_stand_on_twenty() {
        let mut agent = TabularAgent::new(
            ValueTable::new(StateSpace::default()),
            learning_params(),
            StdRng::seed_from_u64(3),
        )
        .unwrap();
        let mut simulator = setup(None).simulator(7).unwrap();
        simulator.run(&mut agent, 200_000, false).unwrap();

        let table = agent.table();
        let mut stands = 0;
        let mut visited = 0;
        for dealer_upcard in 2..=11 {
            let state = crate::State {
                player_total: 20,
                dealer_upcard,
                usable_ace: false,
                true_count_bucket: 0,
            };
            if table[(state, Action::Hit)] != 0.0 || table[(state, Action::Stand)] != 0.0 {
                visited += 1;
                if table.best_action(&state) == Action::Stand {
                    stands += 1;
                }
            }
        }
        assert!(visited >= 8, "{}", visited);
        assert_eq!(stands, visited);
    }

    #[test]
    fn convergence_stops_training_early() {
        let mut agent = TabularAgent::new(
            ValueTable::new(StateSpace::default()),
            learning_params(),
            StdRng::seed_from_u64(4),
        )
        .unwrap();
        let mut simulator = setup(None).simulator(8).unwrap().with_convergence(Some(Convergence {
            window: 100,
            tolerance: 1e9,
        }));
        let report = simulator.run(&mut agent, 10_000, false).unwrap();
        assert!(report.converged);
        assert_eq!(report.episodes, 200);
    }

    #[test]
    fn fixed_true_count_lands_in_its_bucket() {
        let mut strategy = BasicStrategy::default();
        let results = evaluate(&mut strategy, &setup(Some(3)), 2, 200, 9).unwrap();
        let rows: Vec<(i8, u64)> = results.rows().map(|(b, s)| (b, s.episodes)).collect();
        assert_eq!(rows, vec![(3, 400)]);
        assert_eq!(results.bucket(3).unwrap().total_bet, 400 * 20);
    }

    #[test]
    fn evaluation_is_reproducible() {
        let mut strategy = BasicStrategy::default();
        let first = evaluate(&mut strategy, &setup(None), 2, 1000, 10).unwrap();
        let second = evaluate(&mut strategy, &setup(None), 2, 1000, 10).unwrap();
        assert_eq!(first, second);
        let overall = first.overall();
        assert_eq!(overall.episodes, 2000);
        assert_eq!(overall.wins + overall.losses + overall.pushes, 2000);
    }

    #[test]
    fn parallel_training_merges_shards() {
        let table = ValueTable::new(StateSpace::default());
        let merged = train_parallel(
            table.clone(),
            learning_params(),
            &setup(None),
            4000,
            ParallelTraining {
                workers: 4,
                sync_interval: 250,
            },
            11,
        )
        .unwrap();
        assert_ne!(merged, table);
        assert!(train_parallel(
            table,
            learning_params(),
            &setup(None),
            10,
            ParallelTraining {
                workers: 0,
                sync_interval: 1,
            },
            0,
        )
        .is_err());
    }

    /// Rich shoes favour the player. Compared per unit staked so the larger bets
    /// at positive counts do not scale the comparison.
    #[test]
    fn positive_counts_beat_negative_counts() {
        let mut strategy = BasicStrategy::default();
        let rich = evaluate(&mut strategy, &setup(Some(6)), 4, 10_000, 12).unwrap();
        let poor = evaluate(&mut strategy, &setup(Some(-6)), 4, 10_000, 13).unwrap();
        let rich = rich.bucket(6).unwrap().return_per_unit();
        let poor = poor.bucket(-6).unwrap().return_per_unit();
        assert!(rich > poor, "{} <= {}", rich, poor);
    }

    #[derive(Default)]
    struct CountingAgent {
        begun: u64,
        finished: u64,
    }

    impl Agent for CountingAgent {
        fn select_action(&mut self, _state: &crate::State, _explore: bool) -> Action {
            Action::Stand
        }

        fn observe(&mut self, transition: &Transition) {
            if transition.done {
                self.finished += 1;
            }
        }

        fn begin_episode(&mut self, _episode: u64, _total_episodes: u64) {
            self.begun += 1;
        }
    }

    #[test]
    fn training_episodes_all_produce_transitions() {
        let mut agent = CountingAgent::default();
        let report = setup(None)
            .simulator(18)
            .unwrap()
            .run(&mut agent, 5000, false)
            .unwrap();
        assert_eq!(report.episodes, 5000);
        assert_eq!(agent.begun, 5000);
        assert_eq!(agent.finished, 5000);
        assert_eq!(report.results.overall().blackjacks, 0);

        // Evaluation still plays and scores naturals.
        let mut agent = CountingAgent::default();
        let report = setup(None)
            .simulator(18)
            .unwrap()
            .run(&mut agent, 5000, true)
            .unwrap();
        assert_eq!(report.episodes, 5000);
        assert_eq!(agent.begun, 0);
        assert_eq!(agent.finished, 0);
        assert!(report.results.overall().blackjacks > 0);
    }

    /// Average reward per hand of hit/stand play with unit bets in a six-deck
    /// shoe held at a true count of +2. Giving up doubles and splits costs about
    /// 2% against full basic strategy; +2 gives back about 1%.
    const AVERAGE_REWARD_AT_PLUS_TWO: f64 = -0.03;
    /// Covers a partly trained table; the sampling error over 200,000 hands is
    /// about 0.0026.
    const AVERAGE_REWARD_TOLERANCE: f64 = 0.05;

    fn flat_bet_setup(space: StateSpace, fixed_true_count: i32) -> TableSetup {
        TableSetup {
            rule: Rule::default(),
            space,
            bet_rule: ThresholdBet {
                large: 1,
                small: 1,
                threshold: 2,
            },
            fixed_true_count: Some(fixed_true_count),
        }
    }

    /// Trains one table on shoes held at +2 and at -2, then plays its greedy
    /// policy for twenty shoes of 10,000 hands at each count. Bets are flat so
    /// the two averages compare directly.
    #[test]
    fn trained_policy_earns_more_at_plus_two_than_minus_two() {
        let space = StateSpace::new(2).unwrap();
        let mut agent =
            TabularAgent::new(ValueTable::new(space), learning_params(), StdRng::seed_from_u64(19))
                .unwrap();
        let mut rich = flat_bet_setup(space, 2).simulator(20).unwrap();
        let mut poor = flat_bet_setup(space, -2).simulator(21).unwrap();
        let (rounds, per_round) = (20, 5_000);
        let total = 2 * rounds * per_round;
        for round in 0..rounds {
            let start = 2 * round * per_round;
            rich.run_window(&mut agent, start..start + per_round, total, false)
                .unwrap();
            poor.run_window(&mut agent, start + per_round..start + 2 * per_round, total, false)
                .unwrap();
        }
        let mut policy = agent.table().policy();

        let plus = evaluate(&mut policy, &flat_bet_setup(space, 2), 20, 10_000, 22)
            .unwrap()
            .bucket(2)
            .unwrap()
            .average_reward();
        let minus = evaluate(&mut policy, &flat_bet_setup(space, -2), 20, 10_000, 23)
            .unwrap()
            .bucket(-2)
            .unwrap()
            .average_reward();

        assert!(
            (plus - AVERAGE_REWARD_AT_PLUS_TWO).abs() < AVERAGE_REWARD_TOLERANCE,
            "{} vs {}",
            plus,
            AVERAGE_REWARD_AT_PLUS_TWO
        );
        assert!(plus > minus, "{} <= {}", plus, minus);
    }
}
