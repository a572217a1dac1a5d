use blackjack_rl::strategy::{EpsilonSchedule, GradientParams, LearningParams};
use blackjack_rl::training::{Convergence, ParallelTraining, TableSetup};
use blackjack_rl::{BlackjackError, Rule, StateSpace, ThresholdBet};
use serde::{Deserialize, Serialize};
use std::fs;

mod report;

pub use report::format_results;

pub const DEFAULT_CONFIG_PATH: &str = "~/.blackjack_rl.yml";
const DEFAULT_CONFIG_FILE: &str = ".blackjack_rl.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub rule: ConfigRule,
    #[serde(default)]
    pub betting: ConfigBetting,
    #[serde(default)]
    pub training: ConfigTraining,
    #[serde(default)]
    pub evaluation: ConfigEvaluation,
    /// Debug-level log file written next to the terminal output.
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRule {
    pub num_decks: u8,
    pub penetration: f64,
    pub dealer_hit_on_soft17: bool,
    pub payout_blackjack: f64,
}

impl Default for ConfigRule {
    fn default() -> Self {
        let rule = Rule::default();
        Self {
            num_decks: rule.number_of_decks,
            penetration: rule.penetration,
            dealer_hit_on_soft17: rule.dealer_hit_on_soft17,
            payout_blackjack: rule.payout_blackjack,
        }
    }
}

impl TryInto<Rule> for ConfigRule {
    type Error = BlackjackError;

    fn try_into(self) -> Result<Rule, Self::Error> {
        let rule = Rule {
            number_of_decks: self.num_decks,
            penetration: self.penetration,
            dealer_hit_on_soft17: self.dealer_hit_on_soft17,
            payout_blackjack: self.payout_blackjack,
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigBetting {
    pub bet_large: u32,
    pub bet_small: u32,
    pub true_count_threshold: i32,
}

impl Default for ConfigBetting {
    fn default() -> Self {
        let bet = ThresholdBet::default();
        Self {
            bet_large: bet.large,
            bet_small: bet.small,
            true_count_threshold: bet.threshold,
        }
    }
}

impl TryInto<ThresholdBet> for ConfigBetting {
    type Error = BlackjackError;

    fn try_into(self) -> Result<ThresholdBet, Self::Error> {
        let bet = ThresholdBet {
            large: self.bet_large,
            small: self.bet_small,
            threshold: self.true_count_threshold,
        };
        bet.validate()?;
        Ok(bet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Tabular,
    PolicyGradient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigTraining {
    pub agent: AgentKind,
    pub num_episodes: u64,
    pub alpha: f64,
    pub gamma: f64,
    pub lambda: f64,
    pub epsilon_start: f64,
    pub epsilon_end: f64,
    pub epsilon_decay: f64,
    pub alpha_decay: bool,
    /// Step size of the policy-gradient agent.
    pub learning_rate: f64,
    pub true_count_limit: i8,
    pub fixed_true_count: Option<i32>,
    pub seed: u64,
    pub workers: usize,
    pub sync_interval: u64,
    pub progress_interval: u64,
    pub convergence_window: Option<usize>,
    pub convergence_tolerance: f64,
    pub table_path: String,
}

impl Default for ConfigTraining {
    fn default() -> Self {
        let params = LearningParams::default();
        Self {
            agent: AgentKind::Tabular,
            num_episodes: 1_000_000,
            alpha: params.alpha,
            gamma: params.gamma,
            lambda: params.lambda,
            epsilon_start: params.epsilon.start,
            epsilon_end: params.epsilon.end,
            epsilon_decay: params.epsilon.decay,
            alpha_decay: params.alpha_decay,
            learning_rate: GradientParams::default().learning_rate,
            true_count_limit: StateSpace::default().true_count_limit(),
            fixed_true_count: None,
            seed: 0,
            workers: 1,
            sync_interval: 10_000,
            progress_interval: 100_000,
            convergence_window: None,
            convergence_tolerance: 0.001,
            table_path: String::from("value_table.json"),
        }
    }
}

impl TryInto<LearningParams> for &ConfigTraining {
    type Error = BlackjackError;

    fn try_into(self) -> Result<LearningParams, Self::Error> {
        let params = LearningParams {
            alpha: self.alpha,
            gamma: self.gamma,
            lambda: self.lambda,
            epsilon: EpsilonSchedule {
                start: self.epsilon_start,
                end: self.epsilon_end,
                decay: self.epsilon_decay,
            },
            alpha_decay: self.alpha_decay,
        };
        params.validate()?;
        Ok(params)
    }
}

impl TryInto<GradientParams> for &ConfigTraining {
    type Error = BlackjackError;

    fn try_into(self) -> Result<GradientParams, Self::Error> {
        let params = GradientParams {
            learning_rate: self.learning_rate,
            gamma: self.gamma,
            ..GradientParams::default()
        };
        params.validate()?;
        Ok(params)
    }
}

impl ConfigTraining {
    pub fn convergence(&self) -> Result<Option<Convergence>, BlackjackError> {
        self.convergence_window
            .map(|window| {
                let convergence = Convergence {
                    window,
                    tolerance: self.convergence_tolerance,
                };
                convergence.validate().map(|_| convergence)
            })
            .transpose()
    }

    pub fn parallel(&self) -> ParallelTraining {
        ParallelTraining {
            workers: self.workers,
            sync_interval: self.sync_interval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigEvaluation {
    pub num_simulations: u64,
    pub episodes_per_simulation: u64,
    pub fixed_true_count: Option<i32>,
    pub seed: u64,
    pub table_path: String,
}

impl Default for ConfigEvaluation {
    fn default() -> Self {
        Self {
            num_simulations: 10,
            episodes_per_simulation: 10_000,
            fixed_true_count: None,
            seed: 1,
            table_path: String::from("value_table.json"),
        }
    }
}

impl Config {
    /// Table geometry and betting shared by training and evaluation.
    pub fn table_setup(&self, fixed_true_count: Option<i32>) -> Result<TableSetup, BlackjackError> {
        Ok(TableSetup {
            rule: self.rule.clone().try_into()?,
            space: StateSpace::new(self.training.true_count_limit)?,
            bet_rule: self.betting.clone().try_into()?,
            fixed_true_count,
        })
    }
}

/// Reads the content of a given config file and parses it to a Config.
pub fn parse_config_from_file(filename: &str) -> Result<Config, BlackjackError> {
    let file_content = fs::read_to_string(filename)?;
    serde_yaml::from_str(&file_content)
        .map_err(|e| BlackjackError::InvalidConfig(format!("{}: {}", filename, e)))
}

/// Replaces the default config path with the file in the home directory.
pub fn resolve_config_path(config: &str) -> Result<String, BlackjackError> {
    if config != DEFAULT_CONFIG_PATH {
        return Ok(String::from(config));
    }
    let home_dir = home::home_dir()
        .ok_or_else(|| BlackjackError::InvalidConfig(String::from("cannot find home directory")))?;
    let config_file_path = home_dir.join(DEFAULT_CONFIG_FILE);
    if !config_file_path.exists() {
        return Err(BlackjackError::InvalidConfig(format!(
            "config file {} does not exist",
            config_file_path.display()
        )));
    }
    if config_file_path.is_dir() {
        return Err(BlackjackError::InvalidConfig(String::from(
            "the config path should be a file rather than a directory",
        )));
    }
    Ok(config_file_path.to_string_lossy().into_owned())
}

/// Terminal logging at Info, plus a Debug-level file when `log_file` is given.
pub fn init_logger(log_file: Option<&str>) -> Result<(), BlackjackError> {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        loggers.push(simplelog::WriteLogger::new(
            log::LevelFilter::Debug,
            config,
            fs::File::create(path)?,
        ));
    }
    simplelog::CombinedLogger::init(loggers)
        .map_err(|e| BlackjackError::InvalidConfig(format!("cannot initialize logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_typical_config_rule() -> ConfigRule {
        ConfigRule {
            num_decks: 8,
            penetration: 0.5,
            dealer_hit_on_soft17: false,
            payout_blackjack: 1.2,
        }
    }

    #[test]
    fn can_convert_rule() {
        let config_rule = get_typical_config_rule();
        let converted_rule: Rule = config_rule.try_into().unwrap();
        assert_eq!(converted_rule.number_of_decks, 8);
        assert_eq!(converted_rule.penetration, 0.5);
        assert!(!converted_rule.dealer_hit_on_soft17);
        assert_eq!(converted_rule.payout_blackjack, 1.2);
    }

    #[test]
    fn should_return_error_when_converting_rule() {
        let mut config_rule = get_typical_config_rule();
        config_rule.penetration = 1.5;
        let convert_result: Result<Rule, BlackjackError> = config_rule.try_into();
        assert!(matches!(
            convert_result,
            Err(BlackjackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn can_parse_partial_yaml() {
        let config: Config = serde_yaml::from_str(
            "rule:\n  num_decks: 2\n  penetration: 0.6\n\
             betting:\n  bet_large: 10\n\
             training:\n  num_episodes: 5000\n  lambda: 0.0\n  convergence_window: 500\n\
             evaluation:\n  fixed_true_count: 2\n",
        )
        .unwrap();
        assert_eq!(config.rule.num_decks, 2);
        assert!(config.rule.dealer_hit_on_soft17);
        assert_eq!(config.betting.bet_large, 10);
        assert_eq!(config.betting.bet_small, 1);
        assert_eq!(config.training.num_episodes, 5000);
        assert_eq!(config.training.agent, AgentKind::Tabular);
        assert_eq!(config.evaluation.fixed_true_count, Some(2));
        assert!(config.log_file.is_none());

        let params: LearningParams = (&config.training).try_into().unwrap();
        assert_eq!(params.lambda, 0.0);
        let convergence = config.training.convergence().unwrap().unwrap();
        assert_eq!(convergence.window, 500);

        let setup = config.table_setup(Some(2)).unwrap();
        assert_eq!(setup.rule.number_of_decks, 2);
        assert_eq!(setup.bet_rule.large, 10);
    }

    #[test]
    fn can_parse_agent_kind() {
        let config: Config =
            serde_yaml::from_str("rule: {}\ntraining:\n  agent: policy_gradient\n").unwrap();
        assert_eq!(config.training.agent, AgentKind::PolicyGradient);
        assert!(serde_yaml::from_str::<Config>("rule: {}\ntraining:\n  agent: dqn\n").is_err());
    }

    #[test]
    fn should_reject_invalid_learning_params() {
        let training = ConfigTraining {
            epsilon_start: 0.01,
            epsilon_end: 0.1,
            ..ConfigTraining::default()
        };
        let params: Result<LearningParams, BlackjackError> = (&training).try_into();
        assert!(params.is_err());

        let betting = ConfigBetting {
            bet_small: 0,
            ..ConfigBetting::default()
        };
        let bet: Result<ThresholdBet, BlackjackError> = betting.try_into();
        assert!(bet.is_err());
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let path = std::env::temp_dir().join("blackjack_rl_missing_config.yml");
        let _ = fs::remove_file(&path);
        let result = parse_config_from_file(path.to_str().unwrap());
        assert!(matches!(result, Err(BlackjackError::Io(_))));
        assert_eq!(resolve_config_path("custom.yml").unwrap(), "custom.yml");
    }
}
