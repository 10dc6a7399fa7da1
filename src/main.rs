use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{
        disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
    tty::IsTty,
};
use dpotd::{
    admin::{self, Admin, AdminError},
    app_dirs::AppDirs,
    clock::SystemClock,
    config::{Config, ConfigStore, FileConfigStore, Overrides},
    dispatch::ThreadDispatch,
    environment::TerminalEnvironment,
    gateway::{HttpGateway, QuestionsPayload, Settings},
    logging,
    proctor::{Flow, Proctor},
    runtime::{CrosstermEventSource, FixedTicker, Runner},
    schedule::Schedule,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    fs::File,
    io::{self, stdin},
    path::PathBuf,
    sync::Arc,
};

/// proctored daily-problem test client
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "Take the daily timed test in a locked-down terminal session, or manage questions, schedule and submissions as an admin."
)]
pub struct Cli {
    /// config file to use instead of the platform default
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// backend endpoint url, overrides the config file
    #[clap(long, global = true)]
    endpoint: Option<String>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// take today's test (the default)
    Take {
        /// test length in minutes
        #[clap(long)]
        duration_mins: Option<u64>,
    },
    /// show the effective configuration, or write it to the config file
    #[clap(subcommand)]
    Config(ConfigCommand),
    /// maintain questions, schedule, settings and submissions
    Admin {
        /// admin password
        #[clap(long)]
        password: String,

        #[clap(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// print the configuration after flags and environment are applied
    Show,
    /// store the configuration, including any flags given, in the config file
    Save,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// questions for a day
    #[clap(subcommand)]
    Questions(QuestionsCommand),
    /// start times of the five days
    #[clap(subcommand)]
    Schedule(ScheduleCommand),
    /// backend settings
    #[clap(subcommand)]
    Settings(SettingsCommand),
    /// received submissions
    #[clap(subcommand)]
    Submissions(SubmissionsCommand),
}

#[derive(Subcommand, Debug)]
enum QuestionsCommand {
    Show {
        #[clap(long, default_value_t = 1)]
        day: u8,
    },
    Save {
        #[clap(long, default_value_t = 1)]
        day: u8,
        #[clap(flatten)]
        questions: QuestionArgs,
    },
}

#[derive(Args, Debug)]
struct QuestionArgs {
    #[clap(long)]
    q1_text: String,
    #[clap(long)]
    q1_answer: String,
    #[clap(long)]
    q2_text: String,
    #[clap(long)]
    q2_answer: String,
    #[clap(long)]
    q3_text: String,
    /// reference notes for the manually graded question
    #[clap(long, default_value = "")]
    q3_answer: String,
}

impl From<QuestionArgs> for QuestionsPayload {
    fn from(a: QuestionArgs) -> Self {
        Self {
            q1_text: a.q1_text,
            q1_answer: a.q1_answer,
            q2_text: a.q2_text,
            q2_answer: a.q2_answer,
            q3_text: a.q3_text,
            q3_answer: a.q3_answer,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    Show,
    /// replace the schedule; days left out are cleared
    Save {
        #[clap(long)]
        day1: Option<String>,
        #[clap(long)]
        day2: Option<String>,
        #[clap(long)]
        day3: Option<String>,
        #[clap(long)]
        day4: Option<String>,
        #[clap(long)]
        day5: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    /// update the given settings, keeping the rest
    Save {
        #[clap(long)]
        admin_email: Option<String>,
        #[clap(long)]
        test_duration: Option<u64>,
        #[clap(long)]
        upload_time: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum SubmissionsCommand {
    List,
    /// write all submissions to a csv file
    Export {
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // logging first, so problems with the config file are reported
    match &cli.command {
        None | Some(Command::Take { .. }) => {
            if !stdin().is_tty() {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
            }
            if let Some(path) = AppDirs::log_path() {
                logging::init_file(&path)?;
            }
        }
        Some(_) => logging::init_stderr(),
    }

    let store = cli
        .config
        .as_ref()
        .map_or_else(FileConfigStore::new, FileConfigStore::with_path);
    let duration_mins = match &cli.command {
        Some(Command::Take { duration_mins }) => *duration_mins,
        _ => None,
    };
    let config = store
        .load()
        .apply(Overrides {
            endpoint: cli.endpoint.clone(),
            test_duration_mins: duration_mins,
            admin_secret: None,
        })
        .apply_env();

    match cli.command {
        None | Some(Command::Take { .. }) => take(config),
        Some(Command::Config(command)) => run_config(&store, &config, command),
        Some(Command::Admin { password, command }) => {
            if let Err(err) = run_admin(&config, &password, command) {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn gateway(config: &Config) -> Result<HttpGateway, Box<dyn Error>> {
    if config.endpoint.trim().is_empty() {
        let mut cmd = Cli::command();
        cmd.error(
            ErrorKind::MissingRequiredArgument,
            "no endpoint configured: pass --endpoint or set \"endpoint\" in the config file",
        )
        .exit();
    }
    Ok(HttpGateway::new(&config.endpoint, config.request_timeout())?)
}

fn take(config: Config) -> Result<(), Box<dyn Error>> {
    let gateway = gateway(&config)?;
    tracing::info!(endpoint = gateway.endpoint(), "starting test client");

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &config, gateway);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    config: &Config,
    gateway: HttpGateway,
) -> Result<(), Box<dyn Error>> {
    // has to run before the event reader thread owns stdin
    let enhanced = supports_keyboard_enhancement().unwrap_or(false);
    let env = TerminalEnvironment::new(config.min_cols, config.min_rows)
        .with_keyboard_enhancement(enhanced);
    tracing::debug!(enhanced, "keyboard enhancement");
    let events = CrosstermEventSource::new();
    let dispatch = ThreadDispatch::new(Arc::new(gateway), events.sender());
    let mut proctor = Proctor::new(config.proctor_options(), dispatch, env, SystemClock);
    let mut runner = Runner::new(events, FixedTicker::new(config.tick()));

    loop {
        terminal.draw(|f| f.render_widget(&proctor, f.area()))?;

        if proctor.handle(runner.step()) == Flow::Quit {
            break;
        }
        for (after, alarm) in proctor.drain_alarms() {
            runner.arm(after, alarm);
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AdminError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AdminError::InvalidInput(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn run_config(store: &FileConfigStore, config: &Config, command: ConfigCommand) -> Result<(), Box<dyn Error>> {
    match command {
        ConfigCommand::Show => {
            let shown = Config {
                admin_secret: config.admin_secret.as_ref().map(|_| "********".to_string()),
                ..config.clone()
            };
            print_json(&shown)?;
        }
        ConfigCommand::Save => {
            store.save(config)?;
            tracing::info!(path = %store.path().display(), "config saved");
            println!("Saved configuration to {}", store.path().display());
        }
    }
    Ok(())
}

fn run_admin(config: &Config, password: &str, command: AdminCommand) -> Result<(), Box<dyn Error>> {
    let gateway = gateway(config)?;
    let admin = Admin::login(&gateway, config.admin_secret.as_deref(), password)?;

    match command {
        AdminCommand::Questions(QuestionsCommand::Show { day }) => print_json(&admin.questions(day)?)?,
        AdminCommand::Questions(QuestionsCommand::Save { day, questions }) => {
            admin.save_questions(day, &questions.into())?;
            println!("Questions saved for day {day}");
        }
        AdminCommand::Schedule(ScheduleCommand::Show) => print_json(&admin.schedule()?)?,
        AdminCommand::Schedule(ScheduleCommand::Save {
            day1,
            day2,
            day3,
            day4,
            day5,
        }) => {
            let mut schedule = Schedule::default();
            for (day, value) in (1..).zip([day1, day2, day3, day4, day5]) {
                schedule.set(day, value);
            }
            print_json(&admin.save_schedule(&schedule)?)?;
        }
        AdminCommand::Settings(SettingsCommand::Show) => print_json(&admin.settings()?)?,
        AdminCommand::Settings(SettingsCommand::Save {
            admin_email,
            test_duration,
            upload_time,
        }) => {
            let current = admin.settings()?;
            let settings = Settings {
                admin_email: admin_email.unwrap_or(current.admin_email),
                test_duration_mins: test_duration.unwrap_or(current.test_duration_mins),
                upload_time_mins: upload_time.unwrap_or(current.upload_time_mins),
            };
            admin.save_settings(&settings)?;
            print_json(&settings)?;
        }
        AdminCommand::Submissions(SubmissionsCommand::List) => {
            let records = admin.submissions()?;
            if records.is_empty() {
                println!("No submissions yet.");
            }
            for record in &records {
                println!("{}\n", admin::render_submission(record));
            }
        }
        AdminCommand::Submissions(SubmissionsCommand::Export { output }) => {
            let records = admin.submissions()?;
            let path = output.unwrap_or_else(|| {
                PathBuf::from(admin::default_export_name(chrono::Local::now().date_naive()))
            });
            admin::export_csv(&records, File::create(&path)?)?;
            println!("Exported {} submissions to {}", records.len(), path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_take() {
        let cli = Cli::try_parse_from(["dpotd"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.endpoint.is_none());
    }

    #[test]
    fn test_cli_take_with_overrides() {
        let cli =
            Cli::try_parse_from(["dpotd", "take", "--duration-mins", "45", "--endpoint", "http://x"])
                .unwrap();
        assert_eq!(cli.endpoint.as_deref(), Some("http://x"));
        match cli.command {
            Some(Command::Take { duration_mins }) => assert_eq!(duration_mins, Some(45)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_admin_requires_password() {
        assert!(Cli::try_parse_from(["dpotd", "admin", "schedule", "show"]).is_err());
        let cli = Cli::try_parse_from([
            "dpotd",
            "admin",
            "--password",
            "pw",
            "submissions",
            "export",
            "--output",
            "out.csv",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Admin {
                command: AdminCommand::Submissions(SubmissionsCommand::Export { .. }),
                ..
            })
        ));
    }

    #[test]
    fn test_cli_question_args_convert() {
        let cli = Cli::try_parse_from([
            "dpotd", "admin", "--password", "pw", "questions", "save", "--day", "3", "--q1-text",
            "a", "--q1-answer", "1", "--q2-text", "b", "--q2-answer", "2", "--q3-text", "c",
        ])
        .unwrap();
        let Some(Command::Admin {
            command: AdminCommand::Questions(QuestionsCommand::Save { day, questions }),
            ..
        }) = cli.command
        else {
            panic!("expected questions save");
        };
        assert_eq!(day, 3);
        let payload: QuestionsPayload = questions.into();
        assert_eq!(payload.q2_answer, "2");
        assert_eq!(payload.q3_answer, "");
    }

    #[test]
    fn test_cli_config_subcommands() {
        let cli = Cli::try_parse_from(["dpotd", "--endpoint", "http://x", "config", "save"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Config(ConfigCommand::Save))));
        assert_eq!(cli.endpoint.as_deref(), Some("http://x"));
    }

    #[test]
    fn test_cli_verifies() {
        Cli::command().debug_assert();
    }
}
