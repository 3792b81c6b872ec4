use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use spoken_alarm::{
    alarm::AlarmDraft,
    communication::{read_commands, Message},
    config::{Config, SavedAlarm},
    engine::Engine,
    playback::RodioPlayer,
    poller::{ClockPoller, LocalClock},
    resolver::AudioSourceResolver,
    session::SessionController,
    speech::{SpeechLoopDriver, SpeechNotifier},
    system_voice,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config file to use instead of the default one
    #[clap(long, short, global = true)]
    config: Option<PathBuf>,
    /// voice service key, wins over the config file and the environment
    #[clap(long, global = true)]
    api_key: Option<String>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// save an alarm for the next run
    NewAlarm { time: String, message: String },
    /// show the saved alarms
    List,
    /// ring alarms, reading commands from stdin
    Run,
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("spoken_alarm").expect("couldn't initialize logger");

    let args = Args::parse();
    let path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => {
            if force || !path.exists() {
                Config::new().save(&path)?;
                println!("wrote {}", path.display());
            } else {
                println!("{} already exists, pass --force to overwrite", path.display());
            }
        }
        Command::NewAlarm { time, message } => {
            let draft = AlarmDraft::new(&time, &message)?;
            let mut config = Config::load(&path)?;
            config.alarms.push(SavedAlarm::new(&draft, true));
            config.save(&path)?;
            println!("saved alarm at {}", draft.time);
        }
        Command::List => {
            let config = Config::load(&path)?;
            if config.alarms.is_empty() {
                println!("no alarms");
            }
            for alarm in &config.alarms {
                let state = if alarm.enabled { "on" } else { "off" };
                println!("{} {:?} ({state})", alarm.time(), alarm.message);
            }
        }
        Command::Run => run(&path, args.api_key)?,
    }
    Ok(())
}

fn run(path: &Path, api_key: Option<String>) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(path)?;
    // keys from the environment or the command line are never written back
    let mut voice = config.clone().with_env().voice;
    if api_key.is_some() {
        voice.api_key = api_key;
    }
    if voice.api_key().is_none() {
        log::info!("no voice service key, alarms will use the system voice");
    }

    let (tx, rx) = mpsc::channel();
    let (notice_tx, notice_rx) = mpsc::channel();

    let speech_tx = tx.clone();
    let notify: SpeechNotifier = Arc::new(move |event| {
        let _ = speech_tx.send(Message::Speech(event));
    });
    let speech = SpeechLoopDriver::new(
        system_voice(config.speech, notify),
        Duration::from_millis(config.repeat_pause_ms),
    );
    let controller = SessionController::new(RodioPlayer::new(config.volume), speech);
    let cache = Config::cache_dir()
        .map_err(|e| log::warn!("not caching voice clips: {e}"))
        .ok();
    let resolver = Arc::new(AudioSourceResolver::from_settings(&voice, cache.as_deref())?);
    let mut engine = Engine::new(LocalClock, controller, resolver, tx.clone(), notice_tx)
        .with_poller(ClockPoller::new(Duration::from_millis(config.tick_interval_ms)))
        .with_snooze_minutes(config.snooze_minutes);
    engine.restore(&config.alarms);

    thread::spawn(move || {
        for notice in notice_rx {
            println!("{notice}");
        }
    });
    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Message::Shutdown);
    })?;
    thread::spawn(move || {
        read_commands(io::stdin().lock(), &tx, |e| eprintln!("{e}"));
    });

    engine.run(&rx);

    config.alarms = engine.saved_alarms();
    config.save(path)?;
    log::info!("saved {} alarms to {}", config.alarms.len(), path.display());
    Ok(())
}
