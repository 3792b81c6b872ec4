use std::{fmt, io::BufRead, str::FromStr, sync::mpsc::Sender};

use crate::{
    alarm::{Alarm, AlarmDraft, AlarmId, ScheduledTime},
    resolver::Resolution,
    session::PlaybackStrategy,
    speech::SpeechEvent,
};

/// everything the engine loop reacts to, in arrival order
#[derive(Debug)]
pub enum Message {
    Command(Command),
    /// audio for a new alarm, back from the resolver thread
    Resolved {
        draft: AlarmDraft,
        active: bool,
        resolution: Resolution,
    },
    Speech(SpeechEvent),
    Shutdown,
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

/// what the user can ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { time: String, message: String },
    Remove(AlarmId),
    Toggle(AlarmId),
    Stop,
    Snooze,
    List,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(pub String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; try add HH:MM <message>, rm <id>, toggle <id>, stop, snooze, list or quit",
            self.0
        )
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let id = |rest: &str| {
            rest.parse::<AlarmId>()
                .map_err(|_| ParseCommandError(format!("{rest:?} is not an alarm id")))
        };
        match word.to_ascii_lowercase().as_str() {
            "add" => {
                let (time, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Ok(Self::Add {
                    time: time.to_string(),
                    message: message.trim().to_string(),
                })
            }
            "rm" | "remove" | "delete" => id(rest).map(Self::Remove),
            "toggle" => id(rest).map(Self::Toggle),
            "stop" => Ok(Self::Stop),
            "snooze" => Ok(Self::Snooze),
            "list" | "ls" => Ok(Self::List),
            "quit" | "exit" => Ok(Self::Quit),
            "" => Err(ParseCommandError("empty command".to_string())),
            other => Err(ParseCommandError(format!("unknown command {other:?}"))),
        }
    }
}

/// Forwards one command per line of `input` to the engine. Blank lines are skipped and
/// lines that don't parse go to `on_error`.
///
/// The end of `input` is not a shutdown: the engine keeps ringing alarms until it
/// gets `quit` or [`Message::Shutdown`] from somewhere else. Returns early if the
/// engine is gone.
pub fn read_commands(
    input: impl BufRead,
    mailbox: &Sender<Message>,
    mut on_error: impl FnMut(ParseCommandError),
) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if mailbox.send(command.into()).is_err() {
                    return;
                }
            }
            Err(e) => on_error(e),
        }
    }
    log::info!("end of command input");
}

/// what the engine tells the user interface
#[derive(Debug, Clone)]
pub enum Notice {
    Added(Alarm),
    Rejected(String),
    /// informational: the alarm was still created and will use the system voice
    ResolutionFailed { message: String, reason: String },
    Ringing {
        id: AlarmId,
        time: ScheduledTime,
        message: String,
        strategy: PlaybackStrategy,
    },
    Stopped(AlarmId),
    Snoozed { id: AlarmId, until: ScheduledTime },
    Removed(AlarmId),
    Toggled { id: AlarmId, active: bool },
    Alarms(Vec<Alarm>),
    NotRinging,
    UnknownAlarm(AlarmId),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(alarm) => write!(f, "added {alarm}"),
            Self::Rejected(reason) => write!(f, "not added: {reason}"),
            Self::ResolutionFailed { message, reason } => write!(
                f,
                "voice generation failed for {message:?} ({reason}), using the system voice"
            ),
            Self::Ringing {
                id,
                time,
                message,
                strategy,
            } => write!(f, "⏰ {time} [{id}] {message:?} ({strategy}), stop or snooze"),
            Self::Stopped(id) => write!(f, "alarm {id} stopped"),
            Self::Snoozed { id, until } => write!(f, "alarm {id} snoozed until {until}"),
            Self::Removed(id) => write!(f, "alarm {id} removed"),
            Self::Toggled { id, active } => {
                write!(f, "alarm {id} {}", if *active { "enabled" } else { "disabled" })
            }
            Self::Alarms(alarms) if alarms.is_empty() => write!(f, "no alarms"),
            Self::Alarms(alarms) => {
                for (i, alarm) in alarms.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{alarm}")?;
                }
                Ok(())
            }
            Self::NotRinging => write!(f, "nothing is ringing"),
            Self::UnknownAlarm(id) => write!(f, "no alarm {id}"),
        }
    }
}
