use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{NaiveDate, NaiveDateTime};
use spoken_alarm::{
    alarm::{AlarmId, AudioHandle, ScheduledTime},
    communication::{Command, Message, Notice},
    config::SavedAlarm,
    engine::Engine,
    error::{PlaybackError, ResolveError, SpeechError},
    playback::ClipPlayer,
    poller::Clock,
    resolver::{AudioSourceResolver, AudioStrategy},
    session::{PlaybackStrategy, SessionController, SessionState, SessionToken},
    speech::{SpeechEvent, SpeechLoopDriver, SpeechSynthesizer, Utterance},
};

#[derive(Clone)]
struct FakeClock(Rc<Cell<NaiveDateTime>>);

impl FakeClock {
    fn set(&self, hour: u32, minute: u32, second: u32) {
        self.0.set(at(hour, minute, second));
    }
}

impl Clock for FakeClock {
    fn now(&self) -> NaiveDateTime {
        self.0.get()
    }
}

fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

#[derive(Debug, Default)]
struct FakePlayer {
    blocked: bool,
    playing: bool,
}

impl ClipPlayer for FakePlayer {
    fn play_looping(&mut self, _clip: &AudioHandle) -> Result<(), PlaybackError> {
        if self.blocked {
            return Err(PlaybackError::Output("autoplay blocked".into()));
        }
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }
}

#[derive(Debug, Default)]
struct FakeVoice {
    spoken: Vec<(String, SessionToken)>,
    stops: u32,
}

impl SpeechSynthesizer for FakeVoice {
    fn speak(&mut self, text: &str, token: SessionToken) -> Result<Utterance, SpeechError> {
        self.spoken.push((text.to_string(), token));
        Ok(Utterance::Notified)
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}

struct Unreachable;

impl AudioStrategy for Unreachable {
    fn name(&self) -> &'static str {
        "remote voice"
    }

    fn attempt(&self, _message: &str) -> Result<Option<AudioHandle>, ResolveError> {
        Err(ResolveError::EmptyAudio)
    }
}

struct Synthesized;

impl AudioStrategy for Synthesized {
    fn name(&self) -> &'static str {
        "remote voice"
    }

    fn attempt(&self, message: &str) -> Result<Option<AudioHandle>, ResolveError> {
        Ok(Some(AudioHandle::new(message.as_bytes(), "remote voice")))
    }
}

const PAUSE: Duration = Duration::from_millis(1500);

struct Harness {
    engine: Engine<FakeClock, FakePlayer, FakeVoice>,
    clock: FakeClock,
    mailbox: Sender<Message>,
    inbox: Receiver<Message>,
    notices: Receiver<Notice>,
}

impl Harness {
    fn new(resolver: AudioSourceResolver, blocked: bool) -> Self {
        let clock = FakeClock(Rc::new(Cell::new(at(6, 0, 0))));
        let (mailbox, inbox) = mpsc::channel();
        let (notice_tx, notices) = mpsc::channel();
        let controller = SessionController::new(
            FakePlayer {
                blocked,
                ..FakePlayer::default()
            },
            SpeechLoopDriver::new(FakeVoice::default(), PAUSE),
        );
        let engine = Engine::new(
            clock.clone(),
            controller,
            Arc::new(resolver),
            mailbox.clone(),
            notice_tx,
        );
        Self {
            engine,
            clock,
            mailbox,
            inbox,
            notices,
        }
    }

    fn command(&mut self, command: Command) {
        self.engine.handle(command.into());
    }

    /// adds an alarm and waits for its audio to resolve
    fn add(&mut self, time: &str, message: &str) -> AlarmId {
        self.command(Command::Add {
            time: time.into(),
            message: message.into(),
        });
        self.settle();
        self.engine.registry().list().last().unwrap().id()
    }

    /// hands every resolver result that is still in flight to the engine
    fn settle(&mut self) {
        while self.engine.pending() > 0 {
            let message = self.inbox.recv_timeout(Duration::from_secs(5)).unwrap();
            self.engine.handle(message);
        }
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.try_iter().collect()
    }

    fn spoken(&self) -> usize {
        self.engine.controller().speech().synth().spoken.len()
    }

    fn token(&self) -> SessionToken {
        self.engine.controller().session().unwrap().token
    }
}

#[test]
fn wake_up_without_key_speaks_until_stopped() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");
    let alarm = harness.engine.registry().get(id).unwrap();
    assert!(alarm.is_active());
    assert!(alarm.audio().is_none());

    harness.clock.set(6, 59, 59);
    assert_eq!(harness.engine.tick(), None);

    harness.clock.set(7, 0, 1);
    assert_eq!(harness.engine.tick(), Some(id));
    let session = harness.engine.controller().session().unwrap().clone();
    assert_eq!(session.strategy, PlaybackStrategy::SpeechLoop);
    assert_eq!(harness.spoken(), 1);
    assert!(harness.notices().iter().any(|notice| matches!(
        notice,
        Notice::Ringing { id: rang, strategy: PlaybackStrategy::SpeechLoop, .. } if *rang == id
    )));

    // one utterance ends, the next follows after the pause
    let ended = Instant::now();
    harness
        .engine
        .handle(Message::Speech(SpeechEvent::Ended(session.token)));
    harness.engine.poll(ended + PAUSE + Duration::from_millis(100));
    assert_eq!(harness.spoken(), 2);
    let voice = harness.engine.controller().speech().synth();
    assert!(voice.spoken.iter().all(|(text, token)| text == "Wake up" && *token == session.token));

    harness.command(Command::Stop);
    assert_eq!(harness.engine.controller().state(), SessionState::Idle);
    assert!(!harness.engine.registry().get(id).unwrap().is_active());
    assert!(harness.engine.controller().speech().synth().stops >= 1);
    assert!(matches!(harness.notices().as_slice(), [Notice::Stopped(stopped)] if *stopped == id));

    // a late callback from the dead session can't bring the voice back
    harness
        .engine
        .handle(Message::Speech(SpeechEvent::Ended(session.token)));
    harness.engine.poll(Instant::now() + Duration::from_secs(30));
    assert_eq!(harness.spoken(), 2);

    harness.clock.set(7, 0, 40);
    assert_eq!(harness.engine.tick(), None);
}

#[test]
fn failed_resolution_still_creates_alarm() {
    let resolver = AudioSourceResolver::new().with_strategy(Unreachable);
    let mut harness = Harness::new(resolver, false);
    let id = harness.add("07:00", "Wake up");

    let alarm = harness.engine.registry().get(id).unwrap();
    assert!(alarm.is_active());
    assert!(alarm.audio().is_none());
    let notices = harness.notices();
    assert!(matches!(
        notices.as_slice(),
        [Notice::ResolutionFailed { message, .. }, Notice::Added(added)]
            if message == "Wake up" && added.id() == id
    ));
}

#[test]
fn invalid_alarm_is_rejected_without_change() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    harness.command(Command::Add {
        time: "07:00".into(),
        message: String::new(),
    });
    harness.command(Command::Add {
        time: "7am".into(),
        message: "Wake up".into(),
    });
    assert_eq!(harness.engine.pending(), 0);
    assert!(harness.engine.registry().is_empty());
    let notices = harness.notices();
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|notice| matches!(notice, Notice::Rejected(_))));
}

#[test]
fn coinciding_alarms_ring_one_at_a_time() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let first = harness.add("08:30", "stretch");
    let second = harness.add("08:30", "water");

    harness.clock.set(8, 30, 0);
    assert_eq!(harness.engine.tick(), Some(first));
    harness.clock.set(8, 30, 1);
    assert_eq!(harness.engine.tick(), None);
    assert_eq!(
        harness.engine.controller().session().unwrap().alarm_id,
        first
    );
    assert!(harness.engine.registry().get(second).unwrap().is_active());

    // stopped inside the minute: the second one still gets its turn
    harness.command(Command::Stop);
    harness.clock.set(8, 30, 20);
    assert_eq!(harness.engine.tick(), Some(second));
}

#[test]
fn coinciding_alarm_is_missed_once_its_minute_passes() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    harness.add("08:30", "stretch");
    let second = harness.add("08:30", "water");

    harness.clock.set(8, 30, 0);
    harness.engine.tick();
    harness.clock.set(8, 31, 5);
    harness.command(Command::Stop);
    assert_eq!(harness.engine.tick(), None);
    assert!(harness.engine.registry().get(second).unwrap().is_active());
}

#[test]
fn snooze_rings_again_later() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");

    harness.clock.set(7, 0, 0);
    assert_eq!(harness.engine.tick(), Some(id));
    let first_token = harness.token();
    harness.clock.set(7, 0, 30);
    harness.notices();
    harness.command(Command::Snooze);
    let until = ScheduledTime::from_hm(7, 9).unwrap();
    assert!(matches!(
        harness.notices().as_slice(),
        [Notice::Snoozed { id: snoozed, until: when }] if *snoozed == id && *when == until
    ));
    assert!(harness.engine.registry().get(id).unwrap().is_active());

    // not again in the minute it already rang
    harness.clock.set(7, 0, 45);
    assert_eq!(harness.engine.tick(), None);

    harness.clock.set(7, 9, 2);
    assert_eq!(harness.engine.tick(), Some(id));
    assert!(harness.token() > first_token);
    assert_eq!(
        harness.engine.registry().get(id).unwrap().snoozed_until(),
        None
    );
    harness.command(Command::Stop);
    assert!(!harness.engine.registry().get(id).unwrap().is_active());
}

#[test]
fn blocked_clip_falls_back_to_speech() {
    let resolver = AudioSourceResolver::new().with_strategy(Synthesized);
    let mut harness = Harness::new(resolver, true);
    let id = harness.add("07:00", "Wake up");
    assert!(harness.engine.registry().get(id).unwrap().audio().is_some());

    harness.clock.set(7, 0, 0);
    assert_eq!(harness.engine.tick(), Some(id));
    assert_eq!(
        harness.engine.controller().session().unwrap().strategy,
        PlaybackStrategy::SpeechLoop
    );
    assert_eq!(harness.spoken(), 1);
}

#[test]
fn playable_clip_loops_until_stopped() {
    let resolver = AudioSourceResolver::new().with_strategy(Synthesized);
    let mut harness = Harness::new(resolver, false);
    let id = harness.add("07:00", "Wake up");

    harness.clock.set(7, 0, 0);
    assert_eq!(harness.engine.tick(), Some(id));
    assert_eq!(
        harness.engine.controller().session().unwrap().strategy,
        PlaybackStrategy::Clip
    );
    assert!(harness.engine.controller().player().playing);
    assert_eq!(harness.spoken(), 0);

    harness.command(Command::Stop);
    assert!(!harness.engine.controller().player().playing);
}

#[test]
fn removing_ringing_alarm_ends_session() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");
    harness.clock.set(7, 0, 0);
    harness.engine.tick();

    harness.command(Command::Remove(id));
    assert_eq!(harness.engine.controller().state(), SessionState::Idle);
    assert!(harness.engine.registry().is_empty());
    assert!(!harness.engine.controller().speech().is_running());

    harness.notices();
    harness.command(Command::Remove(id));
    assert!(matches!(harness.notices().as_slice(), [Notice::UnknownAlarm(_)]));
}

#[test]
fn toggling_ringing_alarm_stops_it() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");
    harness.clock.set(7, 0, 0);
    harness.engine.tick();

    harness.command(Command::Toggle(id));
    assert_eq!(harness.engine.controller().state(), SessionState::Idle);
    assert!(!harness.engine.registry().get(id).unwrap().is_active());

    harness.command(Command::Toggle(id));
    assert!(harness.engine.registry().get(id).unwrap().is_active());
}

#[test]
fn disabled_alarm_never_rings() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");
    harness.command(Command::Toggle(id));
    harness.clock.set(7, 0, 0);
    assert_eq!(harness.engine.tick(), None);
    assert_eq!(harness.engine.controller().state(), SessionState::Idle);
    assert!(!harness.engine.registry().get(id).unwrap().is_active());
}

#[test]
fn stop_when_idle_changes_nothing() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("07:00", "Wake up");
    harness.notices();
    harness.command(Command::Stop);
    harness.command(Command::Snooze);
    assert!(matches!(
        harness.notices().as_slice(),
        [Notice::NotRinging, Notice::NotRinging]
    ));
    assert!(harness.engine.registry().get(id).unwrap().is_active());
}

#[test]
fn restore_keeps_order_and_state() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let saved = vec![
        SavedAlarm {
            time: at(6, 15, 0).time(),
            message: "run".into(),
            enabled: true,
        },
        SavedAlarm {
            time: at(21, 0, 0).time(),
            message: "read".into(),
            enabled: false,
        },
        SavedAlarm {
            time: at(22, 0, 0).time(),
            message: "  ".into(),
            enabled: true,
        },
    ];
    harness.engine.restore(&saved);
    assert_eq!(harness.engine.pending(), 2);
    // still resolving, but not forgotten
    assert_eq!(harness.engine.saved_alarms(), saved[..2].to_vec());

    harness.settle();
    let restored: Vec<_> = harness
        .engine
        .registry()
        .list()
        .map(|alarm| (alarm.message().to_string(), alarm.is_active()))
        .collect();
    assert_eq!(
        restored,
        vec![("run".to_string(), true), ("read".to_string(), false)]
    );
    assert_eq!(harness.engine.saved_alarms(), saved[..2].to_vec());
}

#[test]
fn run_loop_exits_on_quit() {
    let mut harness = Harness::new(AudioSourceResolver::new(), false);
    let id = harness.add("06:00", "Good morning");
    harness
        .mailbox
        .send(Message::Command(Command::List))
        .unwrap();
    harness.mailbox.send(Message::Command(Command::Quit)).unwrap();
    harness.engine.run(&harness.inbox);

    // the first tick rings before the queued messages are handled; quitting silences it
    let notices = harness.notices();
    assert!(notices
        .iter()
        .any(|notice| matches!(notice, Notice::Ringing { id: rang, .. } if *rang == id)));
    assert!(notices
        .iter()
        .any(|notice| matches!(notice, Notice::Alarms(alarms) if alarms.len() == 1)));
    assert_eq!(harness.engine.controller().state(), SessionState::Idle);
    assert!(harness.engine.registry().get(id).unwrap().is_active());
}
