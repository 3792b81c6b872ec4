//! The single loop that owns the alarms and the ringing session.
//!
//! Ticks, user commands, speech callbacks and resolver results all arrive as
//! [`Message`]s and are handled one at a time, so a stop is always fully applied
//! (audio silenced, speech token dead, alarm inactive) before the next tick looks
//! at the registry.

use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::Instant,
};

use crate::{
    alarm::{AlarmDraft, AlarmId, ScheduledTime},
    communication::{Command, Message, Notice},
    config::SavedAlarm,
    playback::ClipPlayer,
    poller::{Clock, ClockPoller},
    registry::AlarmRegistry,
    resolver::AudioSourceResolver,
    session::SessionController,
    speech::SpeechSynthesizer,
};

pub struct Engine<C, P, S> {
    registry: AlarmRegistry,
    controller: SessionController<P, S>,
    poller: ClockPoller,
    clock: C,
    resolver: Arc<AudioSourceResolver>,
    mailbox: Sender<Message>,
    notices: Sender<Notice>,
    snooze_minutes: u32,
    // drafts handed to the resolver whose alarms don't exist yet
    pending: Vec<(AlarmDraft, bool)>,
    running: bool,
}

impl<C: Clock, P: ClipPlayer, S: SpeechSynthesizer> Engine<C, P, S> {
    /// `mailbox` must feed the receiver later given to [`Engine::run`]; resolver
    /// threads post their results to it.
    pub fn new(
        clock: C,
        controller: SessionController<P, S>,
        resolver: Arc<AudioSourceResolver>,
        mailbox: Sender<Message>,
        notices: Sender<Notice>,
    ) -> Self {
        Self {
            registry: AlarmRegistry::new(),
            controller,
            poller: ClockPoller::default(),
            clock,
            resolver,
            mailbox,
            notices,
            snooze_minutes: 9,
            pending: vec![],
            running: false,
        }
    }

    #[must_use]
    pub fn with_poller(mut self, poller: ClockPoller) -> Self {
        self.poller = poller;
        self
    }

    #[must_use]
    pub fn with_snooze_minutes(mut self, minutes: u32) -> Self {
        self.snooze_minutes = minutes.max(1);
        self
    }

    /// Runs until [`Command::Quit`] or [`Message::Shutdown`].
    pub fn run(&mut self, inbox: &Receiver<Message>) {
        self.running = true;
        let mut next_tick = Instant::now();
        log::info!("engine running, polling every {:?}", self.poller.interval());
        while self.running {
            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                next_tick = now + self.poller.interval();
            }
            self.poll(now);

            let wake = self
                .controller
                .next_deadline()
                .map_or(next_tick, |deadline| deadline.min(next_tick));
            match inbox.recv_timeout(wake.saturating_duration_since(Instant::now())) {
                Ok(message) => self.handle(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("engine stopped");
    }

    /// One poll: rings the first due alarm unless something is already ringing.
    pub fn tick(&mut self) -> Option<AlarmId> {
        if self.controller.is_ringing() {
            return None;
        }
        let now = self.clock.now();
        let id = self.poller.due(now, &self.registry)?;
        let alarm = self.registry.get(id)?;
        let session = self.controller.ring(alarm, Instant::now())?;
        let notice = Notice::Ringing {
            id,
            time: alarm.time(),
            message: alarm.message().to_string(),
            strategy: session.strategy,
        };
        self.registry.mark_rang(id, now);
        self.notify(notice);
        Some(id)
    }

    /// Runs speech-loop timers due at `now`.
    pub fn poll(&mut self, now: Instant) {
        self.controller.poll(now);
    }

    pub fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.command(command),
            Message::Resolved {
                draft,
                active,
                resolution,
            } => {
                for failure in &resolution.failures {
                    self.notify(Notice::ResolutionFailed {
                        message: draft.message.clone(),
                        reason: failure.to_string(),
                    });
                }
                if let Some(index) = self.pending.iter().position(|(pending, _)| *pending == draft) {
                    self.pending.remove(index);
                }
                let id = self.registry.insert(draft, resolution.handle).id();
                if !active {
                    self.registry.deactivate(id);
                }
                if let Some(alarm) = self.registry.get(id) {
                    self.notify(Notice::Added(alarm.clone()));
                }
            }
            Message::Speech(event) => self.controller.on_speech_event(&event, Instant::now()),
            Message::Shutdown => self.shutdown(),
        }
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Add { time, message } => match AlarmDraft::new(&time, &message) {
                Ok(draft) => self.create(vec![(draft, true)]),
                Err(e) => self.notify(Notice::Rejected(e.to_string())),
            },
            Command::Remove(id) => {
                if self.ringing_id() == Some(id) {
                    self.controller.dismiss();
                }
                let notice = match self.registry.remove(id) {
                    Some(_) => Notice::Removed(id),
                    None => Notice::UnknownAlarm(id),
                };
                self.notify(notice);
            }
            // switching off the ringing alarm is the same as stopping it
            Command::Toggle(id) if self.ringing_id() == Some(id) => {
                self.controller.stop(&mut self.registry);
                self.notify(Notice::Stopped(id));
            }
            Command::Toggle(id) => {
                let notice = match self.registry.toggle(id) {
                    Some(active) => Notice::Toggled { id, active },
                    None => Notice::UnknownAlarm(id),
                };
                self.notify(notice);
            }
            Command::Stop => {
                let notice = self
                    .controller
                    .stop(&mut self.registry)
                    .map_or(Notice::NotRinging, Notice::Stopped);
                self.notify(notice);
            }
            Command::Snooze => {
                let until = ScheduledTime::of(self.clock.now()).add_minutes(self.snooze_minutes);
                let notice = self
                    .controller
                    .snooze(&mut self.registry, until)
                    .map_or(Notice::NotRinging, |id| Notice::Snoozed { id, until });
                self.notify(notice);
            }
            Command::List => self.notify(Notice::Alarms(self.registry.list().cloned().collect())),
            Command::Quit => self.shutdown(),
        }
    }

    /// Recreates saved alarms through the normal creation path, keeping their order.
    /// Audio is resolved again; give the resolver a [`CachedVoice`] so that doesn't
    /// mean another remote synthesis per alarm on every start.
    ///
    /// [`CachedVoice`]: crate::resolver::CachedVoice
    pub fn restore(&mut self, saved: &[SavedAlarm]) {
        let drafts = saved
            .iter()
            .filter_map(
                |alarm| match AlarmDraft::new(&alarm.time().to_string(), &alarm.message) {
                    Ok(draft) => Some((draft, alarm.enabled)),
                    Err(e) => {
                        log::warn!("skipping saved alarm at {}: {e}", alarm.time());
                        None
                    }
                },
            )
            .collect::<Vec<_>>();
        if !drafts.is_empty() {
            self.create(drafts);
        }
    }

    /// Resolves audio off the loop; each alarm is added when its result comes back.
    fn create(&mut self, drafts: Vec<(AlarmDraft, bool)>) {
        self.pending.extend(drafts.iter().cloned());
        let resolver = Arc::clone(&self.resolver);
        let mailbox = self.mailbox.clone();
        thread::spawn(move || {
            for (draft, active) in drafts {
                let resolution = resolver.resolve(&draft.message);
                if mailbox
                    .send(Message::Resolved {
                        draft,
                        active,
                        resolution,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn shutdown(&mut self) {
        self.controller.dismiss();
        self.running = false;
    }

    fn ringing_id(&self) -> Option<AlarmId> {
        self.controller.session().map(|session| session.alarm_id)
    }

    fn notify(&self, notice: Notice) {
        log::debug!("notice: {notice}");
        // the interface may already be gone on shutdown
        let _ = self.notices.send(notice);
    }

    /// What should survive a restart: every alarm, including ones still being resolved.
    #[must_use]
    pub fn saved_alarms(&self) -> Vec<SavedAlarm> {
        self.registry
            .list()
            .map(SavedAlarm::from)
            .chain(
                self.pending
                    .iter()
                    .map(|(draft, active)| SavedAlarm::new(draft, *active)),
            )
            .collect()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn registry(&self) -> &AlarmRegistry {
        &self.registry
    }

    pub const fn controller(&self) -> &SessionController<P, S> {
        &self.controller
    }

    pub const fn clock(&self) -> &C {
        &self.clock
    }
}
