//! Hierarchical state-machine runtime.
//!
//! A `Machine<S>` holds exactly one value of a state set `S` (an enum of
//! state variants) plus an initialization guard. Events are dispatched to the
//! current state's `on`; a returned next state runs the transition sequence
//! `exit(old)`, install new, `enter(new)` with no event processing in
//! between. When `on` signals no transition, the event is offered to nested
//! sub-machines through `descend`, so hierarchical children observe what the
//! parent did not consume.
//!
//! Handlers must not block. Follow-up work is expressed by pushing deferred
//! events onto the session's pending queue, which the session drains after
//! the current dispatch returns.

/// Behavior of one state set, parameterized by the context handlers receive.
pub trait State<Ctx>: Sized {
    /// The event type this machine dispatches.
    type Event;

    /// Runs when the machine enters this state.
    fn enter(&mut self, _ctx: &mut Ctx) {}

    /// Runs when the machine leaves this state.
    fn exit(&mut self, _ctx: &mut Ctx) {}

    /// Handle an event. Returning `Some(next)` requests a transition;
    /// `None` leaves the state in place and lets `descend` run.
    fn on(&mut self, event: &Self::Event, ctx: &mut Ctx) -> Option<Self>;

    /// Offer an unconsumed event to nested sub-machines.
    fn descend(&mut self, _event: &Self::Event, _ctx: &mut Ctx) {}
}

/// A state machine holding one of the variants of `S`.
#[derive(Debug)]
pub struct Machine<S> {
    state: S,
    initialized: bool,
}

impl<S> Machine<S> {
    /// A machine resting in `initial`, not yet initialized.
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            initialized: false,
        }
    }

    /// The current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Fire `enter` on the current state and accept events from now on.
    pub fn initialize<Ctx>(&mut self, ctx: &mut Ctx)
    where
        S: State<Ctx>,
    {
        debug_assert!(!self.initialized, "state machine initialized twice");
        self.initialized = true;
        self.state.enter(ctx);
    }

    /// Select the initial state, then initialize.
    pub fn initialize_as<Ctx>(&mut self, state: S, ctx: &mut Ctx)
    where
        S: State<Ctx>,
    {
        self.state = state;
        self.initialize(ctx);
    }

    /// Fire `exit` on the current state and stop accepting events.
    pub fn shutdown<Ctx>(&mut self, ctx: &mut Ctx)
    where
        S: State<Ctx>,
    {
        if self.initialized {
            self.initialized = false;
            self.state.exit(ctx);
        }
    }

    /// Dispatch one event.
    ///
    /// # Panics
    ///
    /// Posting to an uninitialized machine is a programming error.
    pub fn post<Ctx>(&mut self, event: &S::Event, ctx: &mut Ctx)
    where
        S: State<Ctx>,
    {
        assert!(
            self.initialized,
            "event posted to uninitialized state machine"
        );
        if let Some(next) = self.state.on(event, ctx) {
            self.state.exit(ctx);
            self.state = next;
            self.state.enter(ctx);
        } else {
            self.state.descend(event, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Log of lifecycle calls, shared as the test context.
    type Log = Vec<String>;

    #[derive(Debug)]
    enum Light {
        Red,
        Green(Machine<Inner>),
    }

    #[derive(Debug, PartialEq)]
    enum Inner {
        Quiet,
        Loud,
    }

    enum Tick {
        Go,
        Stop,
        Noise,
    }

    impl State<Log> for Light {
        type Event = Tick;

        fn enter(&mut self, log: &mut Log) {
            match self {
                Light::Red => log.push("enter red".into()),
                Light::Green(inner) => {
                    log.push("enter green".into());
                    inner.initialize(log);
                }
            }
        }

        fn exit(&mut self, log: &mut Log) {
            match self {
                Light::Red => log.push("exit red".into()),
                Light::Green(inner) => {
                    inner.shutdown(log);
                    log.push("exit green".into());
                }
            }
        }

        fn on(&mut self, event: &Tick, _log: &mut Log) -> Option<Self> {
            match (self, event) {
                (Light::Red, Tick::Go) => Some(Light::Green(Machine::new(Inner::Quiet))),
                (Light::Green(_), Tick::Stop) => Some(Light::Red),
                _ => None,
            }
        }

        fn descend(&mut self, event: &Tick, log: &mut Log) {
            if let Light::Green(inner) = self {
                inner.post(event, log);
            }
        }
    }

    impl State<Log> for Inner {
        type Event = Tick;

        fn enter(&mut self, log: &mut Log) {
            log.push("enter quiet".into());
        }

        fn on(&mut self, event: &Tick, log: &mut Log) -> Option<Self> {
            match (self, event) {
                (Inner::Quiet, Tick::Noise) => {
                    log.push("heard noise".into());
                    Some(Inner::Loud)
                }
                _ => None,
            }
        }
    }

    #[test]
    fn test_exit_precedes_enter_exactly_once() {
        let mut log = Log::new();
        let mut machine = Machine::new(Light::Red);
        machine.initialize(&mut log);
        machine.post(&Tick::Go, &mut log);
        machine.post(&Tick::Stop, &mut log);

        assert_eq!(
            log,
            vec![
                "enter red",
                "exit red",
                "enter green",
                "enter quiet",
                "exit green",
                "enter red",
            ]
        );
    }

    #[test]
    fn test_unhandled_events_reach_children() {
        let mut log = Log::new();
        let mut machine = Machine::new(Light::Red);
        machine.initialize(&mut log);
        machine.post(&Tick::Go, &mut log);

        machine.post(&Tick::Noise, &mut log);
        assert!(log.contains(&"heard noise".to_string()));
        match machine.state() {
            Light::Green(inner) => assert!(matches!(inner.state(), Inner::Loud)),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_unhandled_event_is_dropped() {
        let mut log = Log::new();
        let mut machine = Machine::new(Light::Red);
        machine.initialize(&mut log);
        machine.post(&Tick::Stop, &mut log);
        assert!(matches!(machine.state(), Light::Red));
    }

    #[test]
    #[should_panic(expected = "uninitialized")]
    fn test_post_before_initialize_panics() {
        let mut log = Log::new();
        let mut machine = Machine::new(Light::Red);
        machine.post(&Tick::Go, &mut log);
    }

    #[test]
    fn test_shutdown_cascades_exit() {
        let mut log = Log::new();
        let mut machine = Machine::new(Light::Red);
        machine.initialize(&mut log);
        machine.post(&Tick::Go, &mut log);
        log.clear();

        machine.shutdown(&mut log);
        assert_eq!(log, vec!["exit green"]);
        assert!(!machine.is_initialized());
    }
}
