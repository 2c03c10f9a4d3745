/*
[INPUT]:  Commands, wallet registry, authority client, credential store
[OUTPUT]: State changes, ordered auth events, delegated identity
[POS]:    Machine layer - actor that owns the state and runs the effects
[UPDATE]: When step scheduling, timeouts or the handle API change
*/

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::auth::{
    DelegatedIdentity, ProviderRegistry, SessionCredentialStore, SignatureTypeSelector,
    VisibilityGuard,
};
use crate::config::AuthConfig;
use crate::http::{AuthError, AuthorityClient, Result};

use super::effects::EffectRunner;
use super::reducer::reduce;
use super::state::{AuthContext, AuthEvent, AuthState, Command, Input, StepOutcome, Transition};

const COMMAND_BUFFER: usize = 16;

/// Deadline of the timed step currently awaiting its settlement
#[derive(Debug, Clone, Copy)]
struct InFlight {
    step: &'static str,
    deadline: Instant,
}

#[derive(Debug)]
struct Request {
    command: Command,
    accepted: oneshot::Sender<bool>,
}

/// Sign-in state machine.
///
/// Owns the state and context. Effects run on spawned tasks and report back
/// through an internal channel tagged with the attempt generation, so a step
/// that outlives its attempt is dropped on arrival.
pub struct AuthMachine {
    state: AuthState,
    context: AuthContext,
    selector: SignatureTypeSelector,
    step_timeout: Duration,
    runner: EffectRunner,
    in_flight: Option<InFlight>,
    events: broadcast::Sender<AuthEvent>,
    state_tx: watch::Sender<AuthState>,
    settled_tx: mpsc::UnboundedSender<Input>,
    settled_rx: mpsc::UnboundedReceiver<Input>,
}

impl AuthMachine {
    pub fn new(
        registry: ProviderRegistry,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn SessionCredentialStore>,
        config: &AuthConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (state_tx, _) = watch::channel(AuthState::Idle);
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();

        Self {
            state: AuthState::Idle,
            context: AuthContext::default(),
            selector: config.selector(),
            step_timeout: config.step_timeout(),
            runner: EffectRunner::new(
                Arc::new(registry),
                authority,
                store,
                VisibilityGuard::new(),
            ),
            in_flight: None,
            events,
            state_tx,
            settled_tx,
            settled_rx,
        }
    }

    /// Share a visibility guard with the host
    pub fn with_visibility(mut self, visibility: VisibilityGuard) -> Self {
        self.runner = self.runner.with_visibility(visibility);
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn context(&self) -> &AuthContext {
        &self.context
    }

    pub fn identity(&self) -> Option<&DelegatedIdentity> {
        self.context.identity.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// Feed one input through the reducer.
    ///
    /// Returns false when the input had no transition and was dropped.
    pub fn handle(&mut self, input: Input) -> bool {
        let Some(transition) = reduce(self.state, &self.context, &self.selector, input) else {
            return false;
        };
        self.apply(transition);
        true
    }

    /// Issue a command and drive the attempt until it settles
    pub async fn dispatch(&mut self, command: Command) -> AuthState {
        let name = command.name();
        if !self.handle(Input::Command(command)) {
            debug!(command = name, state = %self.state, "command ignored");
        }
        while self.state.is_busy() {
            self.settle_next().await;
        }
        self.state
    }

    /// Move the machine onto its own task
    pub fn spawn(self) -> AuthHandle {
        let (requests_tx, requests_rx) = mpsc::channel(COMMAND_BUFFER);
        let events = self.events.clone();
        let state = self.state_tx.subscribe();
        let task = tokio::spawn(self.run(requests_rx));

        AuthHandle {
            requests: requests_tx,
            events,
            state,
            task,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            let armed = self.in_flight.is_some();
            let deadline = self
                .in_flight
                .map(|in_flight| in_flight.deadline)
                .unwrap_or_else(Instant::now);

            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request { command, accepted }) => {
                        let name = command.name();
                        let handled = self.handle(Input::Command(command));
                        if !handled {
                            debug!(command = name, state = %self.state, "command ignored");
                        }
                        let _ = accepted.send(handled);
                    }
                    None => break,
                },
                settled = self.settled_rx.recv() => {
                    if let Some(input) = settled {
                        self.accept_settlement(input);
                    }
                }
                _ = sleep_until(deadline), if armed => self.expire(),
            }
        }
        debug!("auth machine stopped");
    }

    async fn settle_next(&mut self) {
        let armed = self.in_flight.is_some();
        let deadline = self
            .in_flight
            .map(|in_flight| in_flight.deadline)
            .unwrap_or_else(Instant::now);

        tokio::select! {
            settled = self.settled_rx.recv() => {
                if let Some(input) = settled {
                    self.accept_settlement(input);
                }
            }
            _ = sleep_until(deadline), if armed => self.expire(),
        }
    }

    fn accept_settlement(&mut self, input: Input) {
        if let Input::Settled { generation, .. } = &input {
            let generation = *generation;
            if !self.handle(input) {
                warn!(
                    generation,
                    current = self.context.generation,
                    state = %self.state,
                    "stale settlement discarded"
                );
            }
        }
    }

    fn expire(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        warn!(step = in_flight.step, timeout = ?self.step_timeout, "step timed out");
        let generation = self.context.generation;
        self.handle(Input::Settled {
            generation,
            outcome: StepOutcome::Failed(AuthError::Timeout {
                step: in_flight.step.to_string(),
                millis: u64::try_from(self.step_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        });
    }

    fn apply(&mut self, transition: Transition) {
        let Transition {
            next,
            patch,
            events,
            effect,
        } = transition;

        let previous = self.state;
        self.context.apply(patch);
        self.state = next;
        self.in_flight = None;
        if previous != next {
            debug!(from = %previous, to = %next, generation = self.context.generation, "state changed");
            self.state_tx.send_replace(next);
        }

        for event in events {
            self.publish(event);
        }

        if let Some(effect) = effect {
            let generation = self.context.generation;
            if effect.is_timed() {
                // A timeout past the clock's range leaves the step unbounded.
                self.in_flight = Instant::now()
                    .checked_add(self.step_timeout)
                    .map(|deadline| InFlight {
                        step: effect.step(),
                        deadline,
                    });
            }
            debug!(step = effect.step(), generation, "step started");

            let runner = self.runner.clone();
            let settled = self.settled_tx.clone();
            tokio::spawn(async move {
                let outcome = runner.run(effect).await;
                let _ = settled.send(Input::Settled {
                    generation,
                    outcome,
                });
            });
        }
    }

    fn publish(&self, event: AuthEvent) {
        match &event {
            AuthEvent::Connected {
                address, provider, ..
            } => info!(%address, %provider, "wallet connected"),
            AuthEvent::Authenticated { identity } => {
                info!(principal = %identity.principal(), "authenticated")
            }
            AuthEvent::Error { cause } => warn!(error = %cause, "sign-in attempt failed"),
            _ => {}
        }
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Handle to a spawned [`AuthMachine`]
#[derive(Debug)]
pub struct AuthHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<AuthEvent>,
    state: watch::Receiver<AuthState>,
    task: JoinHandle<()>,
}

impl AuthHandle {
    /// Start a fresh attempt against `provider_key`
    pub async fn connect(&self, provider_key: &str) -> Result<()> {
        self.send(Command::connect(provider_key)).await
    }

    /// Sign again with the bound account
    pub async fn sign(&self) -> Result<()> {
        self.send(Command::Sign).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Connect and wait for the attempt's final event
    pub async fn authenticate(&self, provider_key: &str) -> Result<DelegatedIdentity> {
        let mut events = self.subscribe();
        self.connect(provider_key).await?;
        wait_for_outcome(&mut events).await
    }

    /// Re-sign and wait for the refreshed identity
    pub async fn refresh(&self) -> Result<DelegatedIdentity> {
        let mut events = self.subscribe();
        self.sign().await?;
        wait_for_outcome(&mut events).await
    }

    /// Stop the machine task; in-flight effects settle into nothing
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(err) = self.task.await {
            warn!(error = %err, "auth machine task failed");
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        let name = command.name();
        let (accepted, ack) = oneshot::channel();
        self.requests
            .send(Request { command, accepted })
            .await
            .map_err(|_| AuthError::MachineStopped)?;
        match ack.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::CommandIgnored {
                command: name.to_string(),
                state: self.state().to_string(),
            }),
            Err(_) => Err(AuthError::MachineStopped),
        }
    }
}

async fn wait_for_outcome(
    events: &mut broadcast::Receiver<AuthEvent>,
) -> Result<DelegatedIdentity> {
    loop {
        match events.recv().await {
            Ok(AuthEvent::Authenticated { identity }) => return Ok(identity),
            Ok(AuthEvent::Error { cause }) => return Err(cause),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "auth events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return Err(AuthError::MachineStopped),
        }
    }
}
