//! Action sequencing shared by records and collections.
//!
//! An action runs its before-phase synchronously inside the initiating call, then hands
//! the transport call to a spawned tokio task. A result that arrives after a newer action
//! started is discarded without decoding or hooks, but its completion still settles.
//!
//! The task may run on another worker thread than the caller. The response is decoded
//! into a staged copy first and committed under the host lock only if the action's
//! generation is still current, so a newer action always wins over an older response.
//!
//! `after-request` fires once the response has been absorbed. A response that fails to
//! decode fires `after-request-error` and the action's error events instead.

use crate::error::{ModelError, ModelResult, ProgrammerError, RequestError};
use crate::framework::events::{
    ActionPhase, Completion, HookEvent, Outcome, Settle, AFTER_CREATE, AFTER_CREATE_ERROR,
    AFTER_DESTROY, AFTER_DESTROY_ERROR, AFTER_FETCH, AFTER_FETCH_ERROR, AFTER_FETCH_MANY,
    AFTER_FETCH_MANY_ERROR, AFTER_REQUEST, AFTER_REQUEST_ERROR, AFTER_SAVE, AFTER_SAVE_ERROR,
    AFTER_UPDATE, AFTER_UPDATE_ERROR, BEFORE_CREATE, BEFORE_DESTROY, BEFORE_FETCH,
    BEFORE_FETCH_MANY, BEFORE_REQUEST, BEFORE_SAVE, BEFORE_UPDATE,
};
use crate::framework::factory::ModelType;
use crate::runtime::Target;
use crate::transport::{Request, Response};
use tokio::runtime::Handle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Fetch,
    FetchMany,
    Create,
    Update,
    Destroy,
}

impl Action {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::FetchMany => "fetch-many",
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
        }
    }

    /// Events fired before `before-request`.
    fn before(self) -> &'static [&'static str] {
        match self {
            Self::Fetch => &[BEFORE_FETCH],
            Self::FetchMany => &[BEFORE_FETCH_MANY],
            Self::Create => &[BEFORE_SAVE, BEFORE_CREATE],
            Self::Update => &[BEFORE_SAVE, BEFORE_UPDATE],
            Self::Destroy => &[BEFORE_DESTROY],
        }
    }

    /// Events fired after `after-request` once the response is absorbed.
    fn after(self) -> &'static [&'static str] {
        match self {
            Self::Fetch => &[AFTER_FETCH],
            Self::FetchMany => &[AFTER_FETCH_MANY],
            Self::Create => &[AFTER_CREATE, AFTER_SAVE],
            Self::Update => &[AFTER_UPDATE, AFTER_SAVE],
            Self::Destroy => &[AFTER_DESTROY],
        }
    }

    /// Events fired after `after-request-error`.
    fn failed(self) -> &'static [&'static str] {
        match self {
            Self::Fetch => &[AFTER_FETCH_ERROR],
            Self::FetchMany => &[AFTER_FETCH_MANY_ERROR],
            Self::Create => &[AFTER_CREATE_ERROR, AFTER_SAVE_ERROR],
            Self::Update => &[AFTER_UPDATE_ERROR, AFTER_SAVE_ERROR],
            Self::Destroy => &[AFTER_DESTROY_ERROR],
        }
    }
}

/// Per-host action bookkeeping.
#[derive(Debug)]
pub(crate) struct ActionState {
    generation: u64,
    phase: ActionPhase,
    completion: Completion,
    last_error: Option<RequestError>,
}

impl Default for ActionState {
    fn default() -> Self {
        Self {
            generation: 0,
            phase: ActionPhase::Idle,
            completion: Completion::settled(Ok(())),
            last_error: None,
        }
    }
}

impl ActionState {
    /// Starts a new action, superseding any action in flight.
    pub(crate) fn begin(&mut self) -> (u64, Settle) {
        let (settle, completion) = Completion::pending();
        let generation = self.adopt(completion);
        (generation, settle)
    }

    /// Starts a new action whose completion is shared with other hosts.
    pub(crate) fn adopt(&mut self, completion: Completion) -> u64 {
        self.generation += 1;
        self.phase = ActionPhase::Requesting;
        self.completion = completion;
        self.generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Records the outcome if `generation` is still current.
    pub(crate) fn finish(&mut self, generation: u64, outcome: &Outcome) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match outcome {
            Ok(()) => {
                self.phase = ActionPhase::Succeeded;
                self.last_error = None;
            }
            Err(error) => {
                self.phase = ActionPhase::Failed;
                self.last_error = Some(error.clone());
            }
        }
        true
    }

    pub(crate) fn phase(&self) -> ActionPhase {
        self.phase
    }

    pub(crate) fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub(crate) fn last_error(&self) -> Option<RequestError> {
        self.last_error.clone()
    }
}

/// A record or collection able to run actions.
pub(crate) trait ActionHost: Clone + Send + Sync + 'static {
    fn model(&self) -> &ModelType;

    fn target(&self) -> Target;

    fn with_action<R>(&self, f: impl FnOnce(&mut ActionState) -> R) -> R;

    /// Runs the full hook chain of this host for `event`.
    fn dispatch_event(&self, event: &mut HookEvent) -> ModelResult<()>;
}

/// Runs `action` for `host`. `on_success` absorbs the response into the host for the
/// given generation and returns false if that generation went stale before it committed.
///
/// Returns once the before-phase is done; the outcome arrives through the returned
/// completion. Before-hook errors settle the action as [`RequestError::Aborted`].
pub(crate) fn perform<H, F>(
    host: &H,
    action: Action,
    request: Request,
    on_success: F,
) -> ModelResult<Completion>
where
    H: ActionHost,
    F: FnOnce(&H, Response, u64) -> Result<bool, RequestError> + Send + 'static,
{
    let runtime = Handle::try_current().map_err(|_| ProgrammerError::NoRuntime)?;
    let (generation, settle) = host.with_action(ActionState::begin);
    let completion = host.with_action(|state| state.completion());
    let label = host.model().label();

    let request = match before_phase(host, action, request) {
        Ok(request) => request,
        Err(error) => {
            let error = RequestError::Aborted(error.to_string());
            warn!(model = %label, action = action.name(), generation, error = %error, "Action aborted");
            let outcome = Err(error);
            host.with_action(|state| state.finish(generation, &outcome));
            settle.settle(outcome);
            return Ok(completion);
        }
    };

    debug!(
        model = %label,
        action = action.name(),
        generation,
        url = %request.url,
        method = %request.method,
        "Action started"
    );

    let host = host.clone();
    runtime.spawn(async move {
        let result = host.model().transport().send(request.clone()).await;

        if !host.with_action(|state| state.is_current(generation)) {
            debug!(model = %label, action = action.name(), generation, "Discarding stale result");
            settle.settle(result.map(|_| ()));
            return;
        }

        let outcome = match result {
            Ok(response) => match succeed(&host, action, &request, response, generation, on_success) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    debug!(model = %label, action = action.name(), generation, "Discarding stale result");
                    settle.settle(Ok(()));
                    return;
                }
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        if let Err(error) = &outcome {
            warn!(
                model = %label,
                action = action.name(),
                generation,
                status = error.status(),
                error = %error,
                "Action failed"
            );
            if host.with_action(|state| state.is_current(generation)) {
                fail(&host, action, &request, error);
            }
        }

        host.with_action(|state| state.finish(generation, &outcome));
        settle.settle(outcome);
    });

    Ok(completion)
}

fn before_phase<H: ActionHost>(host: &H, action: Action, request: Request) -> ModelResult<Request> {
    for name in action.before() {
        let mut event = HookEvent::new(*name, host.target());
        host.dispatch_event(&mut event)?;
    }
    let mut event = HookEvent::new(BEFORE_REQUEST, host.target()).with_request(request);
    host.dispatch_event(&mut event)?;
    event
        .request
        .take()
        .ok_or_else(|| ModelError::custom("a before-request hook removed the request"))
}

/// Absorbs the response, then fires the after events. False when the result went stale.
fn succeed<H, F>(
    host: &H,
    action: Action,
    request: &Request,
    response: Response,
    generation: u64,
    on_success: F,
) -> Result<bool, RequestError>
where
    H: ActionHost,
    F: FnOnce(&H, Response, u64) -> Result<bool, RequestError>,
{
    if !on_success(host, response.clone(), generation)? {
        return Ok(false);
    }
    let names = std::iter::once(AFTER_REQUEST).chain(action.after().iter().copied());
    for name in names {
        notify(
            host,
            HookEvent::new(name, host.target())
                .with_request(request.clone())
                .with_response(response.clone()),
        );
    }
    Ok(true)
}

fn fail<H: ActionHost>(host: &H, action: Action, request: &Request, error: &RequestError) {
    let names = std::iter::once(AFTER_REQUEST_ERROR).chain(action.failed().iter().copied());
    for name in names {
        notify(
            host,
            HookEvent::new(name, host.target())
                .with_request(request.clone())
                .with_error(error.clone()),
        );
    }
}

/// Dispatches an after-phase event. Hook errors are logged and ignored.
pub(crate) fn notify<H: ActionHost>(host: &H, mut event: HookEvent) {
    if let Err(error) = host.dispatch_event(&mut event) {
        warn!(
            model = %host.model().label(),
            event = event.name(),
            error = %error,
            "Ignoring hook error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_actions_make_older_generations_stale() {
        let mut state = ActionState::default();
        assert_eq!(state.phase(), ActionPhase::Idle);
        assert!(state.completion().is_settled());

        let (first, _first_settle) = state.begin();
        let (second, _second_settle) = state.begin();
        assert!(!state.is_current(first));
        assert!(!state.finish(first, &Err(RequestError::TransportClosed)));
        assert_eq!(state.phase(), ActionPhase::Requesting);
        assert_eq!(state.last_error(), None);

        assert!(state.finish(second, &Ok(())));
        assert_eq!(state.phase(), ActionPhase::Succeeded);
    }

    #[test]
    fn save_events_wrap_the_specific_ones() {
        assert_eq!(Action::Create.before(), &[BEFORE_SAVE, BEFORE_CREATE]);
        assert_eq!(Action::Update.after(), &[AFTER_UPDATE, AFTER_SAVE]);
        assert_eq!(Action::Destroy.failed(), &[AFTER_DESTROY_ERROR]);
    }
}
