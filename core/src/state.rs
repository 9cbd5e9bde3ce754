//! The request lifecycle state machine.
//!
//! [`RequestState`] is a tagged union: each variant owns exactly the data it
//! needs while it is active, and every operation consumes the current state
//! and returns the next one. An operation the current state does not allow
//! returns [`IllegalStateTransition`] and the consumed state is discarded.
//!
//! ```text
//!            prepare                 send
//! Created ──────────▶ AwaitingBefore ─────▶ Sending
//!                        ▲    │  ▲             │ complete
//!                 retry  │    │  │ wake        ▼
//!                        │    │  └── Sleeping ◀── AwaitingAfter
//!                        │    │       ▲  sleep      │  │
//!                        └────┼───────┴─────────────┘  │ finish / fail / settle
//!                             ▼                        ▼
//!                     Finished / Failed ◀──────────────┘
//! ```

use crate::error::{IllegalStateTransition, Operation, RequestError, StateName};
use crate::transition::Transition;
use std::fmt;
use std::time::Duration;

/// State of one request execution.
///
/// # Type Parameters
///
/// - `R`: request
/// - `S`: raw transport response
/// - `T`: caller-visible success value
/// - `E`: transport error
pub enum RequestState<R, S, T, E> {
    /// Initial state, holding the request handed to `start`.
    Created {
        /// Request to execute
        request: R,
    },

    /// The `before_request` hooks decide what happens to `request`.
    AwaitingBeforeDecision {
        /// Request about to be sent
        request: R,
        /// Transition resumed after a sleep; replaces the hook call when set
        resume: Option<Transition<R, T, E>>,
    },

    /// The request is with the client.
    Sending {
        /// 1-based send attempt number
        attempt: usize,
    },

    /// The `after_response` / `after_exception` hooks decide on `outcome`.
    AwaitingAfterDecision {
        /// Request that was sent
        request: R,
        /// What the client returned
        outcome: Result<S, E>,
        /// Transition resumed after a sleep; replaces the hook call when set
        resume: Option<Transition<R, T, E>>,
    },

    /// Pausing before `resume` is applied to the stage that asked for it.
    Sleeping {
        /// Length of the pause
        duration: Duration,
        /// Transition applied on wake
        resume: Transition<R, T, E>,
        /// Request of the requesting stage
        request: R,
        /// Outcome of the requesting stage; `None` when it was `before_request`
        outcome: Option<Result<S, E>>,
    },

    /// Terminal success.
    Finished {
        /// Caller-visible value
        value: T,
    },

    /// Terminal failure.
    Failed {
        /// Caller-visible error
        error: RequestError<E>,
    },
}

type StateResult<R, S, T, E> = Result<RequestState<R, S, T, E>, IllegalStateTransition>;

impl<R, S, T, E> RequestState<R, S, T, E> {
    /// Seed a new lifecycle.
    #[must_use]
    pub const fn created(request: R) -> Self {
        Self::Created { request }
    }

    /// Name of the active state.
    #[must_use]
    pub const fn name(&self) -> StateName {
        match self {
            Self::Created { .. } => StateName::Created,
            Self::AwaitingBeforeDecision { .. } => StateName::AwaitingBeforeDecision,
            Self::Sending { .. } => StateName::Sending,
            Self::AwaitingAfterDecision { .. } => StateName::AwaitingAfterDecision,
            Self::Sleeping { .. } => StateName::Sleeping,
            Self::Finished { .. } => StateName::Finished,
            Self::Failed { .. } => StateName::Failed,
        }
    }

    /// Whether this is `Finished` or `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.name().is_terminal()
    }

    /// `Created` → `AwaitingBeforeDecision`.
    ///
    /// # Errors
    ///
    /// Illegal from every other state.
    pub fn prepare(self) -> StateResult<R, S, T, E> {
        match self {
            Self::Created { request } => Ok(Self::AwaitingBeforeDecision {
                request,
                resume: None,
            }),
            other => Err(other.illegal(Operation::Prepare)),
        }
    }

    /// Awaiting a decision → `Sending`, handing out the request to send.
    ///
    /// From `AwaitingAfterDecision` the previous outcome is discarded and the
    /// same request is sent again.
    ///
    /// # Errors
    ///
    /// Illegal unless a decision is awaited.
    pub fn send(self, attempt: usize) -> Result<(Self, R), IllegalStateTransition> {
        match self {
            Self::AwaitingBeforeDecision { request, .. }
            | Self::AwaitingAfterDecision { request, .. } => {
                Ok((Self::Sending { attempt }, request))
            },
            other => Err(other.illegal(Operation::Send)),
        }
    }

    /// `Sending` → `AwaitingAfterDecision` with what the client returned.
    ///
    /// # Errors
    ///
    /// Illegal unless sending; reported as `finish` for a response and `fail`
    /// for a transport error.
    pub fn complete(self, request: R, outcome: Result<S, E>) -> StateResult<R, S, T, E> {
        match self {
            Self::Sending { .. } => Ok(Self::AwaitingAfterDecision {
                request,
                outcome,
                resume: None,
            }),
            other => {
                let operation = if outcome.is_ok() {
                    Operation::Finish
                } else {
                    Operation::Fail
                };
                Err(other.illegal(operation))
            },
        }
    }

    /// Awaiting a decision → `Sleeping`; `resume` is applied on wake.
    ///
    /// # Errors
    ///
    /// Illegal unless a decision is awaited.
    pub fn sleep(self, duration: Duration, resume: Transition<R, T, E>) -> StateResult<R, S, T, E> {
        match self {
            Self::AwaitingBeforeDecision { request, .. } => Ok(Self::Sleeping {
                duration,
                resume,
                request,
                outcome: None,
            }),
            Self::AwaitingAfterDecision {
                request, outcome, ..
            } => Ok(Self::Sleeping {
                duration,
                resume,
                request,
                outcome: Some(outcome),
            }),
            other => Err(other.illegal(Operation::Sleep)),
        }
    }

    /// `Sleeping` → the awaiting state that requested the sleep, with the
    /// pending transition set to be applied next.
    ///
    /// # Errors
    ///
    /// Illegal unless sleeping; reported as `finish`.
    pub fn wake(self) -> StateResult<R, S, T, E> {
        match self {
            Self::Sleeping {
                resume,
                request,
                outcome,
                ..
            } => Ok(match outcome {
                None => Self::AwaitingBeforeDecision {
                    request,
                    resume: Some(resume),
                },
                Some(outcome) => Self::AwaitingAfterDecision {
                    request,
                    outcome,
                    resume: Some(resume),
                },
            }),
            other => Err(other.illegal(Operation::Finish)),
        }
    }

    /// Awaiting a decision → `Finished`.
    ///
    /// # Errors
    ///
    /// Illegal unless a decision is awaited.
    pub fn finish(self, value: T) -> StateResult<R, S, T, E> {
        match self {
            Self::AwaitingBeforeDecision { .. } | Self::AwaitingAfterDecision { .. } => {
                Ok(Self::Finished { value })
            },
            other => Err(other.illegal(Operation::Finish)),
        }
    }

    /// Awaiting a decision → `Failed`.
    ///
    /// # Errors
    ///
    /// Illegal unless a decision is awaited.
    pub fn fail(self, error: RequestError<E>) -> StateResult<R, S, T, E> {
        match self {
            Self::AwaitingBeforeDecision { .. } | Self::AwaitingAfterDecision { .. } => {
                Ok(Self::Failed { error })
            },
            other => Err(other.illegal(Operation::Fail)),
        }
    }

    /// Awaiting a decision → `AwaitingBeforeDecision` with a new request: the
    /// lifecycle restarts and `before_request` runs again.
    ///
    /// # Errors
    ///
    /// Illegal unless a decision is awaited.
    pub fn retry(self, request: R) -> StateResult<R, S, T, E> {
        match self {
            Self::AwaitingBeforeDecision { .. } | Self::AwaitingAfterDecision { .. } => {
                Ok(Self::AwaitingBeforeDecision {
                    request,
                    resume: None,
                })
            },
            other => Err(other.illegal(Operation::Retry)),
        }
    }

    /// Default `after_*` behavior: finish with the response, or fail with the
    /// transport error.
    ///
    /// # Errors
    ///
    /// Illegal unless `AwaitingAfterDecision`.
    pub fn settle(self) -> StateResult<R, S, T, E>
    where
        T: From<S>,
    {
        match self {
            Self::AwaitingAfterDecision {
                outcome: Ok(response),
                ..
            } => Ok(Self::Finished {
                value: T::from(response),
            }),
            Self::AwaitingAfterDecision {
                outcome: Err(error),
                ..
            } => Ok(Self::Failed {
                error: RequestError::Transport(error),
            }),
            other => Err(other.illegal(Operation::Finish)),
        }
    }

    /// Force a non-terminal state into `Failed`. Terminal states are kept.
    ///
    /// Used for cancellation, which may arrive while the client is busy or
    /// while sleeping.
    #[must_use]
    pub fn abort(self, error: RequestError<E>) -> Self {
        if self.is_terminal() {
            self
        } else {
            Self::Failed { error }
        }
    }

    /// Take the transition resumed after a sleep, if any.
    pub fn take_resume(&mut self) -> Option<Transition<R, T, E>> {
        match self {
            Self::AwaitingBeforeDecision { resume, .. }
            | Self::AwaitingAfterDecision { resume, .. } => resume.take(),
            _ => None,
        }
    }

    fn illegal(&self, operation: Operation) -> IllegalStateTransition {
        IllegalStateTransition::new(operation, self.name())
    }
}

impl<R, S, T, E> fmt::Debug for RequestState<R, S, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending { attempt } => f
                .debug_struct("RequestState::Sending")
                .field("attempt", attempt)
                .finish(),
            Self::Sleeping {
                duration, resume, ..
            } => f
                .debug_struct("RequestState::Sleeping")
                .field("duration", duration)
                .field("resume", resume)
                .finish_non_exhaustive(),
            Self::Failed { error } => f
                .debug_struct("RequestState::Failed")
                .field("code", &error.code())
                .finish(),
            other => write!(f, "RequestState::{:?}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use proptest::prelude::*;

    type State = RequestState<&'static str, u32, u32, std::io::Error>;

    const ALL_STATES: [StateName; 7] = [
        StateName::Created,
        StateName::AwaitingBeforeDecision,
        StateName::Sending,
        StateName::AwaitingAfterDecision,
        StateName::Sleeping,
        StateName::Finished,
        StateName::Failed,
    ];

    fn sample(name: StateName) -> State {
        match name {
            StateName::Created => State::created("req"),
            StateName::AwaitingBeforeDecision => State::AwaitingBeforeDecision {
                request: "req",
                resume: None,
            },
            StateName::Sending => State::Sending { attempt: 1 },
            StateName::AwaitingAfterDecision => State::AwaitingAfterDecision {
                request: "req",
                outcome: Ok(200),
                resume: None,
            },
            StateName::Sleeping => State::Sleeping {
                duration: Duration::from_millis(1),
                resume: Transition::Continue,
                request: "req",
                outcome: None,
            },
            StateName::Finished => State::Finished { value: 1 },
            StateName::Failed => State::Failed {
                error: RequestError::Cancelled,
            },
        }
    }

    /// Applies `operation` and returns the resulting state name.
    fn apply(state: State, operation: Operation) -> Result<StateName, IllegalStateTransition> {
        let next = match operation {
            Operation::Prepare => state.prepare(),
            Operation::Send => state.send(1).map(|(next, _)| next),
            Operation::Sleep => state.sleep(Duration::from_millis(1), Transition::Continue),
            Operation::Finish => state.finish(7),
            Operation::Fail => state.fail(RequestError::user("boom")),
            Operation::Retry => state.retry("again"),
        };
        next.map(|next| next.name())
    }

    fn legal(from: StateName, operation: Operation) -> Option<StateName> {
        use Operation as Op;
        use StateName as S;
        match (from, operation) {
            (S::Created, Op::Prepare) => Some(S::AwaitingBeforeDecision),
            (S::AwaitingBeforeDecision | S::AwaitingAfterDecision, Op::Send) => Some(S::Sending),
            (S::AwaitingBeforeDecision | S::AwaitingAfterDecision, Op::Sleep) => Some(S::Sleeping),
            (S::AwaitingBeforeDecision | S::AwaitingAfterDecision, Op::Finish) => Some(S::Finished),
            (S::AwaitingBeforeDecision | S::AwaitingAfterDecision, Op::Fail) => Some(S::Failed),
            (S::AwaitingBeforeDecision | S::AwaitingAfterDecision, Op::Retry) => {
                Some(S::AwaitingBeforeDecision)
            },
            _ => None,
        }
    }

    fn arb_state_name() -> impl Strategy<Value = StateName> {
        proptest::sample::select(ALL_STATES.to_vec())
    }

    fn arb_operation() -> impl Strategy<Value = Operation> {
        proptest::sample::select(vec![
            Operation::Prepare,
            Operation::Send,
            Operation::Sleep,
            Operation::Finish,
            Operation::Fail,
            Operation::Retry,
        ])
    }

    proptest! {
        #[test]
        fn transition_table_is_enforced(from in arb_state_name(), operation in arb_operation()) {
            let outcome = apply(sample(from), operation);
            match legal(from, operation) {
                Some(expected) => prop_assert_eq!(outcome, Ok(expected)),
                None => prop_assert_eq!(
                    outcome,
                    Err(IllegalStateTransition::new(operation, from))
                ),
            }
        }
    }

    #[test]
    fn complete_only_from_sending() {
        let next = sample(StateName::Sending).complete("req", Ok(200));
        assert_eq!(next.map(|s| s.name()), Ok(StateName::AwaitingAfterDecision));

        let error = sample(StateName::Created)
            .complete("req", Err(std::io::Error::other("down")))
            .map(|s| s.name());
        assert_eq!(
            error,
            Err(IllegalStateTransition::new(Operation::Fail, StateName::Created))
        );

        let response = sample(StateName::Sending)
            .complete("req", Ok(1))
            .and_then(|s| s.complete("req", Ok(2)))
            .map(|s| s.name());
        assert_eq!(
            response,
            Err(IllegalStateTransition::new(
                Operation::Finish,
                StateName::AwaitingAfterDecision
            ))
        );
    }

    #[test]
    fn wake_returns_to_requesting_stage_with_resume() {
        let sleeping = sample(StateName::AwaitingAfterDecision)
            .sleep(Duration::from_millis(3), Transition::retry("later"));
        let Ok(sleeping) = sleeping else {
            unreachable!("sleep is legal after a response");
        };
        let Ok(mut awake) = sleeping.wake() else {
            unreachable!("wake is legal while sleeping");
        };

        assert_eq!(awake.name(), StateName::AwaitingAfterDecision);
        assert!(matches!(awake.take_resume(), Some(Transition::Retry("later"))));
        assert!(awake.take_resume().is_none());
    }

    #[test]
    fn wake_is_illegal_when_not_sleeping() {
        let result = sample(StateName::Sending).wake().map(|s| s.name());
        assert_eq!(
            result,
            Err(IllegalStateTransition::new(Operation::Finish, StateName::Sending))
        );
    }

    #[test]
    fn settle_maps_outcome_to_terminal_state() {
        let finished = sample(StateName::AwaitingAfterDecision).settle();
        assert!(matches!(finished, Ok(State::Finished { value: 200 })));

        let failed = State::AwaitingAfterDecision {
            request: "req",
            outcome: Err(std::io::Error::other("reset")),
            resume: None,
        }
        .settle();
        match failed {
            Ok(State::Failed { error }) => assert_eq!(error.code(), ErrorCode::Transport),
            other => unreachable!("unexpected {other:?}"),
        }

        let illegal = sample(StateName::AwaitingBeforeDecision).settle().map(|s| s.name());
        assert_eq!(
            illegal,
            Err(IllegalStateTransition::new(
                Operation::Finish,
                StateName::AwaitingBeforeDecision
            ))
        );
    }

    #[test]
    fn abort_keeps_terminal_states() {
        for name in ALL_STATES {
            let aborted = sample(name).abort(RequestError::Cancelled);
            if name == StateName::Finished {
                assert_eq!(aborted.name(), StateName::Finished);
            } else {
                assert_eq!(aborted.name(), StateName::Failed);
            }
        }
    }
}
