//! Ordered composition of request templates.
//!
//! A [`TemplateChain`] runs each hook across its templates in order. The first
//! template that returns something other than [`Transition::Continue`] wins and
//! the remaining templates are skipped for that hook call. Ordering therefore
//! separates early-exit templates (retry on 5xx) from fallbacks that must run
//! last (a default body decoder).
//!
//! A chain is itself a [`RequestTemplate`], so chains nest transparently.
//!
//! # Example
//!
//! ```
//! use courier_core::{Client, RequestTemplate, TemplateChain, Transport};
//!
//! struct Noop;
//! impl<C: Transport, T> RequestTemplate<C, T> for Noop {}
//!
//! struct Echo;
//! impl Client for Echo {
//!     type Request = u32;
//!     type Response = u32;
//!     type Error = std::io::Error;
//!     fn send(&self, request: &u32) -> Result<u32, std::io::Error> {
//!         Ok(*request)
//!     }
//! }
//!
//! let inner: TemplateChain<Echo, u32> = TemplateChain::new().with(Noop);
//! let outer: TemplateChain<Echo, u32> = TemplateChain::new().with(inner).with(Noop);
//! assert_eq!(outer.len(), 2);
//! ```

use crate::client::Transport;
use crate::context::ExecutionContext;
use crate::template::{Hook, RequestTemplate};
use crate::transition::{Transition, TransitionFor};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a template of client `C` producing `T`.
pub type SharedTemplate<C, T> = Arc<dyn RequestTemplate<C, T>>;

/// An ordered list of templates composed into one.
pub struct TemplateChain<C: Transport, T> {
    templates: SmallVec<[SharedTemplate<C, T>; 4]>,
}

impl<C: Transport, T> TemplateChain<C, T> {
    /// Create an empty chain (every hook continues).
    #[must_use]
    pub fn new() -> Self {
        Self {
            templates: SmallVec::new(),
        }
    }

    /// Append a template; it runs after every template already in the chain.
    pub fn push<X>(&mut self, template: X)
    where
        X: RequestTemplate<C, T> + 'static,
    {
        self.templates.push(Arc::new(template));
    }

    /// Append an already shared template.
    pub fn push_shared(&mut self, template: SharedTemplate<C, T>) {
        self.templates.push(template);
    }

    /// Builder form of [`TemplateChain::push`].
    #[must_use]
    pub fn with<X>(mut self, template: X) -> Self
    where
        X: RequestTemplate<C, T> + 'static,
    {
        self.push(template);
        self
    }

    /// Number of templates at this level (nested chains count as one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the chain has no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn first_intervention<F>(
        &self,
        hook: Hook,
        context: &mut ExecutionContext,
        mut call: F,
    ) -> TransitionFor<C, T>
    where
        F: FnMut(&dyn RequestTemplate<C, T>, &mut ExecutionContext) -> TransitionFor<C, T>,
    {
        for (index, template) in self.templates.iter().enumerate() {
            context.enter_template(index);
            let transition = call(template.as_ref(), context);
            context.leave_template();
            if !transition.is_continue() {
                tracing::debug!(
                    %hook,
                    index,
                    transition = %transition.kind(),
                    "Template intervened"
                );
                return transition;
            }
        }
        Transition::Continue
    }
}

impl<C: Transport, T> Default for TemplateChain<C, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Transport, T> Clone for TemplateChain<C, T> {
    fn clone(&self) -> Self {
        Self {
            templates: self.templates.clone(),
        }
    }
}

impl<C: Transport, T> fmt::Debug for TemplateChain<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateChain")
            .field("templates", &self.templates.len())
            .finish()
    }
}

impl<C: Transport, T> FromIterator<SharedTemplate<C, T>> for TemplateChain<C, T> {
    fn from_iter<I: IntoIterator<Item = SharedTemplate<C, T>>>(iter: I) -> Self {
        Self {
            templates: iter.into_iter().collect(),
        }
    }
}

impl<C: Transport, T> RequestTemplate<C, T> for TemplateChain<C, T> {
    fn before_request(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
    ) -> TransitionFor<C, T> {
        self.first_intervention(Hook::BeforeRequest, context, |template, context| {
            template.before_request(context, request)
        })
    }

    fn after_response(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        response: &C::Response,
    ) -> TransitionFor<C, T> {
        self.first_intervention(Hook::AfterResponse, context, |template, context| {
            template.after_response(context, request, response)
        })
    }

    fn after_exception(
        &self,
        context: &mut ExecutionContext,
        request: &C::Request,
        error: &C::Error,
    ) -> TransitionFor<C, T> {
        self.first_intervention(Hook::AfterException, context, |template, context| {
            template.after_exception(context, request, error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::transition::TransitionKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Numbers;

    impl Client for Numbers {
        type Request = u32;
        type Response = u32;
        type Error = std::io::Error;

        fn send(&self, request: &u32) -> Result<u32, std::io::Error> {
            Ok(*request)
        }
    }

    /// Finishes every response with a fixed value and counts its calls.
    struct FinishWith {
        value: u32,
        calls: Arc<AtomicUsize>,
    }

    impl RequestTemplate<Numbers, u32> for FinishWith {
        fn after_response(
            &self,
            _context: &mut ExecutionContext,
            _request: &u32,
            _response: &u32,
        ) -> TransitionFor<Numbers, u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Transition::finish(self.value)
        }
    }

    struct Passive;
    impl RequestTemplate<Numbers, u32> for Passive {}

    fn context() -> ExecutionContext {
        ExecutionContext::new(CancellationToken::new())
    }

    #[test]
    fn empty_chain_continues() {
        let chain: TemplateChain<Numbers, u32> = TemplateChain::new();
        assert!(chain.is_empty());
        assert!(chain.before_request(&mut context(), &1).is_continue());
        assert!(chain.after_response(&mut context(), &1, &1).is_continue());
    }

    #[test]
    fn first_intervention_wins_and_short_circuits() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));
        let chain = TemplateChain::new()
            .with(Passive)
            .with(FinishWith {
                value: 1,
                calls: Arc::clone(&first_calls),
            })
            .with(FinishWith {
                value: 2,
                calls: Arc::clone(&second_calls),
            });

        let transition = chain.after_response(&mut context(), &0, &0);

        assert!(matches!(transition, Transition::Finish(1)));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_chain_is_transparent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = TemplateChain::new().with(Passive).with(FinishWith {
            value: 9,
            calls: Arc::clone(&calls),
        });
        let outer = TemplateChain::new().with(Passive).with(inner);

        let transition = outer.after_response(&mut context(), &0, &0);

        assert_eq!(transition.kind(), TransitionKind::Finish);
        assert!(matches!(transition, Transition::Finish(9)));
    }

    /// Zero-sized; finishes the second time it sees the same execution.
    struct SeenBefore;

    impl RequestTemplate<Numbers, u32> for SeenBefore {
        fn before_request(
            &self,
            context: &mut ExecutionContext,
            _request: &u32,
        ) -> TransitionFor<Numbers, u32> {
            let seen = context.scoped_state::<usize, _>(self);
            *seen += 1;
            if *seen > 1 { Transition::finish(0) } else { Transition::Continue }
        }
    }

    #[test]
    fn boxed_zero_sized_templates_keep_separate_state() {
        let chain: TemplateChain<Numbers, u32> = TemplateChain::new()
            .with(Box::new(SeenBefore))
            .with(Box::new(SeenBefore));
        let mut context = context();

        assert!(chain.before_request(&mut context, &0).is_continue());
        assert!(matches!(chain.before_request(&mut context, &0), Transition::Finish(0)));
    }

    #[test]
    fn collects_from_shared_templates() {
        let shared: SharedTemplate<Numbers, u32> = Arc::new(Passive);
        let chain: TemplateChain<Numbers, u32> =
            vec![Arc::clone(&shared), shared].into_iter().collect();
        assert_eq!(chain.len(), 2);
    }
}
