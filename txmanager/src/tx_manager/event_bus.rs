use tracing::trace;

type Predicate<E, C> = Box<dyn Fn(&E, &C) -> bool + Send>;
type RemoveIf<C> = Box<dyn Fn(&C) -> bool + Send>;
type Handler<E, C, A> = Box<dyn FnMut(&E, &C) -> A + Send>;

/// A listener on an [`EventBus`] with delivery-time guards.
pub(crate) struct Subscription<E, C, A> {
    label: &'static str,
    once: bool,
    execute_if: Option<Predicate<E, C>>,
    remove_if: Option<RemoveIf<C>>,
    handler: Handler<E, C, A>,
}

impl<E, C, A> Subscription<E, C, A> {
    pub(crate) fn new<F>(label: &'static str, handler: F) -> Self
    where
        F: FnMut(&E, &C) -> A + Send + 'static,
    {
        Self {
            label,
            once: false,
            execute_if: None,
            remove_if: None,
            handler: Box::new(handler),
        }
    }

    /// Only run the handler when `predicate` holds for the delivered event.
    pub(crate) fn execute_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, &C) -> bool + Send + 'static,
    {
        self.execute_if = Some(Box::new(predicate));
        self
    }

    /// Drop the subscription, without running it, once `predicate` holds.
    pub(crate) fn remove_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + 'static,
    {
        self.remove_if = Some(Box::new(predicate));
        self
    }

    /// Drop the subscription after its first execution.
    pub(crate) fn once(mut self) -> Self {
        self.once = true;
        self
    }

    fn should_remove(&self, ctx: &C) -> bool {
        self.remove_if.as_ref().is_some_and(|remove| remove(ctx))
    }

    fn should_execute(&self, event: &E, ctx: &C) -> bool {
        self.execute_if
            .as_ref()
            .is_none_or(|execute| execute(event, ctx))
    }
}

/// Typed publish/subscribe channel whose handlers produce actions for the
/// owner to apply after delivery.
///
/// Guards are evaluated against `C` when an event is delivered, not when the
/// subscription is registered.
pub(crate) struct EventBus<E, C, A> {
    name: &'static str,
    subscriptions: Vec<Subscription<E, C, A>>,
}

impl<E, C, A> EventBus<E, C, A> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            subscriptions: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self, subscription: Subscription<E, C, A>) {
        trace!(bus = self.name, label = subscription.label, "subscribe");
        self.subscriptions.push(subscription);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Deliver `event` to every live subscription, in registration order.
    pub(crate) fn emit(&mut self, event: &E, ctx: &C) -> Vec<A> {
        let name = self.name;
        let mut actions = Vec::new();
        self.subscriptions.retain_mut(|subscription| {
            if subscription.should_remove(ctx) {
                trace!(bus = name, label = subscription.label, "subscription removed");
                return false;
            }
            if !subscription.should_execute(event, ctx) {
                return true;
            }
            trace!(bus = name, label = subscription.label, "subscription executed");
            actions.push((subscription.handler)(event, ctx));
            !subscription.once
        });
        actions
    }
}
