use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use crate::event::{Event, GenericEvent};

/// Typed subscriber for events of type `E`.
#[async_trait]
pub trait Hook<E: Event>: Send + Sync {
    /// Hook identifier
    fn id(&self) -> &str;
    /// Topics this hook is interested in
    fn topics(&self) -> &[&str];

    async fn on_event(&self, e: &E) -> Result<HookAction>;
}

/// What the registry does after a hook has seen an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Hand the event to the next hook.
    Pass,
    /// Do not notify the remaining hooks.
    Stop,
}

/// Hook trait object for dynamic dispatch over untyped events.
#[async_trait]
pub trait GenericHook: Send + Sync {
    fn id(&self) -> &str;
    fn topics(&self) -> &[&str];
    async fn on_event(&self, e: &GenericEvent) -> Result<HookAction>;
}

/// Adapter to convert typed Hook<E> into GenericHook
struct HookAdapter<E: Event, H: Hook<E>> {
    hook: H,
    _phantom: PhantomData<fn(E)>,
}

#[async_trait]
impl<E: Event, H: Hook<E>> GenericHook for HookAdapter<E, H> {
    fn id(&self) -> &str {
        self.hook.id()
    }

    fn topics(&self) -> &[&str] {
        self.hook.topics()
    }

    async fn on_event(&self, generic_event: &GenericEvent) -> Result<HookAction> {
        let typed_event = E::from_generic_event(generic_event)?;
        self.hook.on_event(&typed_event).await
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Hooks that saw the event.
    pub delivered: usize,
    /// `(hook id, error)` for hooks that failed. A failing hook does not stop dispatch.
    pub failures: Vec<(String, String)>,
}

/// Topic-indexed list of subscribers.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Arc<dyn GenericHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook<E: Event + 'static, H: Hook<E> + 'static>(&mut self, hook: H) {
        let adapter: Arc<dyn GenericHook> = Arc::new(HookAdapter::<E, H> {
            hook,
            _phantom: PhantomData,
        });
        self.add_generic_hook(adapter);
    }

    fn add_generic_hook(&mut self, hook: Arc<dyn GenericHook>) {
        for &topic in hook.topics() {
            self.hooks
                .entry(topic.to_string())
                .or_default()
                .push(hook.clone());
        }
    }

    /// Deliver an event to every hook registered for its topic, in registration order.
    pub async fn trigger<E: Event>(&self, event: &E) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let Some(hooks) = self.hooks.get(event.topic()) else {
            return dispatch;
        };

        let generic_event = event.to_generic_event();
        for hook in hooks {
            match hook.on_event(&generic_event).await {
                Ok(HookAction::Pass) => dispatch.delivered += 1,
                Ok(HookAction::Stop) => {
                    dispatch.delivered += 1;
                    break;
                }
                Err(e) => dispatch.failures.push((hook.id().to_string(), e.to_string())),
            }
        }
        dispatch
    }
}
