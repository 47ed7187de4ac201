//! Handler sets dispatched by the listener.

use std::fmt;

use super::{ChangeEvent, ChangeKind};

/// Callback invoked for a delivered change.
pub type ChangeHandler = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handlers registered for one subscription.
///
/// The variant is fixed when the set is built, so dispatch never has to
/// probe which callbacks happen to be present.
pub enum ChangeHandlers {
    /// One handler receives every change kind.
    CatchAll(ChangeHandler),
    /// Per-kind handlers; kinds without a handler are dropped.
    PerKind {
        /// Handler for inserts.
        insert: Option<ChangeHandler>,
        /// Handler for updates.
        update: Option<ChangeHandler>,
        /// Handler for deletes.
        delete: Option<ChangeHandler>,
    },
}

impl ChangeHandlers {
    /// Route every change to `handler`.
    pub fn catch_all<F>(handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::CatchAll(Box::new(handler))
    }

    /// Start building a handler set.
    pub fn builder() -> ChangeHandlersBuilder {
        ChangeHandlersBuilder::default()
    }

    /// Invoke the handler responsible for `event`. Returns whether one ran.
    pub(crate) fn dispatch(&self, event: &ChangeEvent) -> bool {
        let handler = match self {
            Self::CatchAll(handler) => Some(handler),
            Self::PerKind {
                insert,
                update,
                delete,
            } => match event.kind() {
                ChangeKind::Insert => insert.as_ref(),
                ChangeKind::Update => update.as_ref(),
                ChangeKind::Delete => delete.as_ref(),
            },
        };
        let Some(handler) = handler else {
            return false;
        };
        handler(event);
        true
    }
}

impl fmt::Debug for ChangeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CatchAll(_) => f.write_str("CatchAll(..)"),
            Self::PerKind {
                insert,
                update,
                delete,
            } => f
                .debug_struct("PerKind")
                .field("insert", &insert.is_some())
                .field("update", &update.is_some())
                .field("delete", &delete.is_some())
                .finish(),
        }
    }
}

/// Collects optional callbacks and resolves them into [`ChangeHandlers`].
///
/// A catch-all takes precedence: when one is supplied the per-kind
/// callbacks are discarded.
///
/// # Examples
/// ```
/// use gradesync::domain::listener::ChangeHandlers;
///
/// let handlers = ChangeHandlers::builder()
///     .on_update(|_| {})
///     .on_any(|_| {})
///     .build();
/// assert!(matches!(handlers, ChangeHandlers::CatchAll(_)));
/// ```
#[derive(Default)]
pub struct ChangeHandlersBuilder {
    any: Option<ChangeHandler>,
    insert: Option<ChangeHandler>,
    update: Option<ChangeHandler>,
    delete: Option<ChangeHandler>,
}

impl ChangeHandlersBuilder {
    /// Handle every change kind.
    #[must_use]
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.any = Some(Box::new(handler));
        self
    }

    /// Handle inserts.
    #[must_use]
    pub fn on_insert<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.insert = Some(Box::new(handler));
        self
    }

    /// Handle updates.
    #[must_use]
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.update = Some(Box::new(handler));
        self
    }

    /// Handle deletes.
    #[must_use]
    pub fn on_delete<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.delete = Some(Box::new(handler));
        self
    }

    /// Resolve the collected callbacks.
    pub fn build(self) -> ChangeHandlers {
        match self.any {
            Some(handler) => ChangeHandlers::CatchAll(handler),
            None => ChangeHandlers::PerKind {
                insert: self.insert,
                update: self.update,
                delete: self.delete,
            },
        }
    }
}
