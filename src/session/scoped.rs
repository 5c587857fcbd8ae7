//! Task-local resource slot.
//!
//! Wraps a `tokio::task_local!` key holding `RefCell<Option<T>>` so each
//! logical task sees at most one bound value. Scopes opened with
//! [`ScopedResource::scope`] shadow any outer scope for the duration of the
//! wrapped future, and the slot is dropped together with that future.
//!
//! ```ignore
//! tokio::task_local! {
//!     static TENANT_SLOT: RefCell<Option<String>>;
//! }
//!
//! static TENANT: ScopedResource<String> = ScopedResource::new("tenant", &TENANT_SLOT);
//!
//! TENANT.scope(async {
//!     TENANT.bind("acme".to_string())?;
//!     assert_eq!(TENANT.current()?, "acme");
//!     Ok::<_, ScopeError>(())
//! })
//! .await?;
//! ```

use std::cell::RefCell;
use std::future::Future;

use thiserror::Error;
use tokio::task::LocalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("no `{resource}` scope is active for the current task")]
    NoScope { resource: &'static str },
    #[error("no `{resource}` is bound to the current task")]
    Unbound { resource: &'static str },
    #[error("a `{resource}` is already bound to the current task; clear it first")]
    AlreadyBound { resource: &'static str },
}

/// Execution-context-local cell holding at most one `T` per task.
pub struct ScopedResource<T: 'static> {
    name: &'static str,
    slot: &'static LocalKey<RefCell<Option<T>>>,
}

impl<T: 'static> ScopedResource<T> {
    pub const fn new(name: &'static str, slot: &'static LocalKey<RefCell<Option<T>>>) -> Self {
        Self { name, slot }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `future` with a fresh, empty slot for this resource.
    pub async fn scope<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        self.slot.scope(RefCell::new(None), future).await
    }

    /// Run `future` with a slot already holding `value`.
    pub async fn scope_with<F>(&self, value: T, future: F) -> F::Output
    where
        F: Future,
    {
        self.slot.scope(RefCell::new(Some(value)), future).await
    }

    /// Whether the current task runs inside a scope opened for this resource.
    pub fn in_scope(&self) -> bool {
        self.slot.try_with(|_| ()).is_ok()
    }

    pub fn is_bound(&self) -> bool {
        self.slot
            .try_with(|slot| slot.borrow().is_some())
            .unwrap_or(false)
    }

    /// Bind `value` to the current task.
    pub fn bind(&self, value: T) -> Result<(), ScopeError> {
        let resource = self.name;
        self.slot
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.is_some() {
                    return Err(ScopeError::AlreadyBound { resource });
                }
                *slot = Some(value);
                Ok(())
            })
            .unwrap_or(Err(ScopeError::NoScope { resource }))
    }

    /// Remove the bound value, if any. Calling this outside a scope or on an
    /// empty slot is a no-op.
    pub fn clear(&self) -> Option<T> {
        self.slot
            .try_with(|slot| slot.borrow_mut().take())
            .ok()
            .flatten()
    }
}

impl<T: Clone + 'static> ScopedResource<T> {
    /// Clone of the value bound to the current task.
    pub fn current(&self) -> Result<T, ScopeError> {
        let resource = self.name;
        self.slot
            .try_with(|slot| slot.borrow().clone())
            .ok()
            .flatten()
            .ok_or(ScopeError::Unbound { resource })
    }
}

impl<T: 'static> Clone for ScopedResource<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for ScopedResource<T> {}

impl<T: 'static> std::fmt::Debug for ScopedResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedResource")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}
