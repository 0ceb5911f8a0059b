//! Request context for attribution.
//!
//! The [`Ctx`] struct carries request-scoped identification into every BMC
//! call. Today it only feeds audit logging; keeping it on every signature
//! leaves room for per-caller authorization later without churn.

/// Request context containing caller identification.
#[derive(Clone, Debug)]
pub struct Ctx {
    caller_id: i64,
}

impl Ctx {
    /// Creates a root context for system-level operations.
    ///
    /// The root context has `caller_id = 0` and is used for background
    /// tasks, migrations, and operations not tied to a specific caller.
    pub fn root_ctx() -> Self {
        Ctx { caller_id: 0 }
    }

    /// Creates a new context for a specific caller.
    pub fn new(caller_id: i64) -> Self {
        Ctx { caller_id }
    }

    /// Returns the caller ID associated with this context.
    pub fn caller_id(&self) -> i64 {
        self.caller_id
    }
}
