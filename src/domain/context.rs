//! Operation Context
//!
//! Who is acting, and the correlation id used to tie log lines together.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Investor(i64),
    Admin(String),
    System(String),
}

impl Actor {
    /// Name stamped into `cancelled_by` and audit rows.
    pub fn name(&self) -> String {
        match self {
            Actor::Investor(id) => format!("investor:{}", id),
            Actor::Admin(name) => name.clone(),
            Actor::System(name) => name.clone(),
        }
    }

    pub fn investor_id(&self) -> Option<i64> {
        match self {
            Actor::Investor(id) => Some(*id),
            _ => None,
        }
    }
}

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub actor: Actor,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            correlation_id: None,
        }
    }

    pub fn investor(investor_id: i64) -> Self {
        Self::new(Actor::Investor(investor_id))
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(Actor::Admin(name.into()))
    }

    pub fn system(name: impl Into<String>) -> Self {
        Self::new(Actor::System(name.into()))
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    pub fn actor_name(&self) -> String {
        self.actor.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_names() {
        assert_eq!(Actor::Investor(42).name(), "investor:42");
        assert_eq!(Actor::Admin("ops.alice".to_string()).name(), "ops.alice");
        assert_eq!(OperationContext::system("system").actor_name(), "system");
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::admin("ops");
        assert!(context.correlation_id.is_none());

        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));

        // Calling again should return the same ID
        assert_eq!(context.ensure_correlation_id(), id);
    }

    #[test]
    fn test_investor_id() {
        assert_eq!(OperationContext::investor(7).actor.investor_id(), Some(7));
        assert_eq!(OperationContext::admin("ops").actor.investor_id(), None);
    }
}
