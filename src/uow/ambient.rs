//! Request-scoped access to the unit-of-work registry.
//!
//! Code running inside [`scope`] can reach the registry of its request
//! without threading it through every call.

use std::future::Future;

use super::{SharedUnitOfWork, UnitOfWorkRegistry};
use crate::error::{AppError, Result};

tokio::task_local! {
    static REGISTRY: UnitOfWorkRegistry;
}

/// Runs `future` with `registry` as the ambient registry.
pub async fn scope<Fut>(registry: UnitOfWorkRegistry, future: Fut) -> Fut::Output
where
    Fut: Future,
{
    REGISTRY.scope(registry, future).await
}

pub fn registry() -> Result<UnitOfWorkRegistry> {
    REGISTRY
        .try_with(UnitOfWorkRegistry::clone)
        .map_err(|_| AppError::NotInUnitOfWork)
}

/// The unit of work started in the current scope.
pub fn current() -> Result<SharedUnitOfWork> {
    REGISTRY
        .try_with(UnitOfWorkRegistry::current)
        .map_err(|_| AppError::NotInUnitOfWork)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_scope_is_not_in_unit_of_work() {
        assert!(matches!(registry(), Err(AppError::NotInUnitOfWork)));
        assert!(matches!(current(), Err(AppError::NotInUnitOfWork)));
    }
}
