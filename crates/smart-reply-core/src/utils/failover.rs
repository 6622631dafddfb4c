use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::utils::error::CoreError;

/// Ordered list of interchangeable providers for one capability. Calls go to
/// the first member; on error the next is tried, and the last error surfaces
/// only when every member failed.
pub struct FailoverChain<P: ?Sized> {
    capability: &'static str,
    members: Vec<Arc<P>>,
}

impl<P: ?Sized> Clone for FailoverChain<P> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability,
            members: self.members.clone(),
        }
    }
}

impl<P: ?Sized> FailoverChain<P> {
    pub fn new(capability: &'static str, members: Vec<Arc<P>>) -> Self {
        Self {
            capability,
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub async fn first_success<T, F, Fut>(&self, mut call: F) -> Result<T, CoreError>
    where
        F: FnMut(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut last_error = None;

        for (index, member) in self.members.iter().enumerate() {
            match call(member.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        capability = self.capability,
                        provider_index = index,
                        "Provider failed, trying next: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CoreError::Config(format!("No providers configured for {}", self.capability))
        }))
    }
}
